mod cache;
mod client;
mod collapse;
mod config;
mod handler;
mod metrics;
mod proxy;
mod routes;
mod state;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::client::LbClient;
use crate::config::{EdgeConfig, LogFormat};
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let config = EdgeConfig::load().context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;
    init_tracing(&config);

    info!("Starting shipway edge v{}", env!("CARGO_PKG_VERSION"));
    info!("Load balancer: {}", config.lb_url);
    info!("Control plane: {}", config.orchestrator_url);

    let lb = Arc::new(
        LbClient::new(&config.lb_url, config.lb_timeout())
            .map_err(|e| anyhow::anyhow!("{e}"))
            .context("Failed to build load-balancer client")?,
    );
    let state = AppState::new(config.clone(), lb).context("Failed to build application state")?;

    // Expired cache entries die on read; the sweep only bounds memory
    // for keys nobody asks about again.
    {
        let cache = state.cache.clone();
        let mut shutdown_rx = state.shutdown_tx.subscribe();
        let sweep_interval = Duration::from_secs(config.cache_sweep_interval_s.max(1));
        tokio::spawn(async move {
            let mut interval = time::interval(sweep_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let removed = cache.clear_expired();
                        if removed > 0 {
                            debug!(removed, "swept expired routing cache entries");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
    }

    let app = routes::build_router(state.clone());

    let addr: SocketAddr = config
        .bind_address
        .parse()
        .context("Invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    info!("✓ Edge router is ready!");
    info!("Listening on: http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    state.shutdown();
    info!("Edge router shut down gracefully");
    Ok(())
}

fn init_tracing(config: &EdgeConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    match config.log_format {
        LogFormat::Json => {
            let layer = fmt::layer().json().with_target(true);
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
        LogFormat::Pretty => {
            let layer = fmt::layer().with_target(true).with_file(false);
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
