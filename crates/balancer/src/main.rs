mod breaker;
mod config;
mod discovery;
mod error;
mod fallback;
mod routes;
mod selector;
mod service;
mod state;
mod watcher;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::{LbConfig, LogFormat};
use crate::service::build_load_balancer;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let config = LbConfig::load().context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;
    init_tracing(&config);

    info!("Starting shipway balancer v{}", env!("CARGO_PKG_VERSION"));
    info!("Registry: {}", config.registry_url);

    let lb = build_load_balancer(
        &config.registry_url,
        Duration::from_millis(config.lb_registry_timeout_ms),
        config.circuit_failure_threshold,
        Duration::from_secs(config.circuit_reset_timeout_s),
        Duration::from_secs(config.fallback_ttl_s),
        Duration::from_secs(config.watch_wait_s),
        config.target_host.clone(),
        config.cache_default_ttl_s,
    )
    .map_err(|e| anyhow::anyhow!("{e}"))
    .context("Failed to build load balancer")?;

    let state = AppState::new(config.clone(), Arc::new(lb));
    let app = routes::build_router(state.clone());

    let addr: SocketAddr = config
        .bind_address
        .parse()
        .context("Invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    info!("✓ Balancer is ready!");
    info!("Listening on: http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    state.shutdown();
    info!("Balancer shut down gracefully");
    Ok(())
}

fn init_tracing(config: &LbConfig) {
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
