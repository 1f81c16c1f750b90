mod backend;
mod config;
mod error;
mod ingest;
mod probe;
mod routes;
mod state;
mod store;

use anyhow::{Context, Result};
use lifecycle::{ConsumerConfig, EventConsumer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::{LogFormat, RegistryConfig};
use crate::ingest::RegistryEventHandler;
use crate::probe::{HealthProber, ProbeConfig};
use crate::state::AppState;
use crate::store::RegistryStore;

#[tokio::main]
async fn main() -> Result<()> {
    let config = RegistryConfig::load().context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;
    init_tracing(&config);

    info!("Starting shipway registry v{}", env!("CARGO_PKG_VERSION"));
    info!("Server will bind to: {}", config.bind_address);

    let (shutdown_tx, _) = tokio::sync::watch::channel(false);
    let store = Arc::new(RegistryStore::new());

    // Event ingestion: its own consumer group so the billing ledger's
    // offsets are independent.
    let consumer_config = ConsumerConfig::new(
        config.kafka_bootstrap_servers.clone(),
        config.kafka_consumer_group.clone(),
    );
    let consumer = EventConsumer::new(&consumer_config, shutdown_tx.subscribe())
        .context("Failed to create event consumer")?;
    let consumer_counters = consumer.counters();
    let handler = Arc::new(RegistryEventHandler::new(
        store.clone(),
        config.probe_host.clone(),
    ));
    let consumer_task = tokio::spawn(consumer.run(handler));
    {
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let result = consumer_task.await;
            if !*shutdown_rx.borrow() {
                error!(?result, "event consumer terminated unexpectedly");
                std::process::exit(2);
            }
        });
    }

    let prober = HealthProber::new(
        store.clone(),
        ProbeConfig {
            probe_host: config.probe_host.clone(),
            interval: Duration::from_secs(config.health_check_interval_s),
            timeout: Duration::from_secs(config.health_check_timeout_s),
            deregister_critical_after: Duration::from_secs(config.deregister_critical_after_s),
        },
        shutdown_tx.subscribe(),
    );
    tokio::spawn(prober.run());
    info!(
        "✓ Health prober started (interval={}s, deregister_after={}s)",
        config.health_check_interval_s, config.deregister_critical_after_s
    );

    let state = AppState::new(
        config.clone(),
        store,
        consumer_counters,
        shutdown_tx.clone(),
    );
    let app = routes::build_router(state.clone());

    let addr: SocketAddr = config
        .bind_address
        .parse()
        .context("Invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    info!("✓ Registry is ready!");
    info!("Listening on: http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    state.shutdown();
    info!("Registry shut down gracefully");
    Ok(())
}

fn init_tracing(config: &RegistryConfig) {
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
