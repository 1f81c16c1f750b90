mod config;
mod handler;
mod ledger;
mod routes;
mod state;
mod summary;
mod usage;

use anyhow::{Context, Result};
use lifecycle::{ConsumerConfig, EventConsumer};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::{BillingConfig, LogFormat};
use crate::handler::BillingEventHandler;
use crate::ledger::UsageLedger;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let config = BillingConfig::load().context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;
    init_tracing(&config);

    info!("Starting shipway billing v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Rate: {} per started minute",
        config.billing_rate_per_minute
    );

    let (shutdown_tx, _) = tokio::sync::watch::channel(false);
    let ledger = Arc::new(UsageLedger::new(config.billing_rate_per_minute));

    let consumer_config = ConsumerConfig::new(
        config.kafka_bootstrap_servers.clone(),
        config.kafka_consumer_group.clone(),
    );
    let consumer = EventConsumer::new(&consumer_config, shutdown_tx.subscribe())
        .context("Failed to create event consumer")?;
    let consumer_counters = consumer.counters();
    let handler = Arc::new(BillingEventHandler::new(ledger.clone()));
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

    let state = AppState {
        config: Arc::new(config.clone()),
        ledger,
        consumer_counters,
        shutdown_tx: shutdown_tx.clone(),
    };
    let app = routes::build_router(state.clone());

    let addr: SocketAddr = config
        .bind_address
        .parse()
        .context("Invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    info!("✓ Billing is ready!");
    info!("Listening on: http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    state.shutdown();
    info!("Billing shut down gracefully");
    Ok(())
}

fn init_tracing(config: &BillingConfig) {
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
