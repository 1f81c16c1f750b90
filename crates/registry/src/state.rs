use crate::config::RegistryConfig;
use crate::store::RegistryStore;
use lifecycle::ConsumerCounters;
use std::sync::Arc;

/// Shared application state (thread-safe).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RegistryConfig>,
    pub store: Arc<RegistryStore>,
    pub consumer_counters: Arc<ConsumerCounters>,
    /// Watch channel for shutdown signaling; receivers always observe
    /// the latest value even when they subscribe late.
    pub shutdown_tx: tokio::sync::watch::Sender<bool>,
}

impl AppState {
    pub fn new(
        config: RegistryConfig,
        store: Arc<RegistryStore>,
        consumer_counters: Arc<ConsumerCounters>,
        shutdown_tx: tokio::sync::watch::Sender<bool>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            consumer_counters,
            shutdown_tx,
        }
    }

    /// Signal shutdown to all background loops.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
