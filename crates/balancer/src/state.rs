use crate::config::LbConfig;
use crate::service::LoadBalancer;
use std::sync::Arc;

/// Shared application state (thread-safe).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<LbConfig>,
    pub lb: Arc<LoadBalancer>,
    pub shutdown_tx: tokio::sync::watch::Sender<bool>,
}

impl AppState {
    pub fn new(config: LbConfig, lb: Arc<LoadBalancer>) -> Self {
        let (shutdown_tx, _) = tokio::sync::watch::channel(false);
        Self {
            config: Arc::new(config),
            lb,
            shutdown_tx,
        }
    }

    /// Stop the watch loops and signal background tasks.
    pub fn shutdown(&self) {
        self.lb.stop();
        let _ = self.shutdown_tx.send(true);
    }
}
