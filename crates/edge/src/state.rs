use crate::cache::RoutingCache;
use crate::client::LbClient;
use crate::collapse::SingleFlight;
use crate::config::EdgeConfig;
use crate::metrics::MetricsCollector;
use std::sync::Arc;

/// Shared application state (thread-safe).
///
/// Outbound HTTP uses one pooled client per target: the balancer client
/// lives inside [`LbClient`], `backend_http` carries user traffic, and
/// `control_http` the /api passthrough.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<EdgeConfig>,
    pub cache: Arc<RoutingCache>,
    pub flights: Arc<SingleFlight>,
    pub metrics: Arc<MetricsCollector>,
    pub lb: Arc<LbClient>,
    pub backend_http: reqwest::Client,
    pub control_http: reqwest::Client,
    pub shutdown_tx: tokio::sync::watch::Sender<bool>,
}

impl AppState {
    pub fn new(config: EdgeConfig, lb: Arc<LbClient>) -> anyhow::Result<Self> {
        let (shutdown_tx, _) = tokio::sync::watch::channel(false);
        Ok(Self {
            config: Arc::new(config),
            cache: Arc::new(RoutingCache::new()),
            flights: Arc::new(SingleFlight::new()),
            metrics: Arc::new(MetricsCollector::new()),
            lb,
            backend_http: reqwest::Client::builder().build()?,
            control_http: reqwest::Client::builder().build()?,
            shutdown_tx,
        })
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
