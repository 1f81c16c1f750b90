use crate::config::BillingConfig;
use crate::ledger::UsageLedger;
use lifecycle::ConsumerCounters;
use std::sync::Arc;

/// Shared application state (thread-safe).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<BillingConfig>,
    pub ledger: Arc<UsageLedger>,
    pub consumer_counters: Arc<ConsumerCounters>,
    pub shutdown_tx: tokio::sync::watch::Sender<bool>,
}

impl AppState {
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
