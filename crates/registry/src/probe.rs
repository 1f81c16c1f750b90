//! TCP health prober.
//!
//! Probes every registered backend on a fixed interval by opening a TCP
//! connection to the container host's mapped port. Outcomes feed
//! [`RegistryStore::record_probe`]; backends that stay critical past the
//! configured deadline are deregistered automatically.

use crate::store::{ProbeTarget, RegistryStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Container-host hostname probes connect to.
    pub probe_host: String,
    pub interval: Duration,
    pub timeout: Duration,
    pub deregister_critical_after: Duration,
}

pub struct HealthProber {
    store: Arc<RegistryStore>,
    config: ProbeConfig,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

impl HealthProber {
    pub fn new(
        store: Arc<RegistryStore>,
        config: ProbeConfig,
        shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            config,
            shutdown_rx,
        }
    }

    /// Run the probe loop until shutdown is signaled.
    pub async fn run(mut self) {
        info!(
            probe_host = %self.config.probe_host,
            interval_s = self.config.interval.as_secs(),
            "health prober started"
        );

        let mut interval = time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.probe_all().await;
                    self.reap_critical();
                }
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!("health prober stopped");
    }

    /// Probe every backend concurrently. Targets are snapshotted first
    /// so no lock is held across connects.
    async fn probe_all(&self) {
        let targets = self.store.probe_targets();
        if targets.is_empty() {
            return;
        }
        debug!(count = targets.len(), "probing backends");

        let mut tasks = Vec::with_capacity(targets.len());
        for target in targets {
            let host = self.config.probe_host.clone();
            let timeout = self.config.timeout;
            tasks.push(tokio::spawn(async move {
                let ok = probe_once(&host, target.external_port, timeout).await;
                (target, ok)
            }));
        }

        for task in tasks {
            let Ok((target, ok)) = task.await else {
                continue;
            };
            if let Some(status) = self.store.record_probe(&target.container_id, ok) {
                info!(
                    container_id = %target.container_id,
                    external_port = target.external_port,
                    status = status.as_str(),
                    "backend health changed"
                );
            }
        }
    }

    fn reap_critical(&self) {
        for container_id in self
            .store
            .expired_critical(self.config.deregister_critical_after)
        {
            warn!(
                container_id = %container_id,
                after_s = self.config.deregister_critical_after.as_secs(),
                "deregistering backend critical past deadline"
            );
            self.store.deregister(&container_id);
        }
    }
}

async fn probe_once(host: &str, port: u16, timeout: Duration) -> bool {
    let address = format!("{host}:{port}");
    matches!(
        time::timeout(timeout, TcpStream::connect(&address)).await,
        Ok(Ok(_))
    )
}
