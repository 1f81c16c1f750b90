//! Background long-poll watchers.
//!
//! One loop per watched hostname keeps the fallback cache warm: each
//! iteration parks on the registry's watch endpoint with the last seen
//! version token and stores whatever healthy snapshot comes back.
//! Watchers start lazily on the first route for a hostname and are
//! cancelled together on shutdown.

use crate::discovery::RegistryClient;
use crate::fallback::FallbackCache;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const BACKOFF_INITIAL: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(30);

pub struct WatcherSet {
    client: Arc<RegistryClient>,
    fallback: Arc<FallbackCache>,
    wait: Duration,
    root: CancellationToken,
    active: DashMap<String, CancellationToken>,
}

impl WatcherSet {
    pub fn new(client: Arc<RegistryClient>, fallback: Arc<FallbackCache>, wait: Duration) -> Self {
        Self {
            client,
            fallback,
            wait,
            root: CancellationToken::new(),
            active: DashMap::new(),
        }
    }

    /// Ensure a watch loop exists for this hostname. Idempotent.
    pub fn ensure_watching(&self, app_hostname: &str) {
        if self.active.contains_key(app_hostname) {
            return;
        }
        let token = self.root.child_token();
        // A racing second caller loses the entry insert and cancels
        // nothing; the loop below is keyed by the winning token.
        if self
            .active
            .insert(app_hostname.to_string(), token.clone())
            .is_some()
        {
            return;
        }

        info!(app_hostname, "starting registry watch loop");
        let client = self.client.clone();
        let fallback = self.fallback.clone();
        let wait = self.wait;
        let hostname = app_hostname.to_string();
        tokio::spawn(async move {
            watch_loop(client, fallback, hostname, wait, token).await;
        });
    }

    pub fn watched_count(&self) -> usize {
        self.active.len()
    }

    /// Cancel every watch loop.
    pub fn stop(&self) {
        self.root.cancel();
        self.active.clear();
    }
}

async fn watch_loop(
    client: Arc<RegistryClient>,
    fallback: Arc<FallbackCache>,
    hostname: String,
    wait: Duration,
    token: CancellationToken,
) {
    let mut index: u64 = 0;
    let mut backoff = BACKOFF_INITIAL;

    loop {
        let result = tokio::select! {
            _ = token.cancelled() => break,
            result = client.watch(&hostname, index, wait) => result,
        };

        match result {
            Ok((version, backends)) => {
                backoff = BACKOFF_INITIAL;
                debug!(
                    app_hostname = %hostname,
                    version,
                    backends = backends.len(),
                    "watch snapshot refreshed"
                );
                fallback.store(&hostname, backends);
                index = version;
            }
            Err(e) => {
                warn!(app_hostname = %hostname, error = %e, "watch call failed, backing off");
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(BACKOFF_MAX);
            }
        }
    }

    debug!(app_hostname = %hostname, "watch loop stopped");
}
