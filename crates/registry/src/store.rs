//! Authoritative backend registry.
//!
//! One lock guards the record map, the secondary indices and the version
//! counter, so every mutation and its version bump are observed
//! atomically. The version is broadcast over a watch channel; long-poll
//! watchers park on it instead of polling.

use crate::backend::{Backend, HealthStatus};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug)]
struct BackendRecord {
    backend: Backend,
    consecutive_failures: u32,
    critical_since: Option<Instant>,
}

#[derive(Default)]
struct Inner {
    records: HashMap<String, BackendRecord>,
    by_hostname: HashMap<String, HashSet<String>>,
    by_image: HashMap<i64, HashSet<String>>,
    version: u64,
}

impl Inner {
    fn bump(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    fn healthy_for(&self, app_hostname: &str) -> Vec<Backend> {
        let Some(ids) = self.by_hostname.get(app_hostname) else {
            return Vec::new();
        };
        let mut backends: Vec<Backend> = ids
            .iter()
            .filter_map(|id| self.records.get(id))
            .filter(|record| record.backend.is_passing())
            .map(|record| record.backend.clone())
            .collect();
        backends.sort_by(|a, b| a.container_id.cmp(&b.container_id));
        backends
    }

    fn unlink_indices(&mut self, record: &BackendRecord) {
        let id = &record.backend.container_id;
        if let Some(ids) = self.by_hostname.get_mut(&record.backend.app_hostname) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_hostname.remove(&record.backend.app_hostname);
            }
        }
        if let Some(ids) = self.by_image.get_mut(&record.backend.image_id) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_image.remove(&record.backend.image_id);
            }
        }
    }
}

pub struct RegistryStore {
    inner: RwLock<Inner>,
    version_tx: tokio::sync::watch::Sender<u64>,
}

/// A target the prober should connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub container_id: String,
    pub external_port: u16,
}

impl Default for RegistryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryStore {
    pub fn new() -> Self {
        let (version_tx, _) = tokio::sync::watch::channel(0u64);
        Self {
            inner: RwLock::new(Inner::default()),
            version_tx,
        }
    }

    /// Idempotent upsert keyed by container id. Re-registering resets
    /// health to passing and clears probe bookkeeping. Always a
    /// mutation, so the version always advances.
    pub fn register(&self, backend: Backend) -> u64 {
        let version = {
            let mut inner = self.inner.write();
            if let Some(existing) = inner.records.remove(&backend.container_id) {
                debug!(container_id = %backend.container_id, "re-registering known backend");
                inner.unlink_indices(&existing);
            }
            inner
                .by_hostname
                .entry(backend.app_hostname.clone())
                .or_default()
                .insert(backend.container_id.clone());
            inner
                .by_image
                .entry(backend.image_id)
                .or_default()
                .insert(backend.container_id.clone());
            info!(
                container_id = %backend.container_id,
                app_hostname = %backend.app_hostname,
                external_port = backend.external_port,
                "backend registered"
            );
            inner.records.insert(
                backend.container_id.clone(),
                BackendRecord {
                    backend,
                    consecutive_failures: 0,
                    critical_since: None,
                },
            );
            inner.bump()
        };
        let _ = self.version_tx.send(version);
        version
    }

    /// Remove a backend. No-op (and no version bump) when absent.
    pub fn deregister(&self, container_id: &str) -> bool {
        let version = {
            let mut inner = self.inner.write();
            let Some(record) = inner.records.remove(container_id) else {
                debug!(container_id, "deregister of unknown backend ignored");
                return false;
            };
            inner.unlink_indices(&record);
            info!(
                container_id,
                app_hostname = %record.backend.app_hostname,
                "backend deregistered"
            );
            inner.bump()
        };
        let _ = self.version_tx.send(version);
        true
    }

    /// Force a health status, resetting probe bookkeeping. Bumps the
    /// version only when the status actually flips.
    pub fn set_health(&self, container_id: &str, status: HealthStatus) -> bool {
        let version = {
            let mut inner = self.inner.write();
            let Some(record) = inner.records.get_mut(container_id) else {
                return false;
            };
            if record.backend.health == status {
                return false;
            }
            record.backend.health = status;
            record.consecutive_failures = 0;
            record.critical_since = match status {
                HealthStatus::Critical => Some(Instant::now()),
                _ => None,
            };
            inner.bump()
        };
        let _ = self.version_tx.send(version);
        true
    }

    /// Record one probe outcome. Failure escalation: first failure marks
    /// warning, the third consecutive failure marks critical. A success
    /// restores passing. Returns the new status when it flipped.
    pub fn record_probe(&self, container_id: &str, success: bool) -> Option<HealthStatus> {
        let (flipped, version) = {
            let mut inner = self.inner.write();
            let record = inner.records.get_mut(container_id)?;

            let previous = record.backend.health;
            if success {
                record.consecutive_failures = 0;
                record.critical_since = None;
                record.backend.health = HealthStatus::Passing;
            } else {
                record.consecutive_failures = record.consecutive_failures.saturating_add(1);
                if record.consecutive_failures >= 3 {
                    if record.critical_since.is_none() {
                        record.critical_since = Some(Instant::now());
                    }
                    record.backend.health = HealthStatus::Critical;
                } else {
                    record.backend.health = HealthStatus::Warning;
                }
            }

            if record.backend.health == previous {
                return None;
            }
            let status = record.backend.health;
            let version = inner.bump();
            (status, version)
        };
        let _ = self.version_tx.send(version);
        Some(flipped)
    }

    /// Container ids that have been critical for at least `max_age`.
    pub fn expired_critical(&self, max_age: Duration) -> Vec<String> {
        let inner = self.inner.read();
        inner
            .records
            .values()
            .filter(|record| {
                record
                    .critical_since
                    .is_some_and(|since| since.elapsed() >= max_age)
            })
            .map(|record| record.backend.container_id.clone())
            .collect()
    }

    /// Snapshot of everything the prober needs, taken without holding
    /// the lock across connects.
    pub fn probe_targets(&self) -> Vec<ProbeTarget> {
        let inner = self.inner.read();
        inner
            .records
            .values()
            .map(|record| ProbeTarget {
                container_id: record.backend.container_id.clone(),
                external_port: record.backend.external_port,
            })
            .collect()
    }

    /// Non-blocking snapshot of passing backends for a hostname.
    pub fn query_healthy(&self, app_hostname: &str) -> Vec<Backend> {
        self.inner.read().healthy_for(app_hostname)
    }

    /// Every backend for a hostname regardless of health.
    pub fn query_all(&self, app_hostname: &str) -> Vec<Backend> {
        let inner = self.inner.read();
        let Some(ids) = inner.by_hostname.get(app_hostname) else {
            return Vec::new();
        };
        let mut backends: Vec<Backend> = ids
            .iter()
            .filter_map(|id| inner.records.get(id))
            .map(|record| record.backend.clone())
            .collect();
        backends.sort_by(|a, b| a.container_id.cmp(&b.container_id));
        backends
    }

    /// All backends for an image, regardless of health.
    pub fn query_by_image(&self, image_id: i64) -> Vec<Backend> {
        let inner = self.inner.read();
        let Some(ids) = inner.by_image.get(&image_id) else {
            return Vec::new();
        };
        let mut backends: Vec<Backend> = ids
            .iter()
            .filter_map(|id| inner.records.get(id))
            .map(|record| record.backend.clone())
            .collect();
        backends.sort_by(|a, b| a.container_id.cmp(&b.container_id));
        backends
    }

    pub fn get(&self, container_id: &str) -> Option<Backend> {
        self.inner
            .read()
            .records
            .get(container_id)
            .map(|record| record.backend.clone())
    }

    pub fn version(&self) -> u64 {
        self.inner.read().version
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }

    pub fn count_passing(&self) -> usize {
        self.inner
            .read()
            .records
            .values()
            .filter(|record| record.backend.is_passing())
            .count()
    }

    /// Block until the registry version exceeds `last_version` or
    /// `max_wait` elapses, then return the current version together with
    /// the healthy snapshot for the hostname. A warm start
    /// (`last_version` behind the current version) returns immediately.
    pub async fn watch(
        &self,
        app_hostname: &str,
        last_version: u64,
        max_wait: Duration,
    ) -> (u64, Vec<Backend>) {
        let mut version_rx = self.version_tx.subscribe();
        let deadline = tokio::time::Instant::now() + max_wait;

        loop {
            {
                let inner = self.inner.read();
                if inner.version > last_version {
                    return (inner.version, inner.healthy_for(app_hostname));
                }
            }

            match tokio::time::timeout_at(deadline, version_rx.changed()).await {
                Ok(Ok(())) => continue,
                // Deadline reached or the store is being dropped: hand
                // back the unchanged snapshot.
                Ok(Err(_)) | Err(_) => {
                    let inner = self.inner.read();
                    return (inner.version, inner.healthy_for(app_hostname));
                }
            }
        }
    }
}
