//! Last-known-good backend snapshots.
//!
//! Used only when discovery fails or the breaker is open. Stale data
//! beats an empty answer, but only within the freshness window.

use crate::discovery::Backend;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

struct Snapshot {
    backends: Vec<Backend>,
    captured_at: Instant,
}

pub struct FallbackCache {
    entries: DashMap<String, Snapshot>,
    ttl: Duration,
}

impl FallbackCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn store(&self, app_hostname: &str, backends: Vec<Backend>) {
        self.entries.insert(
            app_hostname.to_string(),
            Snapshot {
                backends,
                captured_at: Instant::now(),
            },
        );
    }

    /// The snapshot for a hostname, provided it is still fresh.
    pub fn fresh(&self, app_hostname: &str) -> Option<Vec<Backend>> {
        let entry = self.entries.get(app_hostname)?;
        if entry.captured_at.elapsed() >= self.ttl {
            return None;
        }
        Some(entry.backends.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
