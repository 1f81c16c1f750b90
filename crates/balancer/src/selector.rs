//! Backend selection policies.

use crate::discovery::Backend;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Pure selection over a healthy snapshot. Implementations must be
/// deterministic for a given internal state so ties break the same way
/// on every node.
pub trait Selector: Send + Sync {
    fn select(&self, app_hostname: &str, backends: &[Backend]) -> Option<Backend>;
}

/// Default policy: round robin with a per-hostname rotating cursor.
///
/// Each hostname owns its cursor in a concurrent arena, so rotation for
/// one application never contends with another.
#[derive(Default)]
pub struct RoundRobin {
    cursors: DashMap<String, Arc<AtomicUsize>>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    fn cursor(&self, app_hostname: &str) -> Arc<AtomicUsize> {
        self.cursors
            .entry(app_hostname.to_string())
            .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
            .clone()
    }
}

impl Selector for RoundRobin {
    fn select(&self, app_hostname: &str, backends: &[Backend]) -> Option<Backend> {
        if backends.is_empty() {
            return None;
        }
        let cursor = self.cursor(app_hostname);
        // Membership changes between calls; the modulo keeps the cursor
        // valid for whatever snapshot we were handed.
        let index = cursor.fetch_add(1, Ordering::Relaxed) % backends.len();
        Some(backends[index].clone())
    }
}
