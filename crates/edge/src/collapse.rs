//! Request collapsing for cold cache keys.
//!
//! A burst of requests for the same `(app_hostname, client_ip)` would
//! otherwise fan out into parallel LB calls. Each key gets one async
//! mutex; the first holder resolves, late arrivals wake up behind it
//! and re-check the cache. Locks are dropped from the map once the last
//! holder releases.

use crate::cache::CacheKey;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
pub struct SingleFlight {
    locks: DashMap<CacheKey, Arc<Mutex<()>>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for a key; hold its guard across the resolution.
    pub fn lock_for(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the map entry once nobody else holds the lock. Call after
    /// both the guard and the caller's clone of the lock are dropped; a
    /// racing new arrival simply re-creates the entry.
    pub fn release(&self, key: &CacheKey) {
        self.locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) <= 1);
    }

    pub fn in_flight(&self) -> usize {
        self.locks.len()
    }
}
