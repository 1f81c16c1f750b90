//! Per-client routing cache.
//!
//! Keyed by `(app_hostname, client_ip)` so one client sticks to one
//! backend for the TTL. Entries are small; a single mutex over a flat
//! map is enough. Expiry is checked on read and an entry read at or
//! after its expiry instant is treated as absent.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub target_host: String,
    pub target_port: u16,
    pub container_id: String,
    pub image_id: i64,
    pub expires_at: DateTime<Utc>,
}

pub type CacheKey = (String, String);

#[derive(Default)]
pub struct RoutingCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl RoutingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, app_hostname: &str, client_ip: &str) -> Option<CacheEntry> {
        self.get_at(app_hostname, client_ip, Utc::now())
    }

    /// Read with an explicit clock; `now >= expires_at` counts as gone
    /// and drops the entry.
    pub fn get_at(
        &self,
        app_hostname: &str,
        client_ip: &str,
        now: DateTime<Utc>,
    ) -> Option<CacheEntry> {
        let mut entries = self.entries.lock();
        let key = (app_hostname.to_string(), client_ip.to_string());
        match entries.get(&key) {
            Some(entry) if now < entry.expires_at => Some(entry.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, app_hostname: &str, client_ip: &str, entry: CacheEntry) {
        self.entries
            .lock()
            .insert((app_hostname.to_string(), client_ip.to_string()), entry);
    }

    /// Drop an entry; absent keys are fine.
    pub fn invalidate(&self, app_hostname: &str, client_ip: &str) {
        self.entries
            .lock()
            .remove(&(app_hostname.to_string(), client_ip.to_string()));
    }

    /// Sweep every expired entry, returning how many were dropped.
    pub fn clear_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| now < entry.expires_at);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
