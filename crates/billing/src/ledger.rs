//! Usage ledger.
//!
//! At most one active interval per container at any time. One lock
//! guards the active map and the completed log so open/close pairs are
//! observed atomically.

use crate::usage;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IntervalStatus {
    Active,
    Completed,
}

/// One open/closed run of a container.
#[derive(Debug, Clone, Serialize)]
pub struct UsageInterval {
    pub user_id: i64,
    pub image_id: i64,
    pub container_id: String,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub duration_minutes: Option<i64>,
    pub cost: Option<f64>,
    pub status: IntervalStatus,
}

#[derive(Default)]
struct Inner {
    active: HashMap<String, UsageInterval>,
    completed: Vec<UsageInterval>,
}

pub struct UsageLedger {
    inner: RwLock<Inner>,
    rate_per_minute: f64,
}

impl UsageLedger {
    pub fn new(rate_per_minute: f64) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            rate_per_minute,
        }
    }

    pub fn rate_per_minute(&self) -> f64 {
        self.rate_per_minute
    }

    /// Open an interval. Returns false (a no-op) when one is already
    /// active for this container; duplicate deliveries land here.
    pub fn open(&self, container_id: &str, user_id: i64, image_id: i64, start: DateTime<Utc>) -> bool {
        let mut inner = self.inner.write();
        if inner.active.contains_key(container_id) {
            info!(container_id, "active interval already exists, ignoring");
            return false;
        }

        inner.active.insert(
            container_id.to_string(),
            UsageInterval {
                user_id,
                image_id,
                container_id: container_id.to_string(),
                start,
                end: None,
                duration_minutes: None,
                cost: None,
                status: IntervalStatus::Active,
            },
        );
        info!(container_id, user_id, image_id, start = %start, "usage interval opened");
        true
    }

    /// Close the active interval, computing duration and cost. Returns
    /// the completed interval, or `None` when nothing was active.
    pub fn close(&self, container_id: &str, end: DateTime<Utc>) -> Option<UsageInterval> {
        let mut inner = self.inner.write();
        let Some(mut interval) = inner.active.remove(container_id) else {
            warn!(container_id, "no active interval to close");
            return None;
        };

        let minutes = usage::duration_minutes(interval.start, end);
        interval.end = Some(end);
        interval.duration_minutes = Some(minutes);
        interval.cost = Some(usage::cost(self.rate_per_minute, minutes));
        interval.status = IntervalStatus::Completed;

        info!(
            container_id,
            duration_minutes = minutes,
            cost = interval.cost,
            "usage interval completed"
        );
        inner.completed.push(interval.clone());
        Some(interval)
    }

    pub fn has_active(&self, container_id: &str) -> bool {
        self.inner.read().active.contains_key(container_id)
    }

    pub fn active_count(&self) -> usize {
        self.inner.read().active.len()
    }

    pub fn completed_count(&self) -> usize {
        self.inner.read().completed.len()
    }

    /// Intervals for one (user, image), active first in start order,
    /// then completed in completion order.
    pub fn records_for_image(&self, user_id: i64, image_id: i64) -> Vec<UsageInterval> {
        let inner = self.inner.read();
        let mut records: Vec<UsageInterval> = inner
            .active
            .values()
            .filter(|interval| interval.user_id == user_id && interval.image_id == image_id)
            .cloned()
            .collect();
        records.sort_by_key(|interval| interval.start);
        records.extend(
            inner
                .completed
                .iter()
                .filter(|interval| interval.user_id == user_id && interval.image_id == image_id)
                .cloned(),
        );
        records
    }

    /// Every interval belonging to a user.
    pub fn records_for_user(&self, user_id: i64) -> Vec<UsageInterval> {
        let inner = self.inner.read();
        let mut records: Vec<UsageInterval> = inner
            .active
            .values()
            .filter(|interval| interval.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by_key(|interval| interval.start);
        records.extend(
            inner
                .completed
                .iter()
                .filter(|interval| interval.user_id == user_id)
                .cloned(),
        );
        records
    }
}
