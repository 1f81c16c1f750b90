//! Billing summaries.
//!
//! Completed intervals report their final duration and cost; active
//! intervals are estimated against `now`. Aggregates mix the two.

use crate::ledger::{IntervalStatus, UsageInterval, UsageLedger};
use crate::usage;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
pub struct UsageRow {
    pub container_id: String,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub duration_minutes: i64,
    pub cost: f64,
    pub status: IntervalStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageSummary {
    pub image_id: i64,
    pub total_containers: usize,
    pub total_minutes: i64,
    pub total_cost: f64,
    pub active_containers: usize,
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ImageDetail {
    pub image_id: i64,
    pub summary: ImageSummary,
    pub containers: Vec<UsageRow>,
}

fn row_for(interval: &UsageInterval, rate: f64, now: DateTime<Utc>) -> UsageRow {
    let (duration, cost) = match interval.status {
        IntervalStatus::Completed => (
            interval.duration_minutes.unwrap_or(0),
            interval.cost.unwrap_or(0.0),
        ),
        IntervalStatus::Active => {
            let estimated = usage::duration_minutes(interval.start, now);
            (estimated, usage::cost(rate, estimated))
        }
    };
    UsageRow {
        container_id: interval.container_id.clone(),
        start: interval.start,
        end: interval.end,
        duration_minutes: duration,
        cost,
        status: interval.status,
    }
}

fn summarize(image_id: i64, rows: &[UsageRow], intervals: &[UsageInterval]) -> ImageSummary {
    let total_minutes = rows.iter().map(|row| row.duration_minutes).sum();
    let total_cost = usage::round2(rows.iter().map(|row| row.cost).sum());
    let active_containers = rows
        .iter()
        .filter(|row| row.status == IntervalStatus::Active)
        .count();
    // Last activity is the most recent end, or start for open intervals.
    let last_activity = intervals
        .iter()
        .map(|interval| interval.end.unwrap_or(interval.start))
        .max();

    ImageSummary {
        image_id,
        total_containers: rows.len(),
        total_minutes,
        total_cost,
        active_containers,
        last_activity,
    }
}

/// Per-container detail plus aggregates for one image.
pub fn summary_by_image(
    ledger: &UsageLedger,
    user_id: i64,
    image_id: i64,
    now: DateTime<Utc>,
) -> ImageDetail {
    let intervals = ledger.records_for_image(user_id, image_id);
    let rows: Vec<UsageRow> = intervals
        .iter()
        .map(|interval| row_for(interval, ledger.rate_per_minute(), now))
        .collect();
    ImageDetail {
        image_id,
        summary: summarize(image_id, &rows, &intervals),
        containers: rows,
    }
}

/// One aggregate row per image, most recent activity first.
pub fn summary_all_images(
    ledger: &UsageLedger,
    user_id: i64,
    now: DateTime<Utc>,
) -> Vec<ImageSummary> {
    let mut by_image: HashMap<i64, Vec<UsageInterval>> = HashMap::new();
    for interval in ledger.records_for_user(user_id) {
        by_image.entry(interval.image_id).or_default().push(interval);
    }

    let mut summaries: Vec<ImageSummary> = by_image
        .into_iter()
        .map(|(image_id, intervals)| {
            let rows: Vec<UsageRow> = intervals
                .iter()
                .map(|interval| row_for(interval, ledger.rate_per_minute(), now))
                .collect();
            summarize(image_id, &rows, &intervals)
        })
        .collect();

    summaries.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
    summaries
}
