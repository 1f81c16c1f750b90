//! Duration and cost arithmetic.
//!
//! Billing counts started minutes: any partial minute rounds up. Costs
//! are rounded to two decimals on output. Clock skew between producers
//! can put an end before a start; that clamps to zero instead of going
//! negative.

use chrono::{DateTime, Utc};

/// Ceiling minutes between two instants, clamped at zero.
pub fn duration_minutes(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    let seconds = (end - start).num_seconds().max(0);
    (seconds + 59) / 60
}

/// Rate × minutes, rounded to two decimals.
pub fn cost(rate_per_minute: f64, minutes: i64) -> f64 {
    round2(rate_per_minute * minutes as f64)
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
