//! Request metrics.
//!
//! In-process aggregates keyed globally and by user, app hostname and
//! container. Hostname and container rows remember the first non-null
//! user id they saw; that first write is authoritative and lets
//! per-user views pull in their hostnames and containers without a
//! separate ownership lookup.

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;

#[derive(Debug, Default, Clone)]
struct DimMetrics {
    user_id: Option<i64>,
    requests: u64,
    errors: u64,
    status_codes: HashMap<u16, u64>,
    latency_sum: f64,
    latency_count: u64,
}

impl DimMetrics {
    fn record(&mut self, status_code: u16, latency_ms: f64) {
        self.requests += 1;
        *self.status_codes.entry(status_code).or_insert(0) += 1;
        if status_code >= 400 {
            self.errors += 1;
        }
        if latency_ms > 0.0 {
            self.latency_sum += latency_ms;
            self.latency_count += 1;
        }
    }

    fn avg_latency_ms(&self) -> f64 {
        if self.latency_count == 0 {
            return 0.0;
        }
        let avg = self.latency_sum / self.latency_count as f64;
        (avg * 100.0).round() / 100.0
    }

    fn status_codes_json(&self) -> Value {
        let map: HashMap<String, u64> = self
            .status_codes
            .iter()
            .map(|(code, count)| (code.to_string(), *count))
            .collect();
        json!(map)
    }

    fn brief_json(&self) -> Value {
        json!({
            "requests": self.requests,
            "errors": self.errors,
            "avg_latency_ms": self.avg_latency_ms(),
        })
    }
}

#[derive(Default)]
struct Inner {
    global: DimMetrics,
    by_user: HashMap<i64, DimMetrics>,
    by_app_hostname: HashMap<String, DimMetrics>,
    by_container: HashMap<String, DimMetrics>,
}

#[derive(Default)]
pub struct MetricsCollector {
    inner: Mutex<Inner>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(
        &self,
        status_code: u16,
        latency_ms: f64,
        user_id: Option<i64>,
        app_hostname: Option<&str>,
        container_id: Option<&str>,
    ) {
        let mut inner = self.inner.lock();
        inner.global.record(status_code, latency_ms);

        if let Some(user_id) = user_id {
            inner
                .by_user
                .entry(user_id)
                .or_default()
                .record(status_code, latency_ms);
        }

        if let Some(hostname) = app_hostname {
            let metrics = inner.by_app_hostname.entry(hostname.to_string()).or_default();
            if metrics.user_id.is_none() {
                metrics.user_id = user_id;
            }
            metrics.record(status_code, latency_ms);
        }

        if let Some(container_id) = container_id {
            let metrics = inner.by_container.entry(container_id.to_string()).or_default();
            if metrics.user_id.is_none() {
                metrics.user_id = user_id;
            }
            metrics.record(status_code, latency_ms);
        }
    }

    /// Global view with per-dimension sub-maps.
    pub fn get_metrics(&self) -> Value {
        let inner = self.inner.lock();
        json!({
            "total_requests": inner.global.requests,
            "total_errors": inner.global.errors,
            "avg_latency_ms": inner.global.avg_latency_ms(),
            "status_codes": inner.global.status_codes_json(),
            "by_user": inner
                .by_user
                .iter()
                .map(|(id, metrics)| (id.to_string(), metrics.brief_json()))
                .collect::<HashMap<_, _>>(),
            "by_app_hostname": inner
                .by_app_hostname
                .iter()
                .map(|(hostname, metrics)| (hostname.clone(), metrics.brief_json()))
                .collect::<HashMap<_, _>>(),
            "by_container": inner
                .by_container
                .iter()
                .map(|(id, metrics)| (id.clone(), metrics.brief_json()))
                .collect::<HashMap<_, _>>(),
        })
    }

    /// Per-user view including the hostnames and containers whose
    /// first-observed user matches.
    pub fn get_metrics_by_user(&self, user_id: i64) -> Option<Value> {
        let inner = self.inner.lock();
        let metrics = inner.by_user.get(&user_id)?;

        let by_app_hostname: HashMap<String, Value> = inner
            .by_app_hostname
            .iter()
            .filter(|(_, m)| m.user_id == Some(user_id))
            .map(|(hostname, m)| (hostname.clone(), m.brief_json()))
            .collect();
        let by_container: HashMap<String, Value> = inner
            .by_container
            .iter()
            .filter(|(_, m)| m.user_id == Some(user_id))
            .map(|(id, m)| (id.clone(), m.brief_json()))
            .collect();

        let mut result = json!({
            "user_id": user_id,
            "total_requests": metrics.requests,
            "total_errors": metrics.errors,
            "avg_latency_ms": metrics.avg_latency_ms(),
            "status_codes": metrics.status_codes_json(),
        });
        if !by_app_hostname.is_empty() {
            result["by_app_hostname"] = json!(by_app_hostname);
        }
        if !by_container.is_empty() {
            result["by_container"] = json!(by_container);
        }
        Some(result)
    }

    pub fn get_metrics_by_app_hostname(&self, app_hostname: &str) -> Option<Value> {
        let inner = self.inner.lock();
        let metrics = inner.by_app_hostname.get(app_hostname)?;

        let mut result = json!({
            "app_hostname": app_hostname,
            "total_requests": metrics.requests,
            "total_errors": metrics.errors,
            "avg_latency_ms": metrics.avg_latency_ms(),
            "status_codes": metrics.status_codes_json(),
        });
        if let Some(user_id) = metrics.user_id {
            result["user_id"] = json!(user_id);
        }
        Some(result)
    }

    pub fn get_metrics_by_container(&self, container_id: &str) -> Option<Value> {
        let inner = self.inner.lock();
        let metrics = inner.by_container.get(container_id)?;

        let mut result = json!({
            "container_id": container_id,
            "total_requests": metrics.requests,
            "total_errors": metrics.errors,
            "avg_latency_ms": metrics.avg_latency_ms(),
            "status_codes": metrics.status_codes_json(),
        });
        if let Some(user_id) = metrics.user_id {
            result["user_id"] = json!(user_id);
        }
        Some(result)
    }

    /// Request count for one hostname; used by tests and health output.
    pub fn requests_for_app(&self, app_hostname: &str) -> u64 {
        self.inner
            .lock()
            .by_app_hostname
            .get(app_hostname)
            .map(|m| m.requests)
            .unwrap_or(0)
    }

    pub fn total_requests(&self) -> u64 {
        self.inner.lock().global.requests
    }

    /// Clear every counter.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        *inner = Inner::default();
    }
}
