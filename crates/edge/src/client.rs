//! Load-balancer client.
//!
//! One pooled HTTP client with a tight deadline: the balancer answers
//! from memory, so anything slower than the configured budget is
//! treated as a timeout. Response statuses map onto the route error
//! taxonomy the handler translates for clients.

use crate::cache::CacheEntry;
use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, warn};

pub const CORRELATION_HEADER: &str = "X-Correlation-ID";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RouteError {
    #[error("application not found")]
    NotFound,

    #[error("no instances available")]
    NoCapacity,

    #[error("load balancer timed out")]
    Timeout,

    #[error("load balancer error: {0}")]
    Unknown(String),
}

#[derive(Debug, Deserialize)]
pub struct RoutingInfo {
    pub target_host: String,
    pub target_port: u16,
    pub container_id: String,
    pub image_id: i64,
    #[serde(default)]
    pub ttl: Option<u64>,
}

impl RoutingInfo {
    /// Turn the decision into a cache entry expiring `ttl` from now.
    pub fn into_cache_entry(self, default_ttl_s: u64) -> CacheEntry {
        let ttl = self.ttl.unwrap_or(default_ttl_s);
        CacheEntry {
            target_host: self.target_host,
            target_port: self.target_port,
            container_id: self.container_id,
            image_id: self.image_id,
            expires_at: Utc::now() + ChronoDuration::seconds(ttl as i64),
        }
    }
}

pub struct LbClient {
    http: reqwest::Client,
    route_url: String,
    timeout: Duration,
}

impl LbClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RouteError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| RouteError::Unknown(e.to_string()))?;
        Ok(Self {
            http,
            route_url: format!("{}/route", base_url.trim_end_matches('/')),
            timeout,
        })
    }

    pub async fn route(
        &self,
        app_hostname: &str,
        correlation_id: &str,
    ) -> Result<RoutingInfo, RouteError> {
        let response = self
            .http
            .post(&self.route_url)
            .timeout(self.timeout)
            .header(CORRELATION_HEADER, correlation_id)
            .json(&serde_json::json!({ "app_hostname": app_hostname }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    error!(app_hostname, timeout_ms = self.timeout.as_millis() as u64, "lb route timed out");
                    RouteError::Timeout
                } else {
                    error!(app_hostname, error = %e, "lb route transport error");
                    RouteError::Unknown(e.to_string())
                }
            })?;

        match response.status().as_u16() {
            200 => response.json::<RoutingInfo>().await.map_err(|e| {
                error!(app_hostname, error = %e, "failed to parse lb response");
                RouteError::Unknown(format!("parse error: {e}"))
            }),
            404 => {
                warn!(app_hostname, "lb reports application not found");
                Err(RouteError::NotFound)
            }
            503 => {
                warn!(app_hostname, "lb reports no capacity");
                Err(RouteError::NoCapacity)
            }
            504 => {
                warn!(app_hostname, "lb reports discovery timeout");
                Err(RouteError::Timeout)
            }
            status => {
                error!(app_hostname, status, "unexpected lb status");
                Err(RouteError::Unknown(format!("unexpected status {status}")))
            }
        }
    }
}
