//! Load-balancer core: hostname → routing decision.

use crate::breaker::CircuitBreaker;
use crate::discovery::{Backend, DiscoveryError, RegistryClient};
use crate::error::LbError;
use crate::fallback::FallbackCache;
use crate::selector::Selector;
use crate::watcher::WatcherSet;
use lifecycle::AppHostname;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// The decision returned to the edge: where to send this request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingInfo {
    pub target_host: String,
    pub target_port: u16,
    pub container_id: String,
    pub image_id: i64,
    pub ttl: u64,
}

pub struct LoadBalancer {
    client: Arc<RegistryClient>,
    breaker: CircuitBreaker,
    fallback: Arc<FallbackCache>,
    selector: Box<dyn Selector>,
    watchers: WatcherSet,
    /// Container-host hostname requests are routed to.
    target_host: String,
    route_ttl_s: u64,
}

impl LoadBalancer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<RegistryClient>,
        breaker: CircuitBreaker,
        fallback: Arc<FallbackCache>,
        selector: Box<dyn Selector>,
        watchers: WatcherSet,
        target_host: String,
        route_ttl_s: u64,
    ) -> Self {
        Self {
            client,
            breaker,
            fallback,
            selector,
            watchers,
            target_host,
            route_ttl_s,
        }
    }

    /// Resolve one request to a backend.
    ///
    /// Discovery goes through the circuit breaker; a fresh fallback
    /// snapshot absorbs registry outages.
    pub async fn route(&self, raw_hostname: &str) -> Result<RoutingInfo, LbError> {
        let hostname = AppHostname::parse(raw_hostname)
            .map_err(|_| LbError::InvalidInput(raw_hostname.to_string()))?;
        self.watchers.ensure_watching(hostname.as_str());

        if self.breaker.preflight().is_err() {
            warn!(app_hostname = %hostname, "circuit open, trying fallback");
            return self.route_from_fallback(&hostname, LbError::CircuitOpen);
        }

        match self.client.query(hostname.as_str()).await {
            Ok(backends) => {
                self.breaker.record_success();
                self.route_from_snapshot(&hostname, backends)
            }
            Err(error) => {
                self.breaker.record_failure();
                warn!(app_hostname = %hostname, error = %error, "discovery failed, trying fallback");
                let mapped = match error {
                    DiscoveryError::Timeout(deadline) => LbError::Timeout(deadline),
                    _ => LbError::Unavailable,
                };
                self.route_from_fallback(&hostname, mapped)
            }
        }
    }

    fn route_from_snapshot(
        &self,
        hostname: &AppHostname,
        backends: Vec<Backend>,
    ) -> Result<RoutingInfo, LbError> {
        if backends.is_empty() {
            return Err(LbError::NotFound(hostname.to_string()));
        }

        let healthy: Vec<Backend> = backends.into_iter().filter(|b| b.passing).collect();
        self.fallback.store(hostname.as_str(), healthy.clone());

        let Some(selected) = self.selector.select(hostname.as_str(), &healthy) else {
            return Err(LbError::NoCapacity(hostname.to_string()));
        };
        Ok(self.routing_info(hostname, &selected))
    }

    fn route_from_fallback(
        &self,
        hostname: &AppHostname,
        original: LbError,
    ) -> Result<RoutingInfo, LbError> {
        let Some(snapshot) = self.fallback.fresh(hostname.as_str()) else {
            return Err(original);
        };
        let Some(selected) = self.selector.select(hostname.as_str(), &snapshot) else {
            return Err(original);
        };
        info!(
            app_hostname = %hostname,
            container_id = %selected.container_id,
            "routed from fallback snapshot"
        );
        Ok(self.routing_info(hostname, &selected))
    }

    fn routing_info(&self, hostname: &AppHostname, backend: &Backend) -> RoutingInfo {
        info!(
            app_hostname = %hostname,
            container_id = %backend.container_id,
            target_port = backend.external_port,
            "backend selected"
        );
        RoutingInfo {
            target_host: self.target_host.clone(),
            target_port: backend.external_port,
            container_id: backend.container_id.clone(),
            image_id: backend.image_id,
            ttl: self.route_ttl_s,
        }
    }

    pub fn breaker_state(&self) -> crate::breaker::CircuitState {
        self.breaker.state()
    }

    pub fn watched_count(&self) -> usize {
        self.watchers.watched_count()
    }

    pub fn stop(&self) {
        self.watchers.stop();
    }
}

/// Wire everything with the default round-robin policy.
pub fn build_load_balancer(
    registry_url: &str,
    registry_timeout: Duration,
    failure_threshold: u32,
    reset_timeout: Duration,
    fallback_ttl: Duration,
    watch_wait: Duration,
    target_host: String,
    route_ttl_s: u64,
) -> Result<LoadBalancer, LbError> {
    let client = Arc::new(
        RegistryClient::new(registry_url, registry_timeout)
            .map_err(|e| LbError::Unknown(e.to_string()))?,
    );
    let fallback = Arc::new(FallbackCache::new(fallback_ttl));
    let watchers = WatcherSet::new(client.clone(), fallback.clone(), watch_wait);
    Ok(LoadBalancer::new(
        client,
        CircuitBreaker::new(failure_threshold, reset_timeout),
        fallback,
        Box::new(crate::selector::RoundRobin::new()),
        watchers,
        target_host,
        route_ttl_s,
    ))
}
