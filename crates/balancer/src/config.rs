use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LbConfig {
    pub bind_address: String,
    /// Service-registry base URL.
    pub registry_url: String,
    /// Deadline for the request-path registry query.
    pub lb_registry_timeout_ms: u64,
    pub circuit_failure_threshold: u32,
    pub circuit_reset_timeout_s: u64,
    /// Freshness window for last-known-good snapshots.
    pub fallback_ttl_s: u64,
    /// TTL handed to the edge inside RoutingInfo.
    pub cache_default_ttl_s: u64,
    /// Container-host hostname routed traffic targets.
    pub target_host: String,
    /// Long-poll wait used by the background watchers.
    pub watch_wait_s: u64,
    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl Default for LbConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3004".to_string(),
            registry_url: "http://registry:3005".to_string(),
            lb_registry_timeout_ms: 500,
            circuit_failure_threshold: 3,
            circuit_reset_timeout_s: 15,
            fallback_ttl_s: 300,
            cache_default_ttl_s: 1800,
            target_host: "docker-dind".to_string(),
            watch_wait_s: 60,
            log_level: "info,balancer=debug".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl LbConfig {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = config::Config::try_from(&LbConfig::default())
            .context("Failed to serialize default configuration")?;

        let mut builder = config::Config::builder().add_source(defaults);

        for path in ["/etc/shipway/balancer", "config/balancer", "crates/balancer/config/balancer"] {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(config::Environment::default().try_parsing(true));

        builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    pub fn validate(&self) -> Result<()> {
        self.bind_address
            .parse::<std::net::SocketAddr>()
            .context("Invalid bind_address")?;

        if self.registry_url.is_empty() {
            anyhow::bail!("registry_url must not be empty");
        }
        if self.target_host.is_empty() {
            anyhow::bail!("target_host must not be empty");
        }
        if self.lb_registry_timeout_ms == 0 {
            anyhow::bail!("lb_registry_timeout_ms must be positive");
        }
        if self.circuit_failure_threshold == 0 {
            anyhow::bail!("circuit_failure_threshold must be positive");
        }
        Ok(())
    }
}
