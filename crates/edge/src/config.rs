use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EdgeConfig {
    pub bind_address: String,
    /// Load-balancer base URL.
    pub lb_url: String,
    /// Control-plane base URL for the /api passthrough.
    pub orchestrator_url: String,
    pub lb_timeout_ms: u64,
    pub backend_timeout_ms: u64,
    /// TTL applied when the balancer's answer carries none.
    pub cache_default_ttl_s: u64,
    /// Period of the background sweep of expired cache entries.
    pub cache_sweep_interval_s: u64,
    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            lb_url: "http://load-balancer:3004".to_string(),
            orchestrator_url: "http://orchestrator:3003".to_string(),
            lb_timeout_ms: 500,
            backend_timeout_ms: 10_000,
            cache_default_ttl_s: 1800,
            cache_sweep_interval_s: 60,
            log_level: "info,edge=debug".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl EdgeConfig {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = config::Config::try_from(&EdgeConfig::default())
            .context("Failed to serialize default configuration")?;

        let mut builder = config::Config::builder().add_source(defaults);

        for path in ["/etc/shipway/edge", "config/edge", "crates/edge/config/edge"] {
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

        if self.lb_url.is_empty() {
            anyhow::bail!("lb_url must not be empty");
        }
        if self.orchestrator_url.is_empty() {
            anyhow::bail!("orchestrator_url must not be empty");
        }
        if self.lb_timeout_ms == 0 || self.backend_timeout_ms == 0 {
            anyhow::bail!("timeouts must be positive");
        }
        Ok(())
    }

    pub fn lb_timeout(&self) -> Duration {
        Duration::from_millis(self.lb_timeout_ms)
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }
}
