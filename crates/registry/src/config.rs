use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub bind_address: String,
    pub kafka_bootstrap_servers: String,
    pub kafka_consumer_group: String,
    /// Container-host hostname; probe target and fallback backend address.
    pub probe_host: String,
    pub health_check_interval_s: u64,
    pub health_check_timeout_s: u64,
    pub deregister_critical_after_s: u64,
    /// Default long-poll wait when the caller does not send one.
    pub watch_default_wait_s: u64,
    /// Upper bound on any requested wait.
    pub watch_max_wait_s: u64,
    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3005".to_string(),
            kafka_bootstrap_servers: "localhost:9092".to_string(),
            kafka_consumer_group: "registry-service".to_string(),
            probe_host: "docker-dind".to_string(),
            health_check_interval_s: 10,
            health_check_timeout_s: 2,
            deregister_critical_after_s: 60,
            watch_default_wait_s: 60,
            watch_max_wait_s: 300,
            log_level: "info,registry=debug".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl RegistryConfig {
    /// Load configuration: compile-time defaults, then an optional TOML
    /// file, then environment variables (flat keys, so
    /// `KAFKA_BOOTSTRAP_SERVERS` overrides `kafka_bootstrap_servers`).
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = config::Config::try_from(&RegistryConfig::default())
            .context("Failed to serialize default configuration")?;

        let mut builder = config::Config::builder().add_source(defaults);

        for path in ["/etc/shipway/registry", "config/registry", "crates/registry/config/registry"] {
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

        if self.probe_host.is_empty() {
            anyhow::bail!("probe_host must not be empty");
        }
        if self.health_check_interval_s == 0 {
            anyhow::bail!("health_check_interval_s must be positive");
        }
        if self.health_check_timeout_s == 0 {
            anyhow::bail!("health_check_timeout_s must be positive");
        }
        if self.watch_default_wait_s > self.watch_max_wait_s {
            anyhow::bail!("watch_default_wait_s must not exceed watch_max_wait_s");
        }
        Ok(())
    }
}
