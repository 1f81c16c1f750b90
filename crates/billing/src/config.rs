use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BillingConfig {
    pub bind_address: String,
    pub kafka_bootstrap_servers: String,
    pub kafka_consumer_group: String,
    pub billing_rate_per_minute: f64,
    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3006".to_string(),
            kafka_bootstrap_servers: "localhost:9092".to_string(),
            kafka_consumer_group: "billing-service".to_string(),
            billing_rate_per_minute: 0.01,
            log_level: "info,billing=debug".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl BillingConfig {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = config::Config::try_from(&BillingConfig::default())
            .context("Failed to serialize default configuration")?;

        let mut builder = config::Config::builder().add_source(defaults);

        for path in ["/etc/shipway/billing", "config/billing", "crates/billing/config/billing"] {
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

        if self.billing_rate_per_minute < 0.0 {
            anyhow::bail!("billing_rate_per_minute must not be negative");
        }
        if self.kafka_bootstrap_servers.is_empty() {
            anyhow::bail!("kafka_bootstrap_servers must not be empty");
        }
        Ok(())
    }
}
