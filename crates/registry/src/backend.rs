//! Backend model: one running container instance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Probe-driven health of a backend. Anything other than `Passing`
/// excludes the backend from query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Passing,
    Warning,
    Critical,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passing => "passing",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// A reachable container instance registered for an application.
///
/// `internal_port` is what the app advertises inside the container
/// network; `external_port` is the host-mapped port used both for
/// probing and for routing traffic from the edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backend {
    pub container_id: String,
    pub address: String,
    pub internal_port: u16,
    pub external_port: u16,
    pub image_id: i64,
    pub user_id: Option<i64>,
    pub app_hostname: String,
    pub health: HealthStatus,
    pub registered_at: DateTime<Utc>,
}

impl Backend {
    pub fn is_passing(&self) -> bool {
        self.health == HealthStatus::Passing
    }
}
