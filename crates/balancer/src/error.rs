use std::time::Duration;
use thiserror::Error;

/// Errors crossing the load-balancer boundary. The edge maps these onto
/// HTTP statuses; nothing here carries internal detail.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LbError {
    #[error("invalid hostname: {0}")]
    InvalidInput(String),

    #[error("application not found: {0}")]
    NotFound(String),

    #[error("no healthy backends for: {0}")]
    NoCapacity(String),

    #[error("discovery timed out after {0:?}")]
    Timeout(Duration),

    #[error("circuit breaker is open")]
    CircuitOpen,

    #[error("discovery unavailable and no fresh fallback")]
    Unavailable,

    #[error("unexpected error: {0}")]
    Unknown(String),
}
