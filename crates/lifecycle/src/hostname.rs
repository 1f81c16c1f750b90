//! Application hostname normalization.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HostnameError {
    #[error("hostname is empty after normalization")]
    Empty,
}

/// Normalized user-facing identifier for a deployed application.
///
/// Always constructed through [`AppHostname::parse`], so a value of this
/// type is guaranteed lowercase, scheme-free, port-free and non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppHostname(String);

impl AppHostname {
    pub fn parse(raw: &str) -> Result<Self, HostnameError> {
        let normalized = normalize(raw);
        if normalized.is_empty() {
            return Err(HostnameError::Empty);
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for AppHostname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AppHostname {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lowercase, strip the scheme, strip everything from the first `:`
/// (port), strip trailing slashes.
///
/// Idempotent: normalizing an already-normalized value is a no-op.
pub fn normalize(raw: &str) -> String {
    let mut s = raw.trim().to_ascii_lowercase();
    if let Some(rest) = s.strip_prefix("https://") {
        s = rest.to_string();
    } else if let Some(rest) = s.strip_prefix("http://") {
        s = rest.to_string();
    }
    if let Some((host, _)) = s.split_once(':') {
        s = host.to_string();
    }
    s.trim_end_matches('/').to_string()
}
