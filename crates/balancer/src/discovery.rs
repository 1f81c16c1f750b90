//! Registry client.
//!
//! Talks the Consul health/service wire shape the registry serves:
//! `GET /v1/health/service/{name}` with `passing`/`index`/`wait` query
//! parameters and the new version token in the `X-Consul-Index` header.
//! Tags carry the platform metadata (`image-{id}`, `app-hostname-{h}`,
//! `external-port-{n}`, `owner-{uid}`).

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub const CONSUL_INDEX_HEADER: &str = "X-Consul-Index";

/// One routable instance as the balancer sees it.
#[derive(Debug, Clone, PartialEq)]
pub struct Backend {
    pub container_id: String,
    pub address: String,
    pub port: u16,
    pub external_port: u16,
    pub image_id: i64,
    pub user_id: Option<i64>,
    pub app_hostname: String,
    pub passing: bool,
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("registry request timed out after {0:?}")]
    Timeout(Duration),

    #[error("registry transport error: {0}")]
    Transport(String),

    #[error("registry returned status {0}")]
    Status(u16),

    #[error("failed to parse registry response: {0}")]
    Parse(String),
}

#[derive(Debug, Deserialize)]
struct ServiceHealthEntry {
    #[serde(rename = "Service")]
    service: ServiceBlock,
    #[serde(rename = "Checks", default)]
    checks: Vec<CheckBlock>,
}

#[derive(Debug, Deserialize)]
struct ServiceBlock {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Address")]
    address: String,
    #[serde(rename = "Port")]
    port: u16,
    #[serde(rename = "Tags", default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CheckBlock {
    #[serde(rename = "Status")]
    status: String,
}

pub struct RegistryClient {
    http: reqwest::Client,
    base_url: String,
    query_timeout: Duration,
}

impl RegistryClient {
    pub fn new(base_url: &str, query_timeout: Duration) -> Result<Self, DiscoveryError> {
        // One pooled client for the registry target; per-call deadlines
        // are set on the requests because watch calls wait far longer
        // than snapshot queries.
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| DiscoveryError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            query_timeout,
        })
    }

    /// Non-blocking snapshot of every backend for a hostname, healthy
    /// or not. The caller separates capacity from existence.
    pub async fn query(&self, app_hostname: &str) -> Result<Vec<Backend>, DiscoveryError> {
        let url = format!("{}/v1/health/service/{}", self.base_url, app_hostname);
        let response = self
            .http
            .get(&url)
            .timeout(self.query_timeout)
            .send()
            .await
            .map_err(|e| self.map_error(e, self.query_timeout))?;

        if !response.status().is_success() {
            return Err(DiscoveryError::Status(response.status().as_u16()));
        }

        let entries: Vec<ServiceHealthEntry> = response
            .json()
            .await
            .map_err(|e| DiscoveryError::Parse(e.to_string()))?;
        Ok(entries.iter().map(backend_from_entry).collect())
    }

    /// Long-poll watch: blocks server-side until the registry version
    /// exceeds `index` or `wait` expires. Returns the new version token
    /// and the healthy snapshot.
    pub async fn watch(
        &self,
        app_hostname: &str,
        index: u64,
        wait: Duration,
    ) -> Result<(u64, Vec<Backend>), DiscoveryError> {
        let url = format!(
            "{}/v1/health/service/{}?passing=true&index={}&wait={}s",
            self.base_url,
            app_hostname,
            index,
            wait.as_secs()
        );
        // Give the server its full wait plus transit slack.
        let deadline = wait + Duration::from_secs(5);
        let response = self
            .http
            .get(&url)
            .timeout(deadline)
            .send()
            .await
            .map_err(|e| self.map_error(e, deadline))?;

        if !response.status().is_success() {
            return Err(DiscoveryError::Status(response.status().as_u16()));
        }

        let version = response
            .headers()
            .get(CONSUL_INDEX_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(index);

        let entries: Vec<ServiceHealthEntry> = response
            .json()
            .await
            .map_err(|e| DiscoveryError::Parse(e.to_string()))?;
        Ok((version, entries.iter().map(backend_from_entry).collect()))
    }

    fn map_error(&self, error: reqwest::Error, deadline: Duration) -> DiscoveryError {
        if error.is_timeout() {
            DiscoveryError::Timeout(deadline)
        } else {
            DiscoveryError::Transport(error.to_string())
        }
    }
}

fn tag_value<'a>(tags: &'a [String], prefix: &str) -> Option<&'a str> {
    tags.iter()
        .find_map(|tag| tag.strip_prefix(prefix))
        .filter(|rest| !rest.is_empty())
}

fn backend_from_entry(entry: &ServiceHealthEntry) -> Backend {
    let tags = &entry.service.tags;
    let external_port = tag_value(tags, "external-port-")
        .and_then(|raw| raw.parse::<u16>().ok())
        .unwrap_or_else(|| {
            warn!(
                container_id = %entry.service.id,
                "entry without external-port tag, falling back to service port"
            );
            entry.service.port
        });

    Backend {
        container_id: entry.service.id.clone(),
        address: entry.service.address.clone(),
        port: entry.service.port,
        external_port,
        image_id: tag_value(tags, "image-")
            .and_then(|raw| raw.parse::<i64>().ok())
            .unwrap_or_default(),
        user_id: tag_value(tags, "owner-").and_then(|raw| raw.parse::<i64>().ok()),
        app_hostname: tag_value(tags, "app-hostname-")
            .unwrap_or_default()
            .to_string(),
        passing: entry
            .checks
            .iter()
            .all(|check| check.status == "passing")
            && !entry.checks.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Query;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use std::collections::HashMap;
    use std::net::SocketAddr;

    fn entry_json(id: &str, status: &str) -> serde_json::Value {
        serde_json::json!({
            "Service": {
                "ID": id,
                "Address": "172.19.0.5",
                "Port": 80,
                "Tags": ["image-7", "app-hostname-demo", "external-port-30001", "owner-42"]
            },
            "Checks": [{"Status": status}]
        })
    }

    async fn spawn_stub(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    #[test]
    fn test_backend_from_entry_decodes_tags() {
        let entry: ServiceHealthEntry =
            serde_json::from_value(entry_json("c1", "passing")).unwrap();
        let backend = backend_from_entry(&entry);

        assert_eq!(backend.container_id, "c1");
        assert_eq!(backend.external_port, 30001);
        assert_eq!(backend.image_id, 7);
        assert_eq!(backend.user_id, Some(42));
        assert_eq!(backend.app_hostname, "demo");
        assert!(backend.passing);
    }

    #[test]
    fn test_non_passing_check_marks_backend() {
        let entry: ServiceHealthEntry =
            serde_json::from_value(entry_json("c1", "critical")).unwrap();
        assert!(!backend_from_entry(&entry).passing);
    }

    #[test]
    fn test_missing_external_port_falls_back_to_service_port() {
        let entry: ServiceHealthEntry = serde_json::from_value(serde_json::json!({
            "Service": {"ID": "c1", "Address": "a", "Port": 8080, "Tags": []},
            "Checks": [{"Status": "passing"}]
        }))
        .unwrap();
        assert_eq!(backend_from_entry(&entry).external_port, 8080);
    }

    #[tokio::test]
    async fn test_query_parses_stub_response() {
        let router = Router::new().route(
            "/v1/health/service/{name}",
            get(|| async {
                (
                    [(CONSUL_INDEX_HEADER, "5")],
                    Json(vec![
                        entry_json("c1", "passing"),
                        entry_json("c2", "critical"),
                    ]),
                )
            }),
        );
        let addr = spawn_stub(router).await;

        let client = RegistryClient::new(
            &format!("http://{addr}"),
            Duration::from_millis(500),
        )
        .unwrap();
        let backends = client.query("demo").await.unwrap();

        assert_eq!(backends.len(), 2);
        assert!(backends[0].passing);
        assert!(!backends[1].passing);
    }

    #[tokio::test]
    async fn test_watch_returns_header_version() {
        let router = Router::new().route(
            "/v1/health/service/{name}",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                assert_eq!(params.get("index").map(String::as_str), Some("3"));
                (
                    [(CONSUL_INDEX_HEADER, "9")],
                    Json(vec![entry_json("c1", "passing")]),
                )
            }),
        );
        let addr = spawn_stub(router).await;

        let client = RegistryClient::new(
            &format!("http://{addr}"),
            Duration::from_millis(500),
        )
        .unwrap();
        let (version, backends) = client.watch("demo", 3, Duration::from_secs(1)).await.unwrap();

        assert_eq!(version, 9);
        assert_eq!(backends.len(), 1);
    }

    #[tokio::test]
    async fn test_query_times_out_against_slow_stub() {
        let router = Router::new().route(
            "/v1/health/service/{name}",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(Vec::<serde_json::Value>::new())
            }),
        );
        let addr = spawn_stub(router).await;

        let client = RegistryClient::new(
            &format!("http://{addr}"),
            Duration::from_millis(100),
        )
        .unwrap();
        let error = client.query("demo").await.unwrap_err();
        assert!(matches!(error, DiscoveryError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_query_surfaces_error_status() {
        let router = Router::new().route(
            "/v1/health/service/{name}",
            get(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response() }),
        );
        let addr = spawn_stub(router).await;

        let client = RegistryClient::new(
            &format!("http://{addr}"),
            Duration::from_millis(500),
        )
        .unwrap();
        let error = client.query("demo").await.unwrap_err();
        assert!(matches!(error, DiscoveryError::Status(500)));
    }
}
