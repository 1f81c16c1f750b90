//! HTTP surface of the registry.
//!
//! The wire shape follows the Consul agent/health API so standard
//! clients work unchanged: service health queries long-poll on the
//! `index` query parameter and the new version is echoed in the
//! `X-Consul-Index` response header.

use crate::backend::{Backend, HealthStatus};
use crate::error::RegistryError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, put};
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;

pub const CONSUL_INDEX_HEADER: &str = "X-Consul-Index";

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceHealthEntry {
    #[serde(rename = "Service")]
    pub service: ServiceBlock,
    #[serde(rename = "Checks")]
    pub checks: Vec<CheckBlock>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceBlock {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "Port")]
    pub port: u16,
    #[serde(rename = "Tags")]
    pub tags: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckBlock {
    #[serde(rename = "Status")]
    pub status: String,
}

/// Registration body accepted from the control plane. The `Check`
/// block is accepted for wire compatibility; probing is always driven
/// by the registry's own configuration.
#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceRegistration {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "Port")]
    pub port: u16,
    #[serde(rename = "Tags", default)]
    pub tags: Vec<String>,
    #[serde(rename = "Check", default)]
    pub check: Option<CheckDefinition>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckDefinition {
    #[serde(rename = "TCP")]
    pub tcp: String,
    #[serde(rename = "Interval")]
    pub interval: String,
    #[serde(rename = "Timeout")]
    pub timeout: String,
    #[serde(rename = "DeregisterCriticalServiceAfter", default)]
    pub deregister_critical_service_after: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HealthServiceParams {
    #[serde(default)]
    passing: Option<bool>,
    #[serde(default)]
    index: Option<u64>,
    #[serde(default)]
    wait: Option<String>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/health/service/{service_name}", get(health_service_handler))
        .route("/v1/agent/service/register", put(register_handler))
        .route(
            "/v1/agent/service/deregister/{container_id}",
            put(deregister_handler),
        )
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Encode a backend as a Consul-style service entry.
pub fn entry_from_backend(backend: &Backend) -> ServiceHealthEntry {
    let mut tags = vec![
        format!("image-{}", backend.image_id),
        format!("app-hostname-{}", backend.app_hostname),
        format!("external-port-{}", backend.external_port),
    ];
    if let Some(user_id) = backend.user_id {
        tags.push(format!("owner-{user_id}"));
    }

    ServiceHealthEntry {
        service: ServiceBlock {
            id: backend.container_id.clone(),
            address: backend.address.clone(),
            port: backend.internal_port,
            tags,
        },
        checks: vec![CheckBlock {
            status: backend.health.as_str().to_string(),
        }],
    }
}

fn tag_value<'a>(tags: &'a [String], prefix: &str) -> Option<&'a str> {
    tags.iter()
        .find_map(|tag| tag.strip_prefix(prefix))
        .filter(|rest| !rest.is_empty())
}

/// Parse Consul-style wait strings: `60s`, `500ms`, or bare seconds.
fn parse_wait(raw: &str) -> Option<Duration> {
    if let Some(ms) = raw.strip_suffix("ms") {
        return ms.parse::<u64>().ok().map(Duration::from_millis);
    }
    if let Some(s) = raw.strip_suffix('s') {
        return s.parse::<u64>().ok().map(Duration::from_secs);
    }
    raw.parse::<u64>().ok().map(Duration::from_secs)
}

async fn health_service_handler(
    State(state): State<AppState>,
    Path(service_name): Path<String>,
    Query(params): Query<HealthServiceParams>,
) -> Result<impl IntoResponse, RegistryError> {
    let hostname = lifecycle::normalize(&service_name);
    if hostname.is_empty() {
        return Err(RegistryError::InvalidRequest(
            "service name is empty".to_string(),
        ));
    }

    let max_wait = params
        .wait
        .as_deref()
        .and_then(parse_wait)
        .unwrap_or_else(|| Duration::from_secs(state.config.watch_default_wait_s))
        .min(Duration::from_secs(state.config.watch_max_wait_s));
    let passing_only = params.passing.unwrap_or(false);

    let (version, backends) = match params.index {
        // Long poll: park until the version advances past the one the
        // caller has seen, or the wait expires.
        Some(index) => state.store.watch(&hostname, index, max_wait).await,
        None if passing_only => (state.store.version(), state.store.query_healthy(&hostname)),
        None => (state.store.version(), state.store.query_all(&hostname)),
    };

    let entries: Vec<ServiceHealthEntry> = backends
        .iter()
        .filter(|backend| !passing_only || backend.is_passing())
        .map(entry_from_backend)
        .collect();

    Ok((
        StatusCode::OK,
        [(CONSUL_INDEX_HEADER, version.to_string())],
        Json(entries),
    ))
}

async fn register_handler(
    State(state): State<AppState>,
    Json(body): Json<ServiceRegistration>,
) -> Result<impl IntoResponse, RegistryError> {
    if body.id.trim().is_empty() {
        return Err(RegistryError::InvalidRequest("ID is empty".to_string()));
    }

    let app_hostname = tag_value(&body.tags, "app-hostname-")
        .map(lifecycle::normalize)
        .unwrap_or_else(|| lifecycle::normalize(&body.name));
    if app_hostname.is_empty() {
        return Err(RegistryError::InvalidRequest(
            "no app hostname in Name or Tags".to_string(),
        ));
    }

    let external_port = tag_value(&body.tags, "external-port-")
        .and_then(|raw| raw.parse::<u16>().ok())
        .ok_or_else(|| {
            RegistryError::InvalidRequest("missing or invalid external-port tag".to_string())
        })?;
    let image_id = tag_value(&body.tags, "image-")
        .and_then(|raw| raw.parse::<i64>().ok())
        .unwrap_or_default();
    let user_id = tag_value(&body.tags, "owner-").and_then(|raw| raw.parse::<i64>().ok());

    let backend = Backend {
        container_id: body.id.clone(),
        address: body.address.clone(),
        internal_port: body.port,
        external_port,
        image_id,
        user_id,
        app_hostname,
        health: HealthStatus::Passing,
        registered_at: Utc::now(),
    };
    let version = state.store.register(backend);

    info!(container_id = %body.id, version, "service registered via agent API");
    Ok(StatusCode::OK)
}

async fn deregister_handler(
    State(state): State<AppState>,
    Path(container_id): Path<String>,
) -> impl IntoResponse {
    // Consul semantics: deregistering an unknown id is not an error.
    state.store.deregister(&container_id);
    StatusCode::OK
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "registry": {
            "version": state.store.version(),
            "backends": state.store.len(),
            "passing": state.store.count_passing(),
        },
        "consumer": {
            "messages": state.consumer_counters.messages(),
            "processed": state.consumer_counters.processed(),
            "failed": state.consumer_counters.failed(),
            "skipped": state.consumer_counters.skipped(),
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::RegistryStore;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use lifecycle::ConsumerCounters;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let (shutdown_tx, _) = tokio::sync::watch::channel(false);
        AppState::new(
            crate::config::RegistryConfig::default(),
            Arc::new(RegistryStore::new()),
            Arc::new(ConsumerCounters::default()),
            shutdown_tx,
        )
    }

    fn backend(id: &str, hostname: &str) -> Backend {
        Backend {
            container_id: id.to_string(),
            address: "172.19.0.5".to_string(),
            internal_port: 80,
            external_port: 30001,
            image_id: 7,
            user_id: Some(42),
            app_hostname: hostname.to_string(),
            health: HealthStatus::Passing,
            registered_at: Utc::now(),
        }
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_parse_wait_forms() {
        assert_eq!(parse_wait("60s"), Some(Duration::from_secs(60)));
        assert_eq!(parse_wait("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_wait("5"), Some(Duration::from_secs(5)));
        assert_eq!(parse_wait("abc"), None);
    }

    #[test]
    fn test_entry_tags_encode_metadata() {
        let entry = entry_from_backend(&backend("c1", "demo"));
        assert!(entry.service.tags.contains(&"image-7".to_string()));
        assert!(entry.service.tags.contains(&"app-hostname-demo".to_string()));
        assert!(entry.service.tags.contains(&"external-port-30001".to_string()));
        assert!(entry.service.tags.contains(&"owner-42".to_string()));
        assert_eq!(entry.checks[0].status, "passing");
    }

    #[tokio::test]
    async fn test_health_service_returns_entries_and_index() {
        let state = test_state();
        state.store.register(backend("c1", "demo"));
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::get("/v1/health/service/demo?passing=true")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let index: u64 = response
            .headers()
            .get(CONSUL_INDEX_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(index >= 1);

        let body = body_json(response).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["Service"]["ID"], "c1");
        assert_eq!(body[0]["Service"]["Port"], 80);
    }

    #[tokio::test]
    async fn test_passing_filter_excludes_critical() {
        let state = test_state();
        state.store.register(backend("c1", "demo"));
        state.store.register(backend("c2", "demo"));
        state.store.set_health("c2", HealthStatus::Critical);
        let app = build_router(state);

        let passing = app
            .clone()
            .oneshot(
                Request::get("/v1/health/service/demo?passing=true")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(passing).await;
        assert_eq!(body.as_array().unwrap().len(), 1);

        let all = app
            .oneshot(
                Request::get("/v1/health/service/demo")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(all).await;
        assert_eq!(body.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_register_and_deregister_round_trip() {
        let state = test_state();
        let store = state.store.clone();
        let app = build_router(state);

        let registration = serde_json::json!({
            "ID": "c9",
            "Name": "shop",
            "Address": "172.19.0.9",
            "Port": 8080,
            "Tags": ["image-3", "app-hostname-shop", "external-port-31000", "owner-7"],
            "Check": {
                "TCP": "docker-dind:31000",
                "Interval": "10s",
                "Timeout": "2s",
                "DeregisterCriticalServiceAfter": "60s"
            }
        });
        let response = app
            .clone()
            .oneshot(
                Request::put("/v1/agent/service/register")
                    .header("content-type", "application/json")
                    .body(Body::from(registration.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let registered = store.get("c9").expect("backend registered");
        assert_eq!(registered.app_hostname, "shop");
        assert_eq!(registered.external_port, 31000);
        assert_eq!(registered.image_id, 3);
        assert_eq!(registered.user_id, Some(7));

        let response = app
            .oneshot(
                Request::put("/v1/agent/service/deregister/c9")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(store.get("c9").is_none());
    }

    #[tokio::test]
    async fn test_register_without_external_port_is_rejected() {
        let state = test_state();
        let app = build_router(state);

        let registration = serde_json::json!({
            "ID": "c9",
            "Name": "shop",
            "Address": "172.19.0.9",
            "Port": 8080,
            "Tags": ["image-3"]
        });
        let response = app
            .oneshot(
                Request::put("/v1/agent/service/register")
                    .header("content-type", "application/json")
                    .body(Body::from(registration.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_watch_blocks_until_change() {
        let state = test_state();
        let store = state.store.clone();
        let current = store.register(backend("c1", "demo"));
        let app = build_router(state);

        let request = Request::get(format!(
            "/v1/health/service/demo?passing=true&index={current}&wait=10s"
        ))
        .body(Body::empty())
        .unwrap();
        let pending = tokio::spawn(app.oneshot(request));

        tokio::time::sleep(Duration::from_millis(50)).await;
        store.register(backend("c2", "demo"));

        let response = pending.await.unwrap().unwrap();
        let index: u64 = response
            .headers()
            .get(CONSUL_INDEX_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(index > current);

        let body = body_json(response).await;
        assert_eq!(body.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_health_endpoint_reports_counts() {
        let state = test_state();
        state.store.register(backend("c1", "demo"));
        let app = build_router(state);

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["registry"]["backends"], 1);
        assert_eq!(body["registry"]["passing"], 1);
    }
}
