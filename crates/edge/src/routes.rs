//! Router assembly and the observability endpoints.

use crate::handler::{api_handler, apps_handler, apps_root_handler};
use crate::state::AppState;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{any, get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

#[derive(Debug, Deserialize)]
struct MetricsQuery {
    #[serde(default)]
    user_id: Option<i64>,
    #[serde(default)]
    app_hostname: Option<String>,
    #[serde(default)]
    container_id: Option<String>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/apps/{app_hostname}", any(apps_root_handler))
        .route("/apps/{app_hostname}/{*tail}", any(apps_handler))
        .route("/api/{*path}", any(api_handler))
        .route("/metrics", get(metrics_handler))
        .route("/metrics/reset", post(metrics_reset_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn metrics_handler(
    State(state): State<AppState>,
    Query(query): Query<MetricsQuery>,
) -> impl IntoResponse {
    let view = if let Some(user_id) = query.user_id {
        state.metrics.get_metrics_by_user(user_id)
    } else if let Some(hostname) = query.app_hostname.as_deref() {
        state.metrics.get_metrics_by_app_hostname(hostname)
    } else if let Some(container_id) = query.container_id.as_deref() {
        state.metrics.get_metrics_by_container(container_id)
    } else {
        Some(state.metrics.get_metrics())
    };

    match view {
        Some(metrics) => (StatusCode::OK, Json(metrics)),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no metrics found for this dimension" })),
        ),
    }
}

async fn metrics_reset_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.reset();
    Json(json!({ "status": "reset" }))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "routing_cache": {
            "entries": state.cache.len(),
        },
        "requests_total": state.metrics.total_requests(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::LbClient;
    use axum::body::Body;
    use axum::http::{HeaderMap, Request};
    use http_body_util::BodyExt;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    /// In-process user backend; counts hits and echoes request info.
    async fn spawn_backend(status: StatusCode) -> (SocketAddr, Arc<AtomicU64>) {
        let hits = Arc::new(AtomicU64::new(0));
        let hits_for_route = hits.clone();
        let router = Router::new().fallback(move |headers: HeaderMap, request: Request<Body>| {
            let hits = hits_for_route.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                let forwarded = headers
                    .get("x-forwarded-for")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                let correlation = headers
                    .get("x-correlation-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                (
                    status,
                    Json(json!({
                        "path": request.uri().path(),
                        "query": request.uri().query(),
                        "forwarded_for": forwarded,
                        "correlation": correlation,
                    })),
                )
            }
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (addr, hits)
    }

    /// In-process balancer stub: counts /route calls.
    async fn spawn_lb(
        backend: Option<SocketAddr>,
        error_status: StatusCode,
    ) -> (SocketAddr, Arc<AtomicU64>) {
        let calls = Arc::new(AtomicU64::new(0));
        let calls_for_route = calls.clone();
        let router = Router::new().route(
            "/route",
            post(move || {
                let calls = calls_for_route.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    match backend {
                        Some(addr) => (
                            StatusCode::OK,
                            Json(json!({
                                "target_host": addr.ip().to_string(),
                                "target_port": addr.port(),
                                "container_id": "c1",
                                "image_id": 7,
                                "ttl": 1800
                            })),
                        )
                            .into_response(),
                        None => (error_status, "no instances available").into_response(),
                    }
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (addr, calls)
    }

    fn edge_app(lb_addr: SocketAddr) -> (Router, AppState) {
        let config = crate::config::EdgeConfig {
            lb_url: format!("http://{lb_addr}"),
            ..Default::default()
        };
        let lb = Arc::new(
            LbClient::new(&config.lb_url, Duration::from_millis(500)).unwrap(),
        );
        let state = AppState::new(config, lb).unwrap();
        (build_router(state.clone()), state)
    }

    fn get_request(path: &str, client_ip: &str) -> Request<Body> {
        Request::get(path)
            .header("x-forwarded-for", client_ip)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_cold_request_routes_and_caches() {
        let (backend_addr, backend_hits) = spawn_backend(StatusCode::OK).await;
        let (lb_addr, lb_calls) = spawn_lb(Some(backend_addr), StatusCode::OK).await;
        let (app, state) = edge_app(lb_addr);

        let response = app
            .oneshot(get_request("/apps/demo/index.html", "1.2.3.4"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["path"], "/index.html");

        assert_eq!(backend_hits.load(Ordering::SeqCst), 1);
        assert_eq!(lb_calls.load(Ordering::SeqCst), 1);

        // A cache entry for (demo, 1.2.3.4) exists pointing at the stub.
        let entry = state.cache.get("demo", "1.2.3.4").expect("entry cached");
        assert_eq!(entry.target_host, backend_addr.ip().to_string());
        assert_eq!(entry.target_port, backend_addr.port());

        assert_eq!(state.metrics.requests_for_app("demo"), 1);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_balancer() {
        let (backend_addr, _) = spawn_backend(StatusCode::OK).await;
        let (lb_addr, lb_calls) = spawn_lb(Some(backend_addr), StatusCode::OK).await;
        let (app, state) = edge_app(lb_addr);

        let first = app
            .clone()
            .oneshot(get_request("/apps/demo/index.html", "1.2.3.4"))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(lb_calls.load(Ordering::SeqCst), 1);

        let second = app
            .oneshot(get_request("/apps/demo/other", "1.2.3.4"))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::OK);
        // The balancer was not consulted again.
        assert_eq!(lb_calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.metrics.requests_for_app("demo"), 2);
    }

    #[tokio::test]
    async fn test_upstream_5xx_passes_through_and_invalidates() {
        let (backend_addr, _) = spawn_backend(StatusCode::BAD_GATEWAY).await;
        let (lb_addr, lb_calls) = spawn_lb(Some(backend_addr), StatusCode::OK).await;
        let (app, state) = edge_app(lb_addr);

        let response = app
            .clone()
            .oneshot(get_request("/apps/demo/x", "1.2.3.4"))
            .await
            .unwrap();
        // The 502 passes through unchanged.
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        // And the cache entry is gone.
        assert!(state.cache.get("demo", "1.2.3.4").is_none());

        // Next request re-enters the balancer path.
        let _ = app
            .oneshot(get_request("/apps/demo/x", "1.2.3.4"))
            .await
            .unwrap();
        assert_eq!(lb_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_capacity_maps_to_503_without_cache_write() {
        let (lb_addr, _) = spawn_lb(None, StatusCode::SERVICE_UNAVAILABLE).await;
        let (app, state) = edge_app(lb_addr);

        let response = app
            .oneshot(get_request("/apps/demo/index.html", "1.2.3.4"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"no instances available");
        assert!(state.cache.is_empty());
    }

    #[tokio::test]
    async fn test_not_found_maps_to_503() {
        let (lb_addr, _) = spawn_lb(None, StatusCode::NOT_FOUND).await;
        let (app, _) = edge_app(lb_addr);

        let response = app
            .oneshot(get_request("/apps/ghost/x", "1.2.3.4"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_dead_backend_maps_to_502_and_invalidates() {
        // Reserve a port with no listener behind it.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = listener.local_addr().unwrap();
        drop(listener);

        let (lb_addr, _) = spawn_lb(Some(dead), StatusCode::OK).await;
        let (app, state) = edge_app(lb_addr);

        let response = app
            .oneshot(get_request("/apps/demo/x", "1.2.3.4"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(state.cache.get("demo", "1.2.3.4").is_none());
    }

    #[tokio::test]
    async fn test_forwarded_headers_reach_backend() {
        let (backend_addr, _) = spawn_backend(StatusCode::OK).await;
        let (lb_addr, _) = spawn_lb(Some(backend_addr), StatusCode::OK).await;
        let (app, _) = edge_app(lb_addr);

        let request = Request::get("/apps/demo/page?x=1&y=2")
            .header("x-forwarded-for", "1.2.3.4")
            .header("x-correlation-id", "corr-42")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(
            response.headers().get("x-correlation-id").unwrap(),
            "corr-42"
        );

        let body = body_json(response).await;
        assert_eq!(body["query"], "x=1&y=2");
        assert_eq!(body["correlation"], "corr-42");
        assert_eq!(body["forwarded_for"], "1.2.3.4");
    }

    #[tokio::test]
    async fn test_concurrent_cold_requests_collapse_to_one_route_call() {
        let (backend_addr, _) = spawn_backend(StatusCode::OK).await;
        let (lb_addr, lb_calls) = spawn_lb(Some(backend_addr), StatusCode::OK).await;
        let (app, _) = edge_app(lb_addr);

        let mut tasks = Vec::new();
        for _ in 0..6 {
            let app = app.clone();
            tasks.push(tokio::spawn(async move {
                app.oneshot(get_request("/apps/demo/x", "1.2.3.4"))
                    .await
                    .unwrap()
                    .status()
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), StatusCode::OK);
        }

        assert_eq!(lb_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_post_body_is_forwarded() {
        // Echo stub: returns the request body verbatim.
        let router = Router::new().fallback(|body: axum::body::Bytes| async move { body });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let backend_addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let (lb_addr, _) = spawn_lb(Some(backend_addr), StatusCode::OK).await;
        let (app, _) = edge_app(lb_addr);

        let request = Request::post("/apps/demo/submit")
            .header("x-forwarded-for", "1.2.3.4")
            .body(Body::from("payload bytes"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"payload bytes");
    }

    #[tokio::test]
    async fn test_metrics_endpoint_views() {
        let (backend_addr, _) = spawn_backend(StatusCode::OK).await;
        let (lb_addr, _) = spawn_lb(Some(backend_addr), StatusCode::OK).await;
        let (app, _) = edge_app(lb_addr);

        let request = Request::get("/apps/demo/x")
            .header("x-forwarded-for", "1.2.3.4")
            .header("x-user-id", "42")
            .body(Body::empty())
            .unwrap();
        let _ = app.clone().oneshot(request).await.unwrap();

        let global = app
            .clone()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(global).await;
        assert_eq!(body["total_requests"], 1);
        assert_eq!(body["by_app_hostname"]["demo"]["requests"], 1);

        let by_user = app
            .clone()
            .oneshot(
                Request::get("/metrics?user_id=42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(by_user.status(), StatusCode::OK);
        let body = body_json(by_user).await;
        assert_eq!(body["total_requests"], 1);
        assert!(body["by_container"]["c1"].is_object());

        let missing = app
            .clone()
            .oneshot(
                Request::get("/metrics?user_id=999")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let reset = app
            .clone()
            .oneshot(
                Request::post("/metrics/reset")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(reset.status(), StatusCode::OK);

        let after = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(after).await;
        assert_eq!(body["total_requests"], 0);
    }

    #[tokio::test]
    async fn test_api_passthrough_forwards_to_control_plane() {
        let (control_addr, control_hits) = spawn_backend(StatusCode::OK).await;
        let (lb_addr, _) = spawn_lb(None, StatusCode::NOT_FOUND).await;

        let config = crate::config::EdgeConfig {
            lb_url: format!("http://{lb_addr}"),
            orchestrator_url: format!("http://{control_addr}"),
            ..Default::default()
        };
        let lb = Arc::new(
            LbClient::new(&config.lb_url, Duration::from_millis(500)).unwrap(),
        );
        let state = AppState::new(config, lb).unwrap();
        let app = build_router(state);

        let response = app
            .oneshot(
                Request::get("/api/images?page=2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(control_hits.load(Ordering::SeqCst), 1);

        let body = body_json(response).await;
        assert_eq!(body["path"], "/api/images");
        assert_eq!(body["query"], "page=2");
    }

    #[tokio::test]
    async fn test_empty_hostname_segment_is_rejected() {
        let (lb_addr, lb_calls) = spawn_lb(None, StatusCode::NOT_FOUND).await;
        let (app, _) = edge_app(lb_addr);

        // A blank segment normalizes to nothing.
        let response = app
            .oneshot(get_request("/apps/%20/x", "1.2.3.4"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(lb_calls.load(Ordering::SeqCst), 0);
    }
}
