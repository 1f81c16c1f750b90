//! Per-request proxy flow.
//!
//! For `/apps/{hostname}/{tail}`: normalize, identify the client, read
//! the routing cache, fall through to the balancer on a miss (collapsed
//! to one in-flight resolution per key), forward with a streamed body,
//! invalidate the cache on upstream failure and record one metrics
//! sample.

use crate::cache::{CacheEntry, CacheKey};
use crate::client::RouteError;
use crate::proxy::{self, CORRELATION_HEADER};
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{debug, warn};

pub async fn apps_root_handler(
    State(state): State<AppState>,
    Path(app_hostname): Path<String>,
    request: Request<Body>,
) -> Response {
    proxy_app(state, app_hostname, String::new(), request).await
}

pub async fn apps_handler(
    State(state): State<AppState>,
    Path((app_hostname, tail)): Path<(String, String)>,
    request: Request<Body>,
) -> Response {
    proxy_app(state, app_hostname, tail, request).await
}

async fn proxy_app(
    state: AppState,
    raw_hostname: String,
    tail: String,
    request: Request<Body>,
) -> Response {
    let started = Instant::now();
    let (parts, body) = request.into_parts();
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let correlation = proxy::correlation_id(&parts.headers);

    let hostname = lifecycle::normalize(&raw_hostname);
    if hostname.is_empty() {
        return plain_response(
            StatusCode::BAD_REQUEST,
            "invalid app hostname",
            &correlation,
        );
    }

    let client_ip = proxy::extract_client_ip(&parts.headers, peer);
    let user_id = proxy::extract_user_id(&parts.headers);

    let entry = match resolve_backend(&state, &hostname, &client_ip, &correlation).await {
        Ok(entry) => entry,
        Err(error) => {
            let (status, message) = match error {
                RouteError::NotFound | RouteError::NoCapacity => {
                    (StatusCode::SERVICE_UNAVAILABLE, "no instances available")
                }
                RouteError::Timeout => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "service temporarily unavailable",
                ),
                RouteError::Unknown(_) => (StatusCode::BAD_GATEWAY, "bad gateway"),
            };
            let latency = started.elapsed().as_secs_f64() * 1000.0;
            state
                .metrics
                .record_request(status.as_u16(), latency, user_id, Some(&hostname), None);
            return plain_response(status, message, &correlation);
        }
    };

    let url = proxy::build_upstream_url(
        &entry.target_host,
        entry.target_port,
        &tail,
        parts.uri.query(),
    );
    let headers = proxy::prepare_headers(&parts.headers, &correlation, peer);
    debug!(
        app_hostname = %hostname,
        container_id = %entry.container_id,
        url = %url,
        "forwarding request"
    );

    match proxy::forward(
        &state.backend_http,
        parts.method,
        &url,
        headers,
        body,
        state.config.backend_timeout(),
    )
    .await
    {
        Ok(upstream) => {
            let status = upstream.status();
            // Backend failures evict the routing decision so the next
            // request re-resolves; the 5xx itself passes through.
            if status.as_u16() >= 500 {
                warn!(
                    app_hostname = %hostname,
                    container_id = %entry.container_id,
                    status = status.as_u16(),
                    "upstream returned server error, invalidating cache entry"
                );
                state.cache.invalidate(&hostname, &client_ip);
            }

            let latency = started.elapsed().as_secs_f64() * 1000.0;
            state.metrics.record_request(
                status.as_u16(),
                latency,
                user_id,
                Some(&hostname),
                Some(&entry.container_id),
            );

            let mut builder = Response::builder().status(status);
            if let Some(headers_mut) = builder.headers_mut() {
                *headers_mut = proxy::sanitize_response_headers(upstream.headers());
            }
            builder = builder.header(CORRELATION_HEADER, correlation.as_str());
            builder
                .body(Body::from_stream(upstream.bytes_stream()))
                .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
        }
        Err(error) => {
            warn!(
                app_hostname = %hostname,
                container_id = %entry.container_id,
                error = %error,
                "upstream transport failure, invalidating cache entry"
            );
            state.cache.invalidate(&hostname, &client_ip);

            let latency = started.elapsed().as_secs_f64() * 1000.0;
            state.metrics.record_request(
                StatusCode::BAD_GATEWAY.as_u16(),
                latency,
                user_id,
                Some(&hostname),
                Some(&entry.container_id),
            );
            plain_response(StatusCode::BAD_GATEWAY, "upstream unavailable", &correlation)
        }
    }
}

/// Cache read, with misses collapsed to one balancer call per key.
async fn resolve_backend(
    state: &AppState,
    hostname: &str,
    client_ip: &str,
    correlation: &str,
) -> Result<CacheEntry, RouteError> {
    if let Some(entry) = state.cache.get(hostname, client_ip) {
        debug!(app_hostname = %hostname, client_ip, "routing cache hit");
        return Ok(entry);
    }

    let key: CacheKey = (hostname.to_string(), client_ip.to_string());
    let lock = state.flights.lock_for(&key);
    let guard = lock.lock().await;

    // Someone may have resolved while we waited for the flight lock.
    let outcome = match state.cache.get(hostname, client_ip) {
        Some(entry) => Ok(entry),
        None => state.lb.route(hostname, correlation).await.map(|info| {
            let entry = info.into_cache_entry(state.config.cache_default_ttl_s);
            state.cache.set(hostname, client_ip, entry.clone());
            entry
        }),
    };

    drop(guard);
    drop(lock);
    state.flights.release(&key);
    outcome
}

/// Transparent passthrough to the control plane.
pub async fn api_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let started = Instant::now();
    let (parts, body) = request.into_parts();
    let peer = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let correlation = proxy::correlation_id(&parts.headers);

    let base = state.config.orchestrator_url.trim_end_matches('/');
    let url = match parts.uri.query() {
        Some(query) => format!("{base}{}?{query}", parts.uri.path()),
        None => format!("{base}{}", parts.uri.path()),
    };
    let headers = proxy::prepare_headers(&parts.headers, &correlation, peer);

    match proxy::forward(
        &state.control_http,
        parts.method,
        &url,
        headers,
        body,
        state.config.backend_timeout(),
    )
    .await
    {
        Ok(upstream) => {
            let status = upstream.status();
            let latency = started.elapsed().as_secs_f64() * 1000.0;
            state
                .metrics
                .record_request(status.as_u16(), latency, None, None, None);

            let mut builder = Response::builder().status(status);
            if let Some(headers_mut) = builder.headers_mut() {
                *headers_mut = proxy::sanitize_response_headers(upstream.headers());
            }
            builder = builder.header(CORRELATION_HEADER, correlation.as_str());
            builder
                .body(Body::from_stream(upstream.bytes_stream()))
                .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
        }
        Err(error) => {
            warn!(url = %url, error = %error, "control-plane passthrough failed");
            let latency = started.elapsed().as_secs_f64() * 1000.0;
            state
                .metrics
                .record_request(502, latency, None, None, None);
            plain_response(StatusCode::BAD_GATEWAY, "control plane unavailable", &correlation)
        }
    }
}

fn plain_response(status: StatusCode, message: &str, correlation: &str) -> Response {
    (
        status,
        [(CORRELATION_HEADER, correlation.to_string())],
        message.to_string(),
    )
        .into_response()
}
