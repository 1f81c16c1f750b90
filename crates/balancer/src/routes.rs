//! HTTP surface of the load balancer.

use crate::error::LbError;
use crate::state::AppState;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::warn;

pub const CORRELATION_HEADER: &str = "X-Correlation-ID";

#[derive(Debug, Deserialize)]
struct RouteRequest {
    app_hostname: String,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/route", post(route_handler))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn status_for(error: &LbError) -> (StatusCode, String) {
    match error {
        LbError::InvalidInput(_) => (StatusCode::BAD_REQUEST, error.to_string()),
        LbError::NotFound(_) => (StatusCode::NOT_FOUND, error.to_string()),
        LbError::NoCapacity(_) | LbError::Unavailable | LbError::CircuitOpen => {
            (StatusCode::SERVICE_UNAVAILABLE, error.to_string())
        }
        LbError::Timeout(_) => (StatusCode::GATEWAY_TIMEOUT, error.to_string()),
        LbError::Unknown(detail) => {
            warn!(detail, "route failed with unexpected error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "An internal error occurred".to_string(),
            )
        }
    }
}

async fn route_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RouteRequest>,
) -> Response {
    let correlation = correlation_id(&headers);

    match state.lb.route(&body.app_hostname).await {
        Ok(info) => (
            StatusCode::OK,
            [(CORRELATION_HEADER, correlation)],
            Json(info),
        )
            .into_response(),
        Err(error) => {
            let (status, message) = status_for(&error);
            (
                status,
                [(CORRELATION_HEADER, correlation)],
                Json(json!({ "error": message })),
            )
                .into_response()
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "circuit": state.lb.breaker_state().as_str(),
        "watched_hostnames": state.lb.watched_count(),
    }))
}
