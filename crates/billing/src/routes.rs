//! HTTP surface of the billing service.

use crate::state::AppState;
use crate::summary::{summary_all_images, summary_by_image};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/billing/{user_id}", get(all_images_handler))
        .route(
            "/api/billing/{user_id}/images/{image_id}",
            get(image_detail_handler),
        )
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn all_images_handler(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> impl IntoResponse {
    let summaries = summary_all_images(&state.ledger, user_id, Utc::now());
    Json(json!({
        "user_id": user_id,
        "images": summaries,
    }))
}

async fn image_detail_handler(
    State(state): State<AppState>,
    Path((user_id, image_id)): Path<(i64, i64)>,
) -> impl IntoResponse {
    let detail = summary_by_image(&state.ledger, user_id, image_id, Utc::now());
    Json(detail)
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "ledger": {
            "active": state.ledger.active_count(),
            "completed": state.ledger.completed_count(),
        },
        "consumer": {
            "messages": state.consumer_counters.messages(),
            "processed": state.consumer_counters.processed(),
            "failed": state.consumer_counters.failed(),
            "skipped": state.consumer_counters.skipped(),
        }
    }))
}
