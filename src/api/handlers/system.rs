//! System endpoints: health check and feed introspection.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use crate::api::dto::FeedListResponse;
use crate::app_state::AppState;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    status: String,
    timestamp: String,
    version: String,
    active_feeds: usize,
}

/// `GET /health`: service health status.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    summary = "Health check",
    description = "Returns service health status, version, current timestamp and the number of open upstream feeds.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    )
)]
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            active_feeds: state.registry.feed_count().await,
        }),
    )
}

/// `GET /feeds`: active upstream feeds.
#[utoipa::path(
    get,
    path = "/feeds",
    tag = "System",
    summary = "List active feeds",
    description = "Returns every upstream price feed currently held open, with its state and consumer count.",
    responses(
        (status = 200, description = "Active feeds", body = FeedListResponse),
    )
)]
pub async fn feeds_handler(State(state): State<AppState>) -> impl IntoResponse {
    let summaries = state.registry.snapshot().await;
    (StatusCode::OK, Json(FeedListResponse::from_summaries(summaries)))
}

/// System routes mounted at the root level.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/feeds", get(feeds_handler))
}
