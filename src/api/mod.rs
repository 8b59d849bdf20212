//! HTTP surface: system endpoints, OpenAPI document and router
//! composition.
//!
//! [`build_router`] assembles every route the gateway serves: the
//! `/api/proxy` catch-all, the WebSocket endpoints, `/health`, `/feeds`
//! and the OpenAPI document.

pub mod dto;
pub mod handlers;
pub mod openapi;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;

/// Builds the complete router with all HTTP and WebSocket endpoints.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .merge(crate::proxy::handler::routes())
        .merge(crate::ws::handler::routes())
        .merge(handlers::routes())
        .merge(openapi::routes())
}

/// Builds the router with tracing and CORS layers and binds `state`.
pub fn build_app(state: AppState) -> Router {
    build_router()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
