//! Axum WebSocket upgrade handlers.

use std::sync::Arc;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;

use super::connection::run_connection;
use crate::app_state::AppState;
use crate::domain::SubscriptionKey;
use crate::error::GatewayError;

/// `GET /ws`: upgrade to a streaming session with no initial subscription.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    upgrade(ws, &state, None)
}

/// `GET /ws/prices/{symbol}`: upgrade pre-subscribed to one symbol.
pub async fn symbol_ws_handler(
    ws: WebSocketUpgrade,
    Path(symbol): Path<String>,
    State(state): State<AppState>,
) -> Response {
    match SubscriptionKey::parse(&symbol) {
        Ok(key) if !key.is_aggregate() => upgrade(ws, &state, Some(key)),
        Ok(_) => GatewayError::InvalidSubscriptionKey(symbol).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `GET /ws/dashboard`: upgrade pre-subscribed to the aggregate key.
pub async fn dashboard_ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    upgrade(ws, &state, Some(SubscriptionKey::Aggregate))
}

fn upgrade(ws: WebSocketUpgrade, state: &AppState, initial: Option<SubscriptionKey>) -> Response {
    let registry = Arc::clone(&state.registry);
    let capacity = state.session_queue_capacity;
    ws.on_upgrade(move |socket| run_connection(socket, registry, capacity, initial))
}

/// WebSocket routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/ws/prices/{symbol}", get(symbol_ws_handler))
        .route("/ws/dashboard", get(dashboard_ws_handler))
}
