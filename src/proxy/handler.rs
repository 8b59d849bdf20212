//! Axum handler for the catch-all backend proxy route.

use axum::Router;
use axum::extract::{Request, State};
use axum::response::Response;
use axum::routing::any;

use super::forwarder::ForwardRequest;
use crate::app_state::AppState;

/// Mount point of the proxy route.
pub const PROXY_PREFIX: &str = "/api/proxy";

/// `ANY /api/proxy/{*path}`: forwards the request to `{backend}/api/{path}`.
///
/// The path is taken from the raw URI so percent-encoding reaches the
/// backend untouched.
pub async fn proxy_handler(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let path = parts
        .uri
        .path()
        .strip_prefix(PROXY_PREFIX)
        .unwrap_or_default()
        .trim_start_matches('/')
        .to_string();

    state
        .forwarder
        .forward(ForwardRequest {
            method: parts.method,
            path,
            query: parts.uri.query().map(str::to_string),
            headers: parts.headers,
            body,
        })
        .await
}

/// Proxy routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(PROXY_PREFIX, any(proxy_handler))
        .route(&format!("{PROXY_PREFIX}/{{*path}}"), any(proxy_handler))
}
