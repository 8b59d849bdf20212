//! OpenAPI document for the gateway's own endpoints.
//!
//! Proxied backend routes are opaque to the gateway and are not described.

use axum::Router;
use utoipa::OpenApi;

use super::dto::{FeedListResponse, FeedSummaryDto};
use super::handlers::system::HealthResponse;
use crate::app_state::AppState;

/// Path of the served OpenAPI JSON document.
pub const OPENAPI_JSON_PATH: &str = "/api-docs/openapi.json";

/// Gateway API document.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "portfolio-gateway",
        description = "Session-translating backend proxy and multiplexed live price feeds."
    ),
    paths(
        crate::api::handlers::system::health_handler,
        crate::api::handlers::system::feeds_handler,
    ),
    components(schemas(HealthResponse, FeedListResponse, FeedSummaryDto)),
    tags((name = "System", description = "Health and feed introspection"))
)]
pub struct ApiDoc;

/// Routes serving the document, with Swagger UI when the `swagger-ui`
/// feature is enabled.
#[cfg(feature = "swagger-ui")]
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(utoipa_swagger_ui::SwaggerUi::new("/swagger-ui").url(OPENAPI_JSON_PATH, ApiDoc::openapi()))
}

/// Routes serving the document, with Swagger UI when the `swagger-ui`
/// feature is enabled.
#[cfg(not(feature = "swagger-ui"))]
pub fn routes() -> Router<AppState> {
    Router::new().route(
        OPENAPI_JSON_PATH,
        axum::routing::get(|| async { axum::Json(ApiDoc::openapi()) }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_system_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/health"));
        assert!(doc.paths.paths.contains_key("/feeds"));
        assert_eq!(doc.info.version, env!("CARGO_PKG_VERSION"));
    }
}
