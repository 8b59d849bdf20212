//! Gateway error types with HTTP status code mapping.
//!
//! [`GatewayError`] is the error type surfaced to HTTP and WebSocket
//! callers. [`FeedError`] covers upstream feed failures, which never leave
//! the feed connection's reconnect loop. [`ConfigError`] is returned while
//! loading configuration at startup.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Structured JSON error response body.
///
/// All gateway-generated error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 1001,
///     "message": "invalid subscription key: \"\""
///   }
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    /// Builds an error body from a code and message.
    #[must_use]
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                code,
                message: message.into(),
                details: None,
            },
        }
    }
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category   | HTTP Status               |
/// |-----------|------------|---------------------------|
/// | 1000–1999 | Validation | 400 Bad Request           |
/// | 3000–3999 | Server     | 500 / 502                 |
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Subscription key is empty, too long or has invalid characters.
    #[error("invalid subscription key: {0:?}")]
    InvalidSubscriptionKey(String),

    /// Request or frame validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The backend could not be reached or the transfer failed.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::InvalidSubscriptionKey(_) => 1002,
            Self::Internal(_) => 3000,
            Self::BackendUnavailable(_) => 3002,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::InvalidSubscriptionKey(_) => StatusCode::BAD_REQUEST,
            Self::BackendUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Backend failures surface as a bare status; the gateway never
        // invents a body on the backend's behalf.
        if matches!(self, Self::BackendUnavailable(_)) {
            return status.into_response();
        }
        let body = ErrorResponse::new(self.error_code(), self.to_string());
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

/// Failure of one upstream feed connection attempt or session.
///
/// Every variant feeds the reconnect backoff; none is fatal.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// The upstream URL for a key could not be built.
    #[error("invalid upstream url: {0}")]
    InvalidUrl(String),

    /// The WebSocket handshake failed.
    #[error("upstream handshake failed: {0}")]
    Handshake(String),

    /// The handshake did not complete within the configured timeout.
    #[error("upstream handshake timed out after {0:?}")]
    HandshakeTimeout(std::time::Duration),

    /// The established stream failed.
    #[error("upstream transport error: {0}")]
    Transport(String),
}

/// Invalid configuration value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable holds a value that cannot be used.
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        /// Environment variable name.
        key: &'static str,
        /// Offending value.
        value: String,
        /// Parser message.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            GatewayError::InvalidSubscriptionKey(String::new()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::BackendUnavailable("refused".to_string()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn backend_unavailable_has_no_body() {
        let response = GatewayError::BackendUnavailable("refused".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(
            response
                .headers()
                .get(axum::http::header::CONTENT_TYPE)
                .is_none()
        );
    }

    #[test]
    fn validation_errors_are_json() {
        let response = GatewayError::InvalidRequest("bad".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response
                .headers()
                .get(axum::http::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some("application/json")
        );
    }
}
