//! WebSocket message types exchanged with the browser.

use serde::Deserialize;

use crate::domain::SubscriptionKey;
use crate::error::ErrorResponse;

/// Frames a browser can send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Start receiving ticks for a key.
    Subscribe {
        /// Symbol, or `*` for the aggregate feed.
        key: SubscriptionKey,
    },
    /// Stop receiving ticks for a key.
    Unsubscribe {
        /// Symbol, or `*` for the aggregate feed.
        key: SubscriptionKey,
    },
}

impl ClientFrame {
    /// Parses a text frame.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorResponse`] with code 400 describing why the frame
    /// was rejected.
    pub fn parse(text: &str) -> Result<Self, ErrorResponse> {
        serde_json::from_str(text).map_err(|e| ErrorResponse::new(400, format!("malformed frame: {e}")))
    }
}

/// Serializes a rejection as an `{"error": {...}}` text frame.
#[must_use]
pub fn error_frame(error: &ErrorResponse) -> String {
    serde_json::to_string(error)
        .unwrap_or_else(|_| r#"{"error":{"code":500,"message":"serialization failed"}}"#.to_string())
}
