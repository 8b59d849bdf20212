//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::config::GatewayConfig;
use crate::domain::SubscriptionRegistry;
use crate::error::GatewayError;
use crate::feed::{UpstreamConnector, WsUpstreamConnector};
use crate::proxy::RequestForwarder;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Registry owning every upstream price feed.
    pub registry: Arc<SubscriptionRegistry>,
    /// Forwarder for `/api/proxy` requests.
    pub forwarder: Arc<RequestForwarder>,
    /// Outbound queue capacity of each downstream session.
    pub session_queue_capacity: usize,
}

impl AppState {
    /// Builds the state from configuration, connecting feeds over
    /// WebSocket to `UPSTREAM_WS_BASE`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Internal`] if the backend HTTP client cannot
    /// be built.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let connector = Arc::new(WsUpstreamConnector::new(
            config.upstream_ws_base.clone(),
            config.feed_handshake_timeout,
        ));
        Self::with_connector(config, connector)
    }

    /// Builds the state with a custom upstream connector.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Internal`] if the backend HTTP client cannot
    /// be built.
    pub fn with_connector(
        config: &GatewayConfig,
        connector: Arc<dyn UpstreamConnector>,
    ) -> Result<Self, GatewayError> {
        Ok(Self {
            registry: SubscriptionRegistry::new(connector, config.feed_backoff),
            forwarder: Arc::new(RequestForwarder::from_config(config)?),
            session_queue_capacity: config.session_queue_capacity,
        })
    }
}
