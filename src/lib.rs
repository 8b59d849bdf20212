//! # portfolio-gateway
//!
//! Gateway between the portfolio dashboard in the browser and its backend.
//!
//! This crate does two independent jobs:
//!
//! - proxies every `/api/proxy/*` HTTP call to the backend REST API,
//!   translating the browser's `HttpOnly` session cookie into a bearer
//!   credential and capturing the credential issued at login;
//! - multiplexes live price ticks: many browser WebSocket sessions share
//!   one upstream stream per symbol, opened on first interest, closed when
//!   the last subscriber leaves and reconnected with exponential backoff.
//!
//! ## Architecture
//!
//! ```text
//! Browser (HTTP, WebSocket)
//!     │
//!     ├── Proxy handler (proxy/) ── SessionTranslator ── RequestForwarder ──▶ backend REST
//!     │
//!     ├── WS handlers (ws/) ── DownstreamSession
//!     │                              │ subscribe / unsubscribe / drop_session
//!     │                              ▼
//!     │                     SubscriptionRegistry (domain/)
//!     │                              │ one per key
//!     │                              ▼
//!     │                     FeedConnection (feed/) ──▶ upstream price WebSocket
//!     │
//!     └── System endpoints (api/): /health, /feeds, OpenAPI
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod feed;
pub mod proxy;
pub mod ws;
