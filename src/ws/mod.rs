//! WebSocket layer: downstream sessions, message parsing and the
//! connection loop.
//!
//! Browsers connect at `/ws` and send `{"action":"subscribe","key":"AAPL"}`
//! style frames; `/ws/prices/{symbol}` and `/ws/dashboard` start out
//! subscribed to a symbol or to the aggregate key.

pub mod connection;
pub mod handler;
pub mod messages;
pub mod session;

pub use session::DownstreamSession;
