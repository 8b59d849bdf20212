//! Upstream feed layer: connector seam, reconnect backoff and the
//! per-key feed connection state machine.

pub mod backoff;
pub mod connection;
pub mod upstream;

pub use backoff::{Backoff, BackoffConfig};
pub use connection::{FeedConnection, FeedHandle, FeedId, FeedState, FeedStatus};
pub use upstream::{FrameStream, UpstreamConnector, WsUpstreamConnector};
