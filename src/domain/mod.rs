//! Domain layer: subscription keys, session identity, ticks and the
//! subscription registry.
//!
//! This module contains the server-side streaming model: normalized
//! subscription keys, downstream session identifiers, immutable price
//! ticks, and the reference-counted registry that owns upstream feeds.

pub mod session_id;
pub mod subscription_key;
pub mod subscription_registry;
pub mod tick;

pub use session_id::SessionId;
pub use subscription_key::{AGGREGATE_KEY, SubscriptionKey};
pub use subscription_registry::{FeedSummary, SubscriptionRegistry, TickOutbox};
pub use tick::Tick;
