//! REST endpoint handlers served by the gateway itself.

pub mod system;

pub use system::routes;
