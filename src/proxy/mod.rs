//! Backend proxy: cookie/bearer session translation and request
//! forwarding.
//!
//! Every request under `/api/proxy` is mirrored to the backend REST API.
//! The browser never sees the bearer credential; it holds an `HttpOnly`
//! cookie that the gateway translates on the way through.

pub mod forwarder;
pub mod handler;
pub mod session;

pub use forwarder::{ForwardRequest, RequestForwarder};
pub use session::{Credential, Session, SessionTranslator};
