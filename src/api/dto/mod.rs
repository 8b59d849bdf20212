//! Data Transfer Objects for the system REST endpoints.

pub mod feed_dto;

pub use feed_dto::*;
