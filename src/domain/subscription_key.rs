//! Normalized subscription key.
//!
//! [`SubscriptionKey`] names one upstream price stream: either a single
//! symbol (normalized to upper case) or the reserved aggregate key that
//! covers every tracked symbol. Keys are the dictionary key of the
//! [`super::SubscriptionRegistry`] and the target of downstream
//! `subscribe`/`unsubscribe` frames.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::GatewayError;

/// Wire representation of the aggregate key.
pub const AGGREGATE_KEY: &str = "*";

/// Maximum accepted symbol length after trimming.
pub const MAX_SYMBOL_LEN: usize = 32;

/// Identifies one upstream price stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubscriptionKey {
    /// A single instrument, e.g. `AAPL` or `PETR4.SA`.
    Symbol(String),
    /// All tracked symbols, served by the upstream dashboard stream.
    Aggregate,
}

impl SubscriptionKey {
    /// Parses and normalizes a raw key.
    ///
    /// Surrounding whitespace is trimmed and symbols are upper-cased.
    /// `"*"` maps to [`SubscriptionKey::Aggregate`].
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidSubscriptionKey`] if the key is empty,
    /// longer than [`MAX_SYMBOL_LEN`], or contains characters outside
    /// `A-Z 0-9 . ^ = _ -`.
    pub fn parse(raw: &str) -> Result<Self, GatewayError> {
        let trimmed = raw.trim();
        if trimmed == AGGREGATE_KEY {
            return Ok(Self::Aggregate);
        }
        if trimmed.is_empty() || trimmed.len() > MAX_SYMBOL_LEN {
            return Err(GatewayError::InvalidSubscriptionKey(raw.to_string()));
        }
        let symbol = trimmed.to_ascii_uppercase();
        let valid = symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '^' | '=' | '_' | '-'));
        if !valid {
            return Err(GatewayError::InvalidSubscriptionKey(raw.to_string()));
        }
        Ok(Self::Symbol(symbol))
    }

    /// Returns `true` for the aggregate key.
    #[must_use]
    pub const fn is_aggregate(&self) -> bool {
        matches!(self, Self::Aggregate)
    }

    /// Returns the wire form of the key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Symbol(symbol) => symbol,
            Self::Aggregate => AGGREGATE_KEY,
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionKey {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for SubscriptionKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SubscriptionKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
