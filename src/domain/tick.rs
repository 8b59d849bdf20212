//! Price tick values and upstream frame decoding.
//!
//! A [`Tick`] is produced by a feed connection, wrapped in an `Arc` and
//! fanned out read-only to every consumer of its key. Upstream frames use
//! the backend's snake_case schema; downstream frames use camelCase.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SubscriptionKey;

/// One price update for a subscription key.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tick {
    /// Subscription key the tick was received on.
    pub key: SubscriptionKey,
    /// Instrument the price refers to. Equals the key for symbol feeds.
    pub symbol: String,
    /// Last traded price.
    pub price: f64,
    /// Absolute change since the reference price, if reported.
    pub change: Option<f64>,
    /// Percentage change since the reference price, if reported.
    pub change_percent: Option<f64>,
    /// Upstream timestamp, or the receipt time when absent.
    pub timestamp: DateTime<Utc>,
}

/// Tick object as emitted by the upstream price source.
#[derive(Debug, Deserialize)]
struct UpstreamTick {
    #[serde(default, alias = "symbol")]
    ticker: Option<String>,
    price: f64,
    #[serde(default)]
    change: Option<f64>,
    #[serde(default, alias = "changePercent", alias = "daily_change_pct")]
    change_percent: Option<f64>,
    #[serde(default)]
    timestamp: Option<String>,
}

/// The shapes an upstream text frame may take.
///
/// Symbol streams send one tick object per frame; the dashboard stream
/// sends `{"type": "price_update", "data": [...]}` batches.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UpstreamFrame {
    Batch { data: Vec<UpstreamTick> },
    List(Vec<UpstreamTick>),
    Single(UpstreamTick),
}

/// Decodes one upstream text frame into ticks for `key`.
///
/// # Errors
///
/// Returns the underlying [`serde_json::Error`] when the frame is not JSON
/// or does not match any known tick shape (e.g. `price` missing).
pub fn parse_frame(
    key: &SubscriptionKey,
    text: &str,
    received_at: DateTime<Utc>,
) -> Result<Vec<Tick>, serde_json::Error> {
    let raw = match serde_json::from_str::<UpstreamFrame>(text)? {
        UpstreamFrame::Batch { data } | UpstreamFrame::List(data) => data,
        UpstreamFrame::Single(tick) => vec![tick],
    };
    Ok(raw
        .into_iter()
        .map(|t| Tick {
            key: key.clone(),
            symbol: t
                .ticker
                .map(|s| s.trim().to_ascii_uppercase())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| key.as_str().to_string()),
            price: t.price,
            change: t.change,
            change_percent: t.change_percent,
            timestamp: t
                .timestamp
                .as_deref()
                .and_then(parse_timestamp)
                .unwrap_or(received_at),
        })
        .collect())
}

/// Accepts RFC 3339 and naive ISO-8601 (interpreted as UTC).
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}
