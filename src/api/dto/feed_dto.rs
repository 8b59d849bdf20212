//! Feed observability DTOs.

use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::FeedSummary;

/// One active upstream feed as reported by `GET /feeds`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FeedSummaryDto {
    /// Subscription key: a symbol, or `*` for the aggregate feed.
    #[schema(example = "AAPL")]
    pub key: String,
    /// Feed instance identifier.
    #[schema(example = "feed-7")]
    pub feed_id: String,
    /// Connection state (`connecting`, `connected`, `backoff`, ...).
    #[schema(example = "connected")]
    pub state: String,
    /// Consecutive failed attempts since the last successful connect.
    pub attempt: u32,
    /// Number of downstream sessions subscribed to the key.
    pub consumers: usize,
}

impl From<FeedSummary> for FeedSummaryDto {
    fn from(summary: FeedSummary) -> Self {
        Self {
            key: summary.key.to_string(),
            feed_id: summary.feed_id.to_string(),
            state: summary.state.to_string(),
            attempt: summary.attempt,
            consumers: summary.consumers,
        }
    }
}

/// Response body of `GET /feeds`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FeedListResponse {
    /// Number of active feeds.
    pub count: usize,
    /// Active feeds sorted by key.
    pub feeds: Vec<FeedSummaryDto>,
}

impl FeedListResponse {
    /// Builds the response from registry summaries.
    #[must_use]
    pub fn from_summaries(summaries: Vec<FeedSummary>) -> Self {
        let feeds: Vec<FeedSummaryDto> = summaries.into_iter().map(FeedSummaryDto::from).collect();
        Self {
            count: feeds.len(),
            feeds,
        }
    }
}
