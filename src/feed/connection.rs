//! Feed connection state machine.
//!
//! A [`FeedConnection`] owns the single upstream stream for one
//! [`SubscriptionKey`] and runs as its own task:
//!
//! ```text
//! Idle ─▶ Connecting ─▶ Connected ─▶ Backoff ─▶ Connecting ─▶ …
//!             │                         ▲  │
//!             └──── handshake failure ──┘  └─▶ Closed (no consumers left)
//! ```
//!
//! Any state moves to `Closed` when the owning registry entry cancels the
//! feed. `Closed` is terminal: a later subscriber gets a new instance.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::backoff::{Backoff, BackoffConfig};
use super::upstream::{FrameStream, UpstreamConnector};
use crate::domain::tick::parse_frame;
use crate::domain::{SubscriptionKey, SubscriptionRegistry};

static NEXT_FEED_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of one feed connection instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct FeedId(u64);

impl FeedId {
    pub(crate) fn next() -> Self {
        Self(NEXT_FEED_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "feed-{}", self.0)
    }
}

/// Lifecycle state of a feed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedState {
    /// Created, task not yet running.
    Idle,
    /// Upstream handshake in progress.
    Connecting,
    /// Receiving ticks.
    Connected,
    /// Waiting for the reconnect delay to elapse.
    Backoff,
    /// Terminal.
    Closed,
}

impl fmt::Display for FeedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Backoff => "backoff",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Observable status of a feed connection.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedStatus {
    /// Current state.
    pub state: FeedState,
    /// Consecutive failed attempts since the last successful connect.
    pub attempt: u32,
    /// Incremented on every successful connect. Ticks carry the epoch
    /// they were received in.
    pub epoch: u64,
    /// Delay of the pending reconnect, while in `Backoff`.
    pub backoff_delay: Option<Duration>,
    /// When the pending reconnect fires, while in `Backoff`.
    pub backoff_deadline: Option<Instant>,
}

impl FeedStatus {
    const fn idle() -> Self {
        Self {
            state: FeedState::Idle,
            attempt: 0,
            epoch: 0,
            backoff_delay: None,
            backoff_deadline: None,
        }
    }
}

/// Registry-side handle to a running feed connection.
///
/// Dropping the handle cancels the feed.
#[derive(Debug)]
pub struct FeedHandle {
    id: FeedId,
    cancel: CancellationToken,
    status: watch::Receiver<FeedStatus>,
}

impl FeedHandle {
    /// Identifier of the feed instance.
    #[must_use]
    pub const fn id(&self) -> FeedId {
        self.id
    }

    /// Snapshot of the current status.
    #[must_use]
    pub fn status(&self) -> FeedStatus {
        self.status.borrow().clone()
    }

    /// Receiver that observes every status change.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<FeedStatus> {
        self.status.clone()
    }

    /// Returns `true` if the feed is `Connected` in `epoch`.
    #[must_use]
    pub fn is_live(&self, epoch: u64) -> bool {
        let status = self.status.borrow();
        status.state == FeedState::Connected && status.epoch == epoch
    }

    /// Requests the feed to close. Cancels a pending reconnect timer and
    /// drops the upstream socket.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Task-side state of a feed connection.
pub struct FeedConnection {
    id: FeedId,
    key: SubscriptionKey,
    connector: Arc<dyn UpstreamConnector>,
    backoff: Backoff,
    cancel: CancellationToken,
    status: watch::Sender<FeedStatus>,
    registry: Weak<SubscriptionRegistry>,
}

impl fmt::Debug for FeedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedConnection")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

/// Why a connected session ended.
enum SessionEnd {
    Cancelled,
    Failed(String),
}

impl FeedConnection {
    /// Spawns a feed task for `key` and returns its handle.
    ///
    /// Ticks are delivered through `registry`; the feed closes itself once
    /// the registry is gone.
    pub fn spawn(
        key: SubscriptionKey,
        connector: Arc<dyn UpstreamConnector>,
        backoff: BackoffConfig,
        registry: Weak<SubscriptionRegistry>,
    ) -> FeedHandle {
        let id = FeedId::next();
        let cancel = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(FeedStatus::idle());
        let connection = Self {
            id,
            key,
            connector,
            backoff: Backoff::new(backoff),
            cancel: cancel.clone(),
            status: status_tx,
            registry,
        };
        tokio::spawn(connection.run());
        FeedHandle {
            id,
            cancel,
            status: status_rx,
        }
    }

    async fn run(mut self) {
        tracing::info!(key = %self.key, feed_id = %self.id, "feed started");
        let mut epoch = 0_u64;

        loop {
            self.status.send_modify(|s| {
                s.state = FeedState::Connecting;
                s.backoff_delay = None;
                s.backoff_deadline = None;
            });

            let connected = tokio::select! {
                () = self.cancel.cancelled() => break,
                result = self.connector.connect(&self.key) => result,
            };

            match connected {
                Ok(frames) => {
                    epoch = epoch.wrapping_add(1);
                    self.backoff.reset();
                    self.status.send_modify(|s| {
                        s.state = FeedState::Connected;
                        s.attempt = 0;
                        s.epoch = epoch;
                    });
                    tracing::info!(key = %self.key, feed_id = %self.id, epoch, "feed connected");

                    match self.receive(frames, epoch).await {
                        SessionEnd::Cancelled => break,
                        SessionEnd::Failed(reason) => {
                            tracing::warn!(key = %self.key, feed_id = %self.id, %reason, "feed disconnected");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        key = %self.key,
                        feed_id = %self.id,
                        attempt = self.backoff.attempt(),
                        error = %e,
                        "feed connect failed"
                    );
                }
            }

            let delay = self.backoff.next_delay();
            let attempt = self.backoff.attempt();
            self.status.send_modify(|s| {
                s.state = FeedState::Backoff;
                s.attempt = attempt;
                s.backoff_delay = Some(delay);
                s.backoff_deadline = Some(Instant::now() + delay);
            });
            tracing::info!(
                key = %self.key,
                feed_id = %self.id,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "feed reconnect scheduled"
            );

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }

            if !self.still_wanted().await {
                break;
            }
        }

        self.status.send_modify(|s| {
            s.state = FeedState::Closed;
            s.backoff_delay = None;
            s.backoff_deadline = None;
        });
        tracing::info!(key = %self.key, feed_id = %self.id, "feed closed");
    }

    /// Pumps frames from a connected stream until it ends or the feed is
    /// cancelled. The stream is dropped on return, closing the socket.
    async fn receive(&self, mut frames: FrameStream, epoch: u64) -> SessionEnd {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return SessionEnd::Cancelled,
                frame = frames.next() => match frame {
                    Some(Ok(text)) => self.dispatch(&text, epoch).await,
                    Some(Err(e)) => return SessionEnd::Failed(e.to_string()),
                    None => return SessionEnd::Failed("upstream closed the stream".to_string()),
                },
            }
        }
    }

    async fn dispatch(&self, text: &str, epoch: u64) {
        let ticks = match parse_frame(&self.key, text, Utc::now()) {
            Ok(ticks) => ticks,
            Err(e) => {
                tracing::warn!(key = %self.key, feed_id = %self.id, error = %e, "dropping malformed tick frame");
                return;
            }
        };
        let Some(registry) = self.registry.upgrade() else {
            self.cancel.cancel();
            return;
        };
        for tick in ticks {
            registry
                .on_tick(&self.key, self.id, epoch, Arc::new(tick))
                .await;
        }
    }

    async fn still_wanted(&self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.has_consumers(&self.key, self.id).await,
            None => false,
        }
    }
}
