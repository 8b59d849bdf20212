//! Upstream price stream connector.
//!
//! [`UpstreamConnector`] is the seam between a feed connection and the
//! network. [`WsUpstreamConnector`] opens one WebSocket per subscription
//! key with a bounded handshake; tests substitute in-memory connectors.

use std::fmt;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use reqwest::Url;
use tokio_tungstenite::tungstenite::Message;

use crate::domain::SubscriptionKey;
use crate::error::FeedError;

/// Stream of upstream text frames. Ends when the upstream closes.
pub type FrameStream = BoxStream<'static, Result<String, FeedError>>;

/// Opens upstream streaming connections keyed by subscription key.
pub trait UpstreamConnector: Send + Sync + fmt::Debug + 'static {
    /// Connects to the stream for `key` and completes once the handshake
    /// has succeeded.
    ///
    /// # Errors
    ///
    /// Returns a [`FeedError`] if the handshake fails or times out.
    fn connect<'a>(&'a self, key: &'a SubscriptionKey)
    -> BoxFuture<'a, Result<FrameStream, FeedError>>;
}

/// WebSocket connector for the backend price stream.
///
/// Symbol keys map to `{base}/ws/prices/{SYMBOL}`, the aggregate key to
/// `{base}/ws/dashboard`.
#[derive(Debug, Clone)]
pub struct WsUpstreamConnector {
    base: Url,
    handshake_timeout: Duration,
}

impl WsUpstreamConnector {
    /// Creates a connector for the given `ws://` or `wss://` base URL.
    #[must_use]
    pub const fn new(base: Url, handshake_timeout: Duration) -> Self {
        Self {
            base,
            handshake_timeout,
        }
    }

    /// Builds the upstream URL for a key.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::InvalidUrl`] if the joined URL does not parse.
    pub fn url_for(&self, key: &SubscriptionKey) -> Result<Url, FeedError> {
        let base = self.base.as_str().trim_end_matches('/');
        let raw = match key {
            SubscriptionKey::Symbol(symbol) => format!("{base}/ws/prices/{symbol}"),
            SubscriptionKey::Aggregate => format!("{base}/ws/dashboard"),
        };
        Url::parse(&raw).map_err(|e| FeedError::InvalidUrl(format!("{raw}: {e}")))
    }
}

impl UpstreamConnector for WsUpstreamConnector {
    fn connect<'a>(
        &'a self,
        key: &'a SubscriptionKey,
    ) -> BoxFuture<'a, Result<FrameStream, FeedError>> {
        Box::pin(async move {
            let url = self.url_for(key)?;
            tracing::debug!(%key, %url, "connecting upstream feed");

            let handshake = tokio_tungstenite::connect_async(url.as_str());
            let (socket, _response) = tokio::time::timeout(self.handshake_timeout, handshake)
                .await
                .map_err(|_| FeedError::HandshakeTimeout(self.handshake_timeout))?
                .map_err(|e| FeedError::Handshake(e.to_string()))?;

            let frames = futures_util::stream::unfold(socket, |mut socket| async move {
                loop {
                    match socket.next().await? {
                        Ok(Message::Text(text)) => return Some((Ok(text.as_str().to_owned()), socket)),
                        Ok(Message::Close(frame)) => {
                            tracing::debug!(?frame, "upstream sent close frame");
                            return None;
                        }
                        // Pings are answered by tungstenite on the next read.
                        Ok(_) => {}
                        Err(e) => return Some((Err(FeedError::Transport(e.to_string())), socket)),
                    }
                }
            });
            Ok(frames.boxed())
        })
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
pub(crate) mod test_support {
    //! In-memory connector driving feed connections from tests.

    use std::sync::{Mutex, PoisonError};

    use tokio::sync::mpsc;

    use super::*;

    type FrameSender = mpsc::UnboundedSender<Result<String, FeedError>>;

    /// Connector whose streams are fed through channels held by the test.
    #[derive(Debug, Default)]
    pub(crate) struct ChannelConnector {
        refuse: Mutex<bool>,
        streams: Mutex<Vec<(SubscriptionKey, FrameSender)>>,
        attempts: Mutex<Vec<(SubscriptionKey, tokio::time::Instant)>>,
    }

    impl ChannelConnector {
        /// Makes every subsequent connect attempt fail.
        pub(crate) fn refuse_connections(&self, refuse: bool) {
            *self.refuse.lock().unwrap_or_else(PoisonError::into_inner) = refuse;
        }

        /// Sends a text frame on the most recent stream for `key`.
        pub(crate) fn push(&self, key: &SubscriptionKey, frame: &str) -> bool {
            let streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
            streams
                .iter()
                .rev()
                .find(|(k, _)| k == key)
                .is_some_and(|(_, tx)| tx.send(Ok(frame.to_string())).is_ok())
        }

        /// Ends every open stream for `key`, as if the upstream hung up.
        pub(crate) fn hang_up(&self, key: &SubscriptionKey) {
            self.streams
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(k, _)| k != key);
        }

        /// Instants of every connect attempt for `key`.
        pub(crate) fn attempts(&self, key: &SubscriptionKey) -> Vec<tokio::time::Instant> {
            self.attempts
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .filter(|(k, _)| k == key)
                .map(|(_, at)| *at)
                .collect()
        }

        /// Number of live (not hung up, receiver not dropped) streams for `key`.
        pub(crate) fn open_streams(&self, key: &SubscriptionKey) -> usize {
            self.streams
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .filter(|(k, tx)| k == key && !tx.is_closed())
                .count()
        }
    }

    impl UpstreamConnector for ChannelConnector {
        fn connect<'a>(
            &'a self,
            key: &'a SubscriptionKey,
        ) -> BoxFuture<'a, Result<FrameStream, FeedError>> {
            Box::pin(async move {
                self.attempts
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((key.clone(), tokio::time::Instant::now()));
                if *self.refuse.lock().unwrap_or_else(PoisonError::into_inner) {
                    return Err(FeedError::Handshake("connection refused".to_string()));
                }
                let (tx, rx) = mpsc::unbounded_channel();
                self.streams
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((key.clone(), tx));
                let frames = futures_util::stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|frame| (frame, rx))
                });
                Ok(frames.boxed())
            })
        }
    }
}
