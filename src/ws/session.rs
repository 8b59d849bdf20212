//! Per-connection downstream session.
//!
//! Tracks which keys one browser WebSocket is subscribed to and owns the
//! sending half of its outbound tick queue. The registry holds clones of
//! that sender, one per subscribed key.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::domain::{SessionId, SubscriptionKey, SubscriptionRegistry, Tick, TickOutbox};

/// One browser streaming session.
///
/// The outbound queue is a single-receiver broadcast channel: when the
/// browser falls behind, the oldest ticks are overwritten and the receiver
/// observes a lag instead of blocking the feed.
#[derive(Debug)]
pub struct DownstreamSession {
    id: SessionId,
    keys: HashSet<SubscriptionKey>,
    outbox: TickOutbox,
    registry: Arc<SubscriptionRegistry>,
    closed: bool,
}

impl DownstreamSession {
    /// Opens a session with an outbound queue of `capacity` ticks.
    ///
    /// Returns the session and the receiving end of its queue.
    #[must_use]
    pub fn open(
        registry: Arc<SubscriptionRegistry>,
        capacity: usize,
    ) -> (Self, broadcast::Receiver<Arc<Tick>>) {
        let (outbox, rx) = broadcast::channel(capacity.max(1));
        let session = Self {
            id: SessionId::new(),
            keys: HashSet::new(),
            outbox,
            registry,
            closed: false,
        };
        tracing::debug!(session_id = %session.id, capacity, "downstream session opened");
        (session, rx)
    }

    /// Session identifier.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Registers interest in `key`. Returns `false` if already subscribed.
    pub async fn subscribe(&mut self, key: SubscriptionKey) -> bool {
        if self.closed || self.keys.contains(&key) {
            return false;
        }
        let added = self
            .registry
            .subscribe(self.id, &key, self.outbox.clone())
            .await;
        self.keys.insert(key);
        added
    }

    /// Withdraws interest in `key`. Returns `false` if not subscribed.
    pub async fn unsubscribe(&mut self, key: &SubscriptionKey) -> bool {
        if !self.keys.remove(key) {
            return false;
        }
        self.registry.unsubscribe(self.id, key).await
    }

    /// Returns `true` if the session is subscribed to `key`.
    #[must_use]
    pub fn is_subscribed(&self, key: &SubscriptionKey) -> bool {
        self.keys.contains(key)
    }

    /// Number of subscribed keys.
    #[must_use]
    pub fn count(&self) -> usize {
        self.keys.len()
    }

    /// Removes the session from every key it consumes.
    ///
    /// Idempotent. Called when the transport closes for any reason.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.keys.clear();
        let keys = self.registry.drop_session(self.id).await;
        tracing::debug!(session_id = %self.id, keys, "downstream session closed");
    }
}

impl Drop for DownstreamSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // Task aborted before `close` ran; finish the cleanup off-task.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let registry = Arc::clone(&self.registry);
            let id = self.id;
            handle.spawn(async move {
                registry.drop_session(id).await;
            });
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::time::Duration;

    use tokio::sync::broadcast::error::RecvError;
    use tokio::time::timeout;

    use super::*;
    use crate::feed::upstream::UpstreamConnector;
    use crate::feed::upstream::test_support::ChannelConnector;
    use crate::feed::{BackoffConfig, FeedState};

    fn key(raw: &str) -> SubscriptionKey {
        let Ok(key) = SubscriptionKey::parse(raw) else {
            panic!("valid key {raw}");
        };
        key
    }

    fn registry() -> Arc<SubscriptionRegistry> {
        registry_with_connector().0
    }

    fn registry_with_connector() -> (Arc<SubscriptionRegistry>, Arc<ChannelConnector>) {
        let connector = Arc::new(ChannelConnector::default());
        let registry = SubscriptionRegistry::new(
            Arc::clone(&connector) as Arc<dyn UpstreamConnector>,
            BackoffConfig {
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(100),
                jitter: 0.0,
            },
        );
        (registry, connector)
    }

    async fn recv_price(rx: &mut broadcast::Receiver<Arc<Tick>>) -> f64 {
        match timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Ok(tick)) => tick.price,
            other => panic!("expected a tick, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn subscribe_tracks_keys_and_registry() {
        let registry = registry();
        let (mut session, _rx) = DownstreamSession::open(Arc::clone(&registry), 8);
        assert!(session.subscribe(key("AAPL")).await);
        assert!(!session.subscribe(key("aapl")).await);
        assert!(session.is_subscribed(&key("AAPL")));
        assert_eq!(session.count(), 1);
        assert_eq!(registry.consumer_count(&key("AAPL")).await, 1);
        assert!(registry.has_feed(&key("AAPL")).await);
    }

    #[tokio::test]
    async fn unsubscribe_closes_orphaned_feed() {
        let registry = registry();
        let (mut session, _rx) = DownstreamSession::open(Arc::clone(&registry), 8);
        session.subscribe(key("MSFT")).await;
        assert!(session.unsubscribe(&key("MSFT")).await);
        assert!(!session.unsubscribe(&key("MSFT")).await);
        assert!(!registry.has_feed(&key("MSFT")).await);
        assert_eq!(session.count(), 0);
    }

    #[tokio::test]
    async fn close_drops_every_subscription() {
        let registry = registry();
        let (mut session, _rx) = DownstreamSession::open(Arc::clone(&registry), 8);
        session.subscribe(key("AAPL")).await;
        session.subscribe(key("*")).await;
        session.close().await;
        assert_eq!(registry.feed_count().await, 0);
        assert_eq!(session.count(), 0);
        assert!(!session.subscribe(key("AAPL")).await);
        session.close().await;
    }

    #[tokio::test]
    async fn dropping_unclosed_session_cleans_up() {
        let registry = registry();
        let (mut session, _rx) = DownstreamSession::open(Arc::clone(&registry), 8);
        session.subscribe(key("TSLA")).await;
        drop(session);
        for _ in 0..100 {
            if registry.feed_count().await == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("feed still open after session drop");
    }

    #[tokio::test]
    async fn sessions_share_one_feed() {
        let registry = registry();
        let (mut a, _rx_a) = DownstreamSession::open(Arc::clone(&registry), 8);
        let (mut b, _rx_b) = DownstreamSession::open(Arc::clone(&registry), 8);
        a.subscribe(key("AAPL")).await;
        b.subscribe(key("AAPL")).await;
        assert_eq!(registry.feed_count().await, 1);
        assert_eq!(registry.consumer_count(&key("AAPL")).await, 2);
        a.close().await;
        assert!(registry.has_feed(&key("AAPL")).await);
        b.close().await;
        assert!(!registry.has_feed(&key("AAPL")).await);
    }

    #[tokio::test]
    async fn slow_session_loses_oldest_ticks_only() {
        let (registry, connector) = registry_with_connector();
        let aapl = key("AAPL");
        let (mut slow, mut slow_rx) = DownstreamSession::open(Arc::clone(&registry), 2);
        let (mut fast, mut fast_rx) = DownstreamSession::open(Arc::clone(&registry), 16);
        slow.subscribe(aapl.clone()).await;
        fast.subscribe(aapl.clone()).await;

        let Some(mut status) = registry.watch_feed(&aapl).await else {
            panic!("feed expected");
        };
        let connected = timeout(
            Duration::from_secs(2),
            status.wait_for(|s| s.state == FeedState::Connected),
        )
        .await;
        assert!(matches!(connected, Ok(Ok(_))), "feed never connected");

        for price in 1..=5 {
            assert!(connector.push(&aapl, &format!(r#"{{"ticker":"AAPL","price":{price}}}"#)));
        }

        // The fast session drains while the slow one reads nothing.
        for expected in 1..=5 {
            assert!((recv_price(&mut fast_rx).await - f64::from(expected)).abs() < f64::EPSILON);
        }

        match slow_rx.recv().await {
            Err(RecvError::Lagged(missed)) => assert_eq!(missed, 3),
            other => panic!("expected lag, got {other:?}"),
        }
        assert!((recv_price(&mut slow_rx).await - 4.0).abs() < f64::EPSILON);
        assert!((recv_price(&mut slow_rx).await - 5.0).abs() < f64::EPSILON);

        assert_eq!(registry.consumer_count(&aapl).await, 2);
        assert_eq!(
            registry.feed_status(&aapl).await.map(|s| s.state),
            Some(FeedState::Connected)
        );
        slow.close().await;
        fast.close().await;
    }
}
