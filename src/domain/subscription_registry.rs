//! Reference-counted subscription registry with per-key locking.
//!
//! [`SubscriptionRegistry`] maps each [`SubscriptionKey`] to its consumers
//! and to at most one live [`FeedHandle`]. The consumer set is the only
//! source of truth for feed lifetime: a feed exists iff at least one
//! consumer does.
//!
//! # Concurrency
//!
//! The outer map is only locked to look up, insert or remove entry
//! handles. Everything else for a key (consumer changes, feed creation and
//! closure, tick delivery) happens under that key's own mutex, so
//! different keys never contend. An entry whose consumer set empties is
//! retired before it leaves the map; a subscriber that races onto a retired
//! entry discards it and retries with a fresh one.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use serde::Serialize;
use tokio::sync::{Mutex, RwLock, broadcast, watch};

use super::{SessionId, SubscriptionKey, Tick};
use crate::feed::{BackoffConfig, FeedConnection, FeedHandle, FeedId, FeedState, FeedStatus};
use crate::feed::UpstreamConnector;

/// Sending half of a downstream session's tick queue.
pub type TickOutbox = broadcast::Sender<Arc<Tick>>;

/// Per-key registry entry.
#[derive(Debug)]
struct RegistryEntry {
    key: SubscriptionKey,
    feed: Option<FeedHandle>,
    consumers: HashMap<SessionId, TickOutbox>,
    retired: bool,
}

impl RegistryEntry {
    fn new(key: SubscriptionKey) -> Self {
        Self {
            key,
            feed: None,
            consumers: HashMap::new(),
            retired: false,
        }
    }

    /// Marks the entry unusable and closes its feed.
    fn retire(&mut self) {
        self.retired = true;
        if let Some(feed) = self.feed.take() {
            feed.close();
            tracing::info!(key = %self.key, feed_id = %feed.id(), "last consumer left; feed closing");
        }
    }

    /// Removes one consumer. Returns `(removed, emptied)`.
    fn remove_consumer(&mut self, session: SessionId) -> (bool, bool) {
        let removed = self.consumers.remove(&session).is_some();
        let emptied = removed && self.consumers.is_empty();
        if emptied {
            self.retire();
        }
        (removed, emptied)
    }
}

type EntryRef = Arc<Mutex<RegistryEntry>>;

/// Summary of one active feed, for observability endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct FeedSummary {
    /// Subscription key.
    pub key: SubscriptionKey,
    /// Feed instance identifier.
    pub feed_id: FeedId,
    /// Current feed state.
    pub state: FeedState,
    /// Consecutive failed attempts.
    pub attempt: u32,
    /// Number of downstream consumers.
    pub consumers: usize,
}

/// Maps subscription keys to consumers and their shared upstream feed.
pub struct SubscriptionRegistry {
    entries: RwLock<HashMap<SubscriptionKey, EntryRef>>,
    connector: Arc<dyn UpstreamConnector>,
    backoff: BackoffConfig,
    this: Weak<Self>,
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("connector", &self.connector)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl SubscriptionRegistry {
    /// Creates an empty registry whose feeds connect through `connector`.
    #[must_use]
    pub fn new(connector: Arc<dyn UpstreamConnector>, backoff: BackoffConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            entries: RwLock::new(HashMap::new()),
            connector,
            backoff,
            this: Weak::clone(this),
        })
    }

    /// Adds `session` as a consumer of `key`.
    ///
    /// Idempotent: returns `false` if the session was already subscribed.
    /// Opens the key's feed if this is its first consumer.
    pub async fn subscribe(
        &self,
        session: SessionId,
        key: &SubscriptionKey,
        outbox: TickOutbox,
    ) -> bool {
        loop {
            let entry = self.entry_or_insert(key).await;
            let mut guard = entry.lock().await;
            if guard.retired {
                drop(guard);
                self.remove_if_current(key, &entry).await;
                continue;
            }
            if guard.consumers.contains_key(&session) {
                return false;
            }
            guard.consumers.insert(session, outbox);
            if guard.feed.is_none() {
                let feed = FeedConnection::spawn(
                    key.clone(),
                    Arc::clone(&self.connector),
                    self.backoff,
                    Weak::clone(&self.this),
                );
                tracing::info!(%key, feed_id = %feed.id(), "first consumer; feed opened");
                guard.feed = Some(feed);
            }
            tracing::debug!(%key, session_id = %session, consumers = guard.consumers.len(), "subscribed");
            return true;
        }
    }

    /// Removes `session` from `key`'s consumers, closing the feed when the
    /// last consumer leaves. Returns `false` if it was not subscribed.
    pub async fn unsubscribe(&self, session: SessionId, key: &SubscriptionKey) -> bool {
        let Some(entry) = self.entry(key).await else {
            return false;
        };
        let (removed, emptied) = entry.lock().await.remove_consumer(session);
        if emptied {
            self.remove_if_current(key, &entry).await;
        }
        if removed {
            tracing::debug!(%key, session_id = %session, "unsubscribed");
        }
        removed
    }

    /// Removes `session` from every key it consumes, applying the same
    /// closure rule per key. Returns the number of keys it was removed from.
    pub async fn drop_session(&self, session: SessionId) -> usize {
        let entries: Vec<(SubscriptionKey, EntryRef)> = self
            .entries
            .read()
            .await
            .iter()
            .map(|(key, entry)| (key.clone(), Arc::clone(entry)))
            .collect();

        let mut removed_from = 0;
        for (key, entry) in entries {
            let (removed, emptied) = entry.lock().await.remove_consumer(session);
            if removed {
                removed_from += 1;
            }
            if emptied {
                self.remove_if_current(&key, &entry).await;
            }
        }
        tracing::debug!(session_id = %session, keys = removed_from, "session dropped");
        removed_from
    }

    /// Delivers a tick from feed `feed_id` to every current consumer of
    /// `key`, returning the number of consumers reached.
    ///
    /// Ticks from a feed that is no longer the key's feed, is not
    /// `Connected`, or has reconnected since the tick was read are dropped.
    pub(crate) async fn on_tick(
        &self,
        key: &SubscriptionKey,
        feed_id: FeedId,
        epoch: u64,
        tick: Arc<Tick>,
    ) -> usize {
        let Some(entry) = self.entry(key).await else {
            return 0;
        };
        let guard = entry.lock().await;
        let live = guard
            .feed
            .as_ref()
            .is_some_and(|feed| feed.id() == feed_id && feed.is_live(epoch));
        if !live {
            tracing::trace!(%key, %feed_id, epoch, "discarding stale tick");
            return 0;
        }
        guard
            .consumers
            .values()
            .filter(|outbox| outbox.send(Arc::clone(&tick)).is_ok())
            .count()
    }

    /// Returns `true` if `feed_id` is still `key`'s feed and has consumers.
    pub async fn has_consumers(&self, key: &SubscriptionKey, feed_id: FeedId) -> bool {
        let Some(entry) = self.entry(key).await else {
            return false;
        };
        let guard = entry.lock().await;
        !guard.consumers.is_empty() && guard.feed.as_ref().is_some_and(|f| f.id() == feed_id)
    }

    /// Number of consumers of `key`.
    pub async fn consumer_count(&self, key: &SubscriptionKey) -> usize {
        match self.entry(key).await {
            Some(entry) => entry.lock().await.consumers.len(),
            None => 0,
        }
    }

    /// Returns `true` if `key` currently has a feed.
    pub async fn has_feed(&self, key: &SubscriptionKey) -> bool {
        match self.entry(key).await {
            Some(entry) => entry.lock().await.feed.is_some(),
            None => false,
        }
    }

    /// Status of `key`'s feed, if it has one.
    pub async fn feed_status(&self, key: &SubscriptionKey) -> Option<FeedStatus> {
        let entry = self.entry(key).await?;
        let guard = entry.lock().await;
        guard.feed.as_ref().map(FeedHandle::status)
    }

    /// Status receiver of `key`'s feed, if it has one. Keeps observing the
    /// feed after it has been closed.
    pub async fn watch_feed(&self, key: &SubscriptionKey) -> Option<watch::Receiver<FeedStatus>> {
        let entry = self.entry(key).await?;
        let guard = entry.lock().await;
        guard.feed.as_ref().map(FeedHandle::watch_status)
    }

    /// Number of keys with a live feed.
    pub async fn feed_count(&self) -> usize {
        self.snapshot().await.len()
    }

    /// Summaries of every active feed, sorted by key.
    pub async fn snapshot(&self) -> Vec<FeedSummary> {
        let entries: Vec<EntryRef> = self.entries.read().await.values().map(Arc::clone).collect();
        let mut summaries = Vec::with_capacity(entries.len());
        for entry in entries {
            let guard = entry.lock().await;
            if let Some(feed) = &guard.feed {
                let status = feed.status();
                summaries.push(FeedSummary {
                    key: guard.key.clone(),
                    feed_id: feed.id(),
                    state: status.state,
                    attempt: status.attempt,
                    consumers: guard.consumers.len(),
                });
            }
        }
        summaries.sort_by(|a, b| a.key.cmp(&b.key));
        summaries
    }

    async fn entry(&self, key: &SubscriptionKey) -> Option<EntryRef> {
        self.entries.read().await.get(key).map(Arc::clone)
    }

    async fn entry_or_insert(&self, key: &SubscriptionKey) -> EntryRef {
        if let Some(entry) = self.entry(key).await {
            return entry;
        }
        let mut map = self.entries.write().await;
        Arc::clone(
            map.entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(RegistryEntry::new(key.clone())))),
        )
    }

    /// Removes `key` from the map if it still points at `entry`.
    async fn remove_if_current(&self, key: &SubscriptionKey, entry: &EntryRef) {
        let mut map = self.entries.write().await;
        if map.get(key).is_some_and(|current| Arc::ptr_eq(current, entry)) {
            map.remove(key);
        }
    }
}
