//! WatchProxy: cache-aside interception of watch subscriptions
//!
//! ```text
//! watch(key) ── hit ──> WatchStream::replay(cached batch)
//!     │
//!     └─ miss ─> backend.subscribe(key) ─> DrainTask ──> EventStore (last batch wins)
//!                                              │
//!                                              └──> WatchStream::live (caller)
//! ```
//!
//! The drain task is the only reader of the backend stream. It stores every
//! batch and relays it, in receive order, to the caller without waiting on
//! it. A caller that drops its stream, or lets its buffer fill, is detached
//! and the task keeps filling the cache until the backend stream ends, errors,
//! or the proxy shuts down.

use std::sync::Arc;

use futures::StreamExt;
use tidestore::{Error, EventBatch, EventStream, Result, WatchBackend};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::ProxyConfig;
use crate::event_store::EventStore;
use crate::stream::WatchStream;

/// A watch subscription request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRequest {
    key: String,
}

impl WatchRequest {
    /// Request watching `key`
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// Subscription key
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl From<&str> for WatchRequest {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for WatchRequest {
    fn from(key: String) -> Self {
        Self::new(key)
    }
}

/// Caching proxy in front of a [`WatchBackend`]
pub struct WatchProxy {
    /// Latest batch per key, shared with drain tasks
    events: Arc<EventStore>,

    /// Source of live watch streams
    backend: Arc<dyn WatchBackend>,

    /// Per-caller relay buffer
    stream_buffer: usize,

    /// Parent of every drain task's token
    shutdown: CancellationToken,

    /// Running drain tasks
    drains: TaskTracker,
}

impl WatchProxy {
    /// Create a proxy over `backend`
    ///
    /// # Errors
    /// * `Error::InvalidConfig` - zero capacity or stream buffer
    pub fn new(backend: Arc<dyn WatchBackend>, config: &ProxyConfig) -> Result<Self> {
        config.validate()?;
        let capacity = config.capacity_non_zero()?;

        Ok(Self {
            events: Arc::new(EventStore::new(capacity)),
            backend,
            stream_buffer: config.stream_buffer,
            shutdown: CancellationToken::new(),
            drains: TaskTracker::new(),
        })
    }

    /// Serve a watch request from cache, or forward it to the backend.
    ///
    /// On a cache hit the returned stream yields the cached batch once and
    /// ends; the backend is not contacted. On a miss the stream relays the
    /// live backend stream and a background task records each batch.
    ///
    /// # Errors
    /// * Backend subscription failures, returned unchanged
    /// * `Error::Closed` - the proxy has been shut down
    pub async fn watch(&self, request: impl Into<WatchRequest>) -> Result<WatchStream> {
        let WatchRequest { key } = request.into();

        if self.shutdown.is_cancelled() {
            return Err(Error::Closed);
        }

        if let Some(events) = self.events.lookup_cached_events(&key) {
            info!(key = %key, events = events.len(), "Serving watch request from cache");
            return Ok(WatchStream::replay(events));
        }

        info!(key = %key, "Forwarding watch request to backend");
        let stream = match self.backend.subscribe(&key).await {
            Ok(stream) => stream,
            Err(err) => {
                warn!(key = %key, error = %err, "Watch subscription failed");
                return Err(err);
            }
        };

        // One extra slot carries the lag notice for a caller that stops reading
        let (tx, rx) = mpsc::channel(self.stream_buffer + 1);
        let task = DrainTask {
            key,
            stream,
            events: Arc::clone(&self.events),
            relay: Some(tx),
            shutdown: self.shutdown.child_token(),
        };
        self.drains.spawn(task.run());

        Ok(WatchStream::live(rx))
    }

    /// Shared event cache
    pub fn events(&self) -> &EventStore {
        &self.events
    }

    /// Number of drain tasks still running
    pub fn active_drains(&self) -> usize {
        self.drains.len()
    }

    /// Stop every drain task and wait for them to exit.
    ///
    /// Live caller streams end once their drain task is gone. Later `watch`
    /// calls fail with `Error::Closed`.
    pub async fn shutdown(&self) {
        info!(active = self.drains.len(), "Shutting down watch proxy");
        self.shutdown.cancel();
        self.drains.close();
        self.drains.wait().await;
    }
}

/// Background reader for one forwarded subscription
struct DrainTask {
    key: String,
    stream: EventStream,
    events: Arc<EventStore>,
    /// `None` once the caller has dropped its stream
    relay: Option<mpsc::Sender<Result<EventBatch>>>,
    shutdown: CancellationToken,
}

impl DrainTask {
    async fn run(mut self) {
        debug!(key = %self.key, "Drain task started");

        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    debug!(key = %self.key, "Drain task cancelled");
                    break;
                }
                next = self.stream.next() => next,
            };

            match next {
                Some(Ok(batch)) => {
                    self.events.store_events(&self.key, EventBatch::clone(&batch));
                    self.relay(Ok(batch));
                }
                Some(Err(err)) => {
                    warn!(key = %self.key, error = %err, "Watch error");
                    self.relay(Err(err));
                    break;
                }
                None => {
                    info!(key = %self.key, "Watch stream ended");
                    break;
                }
            }
        }
        // Dropping `relay` here ends the caller's stream
    }

    /// Hand `item` to the caller without waiting on it.
    ///
    /// The relay channel keeps one slot in reserve. A caller that lets the
    /// rest fill up gets `Error::Lagged` in that slot and is detached, so a
    /// stalled reader never holds back the cache.
    fn relay(&mut self, item: Result<EventBatch>) {
        let Some(tx) = self.relay.take() else {
            return;
        };

        let item = if tx.capacity() > 1 || item.is_err() {
            item
        } else {
            warn!(key = %self.key, "Watch caller is not keeping up, detaching it");
            Err(Error::Lagged {
                key: self.key.clone(),
                skipped: 1,
            })
        };
        let lagged = matches!(item, Err(Error::Lagged { .. }));

        match tx.try_send(item) {
            Ok(()) if !lagged => self.relay = Some(tx),
            Ok(()) => {}
            Err(_) => debug!(key = %self.key, "Watch caller gone, caching only"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::channel::mpsc::{unbounded, UnboundedSender};
    use mockall::mock;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tidestore::{Event, KeyValue};
    use tokio::time::{sleep, timeout};

    mock! {
        Backend {}

        #[async_trait]
        impl WatchBackend for Backend {
            async fn subscribe(&self, key: &str) -> Result<EventStream>;
        }
    }

    type Feed = UnboundedSender<Result<EventBatch>>;

    fn batch(value: &'static str) -> EventBatch {
        vec![Event::put(KeyValue::new("k", value))].into()
    }

    fn feed() -> (Feed, EventStream) {
        let (tx, rx) = unbounded();
        (tx, rx.boxed())
    }

    fn proxy(backend: MockBackend, capacity: usize) -> WatchProxy {
        WatchProxy::new(Arc::new(backend), &ProxyConfig::with_capacity(capacity)).unwrap()
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        timeout(Duration::from_secs(2), async {
            while !condition() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = WatchProxy::new(Arc::new(MockBackend::new()), &ProxyConfig::with_capacity(0));
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_cache_hit_short_circuits_backend() {
        let mut backend = MockBackend::new();
        backend.expect_subscribe().never();
        let proxy = proxy(backend, 4);
        proxy.events().store_events("a", batch("e1"));

        let mut stream = proxy.watch("a").await.unwrap();

        assert_eq!(stream.receive().await, Some(Ok(batch("e1"))));
        assert_eq!(stream.receive().await, None);
        assert_eq!(proxy.active_drains(), 0);
        assert_eq!(proxy.events().stats().snapshot().hits, 1);
    }

    #[tokio::test]
    async fn test_cached_empty_batch_is_replayed() {
        let mut backend = MockBackend::new();
        backend.expect_subscribe().never();
        let proxy = proxy(backend, 4);
        proxy.events().store_events("a", Vec::new().into());

        let mut stream = proxy.watch("a").await.unwrap();

        let events = stream.receive().await.unwrap().unwrap();
        assert!(events.is_empty());
        assert_eq!(stream.receive().await, None);
    }

    #[tokio::test]
    async fn test_cache_miss_forwards_and_populates() {
        let (tx, live) = feed();
        let mut backend = MockBackend::new();
        backend
            .expect_subscribe()
            .withf(|key| key == "a")
            .times(1)
            .return_once(move |_| Ok(live));
        let proxy = proxy(backend, 4);

        let mut stream = proxy.watch("a").await.unwrap();
        assert!(proxy.events().entry("a").is_none());

        tx.unbounded_send(Ok(batch("e1"))).unwrap();

        assert_eq!(stream.receive().await, Some(Ok(batch("e1"))));
        wait_for(|| proxy.events().entry("a").is_some()).await;
        assert_eq!(proxy.events().entry("a").unwrap().events(), &batch("e1"));

        // The next request is answered from cache
        let mut cached = proxy.watch("a").await.unwrap();
        assert_eq!(cached.receive().await, Some(Ok(batch("e1"))));
        assert_eq!(cached.receive().await, None);
    }

    #[tokio::test]
    async fn test_drain_keeps_only_latest_batch() {
        let (tx, live) = feed();
        let mut backend = MockBackend::new();
        backend.expect_subscribe().return_once(move |_| Ok(live));
        let proxy = proxy(backend, 4);

        let mut stream = proxy.watch("a").await.unwrap();
        tx.unbounded_send(Ok(batch("e1"))).unwrap();
        tx.unbounded_send(Ok(batch("e2"))).unwrap();
        drop(tx);

        assert_eq!(stream.receive().await, Some(Ok(batch("e1"))));
        assert_eq!(stream.receive().await, Some(Ok(batch("e2"))));
        assert_eq!(stream.receive().await, None);

        wait_for(|| proxy.active_drains() == 0).await;
        assert_eq!(proxy.events().entry("a").unwrap().events(), &batch("e2"));
        assert_eq!(proxy.events().len(), 1);
    }

    #[tokio::test]
    async fn test_subscription_error_is_returned_unchanged() {
        let mut backend = MockBackend::new();
        backend
            .expect_subscribe()
            .times(1)
            .returning(|key| Err(Error::subscription(key, "connection refused")));
        let proxy = proxy(backend, 4);

        let result = proxy.watch("a").await;

        assert_eq!(
            result.err(),
            Some(Error::subscription("a", "connection refused"))
        );
        assert_eq!(proxy.active_drains(), 0);
        assert!(proxy.events().is_empty());
    }

    #[tokio::test]
    async fn test_stream_error_reaches_caller_and_stops_drain() {
        let (tx, live) = feed();
        let mut backend = MockBackend::new();
        backend.expect_subscribe().return_once(move |_| Ok(live));
        let proxy = proxy(backend, 4);

        let mut stream = proxy.watch("a").await.unwrap();
        tx.unbounded_send(Ok(batch("e1"))).unwrap();
        tx.unbounded_send(Err(Error::stream_terminated("a", "reset")))
            .unwrap();
        // Never delivered: the drain stops at the first error
        tx.unbounded_send(Ok(batch("e2"))).unwrap();

        assert_eq!(stream.receive().await, Some(Ok(batch("e1"))));
        assert_eq!(
            stream.receive().await,
            Some(Err(Error::stream_terminated("a", "reset")))
        );
        assert_eq!(stream.receive().await, None);

        wait_for(|| proxy.active_drains() == 0).await;
        assert_eq!(proxy.events().entry("a").unwrap().events(), &batch("e1"));
    }

    #[tokio::test]
    async fn test_drain_outlives_abandoned_caller() {
        let (tx, live) = feed();
        let mut backend = MockBackend::new();
        backend.expect_subscribe().return_once(move |_| Ok(live));
        let proxy = proxy(backend, 4);

        let stream = proxy.watch("a").await.unwrap();
        drop(stream);

        tx.unbounded_send(Ok(batch("e1"))).unwrap();
        tx.unbounded_send(Ok(batch("e2"))).unwrap();

        wait_for(|| {
            proxy
                .events()
                .entry("a")
                .is_some_and(|entry| entry.events() == &batch("e2"))
        })
        .await;
        assert_eq!(proxy.active_drains(), 1);

        drop(tx);
        wait_for(|| proxy.active_drains() == 0).await;
    }

    #[tokio::test]
    async fn test_concurrent_misses_leave_one_batch() {
        let (tx1, live1) = feed();
        let (tx2, live2) = feed();
        let streams = Mutex::new(vec![live2, live1]);
        let mut backend = MockBackend::new();
        backend
            .expect_subscribe()
            .times(2)
            .returning(move |_| Ok(streams.lock().pop().unwrap()));
        let proxy = proxy(backend, 4);

        let (first, second) = tokio::join!(proxy.watch("a"), proxy.watch("a"));
        let (_first, _second) = (first.unwrap(), second.unwrap());
        assert_eq!(proxy.active_drains(), 2);

        tx1.unbounded_send(Ok(batch("from-1"))).unwrap();
        tx2.unbounded_send(Ok(batch("from-2"))).unwrap();
        drop((tx1, tx2));

        wait_for(|| proxy.active_drains() == 0).await;
        let cached = proxy.events().entry("a").unwrap();
        assert!(cached.events() == &batch("from-1") || cached.events() == &batch("from-2"));
        assert_eq!(proxy.events().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_drains_and_ends_streams() {
        let (_tx, live) = feed();
        let mut backend = MockBackend::new();
        backend.expect_subscribe().return_once(move |_| Ok(live));
        let proxy = proxy(backend, 4);

        let mut stream = proxy.watch("a").await.unwrap();
        assert_eq!(proxy.active_drains(), 1);

        timeout(Duration::from_secs(2), proxy.shutdown())
            .await
            .unwrap();

        assert_eq!(proxy.active_drains(), 0);
        assert_eq!(stream.receive().await, None);
        assert!(matches!(proxy.watch("a").await, Err(Error::Closed)));
    }

    #[tokio::test]
    async fn test_stalled_caller_does_not_hold_back_cache() {
        let (tx, live) = feed();
        let mut backend = MockBackend::new();
        backend.expect_subscribe().return_once(move |_| Ok(live));
        let config = ProxyConfig {
            capacity: 4,
            stream_buffer: 1,
        };
        let proxy = WatchProxy::new(Arc::new(backend), &config).unwrap();

        // Held but never read while the backend keeps producing
        let mut stream = proxy.watch("a").await.unwrap();
        for value in ["e1", "e2", "e3", "e4", "e5"] {
            tx.unbounded_send(Ok(batch(value))).unwrap();
        }

        wait_for(|| {
            proxy
                .events()
                .entry("a")
                .is_some_and(|entry| entry.events() == &batch("e5"))
        })
        .await;
        assert_eq!(proxy.active_drains(), 1);

        assert_eq!(stream.receive().await, Some(Ok(batch("e1"))));
        assert_eq!(
            stream.receive().await,
            Some(Err(Error::Lagged {
                key: "a".to_string(),
                skipped: 1,
            }))
        );
        assert_eq!(stream.receive().await, None);
    }

    #[tokio::test]
    async fn test_eviction_under_capacity() {
        let (tx, live) = feed();
        let mut backend = MockBackend::new();
        backend.expect_subscribe().return_once(move |_| Ok(live));
        let proxy = proxy(backend, 2);
        proxy.events().store_events("a", batch("e1"));
        proxy.events().store_events("b", batch("e2"));

        let _stream = proxy.watch("c").await.unwrap();
        tx.unbounded_send(Ok(batch("e3"))).unwrap();

        wait_for(|| proxy.events().entry("c").is_some()).await;
        assert!(proxy.events().entry("a").is_none());
        assert_eq!(proxy.events().len(), 2);
        assert_eq!(proxy.events().stats().snapshot().evictions, 1);
    }
}
