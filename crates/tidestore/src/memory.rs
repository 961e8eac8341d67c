//! In-memory watchable key-value store
//!
//! Each mutation bumps a global revision and emits a one-event batch to the
//! watchers of the mutated key. Used by the daemon and by integration tests
//! as a stand-in for a remote cluster.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use ahash::RandomState;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::backend::{EventStream, WatchBackend};
use crate::error::{Error, Result};
use crate::event::{Event, EventBatch, KeyValue};

/// Per-watcher batch buffer before the watcher is reported as lagging
const DEFAULT_WATCH_BUFFER: usize = 128;

/// Watchable key-value store held entirely in memory
pub struct MemoryBackend {
    /// Current value per key
    data: RwLock<HashMap<String, KeyValue, RandomState>>,

    /// Broadcast channel per watched key
    watchers: Mutex<HashMap<String, broadcast::Sender<EventBatch>, RandomState>>,

    /// Last assigned revision
    revision: AtomicI64,

    /// Channel capacity for new watch channels
    watch_buffer: usize,

    /// Cancelled on shutdown; ends every open stream
    shutdown: CancellationToken,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create an empty store with the default watch buffer
    pub fn new() -> Self {
        Self::with_watch_buffer(DEFAULT_WATCH_BUFFER)
    }

    /// Create an empty store whose watchers buffer up to `watch_buffer` batches
    pub fn with_watch_buffer(watch_buffer: usize) -> Self {
        Self {
            data: RwLock::new(HashMap::with_hasher(RandomState::new())),
            watchers: Mutex::new(HashMap::with_hasher(RandomState::new())),
            revision: AtomicI64::new(0),
            // broadcast channels cannot be zero-sized
            watch_buffer: watch_buffer.max(1),
            shutdown: CancellationToken::new(),
        }
    }

    /// Store `value` under `key`, returning the new revision
    pub fn put(&self, key: &str, value: impl Into<Bytes>) -> Result<i64> {
        self.ensure_open()?;

        let mut data = self.data.write();
        let revision = self.next_revision();
        let prev = data.get(key).cloned();
        let kv = KeyValue {
            key: Bytes::copy_from_slice(key.as_bytes()),
            value: value.into(),
            create_revision: prev.as_ref().map_or(revision, |p| p.create_revision),
            mod_revision: revision,
            version: prev.as_ref().map_or(1, |p| p.version + 1),
        };
        data.insert(key.to_owned(), kv.clone());

        // Notify under the data lock so watchers see mutations in revision order
        self.notify(key, Event::put(kv).with_prev_kv(prev));
        Ok(revision)
    }

    /// Remove `key`, returning whether it existed
    pub fn delete(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;

        let mut data = self.data.write();
        let Some(prev) = data.remove(key) else {
            return Ok(false);
        };
        let revision = self.next_revision();
        let kv = KeyValue {
            key: prev.key.clone(),
            value: Bytes::new(),
            create_revision: 0,
            mod_revision: revision,
            version: 0,
        };

        self.notify(key, Event::delete(kv).with_prev_kv(Some(prev)));
        Ok(true)
    }

    /// Current value of `key`
    pub fn get(&self, key: &str) -> Option<KeyValue> {
        self.data.read().get(key).cloned()
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Check if the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Last assigned revision
    pub fn revision(&self) -> i64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Number of open watch streams on `key`
    pub fn watcher_count(&self, key: &str) -> usize {
        self.watchers
            .lock()
            .get(key)
            .map_or(0, |tx| tx.receiver_count())
    }

    /// Close the store. Open watch streams end and new subscriptions fail.
    pub fn shutdown(&self) {
        info!("Shutting down memory backend");
        self.shutdown.cancel();
        self.watchers.lock().clear();
    }

    /// Whether `shutdown` has been called
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    fn next_revision(&self) -> i64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn notify(&self, key: &str, event: Event) {
        let mut watchers = self.watchers.lock();
        if let Some(tx) = watchers.get(key) {
            let batch: EventBatch = vec![event].into();
            if tx.send(batch).is_err() {
                // Every receiver is gone
                debug!(key = %key, "Dropping watch channel without receivers");
                watchers.remove(key);
            }
        }
    }
}

#[async_trait]
impl WatchBackend for MemoryBackend {
    async fn subscribe(&self, key: &str) -> Result<EventStream> {
        if self.is_closed() {
            return Err(Error::subscription(key, "backend is closed"));
        }

        let mut watchers = self.watchers.lock();
        // Keys whose watchers all went away without a mutation to notice it
        watchers.retain(|_, tx| tx.receiver_count() > 0);
        let rx = watchers
            .entry(key.to_owned())
            .or_insert_with(|| broadcast::channel(self.watch_buffer).0)
            .subscribe();
        drop(watchers);
        debug!(key = %key, "Watcher registered");

        let key = key.to_owned();
        let stream = BroadcastStream::new(rx)
            .map(move |item| {
                item.map_err(|err| {
                    let BroadcastStreamRecvError::Lagged(skipped) = err;
                    Error::Lagged {
                        key: key.clone(),
                        skipped,
                    }
                })
            })
            .take_until(self.shutdown.clone().cancelled_owned());

        Ok(stream.boxed())
    }
}
