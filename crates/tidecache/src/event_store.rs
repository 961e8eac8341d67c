//! EventStore: synchronized LRU cache of the latest event batch per key

use std::num::NonZeroUsize;
use std::time::Instant;

use parking_lot::Mutex;
use tidestore::EventBatch;
use tracing::debug;

use crate::lru::LruCache;
use crate::stats::CacheStats;

/// The most recently observed batch for one subscription key
#[derive(Debug, Clone)]
pub struct CacheEntry {
    key: String,
    timestamp: Instant,
    events: EventBatch,
}

impl CacheEntry {
    /// Subscription key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// When the entry was created or last replaced
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    /// Cached batch
    pub fn events(&self) -> &EventBatch {
        &self.events
    }
}

/// Watch event cache shared by the proxy and its drain tasks.
///
/// A single mutex guards the LRU map and recency list. Batches are handed out
/// as `Arc` snapshots, so nothing borrowed from the cache outlives the lock.
pub struct EventStore {
    cache: Mutex<LruCache<String, CacheEntry>>,
    stats: CacheStats,
}

impl EventStore {
    /// Create a store holding at most `capacity` keys
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            stats: CacheStats::new(),
        }
    }

    /// Replace the cached batch for `key` and mark it most recently used.
    ///
    /// May evict the least recently used key.
    pub fn store_events(&self, key: &str, events: EventBatch) {
        debug!(key = %key, events = events.len(), "Caching events");

        let entry = CacheEntry {
            key: key.to_owned(),
            timestamp: Instant::now(),
            events,
        };
        let (replaced, evicted) = {
            let mut cache = self.cache.lock();
            let replaced = cache.contains(key);
            (replaced, cache.put(key.to_owned(), entry))
        };

        self.stats.record_store(replaced, evicted.is_some());
        if let Some((evicted_key, _)) = evicted {
            debug!(key = %evicted_key, "Evicted cached events");
        }
    }

    /// Cached batch for `key`, promoting it to most recently used.
    ///
    /// `Some` with an empty batch means "cached, no events"; `None` means the
    /// key is not cached.
    pub fn lookup_cached_events(&self, key: &str) -> Option<EventBatch> {
        let events = self
            .cache
            .lock()
            .get(key)
            .map(|entry| EventBatch::clone(&entry.events));

        self.stats.record_lookup(events.is_some());
        events
    }

    /// Inspect the entry for `key` without touching recency or statistics
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.cache.lock().peek(key).cloned()
    }

    /// Number of cached keys
    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    /// Check if no key is cached
    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }

    /// Maximum number of cached keys
    pub fn capacity(&self) -> usize {
        self.cache.lock().capacity()
    }

    /// Cached keys from most to least recently used
    pub fn keys(&self) -> Vec<String> {
        self.cache.lock().keys().cloned().collect()
    }

    /// Get cache statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Drop every entry and reset statistics
    pub fn clear(&self) {
        self.cache.lock().clear();
        self.stats.reset();
    }
}
