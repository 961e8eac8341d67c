//! Plain key/value lookup cache
//!
//! Unbounded and independent of the watch cache. Callers invalidate with
//! [`KvCache::remove`] when the backing key changes.

use std::collections::HashMap;

use ahash::RandomState;
use parking_lot::RwLock;

/// Thread-safe string key/value cache
#[derive(Debug, Default)]
pub struct KvCache {
    store: RwLock<HashMap<String, String, RandomState>>,
}

impl KvCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached value for `key`
    pub fn get(&self, key: &str) -> Option<String> {
        self.store.read().get(key).cloned()
    }

    /// Cache `value` under `key`
    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        self.store.write().insert(key.into(), value.into());
    }

    /// Invalidate `key`, returning the previous value
    pub fn remove(&self, key: &str) -> Option<String> {
        self.store.write().remove(key)
    }

    /// Number of cached keys
    pub fn len(&self) -> usize {
        self.store.read().len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.store.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kv_get_put() {
        let cache = KvCache::new();

        assert_eq!(cache.get("foo"), None);
        cache.put("foo", "bar");
        cache.put("foo", "baz");

        assert_eq!(cache.get("foo"), Some("baz".to_string()));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_kv_remove() {
        let cache = KvCache::new();

        cache.put("foo", "bar");
        assert_eq!(cache.remove("foo"), Some("bar".to_string()));
        assert_eq!(cache.remove("foo"), None);
        assert!(cache.is_empty());
    }
}
