//! Event cache statistics

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by [`crate::EventStore`] under its lookups and stores.
///
/// Read them through [`CacheStats::snapshot`].
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    replacements: AtomicU64,
    evictions: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Watches answered by replaying a cached batch
    pub hits: u64,
    /// Watches forwarded to the backend
    pub misses: u64,
    /// Batches written by drain tasks or callers
    pub stores: u64,
    /// Stores that overwrote a batch already cached for the key
    pub replacements: u64,
    /// Keys pushed out by capacity
    pub evictions: u64,
}

impl StatsSnapshot {
    /// Total cache lookups
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    /// Share of lookups served from cache, 0.0 before any lookup
    pub fn hit_ratio(&self) -> f64 {
        match self.lookups() {
            0 => 0.0,
            total => self.hits as f64 / total as f64,
        }
    }
}

impl CacheStats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_lookup(&self, hit: bool) {
        let counter = if hit { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_store(&self, replaced: bool, evicted: bool) {
        self.stores.fetch_add(1, Ordering::Relaxed);
        if replaced {
            self.replacements.fetch_add(1, Ordering::Relaxed);
        }
        if evicted {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Copy every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            replacements: self.replacements.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.stores,
            &self.replacements,
            &self.evictions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookups_and_ratio() {
        let stats = CacheStats::new();
        assert_eq!(stats.snapshot().hit_ratio(), 0.0);

        stats.record_lookup(true);
        stats.record_lookup(true);
        stats.record_lookup(false);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.lookups(), 3);
        assert_eq!(snapshot.hit_ratio(), 2.0 / 3.0);
    }

    #[test]
    fn test_store_outcomes() {
        let stats = CacheStats::new();

        stats.record_store(false, false);
        stats.record_store(true, false);
        stats.record_store(false, true);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.stores, 3);
        assert_eq!(snapshot.replacements, 1);
        assert_eq!(snapshot.evictions, 1);
    }

    #[test]
    fn test_reset() {
        let stats = CacheStats::new();

        stats.record_lookup(false);
        stats.record_store(true, true);
        stats.reset();

        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }
}
