//! # tidecache
//!
//! Caching watch proxy for Tidewatch.
//!
//! ## Architecture
//! - **LRU**: arena-backed doubly-linked list + AHash map, O(1) get/put/evict
//! - **EventStore**: latest event batch per subscription key, behind one mutex
//! - **WatchProxy**: answers watches from cache, otherwise forwards to the
//!   backend and drains the live stream into the cache in the background
//! - **KvCache**: plain string lookup cache, unrelated to watches

#![warn(missing_docs)]

mod config;
mod event_store;
mod kv_cache;
pub mod lru;
mod proxy;
mod stats;
mod stream;

pub use config::{ProxyConfig, DEFAULT_CAPACITY, DEFAULT_STREAM_BUFFER, MAX_STREAM_BUFFER};
pub use event_store::{CacheEntry, EventStore};
pub use kv_cache::KvCache;
pub use proxy::{WatchProxy, WatchRequest};
pub use stats::{CacheStats, StatsSnapshot};
pub use stream::WatchStream;
