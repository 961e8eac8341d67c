//! # tidestore
//!
//! Watch-side foundations for Tidewatch.
//!
//! ## Contents
//! - **Event model**: change events and immutable event batches
//! - **Backend contract**: [`WatchBackend`] opens a live [`EventStream`] per key
//! - **Memory backend**: watchable in-memory key-value store

#![warn(missing_docs)]

mod backend;
mod error;
mod event;
mod memory;

pub use backend::{EventStream, WatchBackend};
pub use error::{Error, Result};
pub use event::{Event, EventBatch, EventKind, KeyValue};
pub use memory::MemoryBackend;
