//! Change event model
//!
//! Events are passed through the proxy unchanged. A batch is the unit a
//! backend delivers per receive and the unit the cache stores.

use std::sync::Arc;

use bytes::Bytes;

/// Kind of mutation that produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Key created or updated
    Put,
    /// Key removed
    Delete,
}

impl EventKind {
    /// Lowercase name used in wire encodings
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Put => "put",
            EventKind::Delete => "delete",
        }
    }
}

/// A versioned key/value pair as seen by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// Key bytes
    pub key: Bytes,
    /// Value bytes (empty for deletions)
    pub value: Bytes,
    /// Revision at which the key was created
    pub create_revision: i64,
    /// Revision of the last modification
    pub mod_revision: i64,
    /// Number of modifications since creation
    pub version: i64,
}

impl KeyValue {
    /// Build a key/value pair at revision 0
    pub fn new(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            create_revision: 0,
            mod_revision: 0,
            version: 0,
        }
    }
}

/// A single change event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Mutation kind
    pub kind: EventKind,
    /// Key/value after the mutation
    pub kv: KeyValue,
    /// Key/value before the mutation, if known
    pub prev_kv: Option<KeyValue>,
}

impl Event {
    /// Put event for `kv`
    pub fn put(kv: KeyValue) -> Self {
        Self {
            kind: EventKind::Put,
            kv,
            prev_kv: None,
        }
    }

    /// Delete event for `kv`
    pub fn delete(kv: KeyValue) -> Self {
        Self {
            kind: EventKind::Delete,
            kv,
            prev_kv: None,
        }
    }

    /// Attach the previous key/value
    pub fn with_prev_kv(mut self, prev: Option<KeyValue>) -> Self {
        self.prev_kv = prev;
        self
    }
}

/// Ordered, immutable group of events delivered by one receive.
///
/// Shared by reference count; holders can never mutate a batch in place.
pub type EventBatch = Arc<[Event]>;
