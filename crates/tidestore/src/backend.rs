//! Backend watch contract

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::event::EventBatch;

/// Live stream of event batches for one subscription key.
///
/// `Some(Ok(_))` is a batch, `Some(Err(_))` a failure, `None` end of stream.
pub type EventStream = BoxStream<'static, Result<EventBatch>>;

/// Anything that can open a watch subscription on a key
#[async_trait]
pub trait WatchBackend: Send + Sync {
    /// Open a server-streaming subscription for change events on `key`
    async fn subscribe(&self, key: &str) -> Result<EventStream>;
}
