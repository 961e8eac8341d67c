//! Stream handed back by [`crate::WatchProxy::watch`]

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tidestore::{EventBatch, Result};
use tokio::sync::mpsc;

enum Source {
    /// Cached batch, yielded once
    Replay(Option<EventBatch>),
    /// Batches teed from a drain task
    Live(mpsc::Receiver<Result<EventBatch>>),
}

/// Watch stream returned to proxy callers.
///
/// Cache hits replay a single batch and then end; misses relay the live
/// backend stream, terminal error included. Both look the same to the caller.
pub struct WatchStream {
    source: Source,
}

impl WatchStream {
    pub(crate) fn replay(events: EventBatch) -> Self {
        Self {
            source: Source::Replay(Some(events)),
        }
    }

    pub(crate) fn live(rx: mpsc::Receiver<Result<EventBatch>>) -> Self {
        Self {
            source: Source::Live(rx),
        }
    }

    /// Next batch, or `None` at end of stream
    pub async fn receive(&mut self) -> Option<Result<EventBatch>> {
        self.next().await
    }
}

impl Stream for WatchStream {
    type Item = Result<EventBatch>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match &mut self.get_mut().source {
            Source::Replay(events) => Poll::Ready(events.take().map(Ok)),
            Source::Live(rx) => rx.poll_recv(cx),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match &self.source {
            Source::Replay(Some(_)) => (1, Some(1)),
            Source::Replay(None) => (0, Some(0)),
            Source::Live(_) => (0, None),
        }
    }
}
