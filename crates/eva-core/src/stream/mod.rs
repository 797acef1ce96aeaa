// ── Reactive state streams ──
//
// A `Stream` of accepted item states, backed by an engine watcher. The
// watcher is registered on creation and removed when the stream drops.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::engine::StateEngine;
use crate::model::ItemState;
use crate::store::StateCallback;

/// States of one OID or of every OID matching a mask.
///
/// Yields the currently known states first, then every accepted update.
pub struct StateStream {
    inner: UnboundedReceiverStream<Arc<ItemState>>,
    engine: Arc<dyn StateEngine>,
    key: String,
    callback: StateCallback,
}

impl StateStream {
    pub(crate) fn new(engine: Arc<dyn StateEngine>, oid_or_mask: &str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let callback: StateCallback = Arc::new(move |state: Option<Arc<ItemState>>| {
            if let Some(state) = state {
                let _ = tx.send(state);
            }
        });
        engine.watch(oid_or_mask, Arc::clone(&callback), false);
        Self {
            inner: UnboundedReceiverStream::new(rx),
            engine,
            key: oid_or_mask.to_owned(),
            callback,
        }
    }

    /// The OID or mask this stream follows.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Stream for StateStream {
    type Item = Arc<ItemState>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for StateStream {
    fn drop(&mut self) {
        self.engine.unwatch(Some(&self.key), Some(&self.callback));
    }
}
