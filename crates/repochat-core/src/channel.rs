//! Append-only output channel.
//!
//! A run writes chunks here for its whole lifetime. Readers subscribe from
//! any index and receive every chunk from that point on, in order, until the
//! channel is closed. Nothing is ever rewritten or dropped, so a reader that
//! reconnects with the number of chunks it already has sees a seamless
//! continuation.

use crate::chunk::Chunk;
use async_stream::stream;
use futures::stream::BoxStream;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::warn;

#[derive(Debug, Default)]
struct ChannelState {
    chunks: Vec<Chunk>,
    closed: bool,
}

/// Shared handle to a run's output.
#[derive(Clone)]
pub struct OutputChannel {
    state: Arc<watch::Sender<ChannelState>>,
}

impl OutputChannel {
    pub fn new() -> Self {
        Self::restore(Vec::new(), false)
    }

    /// Rebuild a channel from persisted chunks.
    pub fn restore(chunks: Vec<Chunk>, closed: bool) -> Self {
        let (tx, _rx) = watch::channel(ChannelState { chunks, closed });
        Self {
            state: Arc::new(tx),
        }
    }

    /// Append a chunk and return its index.
    ///
    /// Returns `None` if the channel is already closed.
    pub fn push(&self, chunk: Chunk) -> Option<usize> {
        let mut index = None;
        self.state.send_if_modified(|state| {
            if state.closed {
                return false;
            }
            state.chunks.push(chunk);
            index = Some(state.chunks.len() - 1);
            true
        });
        if index.is_none() {
            warn!("Dropped chunk written to a closed output channel");
        }
        index
    }

    /// Mark the channel finished. Subscribers drain and end.
    pub fn close(&self) {
        self.state.send_if_modified(|state| {
            if state.closed {
                return false;
            }
            state.closed = true;
            true
        });
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    pub fn len(&self) -> usize {
        self.state.borrow().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every chunk written so far.
    pub fn snapshot(&self) -> Vec<Chunk> {
        self.state.borrow().chunks.clone()
    }

    /// Stream `(index, chunk)` pairs starting at `start`.
    ///
    /// The stream follows live writes and ends once the channel is closed
    /// and fully drained.
    pub fn subscribe(&self, start: usize) -> BoxStream<'static, (usize, Chunk)> {
        let mut rx = self.state.subscribe();
        Box::pin(stream! {
            let mut next = start;
            loop {
                let (batch, closed) = {
                    let state = rx.borrow_and_update();
                    let batch = state
                        .chunks
                        .get(next..)
                        .map(<[Chunk]>::to_vec)
                        .unwrap_or_default();
                    (batch, state.closed)
                };
                for chunk in batch {
                    yield (next, chunk);
                    next += 1;
                }
                if closed || rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }
}

impl Default for OutputChannel {
    fn default() -> Self {
        Self::new()
    }
}
