//! Server-Sent Events support.

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{BoxStream, Stream, StreamExt};
use repochat_core::Chunk;
use std::convert::Infallible;
use std::time::Duration;
use tokio_util::sync::DropGuard;

/// Stream chunks as SSE events, each carrying its channel index as `id`.
///
/// `guard` is held for as long as the client stays connected.
pub fn chunk_events(
    chunks: BoxStream<'static, (usize, Chunk)>,
    guard: Option<DropGuard>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        let _guard = guard;
        let mut chunks = chunks;

        while let Some((index, chunk)) = chunks.next().await {
            match serde_json::to_string(&chunk) {
                Ok(data) => yield Ok(Event::default().id(index.to_string()).data(data)),
                Err(e) => tracing::warn!(index, error = %e, "Dropping unserializable chunk"),
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
