//! Server-sent event decoding.

use crate::error::{ClientError, ClientResult};
use async_stream::try_stream;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use repochat_core::Chunk;
use tracing::warn;

/// A chunk and the stream index the server sent with it.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedChunk {
    pub index: Option<usize>,
    pub chunk: Chunk,
}

/// One parsed event. `None` for comments and events without data.
pub(crate) fn parse_event(event: &str) -> Option<(Option<usize>, String)> {
    let mut id = None;
    let mut data: Option<String> = None;

    for line in event.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            let rest = rest.strip_prefix(' ').unwrap_or(rest);
            match &mut data {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(rest);
                }
                None => data = Some(rest.to_string()),
            }
        } else if let Some(rest) = line.strip_prefix("id:") {
            id = rest.trim().parse().ok();
        }
    }

    data.map(|data| (id, data))
}

/// Decode a streaming SSE response body into chunks.
///
/// Events whose data is not a chunk are skipped with a warning.
pub fn chunk_stream(response: reqwest::Response) -> BoxStream<'static, ClientResult<IndexedChunk>> {
    decode_chunks(response.bytes_stream())
}

/// Decode raw body frames. Frames are buffered as bytes and an event is only
/// turned into text once its terminating blank line has arrived.
pub(crate) fn decode_chunks<S, B, E>(body: S) -> BoxStream<'static, ClientResult<IndexedChunk>>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Send + 'static,
    ClientError: From<E>,
{
    Box::pin(try_stream! {
        let mut body = Box::pin(body);
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(frame) = body.next().await {
            {
                let frame = frame.map_err(ClientError::from)?;
                buffer.extend(frame.as_ref().iter().filter(|&&b| b != b'\r'));
            }

            while let Some(end) = event_end(&buffer) {
                let raw: Vec<u8> = buffer.drain(..end + 2).collect();
                let event = String::from_utf8_lossy(&raw[..end]).into_owned();

                let Some((index, data)) = parse_event(&event) else {
                    continue;
                };
                match serde_json::from_str::<Chunk>(&data) {
                    Ok(chunk) => yield IndexedChunk { index, chunk },
                    Err(e) => warn!(error = %e, "Skipping undecodable event"),
                }
            }
        }
    })
}

fn event_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}
