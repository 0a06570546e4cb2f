//! Turn reconstruction.
//!
//! A workflow run writes one continuous chunk stream for the whole
//! conversation. [`reconstruct`] cuts it back into alternating user and
//! assistant turns, either at the `data-user-message` markers the run emits
//! or at split points the client recorded itself before each follow-up.
//!
//! The initial user message never appears in the stream, so the caller
//! passes the user messages it knows about locally.

use repochat_core::Chunk;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where one turn ends and the next begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitStrategy<'a> {
    /// At each `data-user-message` marker.
    Markers,
    /// At chunk counts recorded before each follow-up was sent.
    Indices(&'a [usize]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    /// Still waiting on the assistant.
    Pending,
    Ready,
}

/// Something shown inside a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TurnPart {
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_text: Option<String>,
    },
    Error {
        text: String,
    },
}

/// One displayed turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub parts: Vec<TurnPart>,
    pub status: TurnStatus,
}

impl Turn {
    fn user(text: &str) -> Self {
        Self {
            role: TurnRole::User,
            parts: vec![TurnPart::Text {
                text: text.to_string(),
            }],
            status: TurnStatus::Ready,
        }
    }

    /// Joined text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                TurnPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Assistant turn under construction.
#[derive(Default)]
struct Segment {
    started: bool,
    parts: Vec<TurnPart>,
}

impl Segment {
    fn apply(&mut self, chunk: &Chunk) {
        match chunk {
            Chunk::DataUserMessage { .. } => return,
            Chunk::StreamStart { .. } | Chunk::Finish => {}
            Chunk::TextDelta { delta } => {
                if delta.is_empty() {
                    // Still counts as the assistant having started.
                } else if let Some(TurnPart::Text { text }) = self.parts.last_mut() {
                    text.push_str(delta);
                } else {
                    self.parts.push(TurnPart::Text {
                        text: delta.clone(),
                    });
                }
            }
            Chunk::ToolCallStart {
                tool_call_id,
                tool_name,
                input,
            } => self.parts.push(TurnPart::ToolCall {
                tool_call_id: tool_call_id.clone(),
                tool_name: tool_name.clone(),
                input: input.clone(),
                output: None,
                error_text: None,
            }),
            Chunk::ToolCallResult {
                tool_call_id,
                tool_name,
                output,
                error_text,
            } => {
                let existing = self.parts.iter_mut().rev().find_map(|part| match part {
                    TurnPart::ToolCall {
                        tool_call_id: id,
                        output,
                        error_text,
                        ..
                    } if id == tool_call_id => Some((output, error_text)),
                    _ => None,
                });
                match existing {
                    Some((slot_output, slot_error)) => {
                        *slot_output = output.clone();
                        *slot_error = error_text.clone();
                    }
                    None => self.parts.push(TurnPart::ToolCall {
                        tool_call_id: tool_call_id.clone(),
                        tool_name: tool_name.clone(),
                        input: Value::Null,
                        output: output.clone(),
                        error_text: error_text.clone(),
                    }),
                }
            }
            Chunk::Error { error_text } => self.parts.push(TurnPart::Error {
                text: error_text.clone(),
            }),
        }
        self.started = true;
    }

    /// Push the assistant turn if the assistant has begun answering.
    fn finish(self, turns: &mut Vec<Turn>) {
        if self.started {
            turns.push(Turn {
                role: TurnRole::Assistant,
                parts: self.parts,
                status: TurnStatus::Ready,
            });
        }
    }
}

/// Rebuild the turn list from a chunk stream and the locally known user
/// messages (initial message first, then follow-ups in send order).
///
/// The last turn is pending if it is a user turn or an assistant turn with
/// nothing rendered yet. Every other turn is ready.
pub fn reconstruct(chunks: &[Chunk], local_user: &[String], strategy: SplitStrategy<'_>) -> Vec<Turn> {
    let mut turns = match strategy {
        SplitStrategy::Markers => by_markers(chunks, local_user),
        SplitStrategy::Indices(splits) => by_indices(chunks, local_user, splits),
    };

    if let Some(last) = turns.last_mut() {
        let waiting = match last.role {
            TurnRole::User => true,
            TurnRole::Assistant => last.parts.is_empty(),
        };
        if waiting {
            last.status = TurnStatus::Pending;
        }
    }
    turns
}

fn by_markers(chunks: &[Chunk], local_user: &[String]) -> Vec<Turn> {
    let mut turns = Vec::new();
    let mut confirmed = 0;

    if let Some(first) = local_user.first() {
        turns.push(Turn::user(first));
        confirmed = 1;
    }

    let mut segment = Segment::default();
    for chunk in chunks {
        if let Chunk::DataUserMessage { text } = chunk {
            std::mem::take(&mut segment).finish(&mut turns);
            turns.push(Turn::user(text));
            confirmed += 1;
        } else {
            segment.apply(chunk);
        }
    }
    segment.finish(&mut turns);

    // Sent locally, not yet acknowledged by the run.
    for text in local_user.iter().skip(confirmed) {
        turns.push(Turn::user(text));
    }
    turns
}

fn by_indices(chunks: &[Chunk], local_user: &[String], splits: &[usize]) -> Vec<Turn> {
    let mut turns = Vec::new();

    for (i, text) in local_user.iter().enumerate() {
        turns.push(Turn::user(text));

        let start = if i == 0 {
            0
        } else {
            splits.get(i - 1).copied().unwrap_or(chunks.len())
        };
        let end = splits.get(i).copied().unwrap_or(chunks.len());
        let (start, end) = (start.min(chunks.len()), end.min(chunks.len()));

        let mut segment = Segment::default();
        for chunk in chunks.get(start..end).unwrap_or_default() {
            segment.apply(chunk);
        }
        segment.finish(&mut turns);
    }
    turns
}

/// Chunks and user messages of one conversation as the client saw them.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    chunks: Vec<Chunk>,
    user_messages: Vec<String>,
    splits: Vec<usize>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a user message. Every message after the first records the
    /// current chunk count as a split point.
    pub fn record_user(&mut self, text: impl Into<String>) {
        if !self.user_messages.is_empty() {
            self.splits.push(self.chunks.len());
        }
        self.user_messages.push(text.into());
    }

    pub fn push_chunk(&mut self, chunk: Chunk) {
        self.chunks.push(chunk);
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Number of chunks received; the offset to reconnect from.
    pub fn received(&self) -> usize {
        self.chunks.len()
    }

    pub fn user_messages(&self) -> &[String] {
        &self.user_messages
    }

    pub fn splits(&self) -> &[usize] {
        &self.splits
    }

    pub fn turns(&self, strategy: SplitStrategy<'_>) -> Vec<Turn> {
        reconstruct(&self.chunks, &self.user_messages, strategy)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
