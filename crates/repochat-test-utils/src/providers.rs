//! Scripted language model.

use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use repochat_provider::{
    ContentPart, FinishReason, GenerateOptions, LanguageModel, Message, ModelInfo,
    ProviderError, ProviderResult, StreamChunk, Usage,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// A model that replays queued responses in order.
///
/// When the queue runs dry it answers with the default response (a short
/// text reply unless overridden).
#[derive(Clone)]
pub struct ScriptedModel {
    model: ModelInfo,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    responses: Arc<Mutex<VecDeque<ScriptedResponse>>>,
    default_response: Arc<Mutex<ScriptedResponse>>,
}

/// A recorded call to [`ScriptedModel::generate`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Messages sent to the model.
    pub messages: Vec<Message>,
    /// System prompt passed through the options.
    pub system: Option<String>,
    /// Names of the tools offered to the model.
    pub tools: Vec<String>,
}

impl RecordedCall {
    /// Text of the last user message in the request.
    pub fn last_user_text(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == repochat_provider::Role::User)
            .map(Message::text)
    }

    /// Whether the request carries a tool result containing `text`.
    pub fn has_tool_result_containing(&self, text: &str) -> bool {
        self.messages.iter().flat_map(|m| &m.content).any(|part| {
            matches!(part, ContentPart::ToolResult { content, .. } if content.contains(text))
        })
    }
}

/// One scripted model response.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// A plain text reply.
    Text(String),
    /// One or more tool calls as `(id, name, arguments)`.
    ToolCalls(Vec<(String, String, String)>),
    /// `generate` itself fails.
    Error(String),
    /// Text is streamed, then the stream fails.
    StreamError { partial: String, message: String },
    /// The response never arrives.
    Hang,
    /// Raw chunks.
    Chunks(Vec<StreamChunk>),
}

impl Default for ScriptedResponse {
    fn default() -> Self {
        Self::Text("Done.".to_string())
    }
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self {
            model: ModelInfo::new("scripted-model", "scripted"),
            calls: Arc::new(Mutex::new(Vec::new())),
            responses: Arc::new(Mutex::new(VecDeque::new())),
            default_response: Arc::new(Mutex::new(ScriptedResponse::default())),
        }
    }

    /// Queue a response.
    pub fn with(self, response: ScriptedResponse) -> Self {
        self.push(response);
        self
    }

    /// Queue a text response.
    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.with(ScriptedResponse::Text(text.into()))
    }

    /// Queue a single tool call.
    pub fn with_tool_call(self, id: &str, name: &str, arguments: &str) -> Self {
        self.with(ScriptedResponse::ToolCalls(vec![(
            id.to_string(),
            name.to_string(),
            arguments.to_string(),
        )]))
    }

    /// Queue an error returned from `generate`.
    pub fn with_error(self, message: impl Into<String>) -> Self {
        self.with(ScriptedResponse::Error(message.into()))
    }

    /// Set the response used once the queue is empty.
    pub fn with_default_response(self, response: ScriptedResponse) -> Self {
        *self.default_response.lock().unwrap() = response;
        self
    }

    /// Queue a response on a shared handle.
    pub fn push(&self, response: ScriptedResponse) {
        self.responses.lock().unwrap().push_back(response);
    }

    /// All recorded calls.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last_call(&self) -> Option<RecordedCall> {
        self.calls.lock().unwrap().last().cloned()
    }

    /// Responses still queued.
    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

impl Default for ScriptedModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(
        &self,
        messages: Vec<Message>,
        options: GenerateOptions,
    ) -> ProviderResult<BoxStream<'static, ProviderResult<StreamChunk>>> {
        self.calls.lock().unwrap().push(RecordedCall {
            messages,
            system: options.system.clone(),
            tools: options.tools.iter().map(|t| t.name.clone()).collect(),
        });

        let response = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default_response.lock().unwrap().clone());

        match &response {
            ScriptedResponse::Error(message) => {
                return Err(ProviderError::internal(message.clone()))
            }
            ScriptedResponse::Hang => futures::future::pending::<()>().await,
            _ => {}
        }

        Ok(Box::pin(try_stream! {
            match response {
                ScriptedResponse::Text(text) => {
                    yield StreamChunk::TextStart;
                    yield StreamChunk::TextDelta(text);
                    yield StreamChunk::TextEnd;
                    yield StreamChunk::FinishStep {
                        usage: Usage::new(100, 20),
                        finish_reason: FinishReason::EndTurn,
                    };
                }
                ScriptedResponse::ToolCalls(calls) => {
                    for (id, name, arguments) in calls {
                        yield StreamChunk::ToolCallStart { id: id.clone(), name: name.clone() };
                        yield StreamChunk::ToolCall { id, name, arguments };
                    }
                    yield StreamChunk::FinishStep {
                        usage: Usage::new(100, 20),
                        finish_reason: FinishReason::ToolUse,
                    };
                }
                ScriptedResponse::StreamError { partial, message } => {
                    yield StreamChunk::TextStart;
                    yield StreamChunk::TextDelta(partial);
                    Err(ProviderError::internal(message))?;
                }
                ScriptedResponse::Chunks(chunks) => {
                    for chunk in chunks {
                        yield chunk;
                    }
                }
                ScriptedResponse::Error(_) | ScriptedResponse::Hang => {}
            }
        }))
    }

    fn model_info(&self) -> &ModelInfo {
        &self.model
    }

    fn provider_id(&self) -> &str {
        "scripted"
    }
}
