//! The tool-calling agent loop.
//!
//! One turn calls the model, runs every tool it asks for, feeds the results
//! back, and repeats until the model stops asking for tools or the step limit
//! is reached. Text and tool activity are written to the output channel as
//! they happen.
//!
//! Each model call and each tool call is a journal step (`model-call` and
//! `tool:<name>`), so a replayed turn returns the recorded results in order
//! without contacting the model or the sandbox.

use crate::chunk::Chunk;
use crate::channel::OutputChannel;
use crate::error::CoreResult;
use crate::journal::Journal;
use futures::StreamExt;
use repochat_provider::{
    BoxedLanguageModel, ContentPart, FinishReason, GenerateOptions, Message, Role, StreamChunk,
    ToolDefinition,
};
use repochat_tools::{ToolContext, ToolRegistry};
use repochat_util::Identifier;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default limit on model calls per turn.
pub const DEFAULT_MAX_STEPS: usize = 50;

/// Configuration for the agent loop.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// System prompt.
    pub system: String,
    /// Maximum model calls per turn.
    pub max_steps: usize,
    /// Maximum tokens to generate per call.
    pub max_tokens: Option<u32>,
    /// Temperature for sampling.
    pub temperature: Option<f32>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system: String::new(),
            max_steps: DEFAULT_MAX_STEPS,
            max_tokens: Some(8192),
            temperature: None,
        }
    }
}

/// A tool call the model asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlannedCall {
    id: String,
    name: String,
    input: Value,
}

/// What one model call produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelTurn {
    text: String,
    tool_calls: Vec<PlannedCall>,
    finish_reason: FinishReason,
    error: Option<String>,
}

impl ModelTurn {
    fn failed(error: String) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    fn assistant_message(&self) -> Option<Message> {
        let mut content = Vec::new();
        if !self.text.is_empty() {
            content.push(ContentPart::text(&self.text));
        }
        for call in &self.tool_calls {
            content.push(ContentPart::tool_use(&call.id, &call.name, call.input.clone()));
        }
        (!content.is_empty()).then_some(Message {
            role: Role::Assistant,
            content,
        })
    }
}

/// What one tool call produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolOutcome {
    output: Option<Value>,
    error: Option<String>,
}

impl ToolOutcome {
    fn into_part(self, call_id: &str) -> ContentPart {
        match (self.output, self.error) {
            (_, Some(error)) => ContentPart::tool_error(call_id, error),
            (Some(output), None) => ContentPart::tool_result(call_id, output.to_string()),
            (None, None) => ContentPart::tool_result(call_id, ""),
        }
    }
}

/// Result of one agent turn.
#[derive(Debug, Clone, Default)]
pub struct TurnOutcome {
    /// Messages produced during the turn, in order.
    pub messages: Vec<Message>,
    /// Model calls made.
    pub steps: usize,
    /// Set when the turn ended on a model failure.
    pub error: Option<String>,
}

/// A model bound to a tool set and a system prompt.
pub struct Agent {
    model: BoxedLanguageModel,
    tools: Arc<ToolRegistry>,
    config: AgentConfig,
    cancel: CancellationToken,
}

impl Agent {
    pub fn new(model: BoxedLanguageModel, tools: Arc<ToolRegistry>, config: AgentConfig) -> Self {
        Self {
            model,
            tools,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop in-flight model calls when `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Tool definitions offered to the model.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .all()
            .map(|t| ToolDefinition {
                name: t.id().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    /// Run one turn over `history`.
    ///
    /// Model and tool failures are reported on the channel and in the
    /// returned outcome; an `Err` means the journal could not be written or
    /// replayed.
    pub async fn stream(
        &self,
        history: &[Message],
        ctx: &ToolContext,
        journal: &mut Journal,
    ) -> CoreResult<TurnOutcome> {
        let channel = journal.channel().clone();
        let tool_defs = self.tool_definitions();
        let mut messages = history.to_vec();
        let start = messages.len();
        let mut outcome = TurnOutcome::default();

        journal
            .emit(Chunk::StreamStart {
                message_id: Identifier::message(),
            })
            .await?;

        loop {
            if self.cancel.is_cancelled() {
                warn!(sandbox_id = %ctx.sandbox_id, "Agent turn cancelled");
                break;
            }
            if outcome.steps >= self.config.max_steps {
                warn!(max_steps = self.config.max_steps, "Max steps reached");
                break;
            }
            outcome.steps += 1;
            debug!(step = outcome.steps, "Starting agent step");

            let turn: ModelTurn = journal
                .step("model-call", || {
                    self.call_model(messages.clone(), tool_defs.clone(), &channel)
                })
                .await?;

            if let Some(message) = turn.assistant_message() {
                messages.push(message);
            }
            if let Some(error) = turn.error {
                outcome.error = Some(error);
                break;
            }
            if turn.tool_calls.is_empty() {
                break;
            }

            info!(count = turn.tool_calls.len(), "Executing tool calls");
            let mut results = Message::empty(Role::Tool);
            for call in &turn.tool_calls {
                let step = format!("tool:{}", call.name);
                let result: ToolOutcome = journal
                    .step(&step, || self.call_tool(call, ctx, &channel))
                    .await?;
                results = results.with_part(result.into_part(&call.id));
            }
            messages.push(results);

            if turn.finish_reason != FinishReason::ToolUse {
                break;
            }
        }

        outcome.messages = messages.split_off(start);
        Ok(outcome)
    }

    async fn call_model(
        &self,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
        channel: &OutputChannel,
    ) -> CoreResult<ModelTurn> {
        let options = GenerateOptions {
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            system: Some(self.config.system.clone()).filter(|s| !s.is_empty()),
            tools,
            abort: Some(self.cancel.clone()),
        };

        let mut stream = match self.model.generate(messages, options).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "Model call failed");
                channel.push(Chunk::error(e.to_string()));
                return Ok(ModelTurn::failed(e.to_string()));
            }
        };

        let mut turn = ModelTurn::default();
        // (id, name, arguments)
        let mut calls: Vec<(String, String, String)> = Vec::new();

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!(error = %e, "Model stream failed");
                    channel.push(Chunk::error(e.to_string()));
                    turn.error = Some(e.to_string());
                    break;
                }
            };

            match chunk {
                StreamChunk::TextStart | StreamChunk::TextEnd => {}
                StreamChunk::TextDelta(delta) => {
                    turn.text.push_str(&delta);
                    channel.push(Chunk::text(delta));
                }
                StreamChunk::ToolCallStart { id, name } => {
                    debug!(id = %id, name = %name, "Tool call started");
                    calls.push((id, name, String::new()));
                }
                StreamChunk::ToolCallDelta { id, delta } => {
                    if let Some(call) = calls.iter_mut().find(|c| c.0 == id) {
                        call.2.push_str(&delta);
                    }
                }
                StreamChunk::ToolCall {
                    id,
                    name,
                    arguments,
                } => {
                    if let Some(call) = calls.iter_mut().find(|c| c.0 == id) {
                        call.2 = arguments;
                    } else {
                        calls.push((id, name, arguments));
                    }
                }
                StreamChunk::FinishStep {
                    usage,
                    finish_reason,
                } => {
                    debug!(
                        input = usage.input_tokens,
                        output = usage.output_tokens,
                        reason = ?finish_reason,
                        "Model step finished"
                    );
                    turn.finish_reason = finish_reason;
                }
                StreamChunk::Error(message) => {
                    warn!(error = %message, "Model reported an error");
                    channel.push(Chunk::error(message.clone()));
                    turn.error = Some(message);
                    break;
                }
            }
        }

        if turn.error.is_none() {
            turn.tool_calls = calls
                .into_iter()
                .map(|(id, name, arguments)| PlannedCall {
                    id,
                    name,
                    input: parse_arguments(&arguments),
                })
                .collect();
        }
        Ok(turn)
    }

    async fn call_tool(
        &self,
        call: &PlannedCall,
        ctx: &ToolContext,
        channel: &OutputChannel,
    ) -> CoreResult<ToolOutcome> {
        channel.push(Chunk::ToolCallStart {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            input: call.input.clone(),
        });

        let outcome = match self.tools.execute(&call.name, call.input.clone(), ctx).await {
            Ok(out) => {
                info!(tool = %call.name, title = %out.title, success = out.success(), "Tool finished");
                ToolOutcome {
                    output: Some(out.output),
                    error: None,
                }
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool failed");
                ToolOutcome {
                    output: None,
                    error: Some(e.to_string()),
                }
            }
        };

        channel.push(Chunk::ToolCallResult {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            output: outcome.output.clone(),
            error_text: outcome.error.clone(),
        });
        Ok(outcome)
    }
}

fn parse_arguments(arguments: &str) -> Value {
    if arguments.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(arguments).unwrap_or(Value::Null)
}
