//! Anthropic Messages API backend.

use crate::{
    error::ProviderError,
    message::{ContentPart, Message, Role},
    model::ModelInfo,
    stream::{FinishReason, StreamChunk, Usage},
    GenerateOptions, LanguageModel, ProviderResult, ToolDefinition,
};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Streams completions from the Anthropic Messages API.
pub struct AnthropicProvider {
    client: reqwest::Client,
    base_url: String,
    model: ModelInfo,
}

impl AnthropicProvider {
    pub fn new(api_key: &str, model: ModelInfo) -> ProviderResult<Self> {
        Self::with_base_url(api_key, ANTHROPIC_API_URL, model)
    }

    /// Point the provider at a different endpoint (proxies, tests).
    pub fn with_base_url(api_key: &str, base_url: &str, model: ModelInfo) -> ProviderResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(api_key)
                .map_err(|_| ProviderError::invalid_api_key("anthropic"))?,
        );
        headers.insert(
            "anthropic-version",
            HeaderValue::from_static(ANTHROPIC_VERSION),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| ProviderError::internal(e.to_string()))?;

        debug!(model = %model.id, base_url, "Creating Anthropic provider");

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        })
    }

    /// Split out system text and map the rest onto Anthropic roles.
    fn build_request(&self, messages: &[Message], options: &GenerateOptions) -> MessagesRequest {
        let mut system: Vec<String> = options.system.iter().cloned().collect();
        let mut converted = Vec::with_capacity(messages.len());

        for msg in messages {
            let role = match msg.role {
                Role::System => {
                    system.push(msg.text());
                    continue;
                }
                Role::Assistant => "assistant",
                // Tool results travel as user turns.
                Role::User | Role::Tool => "user",
            };
            converted.push(WireMessage {
                role: role.to_string(),
                content: msg.content.iter().map(content_to_wire).collect(),
            });
        }

        MessagesRequest {
            model: self.model.id.clone(),
            messages: converted,
            max_tokens: options.max_tokens.unwrap_or(self.model.limit.output),
            system: if system.is_empty() {
                None
            } else {
                Some(system.join("\n\n"))
            },
            temperature: options.temperature,
            tools: if options.tools.is_empty() {
                None
            } else {
                Some(options.tools.iter().map(tool_to_wire).collect())
            },
            stream: true,
        }
    }

    fn parse_stream<S, B, E>(
        body: S,
        abort: Option<tokio_util::sync::CancellationToken>,
    ) -> BoxStream<'static, ProviderResult<StreamChunk>>
    where
        S: Stream<Item = Result<B, E>> + Send + 'static,
        B: AsRef<[u8]> + Send + 'static,
        E: Send + 'static,
        ProviderError: From<E>,
    {
        Box::pin(try_stream! {
            let mut body = Box::pin(body);
            let mut buffer: Vec<u8> = Vec::new();
            let mut pending = PendingToolCall::default();

            while let Some(frame) = body.next().await {
                if abort.as_ref().is_some_and(|t| t.is_cancelled()) {
                    Err(ProviderError::Cancelled)?;
                }

                {
                    let frame = frame.map_err(ProviderError::from)?;
                    buffer.extend(frame.as_ref().iter().filter(|&&b| b != b'\r'));
                }

                while let Some(event) = next_sse_event(&mut buffer) {
                    if let Some(chunk) = decode_event(&event, &mut pending)? {
                        yield chunk;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl LanguageModel for AnthropicProvider {
    async fn generate(
        &self,
        messages: Vec<Message>,
        options: GenerateOptions,
    ) -> ProviderResult<BoxStream<'static, ProviderResult<StreamChunk>>> {
        let request = self.build_request(&messages, &options);

        debug!(
            model = %self.model.id,
            message_count = request.messages.len(),
            tool_count = request.tools.as_ref().map_or(0, Vec::len),
            "Sending Anthropic request"
        );

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Anthropic request failed");

            return Err(match status.as_u16() {
                401 => ProviderError::invalid_api_key("anthropic"),
                429 => ProviderError::RateLimited,
                _ => ProviderError::invalid_response(format!("HTTP {status}: {body}")),
            });
        }

        Ok(Self::parse_stream(response.bytes_stream(), options.abort))
    }

    fn model_info(&self) -> &ModelInfo {
        &self.model
    }

    fn provider_id(&self) -> &str {
        "anthropic"
    }
}

fn content_to_wire(part: &ContentPart) -> Value {
    match part {
        ContentPart::Text { text } => json!({ "type": "text", "text": text }),
        ContentPart::ToolUse { id, name, input } => json!({
            "type": "tool_use",
            "id": id,
            "name": name,
            "input": input,
        }),
        ContentPart::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => json!({
            "type": "tool_result",
            "tool_use_id": tool_use_id,
            "content": content,
            "is_error": is_error.unwrap_or(false),
        }),
    }
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters,
    })
}

/// Pop one complete `event:`/`data:` block off the front of the buffer.
///
/// The block is only decoded as UTF-8 once complete, so characters split
/// across network frames come through intact.
fn next_sse_event(buffer: &mut Vec<u8>) -> Option<SseEvent> {
    loop {
        let end = buffer.windows(2).position(|w| w == b"\n\n")?;
        let block: Vec<u8> = buffer.drain(..end + 2).collect();
        let raw = String::from_utf8_lossy(&block);

        let mut event = SseEvent::default();
        for line in raw.lines() {
            if let Some(name) = line.strip_prefix("event:") {
                event.event = name.trim().to_string();
            } else if let Some(data) = line.strip_prefix("data:") {
                event.data = data.trim_start().to_string();
            }
        }

        if !event.event.is_empty() || !event.data.is_empty() {
            return Some(event);
        }
    }
}

/// Tool call being assembled from `input_json_delta` fragments.
#[derive(Debug, Default)]
struct PendingToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

fn decode_event(
    event: &SseEvent,
    pending: &mut PendingToolCall,
) -> ProviderResult<Option<StreamChunk>> {
    let chunk = match event.event.as_str() {
        "content_block_start" => {
            let data: ContentBlockStart = serde_json::from_str(&event.data)?;
            match data.content_block.kind.as_str() {
                "text" => Some(StreamChunk::TextStart),
                "tool_use" => {
                    let id = data.content_block.id.unwrap_or_default();
                    let name = data.content_block.name.unwrap_or_default();
                    *pending = PendingToolCall {
                        id: Some(id.clone()),
                        name: Some(name.clone()),
                        arguments: String::new(),
                    };
                    Some(StreamChunk::ToolCallStart { id, name })
                }
                _ => None,
            }
        }
        "content_block_delta" => {
            let data: ContentBlockDelta = serde_json::from_str(&event.data)?;
            match data.delta.kind.as_str() {
                "text_delta" => Some(StreamChunk::TextDelta(
                    data.delta.text.unwrap_or_default(),
                )),
                "input_json_delta" => {
                    let delta = data.delta.partial_json.unwrap_or_default();
                    pending.arguments.push_str(&delta);
                    pending
                        .id
                        .clone()
                        .map(|id| StreamChunk::ToolCallDelta { id, delta })
                }
                _ => None,
            }
        }
        "content_block_stop" => match (pending.id.take(), pending.name.take()) {
            (Some(id), Some(name)) => {
                let arguments = std::mem::take(&mut pending.arguments);
                Some(StreamChunk::ToolCall {
                    id,
                    name,
                    // Tools without parameters stream no JSON at all.
                    arguments: if arguments.is_empty() {
                        "{}".to_string()
                    } else {
                        arguments
                    },
                })
            }
            _ => Some(StreamChunk::TextEnd),
        },
        "message_delta" => {
            let data: MessageDelta = serde_json::from_str(&event.data)?;
            Some(StreamChunk::FinishStep {
                usage: Usage::new(
                    data.usage.input_tokens.unwrap_or(0),
                    data.usage.output_tokens.unwrap_or(0),
                ),
                finish_reason: FinishReason::from_anthropic(
                    data.delta.stop_reason.as_deref().unwrap_or_default(),
                ),
            })
        }
        "error" => {
            let data: ErrorEvent = serde_json::from_str(&event.data)?;
            return Err(ProviderError::internal(data.error.message));
        }
        "message_start" | "message_stop" | "ping" => None,
        other => {
            debug!(event = %other, "Ignoring unknown SSE event");
            None
        }
    };
    Ok(chunk)
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<Value>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: Vec<Value>,
}

#[derive(Debug, Default)]
struct SseEvent {
    event: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct ContentBlockStart {
    content_block: ContentBlock,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlockDelta {
    delta: BlockDelta,
}

#[derive(Debug, Deserialize)]
struct BlockDelta {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    partial_json: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageDelta {
    delta: MessageDeltaContent,
    #[serde(default)]
    usage: MessageUsage,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaContent {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MessageUsage {
    #[serde(default)]
    input_tokens: Option<u32>,
    #[serde(default)]
    output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ErrorEvent {
    error: ErrorContent,
}

#[derive(Debug, Deserialize)]
struct ErrorContent {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::anthropic::claude_haiku_4_5;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(base_url: &str) -> AnthropicProvider {
        AnthropicProvider::with_base_url("test-key", base_url, claude_haiku_4_5()).unwrap()
    }

    fn sse(events: &[(&str, Value)]) -> String {
        events
            .iter()
            .map(|(name, data)| format!("event: {name}\ndata: {data}\n\n"))
            .collect()
    }

    #[test]
    fn test_build_request_merges_system_and_maps_tool_role() {
        let provider = provider(ANTHROPIC_API_URL);
        let messages = vec![
            Message::system("Be brief"),
            Message::user("List files"),
            Message::empty(Role::Assistant).with_part(ContentPart::tool_use(
                "call_1",
                "list_files",
                json!({"path": "."}),
            )),
            Message::empty(Role::Tool).with_part(ContentPart::tool_result("call_1", "a.txt")),
        ];
        let options = GenerateOptions {
            system: Some("You analyze code".to_string()),
            ..Default::default()
        };

        let request = provider.build_request(&messages, &options);

        assert_eq!(request.system.as_deref(), Some("You analyze code\n\nBe brief"));
        let roles: Vec<&str> = request.messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["user", "assistant", "user"]);
        assert_eq!(request.messages[2].content[0]["type"], "tool_result");
        assert_eq!(request.max_tokens, 64_000);
        assert!(request.tools.is_none());
    }

    #[test]
    fn test_next_sse_event_skips_blank_blocks() {
        let mut buffer = b"\n\nevent: ping\ndata: {}\n\nevent: partial".to_vec();
        let event = next_sse_event(&mut buffer).unwrap();
        assert_eq!(event.event, "ping");
        assert_eq!(buffer, b"event: partial");
        assert!(next_sse_event(&mut buffer).is_none());
    }

    #[test]
    fn test_decode_tool_call_without_arguments() {
        let mut pending = PendingToolCall::default();
        let start = SseEvent {
            event: "content_block_start".to_string(),
            data: json!({"content_block": {"type": "tool_use", "id": "t1", "name": "list_files"}})
                .to_string(),
        };
        let stop = SseEvent {
            event: "content_block_stop".to_string(),
            data: "{}".to_string(),
        };
        decode_event(&start, &mut pending).unwrap();
        let chunk = decode_event(&stop, &mut pending).unwrap();
        assert_eq!(chunk, Some(StreamChunk::tool_call("t1", "list_files", "{}")));
    }

    #[tokio::test]
    async fn test_generate_streams_text_and_tool_call() {
        let server = MockServer::start().await;
        let body = sse(&[
            ("message_start", json!({"type": "message_start"})),
            (
                "content_block_start",
                json!({"index": 0, "content_block": {"type": "text", "text": ""}}),
            ),
            (
                "content_block_delta",
                json!({"index": 0, "delta": {"type": "text_delta", "text": "Cloning"}}),
            ),
            ("content_block_stop", json!({"index": 0})),
            (
                "content_block_start",
                json!({"index": 1, "content_block": {"type": "tool_use", "id": "toolu_1", "name": "git_clone"}}),
            ),
            (
                "content_block_delta",
                json!({"index": 1, "delta": {"type": "input_json_delta", "partial_json": "{\"repoUrl\":"}}),
            ),
            (
                "content_block_delta",
                json!({"index": 1, "delta": {"type": "input_json_delta", "partial_json": "\"https://github.com/a/b\"}"}}),
            ),
            ("content_block_stop", json!({"index": 1})),
            (
                "message_delta",
                json!({"delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 12}}),
            ),
            ("message_stop", json!({})),
        ]);

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-key"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let provider = provider(&server.uri());
        let stream = provider
            .generate(vec![Message::user("clone a/b")], GenerateOptions::default())
            .await
            .unwrap();
        let chunks: Vec<StreamChunk> = stream.map(|c| c.unwrap()).collect().await;

        assert_eq!(chunks[0], StreamChunk::TextStart);
        assert_eq!(chunks[1], StreamChunk::text("Cloning"));
        assert_eq!(chunks[2], StreamChunk::TextEnd);
        assert!(chunks.contains(&StreamChunk::tool_call(
            "toolu_1",
            "git_clone",
            "{\"repoUrl\":\"https://github.com/a/b\"}"
        )));
        assert_eq!(
            chunks.last(),
            Some(&StreamChunk::FinishStep {
                usage: Usage::new(0, 12),
                finish_reason: FinishReason::ToolUse,
            })
        );
    }

    #[tokio::test]
    async fn test_generate_maps_http_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let result = provider(&server.uri())
            .generate(vec![Message::user("hi")], GenerateOptions::default())
            .await;
        assert!(matches!(result, Err(ProviderError::RateLimited)));
    }

    #[tokio::test]
    async fn test_stream_error_event_surfaces_as_error() {
        let server = MockServer::start().await;
        let body = sse(&[(
            "error",
            json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}),
        )]);
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let mut stream = provider(&server.uri())
            .generate(vec![Message::user("hi")], GenerateOptions::default())
            .await
            .unwrap();
        let first = stream.next().await.unwrap();
        assert_eq!(first.unwrap_err().to_string(), "Provider error: Overloaded");
    }

    #[tokio::test]
    async fn test_text_split_mid_character_is_not_mangled() {
        let body = sse(&[(
            "content_block_delta",
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "naïve → 完成"}}),
        )]);
        let bytes = body.into_bytes();
        // Cut inside the three-byte arrow.
        let cut = bytes.iter().position(|&b| b == 0xE2).unwrap() + 1;
        let frames = vec![bytes[..cut].to_vec(), bytes[cut..].to_vec()];

        let mut stream = AnthropicProvider::parse_stream(
            futures::stream::iter(frames.into_iter().map(Ok::<_, reqwest::Error>)),
            None,
        );
        let chunk = stream.next().await.unwrap().unwrap();
        assert!(matches!(chunk, StreamChunk::TextDelta(text) if text == "naïve → 完成"));
        assert!(stream.next().await.is_none());
    }
}
