//! HTTP/SSE transport.
//!
//! - [`ChatTransport::start`] opens a workflow run and streams its channel.
//!   If the connection drops before the run ends, the stream reconnects on
//!   its own from the last index it saw.
//! - [`ChatTransport::send_follow_up`] records the turn split point, then
//!   posts the message to the run's resume endpoint. The answer streams on
//!   the connection that is already open.
//! - [`ChatTransport::reconnect`] re-attaches to a run after the client lost
//!   its stream entirely, e.g. after a restart.
//! - [`ChatTransport::turn`] runs one bash-tool turn.

use crate::error::{ClientError, ClientResult};
use crate::reconstruct::Transcript;
use crate::sse::{chunk_stream, IndexedChunk};
use async_stream::try_stream;
use futures::stream::BoxStream;
use futures::StreamExt;
use repochat_core::UiMessage;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Consecutive failed attempts after which a stream is abandoned.
pub const MAX_CONSECUTIVE_ERRORS: usize = 5;

pub const RUN_ID_HEADER: &str = "x-workflow-run-id";
pub const CONVERSATION_ID_HEADER: &str = "x-conversation-id";
pub const SANDBOX_ID_HEADER: &str = "x-sandbox-id";

const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A chunk stream.
pub type ChunkStream = BoxStream<'static, ClientResult<IndexedChunk>>;

/// A stream opened by [`ChatTransport::start`] or [`ChatTransport::turn`].
pub struct StartedStream {
    pub run_id: Option<String>,
    pub conversation_id: Option<String>,
    pub sandbox_id: Option<String>,
    pub chunks: ChunkStream,
}

/// Server answer to a follow-up.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpAck {
    pub accepted: bool,
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub seq: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Health {
    pub healthy: bool,
    pub version: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartBody<'a> {
    conversation_id: &'a str,
    messages: &'a [UiMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    sandbox_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Client for a repochat server.
#[derive(Clone)]
pub struct ChatTransport {
    client: reqwest::Client,
    base_url: String,
    max_consecutive_errors: usize,
    retry_delay: Duration,
}

impl ChatTransport {
    /// Create a transport for `address` (`host:port` or a full URL).
    pub fn new(address: &str) -> ClientResult<Self> {
        let base_url = if address.starts_with("http://") || address.starts_with("https://") {
            address.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", address.trim_end_matches('/'))
        };

        // No overall timeout: streams stay open for the whole conversation.
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url,
            max_consecutive_errors: MAX_CONSECUTIVE_ERRORS,
            retry_delay: DEFAULT_RETRY_DELAY,
        })
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_max_consecutive_errors(mut self, max: usize) -> Self {
        self.max_consecutive_errors = max.max(1);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn health(&self) -> ClientResult<Health> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    /// Start a workflow run with the first message(s).
    pub async fn start(
        &self,
        conversation_id: &str,
        messages: &[UiMessage],
    ) -> ClientResult<StartedStream> {
        let response = self
            .client
            .post(format!("{}/conversation/start", self.base_url))
            .json(&StartBody {
                conversation_id,
                messages,
                sandbox_id: None,
            })
            .send()
            .await?;
        let response = check(response).await?;

        let run_id = header(&response, RUN_ID_HEADER);
        let conversation_id = header(&response, CONVERSATION_ID_HEADER)
            .unwrap_or_else(|| conversation_id.to_string());
        debug!(conversation_id = %conversation_id, run_id = ?run_id, "Run started");

        let chunks = match &run_id {
            Some(run_id) => self.follow(conversation_id.clone(), run_id.clone(), 0, Some(response)),
            None => chunk_stream(response),
        };
        Ok(StartedStream {
            run_id,
            conversation_id: Some(conversation_id),
            sandbox_id: None,
            chunks,
        })
    }

    /// Run one bash-tool turn over the full message history.
    pub async fn turn(
        &self,
        conversation_id: &str,
        sandbox_id: Option<&str>,
        messages: &[UiMessage],
    ) -> ClientResult<StartedStream> {
        let response = self
            .client
            .post(format!("{}/agent/turn", self.base_url))
            .json(&StartBody {
                conversation_id,
                messages,
                sandbox_id,
            })
            .send()
            .await?;
        let response = check(response).await?;

        Ok(StartedStream {
            run_id: None,
            conversation_id: header(&response, CONVERSATION_ID_HEADER),
            sandbox_id: header(&response, SANDBOX_ID_HEADER),
            chunks: chunk_stream(response),
        })
    }

    /// Send a follow-up to a suspended run.
    ///
    /// The split point is recorded in `transcript` before the request goes
    /// out, so it lands before any chunk of the answer.
    pub async fn send_follow_up(
        &self,
        transcript: &mut Transcript,
        conversation_id: &str,
        run_id: Option<&str>,
        message: &str,
    ) -> ClientResult<FollowUpAck> {
        transcript.record_user(message);

        let mut body = json!({ "message": message, "conversationId": conversation_id });
        if let Some(run_id) = run_id {
            body["runId"] = Value::String(run_id.to_string());
        }
        let response = self
            .client
            .post(format!(
                "{}/conversation/{}/message",
                self.base_url, conversation_id
            ))
            .json(&body)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    /// Re-attach to a run from `start_index`.
    ///
    /// Fails immediately, without a request, if either id is missing.
    pub fn reconnect(
        &self,
        conversation_id: Option<&str>,
        run_id: Option<&str>,
        start_index: usize,
    ) -> ClientResult<ChunkStream> {
        let (Some(conversation_id), Some(run_id)) = (conversation_id, run_id) else {
            return Err(ClientError::MissingCredentials);
        };
        Ok(self.follow(
            conversation_id.to_string(),
            run_id.to_string(),
            start_index,
            None,
        ))
    }

    /// Status record of the conversation's latest run.
    pub async fn status(&self, conversation_id: &str) -> ClientResult<Value> {
        let response = self
            .client
            .get(format!("{}/conversation/{}", self.base_url, conversation_id))
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    /// Stream a run's chunks, reconnecting after failures.
    ///
    /// A body that ends cleanly means the run's channel closed.
    fn follow(
        &self,
        conversation_id: String,
        run_id: String,
        start_index: usize,
        initial: Option<reqwest::Response>,
    ) -> ChunkStream {
        let transport = self.clone();

        Box::pin(try_stream! {
            let mut next_index = start_index;
            let mut errors = 0usize;
            let mut initial = initial;

            loop {
                let opened = match initial.take() {
                    Some(response) => Ok(response),
                    None => transport.open_stream(&conversation_id, &run_id, next_index).await,
                };

                let failure = match opened {
                    Ok(response) => {
                        let mut chunks = chunk_stream(response);
                        let mut failure = None;
                        while let Some(item) = chunks.next().await {
                            match item {
                                Ok(indexed) => {
                                    errors = 0;
                                    let index = indexed.index.unwrap_or(next_index);
                                    if index < next_index {
                                        continue;
                                    }
                                    next_index = index + 1;
                                    yield indexed;
                                }
                                Err(e) => {
                                    failure = Some(e);
                                    break;
                                }
                            }
                        }
                        match failure {
                            Some(e) => e,
                            None => break,
                        }
                    }
                    Err(e) if !e.is_retryable() => Err(e)?,
                    Err(e) => e,
                };

                errors += 1;
                warn!(
                    run_id = %run_id,
                    attempt = errors,
                    next_index,
                    error = %failure,
                    "Stream interrupted"
                );
                if errors >= transport.max_consecutive_errors {
                    Err(ClientError::TooManyErrors(errors))?;
                }
                tokio::time::sleep(transport.retry_delay).await;
            }
        })
    }

    async fn open_stream(
        &self,
        conversation_id: &str,
        run_id: &str,
        start_index: usize,
    ) -> ClientResult<reqwest::Response> {
        let response = self
            .client
            .get(format!(
                "{}/conversation/{}/stream",
                self.base_url, conversation_id
            ))
            .query(&[("runId", run_id.to_string()), ("startIndex", start_index.to_string())])
            .send()
            .await?;
        check(response).await
    }
}

fn header(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

async fn check(response: reqwest::Response) -> ClientResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.error)
        .unwrap_or(body);
    Err(ClientError::Status {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconstruct::SplitStrategy;
    use repochat_core::Chunk;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse(chunks: &[(usize, Chunk)]) -> String {
        chunks
            .iter()
            .map(|(index, chunk)| {
                format!(
                    "data: {}\nid: {index}\n\n",
                    serde_json::to_string(chunk).unwrap()
                )
            })
            .collect()
    }

    fn start_chunk() -> Chunk {
        Chunk::StreamStart {
            message_id: "msg_1".into(),
        }
    }

    fn transport(server: &MockServer) -> ChatTransport {
        ChatTransport::new(&server.uri())
            .unwrap()
            .with_retry_delay(Duration::from_millis(5))
    }

    async fn collect(stream: ChunkStream) -> Vec<ClientResult<IndexedChunk>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_start_reads_headers_and_chunks() {
        let server = MockServer::start().await;
        let body = sse(&[
            (0, start_chunk()),
            (1, Chunk::text("Cloned.")),
            (2, Chunk::Finish),
        ]);
        Mock::given(method("POST"))
            .and(path("/conversation/start"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(RUN_ID_HEADER, "run_1")
                    .insert_header(CONVERSATION_ID_HEADER, "conv-abc1234")
                    .set_body_raw(body, "text/event-stream"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let started = transport(&server)
            .start("conv-abc1234", &[UiMessage::user("clone a/b")])
            .await
            .unwrap();
        assert_eq!(started.run_id.as_deref(), Some("run_1"));
        assert_eq!(started.conversation_id.as_deref(), Some("conv-abc1234"));

        let chunks: Vec<_> = collect(started.chunks)
            .await
            .into_iter()
            .map(|c| c.unwrap())
            .collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].chunk, Chunk::text("Cloned."));
        assert_eq!(chunks[2].index, Some(2));
    }

    #[tokio::test]
    async fn test_start_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/conversation/start"))
            .respond_with(ResponseTemplate::new(409).set_body_json(
                json!({"error": "conversation already has an active run", "code": "CONFLICT"}),
            ))
            .mount(&server)
            .await;

        let err = transport(&server)
            .start("conv-abc1234", &[UiMessage::user("hi")])
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ClientError::Status { status: 409, ref message } if message.contains("active run")));
    }

    #[tokio::test]
    async fn test_follow_up_records_split_first() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/conversation/conv-abc1234/message"))
            .and(body_json(json!({
                "message": "list files in b",
                "conversationId": "conv-abc1234",
                "runId": "run_1"
            })))
            .respond_with(
                ResponseTemplate::new(202)
                    .set_body_json(json!({"accepted": true, "runId": "run_1", "seq": 0})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut transcript = Transcript::new();
        transcript.record_user("clone a/b");
        transcript.push_chunk(start_chunk());
        transcript.push_chunk(Chunk::text("Cloned."));

        let ack = transport(&server)
            .send_follow_up(&mut transcript, "conv-abc1234", Some("run_1"), "list files in b")
            .await
            .unwrap();
        assert!(ack.accepted);
        assert_eq!(ack.run_id.as_deref(), Some("run_1"));
        assert_eq!(transcript.splits(), &[2]);
        assert_eq!(transcript.turns(SplitStrategy::Markers).len(), 3);
    }

    #[tokio::test]
    async fn test_rejected_follow_up_keeps_split() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/conversation/conv-gone000/message"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(json!({"error": "no run is waiting", "code": "NOT_FOUND"})),
            )
            .mount(&server)
            .await;

        let mut transcript = Transcript::new();
        transcript.record_user("hi");
        let err = transport(&server)
            .send_follow_up(&mut transcript, "conv-gone000", None, "again")
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Status { status: 404, .. }));
        assert_eq!(transcript.splits(), &[0]);
    }

    #[tokio::test]
    async fn test_reconnect_requires_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let transport = transport(&server);
        assert!(matches!(
            transport.reconnect(None, Some("run_1"), 0),
            Err(ClientError::MissingCredentials)
        ));
        assert!(matches!(
            transport.reconnect(Some("conv-abc1234"), None, 0),
            Err(ClientError::MissingCredentials)
        ));
    }

    #[tokio::test]
    async fn test_reconnect_from_offset() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversation/conv-abc1234/stream"))
            .and(query_param("runId", "run_1"))
            .and(query_param("startIndex", "4"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                sse(&[(4, Chunk::text("more")), (5, Chunk::Finish)]),
                "text/event-stream",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let stream = transport(&server)
            .reconnect(Some("conv-abc1234"), Some("run_1"), 4)
            .unwrap();
        let indices: Vec<_> = collect(stream)
            .await
            .into_iter()
            .map(|c| c.unwrap().index)
            .collect();
        assert_eq!(indices, vec![Some(4), Some(5)]);
    }

    #[tokio::test]
    async fn test_reconnect_gives_up_after_consecutive_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversation/conv-abc1234/stream"))
            .respond_with(ResponseTemplate::new(503))
            .expect(MAX_CONSECUTIVE_ERRORS as u64)
            .mount(&server)
            .await;

        let stream = transport(&server)
            .reconnect(Some("conv-abc1234"), Some("run_1"), 0)
            .unwrap();
        let items = collect(stream).await;
        assert_eq!(items.len(), 1);
        assert!(matches!(
            items[0],
            Err(ClientError::TooManyErrors(MAX_CONSECUTIVE_ERRORS))
        ));
    }

    #[tokio::test]
    async fn test_reconnect_not_found_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversation/conv-abc1234/stream"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(json!({"error": "run not found: run_9", "code": "NOT_FOUND"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let stream = transport(&server)
            .reconnect(Some("conv-abc1234"), Some("run_9"), 0)
            .unwrap();
        let items = collect(stream).await;
        assert!(matches!(
            &items[..],
            [Err(ClientError::Status { status: 404, message })] if message == "run not found: run_9"
        ));
    }

    #[tokio::test]
    async fn test_turn_reads_sandbox_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/agent/turn"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header(SANDBOX_ID_HEADER, "sbx_1")
                    .insert_header(CONVERSATION_ID_HEADER, "conv-abc1234")
                    .set_body_raw(
                        sse(&[(0, start_chunk()), (1, Chunk::Finish)]),
                        "text/event-stream",
                    ),
            )
            .mount(&server)
            .await;

        let started = transport(&server)
            .turn("conv-abc1234", None, &[UiMessage::user("ls")])
            .await
            .unwrap();
        assert_eq!(started.sandbox_id.as_deref(), Some("sbx_1"));
        assert_eq!(collect(started.chunks).await.len(), 2);
    }

    #[tokio::test]
    async fn test_health() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"healthy": true, "version": "0.1.0"})),
            )
            .mount(&server)
            .await;

        let health = transport(&server).health().await.unwrap();
        assert!(health.healthy);
    }
}
