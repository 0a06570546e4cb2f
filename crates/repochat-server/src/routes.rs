//! HTTP routes.

use crate::error::{ApiError, ApiFailure};
use crate::sse::chunk_events;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use repochat_core::{TurnRequest, UiMessage};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn, Span};

/// Header carrying the workflow run id.
pub const RUN_ID_HEADER: &str = "x-workflow-run-id";
/// Header carrying the conversation token.
pub const CONVERSATION_ID_HEADER: &str = "x-conversation-id";
/// Header carrying the sandbox id.
pub const SANDBOX_ID_HEADER: &str = "x-sandbox-id";

/// Create the router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([
            HeaderName::from_static(RUN_ID_HEADER),
            HeaderName::from_static(CONVERSATION_ID_HEADER),
            HeaderName::from_static(SANDBOX_ID_HEADER),
        ]);

    Router::new()
        .route("/health", get(health))
        .route("/conversation/start", post(conversation_start))
        .route("/conversation/{id}", get(conversation_status))
        .route("/conversation/{id}/message", post(conversation_message))
        .route("/conversation/{id}/stream", get(conversation_stream))
        .route("/agent/turn", post(agent_turn))
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                })
                .on_request(|request: &axum::http::Request<_>, _span: &Span| {
                    info!(
                        method = %request.method(),
                        path = %request.uri().path(),
                        "request"
                    );
                })
                .on_response(
                    |response: &axum::http::Response<_>, latency: Duration, _span: &Span| {
                        info!(
                            status = %response.status(),
                            latency = ?latency,
                            "response"
                        );
                    },
                ),
        )
        .with_state(state)
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Serialize)]
struct HealthResponse {
    healthy: bool,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Workflow mode
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest {
    conversation_id: String,
    #[serde(default)]
    messages: Vec<UiMessage>,
}

async fn conversation_start(
    State(state): State<AppState>,
    Json(req): Json<StartRequest>,
) -> Result<impl IntoResponse, ApiFailure> {
    let started = state
        .runs
        .start(&req.conversation_id, req.messages)
        .await
        .map_err(|e| {
            warn!(conversation_id = %req.conversation_id, error = %e, "Failed to start run");
            ApiError::from_core(&e)
        })?;

    let mut headers = HeaderMap::new();
    insert_header(&mut headers, RUN_ID_HEADER, &started.run_id);
    insert_header(&mut headers, CONVERSATION_ID_HEADER, &req.conversation_id);
    insert_header(&mut headers, SANDBOX_ID_HEADER, &started.sandbox_id);

    // The run outlives the response; a dropped client only ends the stream.
    Ok((headers, chunk_events(started.channel.subscribe(0), None)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRequest {
    message: String,
    conversation_id: Option<String>,
    run_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageResponse {
    accepted: bool,
    run_id: Option<String>,
    seq: u64,
}

async fn conversation_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Json(req): Json<MessageRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiFailure> {
    if let Some(body_id) = req.conversation_id.as_deref() {
        if body_id != conversation_id {
            return Err(ApiError::bad_request(
                "conversationId does not match the path",
            ));
        }
    }

    let delivery = state
        .runs
        .deliver(&conversation_id, &req.message)
        .await
        .map_err(|e| ApiError::from_core(&e))?;

    if let (Some(expected), Some(actual)) = (req.run_id.as_deref(), delivery.run_id.as_deref()) {
        if expected != actual {
            warn!(
                conversation_id = %conversation_id,
                expected,
                actual,
                "Follow-up delivered to a newer run"
            );
        }
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            accepted: true,
            run_id: delivery.run_id,
            seq: delivery.seq,
        }),
    ))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamQuery {
    run_id: Option<String>,
    start_index: Option<usize>,
}

async fn conversation_stream(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Result<impl IntoResponse, ApiFailure> {
    let start_index = query.start_index.unwrap_or(0);
    let (run_id, chunks) = state
        .runs
        .attach(&conversation_id, query.run_id.as_deref(), start_index)
        .await
        .map_err(|e| ApiError::from_core(&e))?;
    info!(run_id = %run_id, start_index, "Client re-attached");

    let mut headers = HeaderMap::new();
    insert_header(&mut headers, RUN_ID_HEADER, &run_id);
    insert_header(&mut headers, CONVERSATION_ID_HEADER, &conversation_id);

    Ok((headers, chunk_events(chunks, None)))
}

async fn conversation_status(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<impl IntoResponse, ApiFailure> {
    let status = state
        .runs
        .status(&conversation_id)
        .await
        .map_err(|e| ApiError::from_core(&e))?;
    Ok(Json(status))
}

// ============================================================================
// Bash-tool mode
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AgentTurnRequest {
    conversation_id: String,
    sandbox_id: Option<String>,
    #[serde(default)]
    messages: Vec<UiMessage>,
}

async fn agent_turn(
    State(state): State<AppState>,
    Json(req): Json<AgentTurnRequest>,
) -> Result<impl IntoResponse, ApiFailure> {
    let started = state
        .bash
        .start(TurnRequest {
            conversation_id: req.conversation_id,
            sandbox_id: req.sandbox_id.filter(|id| !id.is_empty()),
            messages: req.messages,
        })
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to start turn");
            ApiError::from_core(&e)
        })?;

    let mut headers = HeaderMap::new();
    insert_header(&mut headers, SANDBOX_ID_HEADER, &started.sandbox_id);
    insert_header(&mut headers, CONVERSATION_ID_HEADER, &started.conversation_id);

    // The turn is cancelled when the client goes away.
    let guard = started.cancel_on_drop();
    Ok((
        headers,
        chunk_events(started.channel.subscribe(0), Some(guard)),
    ))
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(HeaderName::from_static(name), value);
        }
        Err(e) => warn!(header = name, error = %e, "Skipping invalid header value"),
    }
}
