//! Output channel chunks.
//!
//! Chunks are what a client sees of a run: the model's text as it streams,
//! tool calls and their results, markers for follow-up messages, and errors.
//! The wire form is a JSON object tagged by `type`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One record on an output channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Chunk {
    /// An assistant message begins.
    #[serde(rename_all = "camelCase")]
    StreamStart { message_id: String },

    /// A piece of assistant text.
    TextDelta { delta: String },

    /// A tool call with its complete input.
    #[serde(rename_all = "camelCase")]
    ToolCallStart {
        tool_call_id: String,
        tool_name: String,
        input: Value,
    },

    /// The outcome of a tool call.
    #[serde(rename_all = "camelCase")]
    ToolCallResult {
        tool_call_id: String,
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_text: Option<String>,
    },

    /// A follow-up user message was accepted by the run.
    DataUserMessage { text: String },

    /// A model or agent failure.
    #[serde(rename_all = "camelCase")]
    Error { error_text: String },

    /// Nothing more will be written.
    Finish,
}

impl Chunk {
    pub fn text(delta: impl Into<String>) -> Self {
        Self::TextDelta {
            delta: delta.into(),
        }
    }

    pub fn user_message(text: impl Into<String>) -> Self {
        Self::DataUserMessage { text: text.into() }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::Error {
            error_text: text.into(),
        }
    }

    /// The `type` tag of this chunk.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StreamStart { .. } => "stream-start",
            Self::TextDelta { .. } => "text-delta",
            Self::ToolCallStart { .. } => "tool-call-start",
            Self::ToolCallResult { .. } => "tool-call-result",
            Self::DataUserMessage { .. } => "data-user-message",
            Self::Error { .. } => "error",
            Self::Finish => "finish",
        }
    }

    /// Whether this chunk shows something to the user.
    pub fn is_content(&self) -> bool {
        match self {
            Self::TextDelta { delta } => !delta.is_empty(),
            Self::ToolCallStart { .. } | Self::ToolCallResult { .. } | Self::Error { .. } => true,
            Self::StreamStart { .. } | Self::DataUserMessage { .. } | Self::Finish => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_format() {
        let chunk = Chunk::ToolCallStart {
            tool_call_id: "toolu_1".into(),
            tool_name: "list_files".into(),
            input: json!({"path": "b"}),
        };
        assert_eq!(
            serde_json::to_value(&chunk).unwrap(),
            json!({
                "type": "tool-call-start",
                "toolCallId": "toolu_1",
                "toolName": "list_files",
                "input": {"path": "b"}
            })
        );

        assert_eq!(
            serde_json::to_value(Chunk::user_message("list files in b")).unwrap(),
            json!({"type": "data-user-message", "text": "list files in b"})
        );
        assert_eq!(
            serde_json::to_value(Chunk::Finish).unwrap(),
            json!({"type": "finish"})
        );
    }

    #[test]
    fn test_tool_result_omits_missing_fields() {
        let chunk = Chunk::ToolCallResult {
            tool_call_id: "toolu_1".into(),
            tool_name: "bash".into(),
            output: None,
            error_text: Some("sandbox not found".into()),
        };
        let value = serde_json::to_value(&chunk).unwrap();
        assert_eq!(value["errorText"], "sandbox not found");
        assert!(value.get("output").is_none());

        let parsed: Chunk = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, chunk);
    }

    #[test]
    fn test_parse_stream_start() {
        let chunk: Chunk =
            serde_json::from_str(r#"{"type":"stream-start","messageId":"msg_1"}"#).unwrap();
        assert_eq!(
            chunk,
            Chunk::StreamStart {
                message_id: "msg_1".into()
            }
        );
        assert_eq!(chunk.kind(), "stream-start");
        assert!(!chunk.is_content());
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(serde_json::from_str::<Chunk>(r#"{"type":"reasoning"}"#).is_err());
    }

    #[test]
    fn test_is_content() {
        assert!(!Chunk::text("").is_content());
        assert!(Chunk::text("hi").is_content());
        assert!(Chunk::error("boom").is_content());
    }
}
