//! Error types for the client.

use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Reconnect was asked for without a run id and conversation id.
    #[error("cannot reconnect: missing run id or conversation id")]
    MissingCredentials,

    /// The HTTP request failed before a response arrived.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with an error status.
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The stream kept failing and was abandoned.
    #[error("stream abandoned after {0} consecutive errors")]
    TooManyErrors(usize),

    /// Reading or writing the session file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A payload could not be (de)serialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// Whether retrying the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;
