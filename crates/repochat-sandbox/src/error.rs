//! Error types for sandbox operations.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during sandbox operations.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// No sandbox exists with this identifier
    #[error("sandbox not found: {0}")]
    NotFound(String),

    /// Sandbox outlived its configured lifetime
    #[error("sandbox expired: {0}")]
    Expired(String),

    /// Failed to create sandbox
    #[error("failed to create sandbox: {0}")]
    CreateFailed(String),

    /// Command could not be spawned
    #[error("command execution failed: {0}")]
    ExecFailed(String),

    /// Command timed out
    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Sandbox metadata could not be decoded
    #[error("invalid sandbox metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

impl SandboxError {
    /// Whether reconnecting failed because the sandbox is gone.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Expired(_))
    }
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = Result<T, SandboxError>;
