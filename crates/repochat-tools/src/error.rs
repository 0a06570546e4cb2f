//! Tool error types.

use repochat_sandbox::SandboxError;
use thiserror::Error;

/// Result type for tool operations.
pub type ToolResult<T> = Result<T, ToolError>;

/// Errors that prevent a tool from producing a result record.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Invalid parameters.
    #[error("Validation error: {0}")]
    Validation(String),

    /// No tool registered under this name.
    #[error("Unknown tool: {0}")]
    NotFound(String),

    /// The sandbox could not be reached or the command could not run.
    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ToolError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
