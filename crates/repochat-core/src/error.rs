//! Error types for the core crate.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Resume channel error.
    #[error("hook error: {0}")]
    Hook(#[from] HookError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] repochat_storage::StorageError),

    /// Model provider error.
    #[error("provider error: {0}")]
    Provider(#[from] repochat_provider::ProviderError),

    /// Sandbox error.
    #[error("sandbox error: {0}")]
    Sandbox(#[from] repochat_sandbox::SandboxError),

    /// Tool error.
    #[error("tool error: {0}")]
    Tool(#[from] repochat_tools::ToolError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// No run with this identifier.
    #[error("run not found: {0}")]
    RunNotFound(String),

    /// The conversation already owns a live run.
    #[error("conversation already has an active run: {0}")]
    ConversationActive(String),

    /// The request is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A replayed run took a different path than the recorded one.
    #[error("journal mismatch at step {seq}: expected {expected}, found {found}")]
    JournalMismatch {
        seq: usize,
        expected: String,
        found: String,
    },

    /// The run task stopped before reporting back.
    #[error("run aborted: {0}")]
    RunAborted(String),
}

impl CoreError {
    /// Whether the error means the thing asked for does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::RunNotFound(_) | Self::Hook(HookError::NotRegistered(_))
        )
    }
}

/// Configuration-specific errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid JSON/JSONC syntax.
    #[error("invalid config at {path}: {message}")]
    InvalidJson { path: String, message: String },

    /// Environment variable not found during substitution.
    #[error("environment variable not found: {name}")]
    EnvVarNotFound { name: String },

    /// A `{file:...}` reference points at a missing file.
    #[error("file reference not found: {path}")]
    FileRefNotFound { path: String },

    /// Invalid path (e.g., could not determine config directory).
    #[error("invalid path: {0}")]
    InvalidPath(String),
}

/// Resume channel errors.
#[derive(Debug, Error)]
pub enum HookError {
    /// No live run holds this token.
    #[error("no run is waiting on conversation {0}")]
    NotRegistered(String),

    /// Another run already holds this token.
    #[error("conversation {0} is already claimed")]
    AlreadyClaimed(String),
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(CoreError::RunNotFound("run_1".into()).is_not_found());
        assert!(CoreError::from(HookError::NotRegistered("conv-1".into())).is_not_found());
        assert!(!CoreError::ConversationActive("conv-1".into()).is_not_found());
    }

    #[test]
    fn test_display() {
        let err = CoreError::from(HookError::AlreadyClaimed("conv-abc".into()));
        assert_eq!(
            err.to_string(),
            "hook error: conversation conv-abc is already claimed"
        );
    }
}
