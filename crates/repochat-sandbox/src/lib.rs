//! Sandbox execution environments for repochat tools.
//!
//! A [`SandboxProvider`] creates sandboxes and reconnects to them by
//! identifier. Only the identifier is meant to be persisted: handles are
//! cheap to re-obtain and hold no state worth checkpointing.
//!
//! The bundled [`LocalSandboxProvider`] gives each sandbox its own directory
//! on the host and runs commands through `sh -c`.

pub mod config;
pub mod error;
pub mod local;

pub use config::SandboxConfig;
pub use error::{SandboxError, SandboxResult};
pub use local::LocalSandboxProvider;

use async_trait::async_trait;
use std::sync::Arc;

/// Result of command execution in sandbox.
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxOutput {
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
    /// Exit code
    pub exit_code: i32,
    /// Whether the command succeeded (exit code 0)
    pub success: bool,
}

impl SandboxOutput {
    /// Create a new successful output.
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
            success: true,
        }
    }

    /// Create a new failed output.
    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
            success: false,
        }
    }

    /// Create output from stdout/stderr strings and exit code.
    pub fn from_output(stdout: String, stderr: String, exit_code: i32) -> Self {
        Self {
            stdout,
            stderr,
            exit_code,
            success: exit_code == 0,
        }
    }

    /// Get combined output (stdout + stderr).
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// A live connection to one sandbox.
///
/// A non-zero exit status is reported through [`SandboxOutput`], not as an
/// error. Errors mean the command could not be run at all.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// The identifier this sandbox can be reconnected with.
    fn id(&self) -> &str;

    /// Run a shell command inside the sandbox workspace.
    async fn run_command(&self, command: &str) -> SandboxResult<SandboxOutput>;
}

/// Shared sandbox handle.
pub type SandboxHandle = Arc<dyn Sandbox>;

/// Creates, reconnects to, and stops sandboxes.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Create a fresh sandbox.
    async fn create(&self) -> SandboxResult<SandboxHandle>;

    /// Reconnect to an existing sandbox by identifier.
    async fn get(&self, id: &str) -> SandboxResult<SandboxHandle>;

    /// Stop a sandbox and release its resources.
    async fn stop(&self, id: &str) -> SandboxResult<()>;
}

/// Shared sandbox provider.
pub type SharedSandboxProvider = Arc<dyn SandboxProvider>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_combined() {
        assert_eq!(SandboxOutput::success("out").combined(), "out");
        assert_eq!(SandboxOutput::failure(1, "err").combined(), "err");
        let both = SandboxOutput::from_output("out".into(), "err".into(), 2);
        assert_eq!(both.combined(), "out\nerr");
        assert!(!both.success);
    }
}
