//! Tool adapters for repochat.
//!
//! Every tool maps one invocation onto exactly one sandbox command (two for
//! `git_clone`, which checks for an existing checkout first) and returns a
//! JSON record. Command failures are part of that record; a [`ToolError`]
//! means the tool could not run at all.
//!
//! Tools never keep a sandbox handle between calls. [`ToolContext`] carries
//! only the sandbox identifier and reconnects for each invocation, so a call
//! can be replayed independently of any earlier one.

pub mod error;
pub mod registry;
pub mod shell;

pub mod bash;
pub mod git_clone;
pub mod list_files;
pub mod read_file;
pub mod search_files;

pub use error::{ToolError, ToolResult};
pub use registry::ToolRegistry;

use async_trait::async_trait;
use repochat_sandbox::{SandboxHandle, SandboxOutput, SharedSandboxProvider};
use serde_json::Value;
use std::sync::Arc;

/// What a tool needs to reach its sandbox.
#[derive(Clone)]
pub struct ToolContext {
    /// Provider used to reconnect to the sandbox.
    pub sandboxes: SharedSandboxProvider,
    /// Sandbox this conversation owns.
    pub sandbox_id: String,
}

impl ToolContext {
    pub fn new(sandboxes: SharedSandboxProvider, sandbox_id: impl Into<String>) -> Self {
        Self {
            sandboxes,
            sandbox_id: sandbox_id.into(),
        }
    }

    /// Reconnect to the sandbox.
    pub async fn sandbox(&self) -> ToolResult<SandboxHandle> {
        Ok(self.sandboxes.get(&self.sandbox_id).await?)
    }

    /// Reconnect and run one command.
    pub async fn run(&self, command: &str) -> ToolResult<SandboxOutput> {
        let sandbox = self.sandbox().await?;
        Ok(sandbox.run_command(command).await?)
    }
}

/// Output from a tool execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// Short title for display.
    pub title: String,
    /// The normalized result record.
    pub output: Value,
}

impl ToolOutput {
    pub fn new(title: impl Into<String>, output: Value) -> Self {
        Self {
            title: title.into(),
            output,
        }
    }

    /// The record's `success` flag; records without one count as successful.
    pub fn success(&self) -> bool {
        self.output
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }
}

/// The trait that all tools implement.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name as the model sees it.
    fn id(&self) -> &str;

    /// Description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema for the parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> ToolResult<ToolOutput>;
}

/// A boxed tool for dynamic dispatch.
pub type BoxedTool = Arc<dyn Tool>;

/// Decode tool arguments, reporting problems as validation errors.
pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(args: Value) -> ToolResult<T> {
    serde_json::from_value(args)
        .map_err(|e| ToolError::validation(format!("Invalid arguments: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mockall::mock;
    use repochat_sandbox::{SandboxError, SandboxProvider, SandboxResult};
    use serde_json::json;

    mock! {
        Provider {}

        #[async_trait]
        impl SandboxProvider for Provider {
            async fn create(&self) -> SandboxResult<SandboxHandle>;
            async fn get(&self, id: &str) -> SandboxResult<SandboxHandle>;
            async fn stop(&self, id: &str) -> SandboxResult<()>;
        }
    }

    #[tokio::test]
    async fn test_context_reconnects_on_every_call() {
        let mut provider = MockProvider::new();
        provider
            .expect_get()
            .times(2)
            .returning(|id| Err(SandboxError::NotFound(id.to_string())));

        let ctx = ToolContext::new(Arc::new(provider), "sbx_gone");
        let err = ctx.run("ls").await.unwrap_err();
        assert!(matches!(err, ToolError::Sandbox(_)));
        assert_eq!(err.to_string(), "Sandbox error: sandbox not found: sbx_gone");
        assert!(ctx.run("pwd").await.is_err());
    }

    #[test]
    fn test_output_success_flag() {
        assert!(!ToolOutput::new("x", json!({"success": false})).success());
        assert!(ToolOutput::new("x", json!({"path": "."})).success());
    }
}
