//! Test doubles shared across the repochat workspace.
//!
//! - [`ScriptedModel`]: a language model that replays queued responses and
//!   records every request.
//! - [`RecordingSandboxProvider`]: an in-memory sandbox provider that records
//!   commands and tracks directories created by `git clone`/`mkdir`.
//!
//! ```rust,ignore
//! use repochat_test_utils::{RecordingSandboxProvider, ScriptedModel};
//!
//! let model = ScriptedModel::new()
//!     .with_tool_call("call_1", "git_clone", r#"{"repoUrl":"https://github.com/a/b"}"#)
//!     .with_text("Cloned.");
//! let sandboxes = RecordingSandboxProvider::new();
//! ```

pub mod providers;
pub mod sandbox;

pub use providers::{RecordedCall, ScriptedModel, ScriptedResponse};
pub use sandbox::{ExecutedCommand, RecordingSandboxProvider};
