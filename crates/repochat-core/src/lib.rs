//! Core logic for repochat.
//!
//! This crate provides the two ways of chatting about a repository:
//! - Bash-tool mode: one stateless agent turn per request ([`BashToolAgent`])
//! - Workflow mode: a durable conversation run ([`RunManager`]) that survives
//!   restarts by replaying its checkpoint journal
//!
//! Both stream [`Chunk`]s through an [`OutputChannel`].

pub mod agent;
pub mod channel;
pub mod chunk;
pub mod config;
pub mod error;
pub mod hook;
pub mod journal;
pub mod manager;
pub mod mode;
pub mod run;
pub mod stateless;
pub mod system_prompt;
pub mod ui;

pub use agent::{Agent, AgentConfig, TurnOutcome, DEFAULT_MAX_STEPS};
pub use channel::OutputChannel;
pub use chunk::Chunk;
pub use config::{Config, ServerConfig, StorageKind};
pub use error::{ConfigError, CoreError, CoreResult, HookError};
pub use hook::{FollowUp, Hook, HookRegistry};
pub use journal::{Checkpoint, Journal};
pub use manager::{Delivery, RunManager, RunStatusInfo, StartedRun};
pub use mode::AgentMode;
pub use run::{ConversationRun, RunEnv, RunRecord, RunStatus, DONE_SENTINEL};
pub use stateless::{BashToolAgent, SandboxDirectory, StartedTurn, TurnRequest};
pub use system_prompt::system_prompt;
pub use ui::{to_model_messages, UiMessage, UiPart, UiRole};
