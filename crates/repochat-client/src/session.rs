//! Client session context.
//!
//! Holds what a client must remember between requests: the conversation
//! token, the workflow run id, the message that started the run, the
//! bash-tool sandbox id and the chosen agent mode. A context is either kept
//! in memory or backed by a JSON file.

use crate::error::ClientResult;
use repochat_core::AgentMode;
use repochat_util::Identifier;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

const SESSION_FILE: &str = "session.json";

/// The persisted session fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// The user message that started the run. Later messages are markers on
    /// the run's stream, this one is not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_id: Option<String>,
    pub agent_mode: AgentMode,
}

/// Session state with get/set/clear.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    path: Option<PathBuf>,
    state: SessionState,
}

impl SessionContext {
    /// A context that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load the context stored at `path`, or start an empty one.
    pub fn load(path: impl Into<PathBuf>) -> ClientResult<Self> {
        let path = path.into();
        let state = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SessionState::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: Some(path),
            state,
        })
    }

    /// Default session file in the state directory.
    pub fn default_path() -> Option<PathBuf> {
        repochat_util::path::state_dir().map(|dir| dir.join(SESSION_FILE))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The conversation token, creating one on first use.
    pub fn conversation_id(&mut self) -> ClientResult<String> {
        if let Some(id) = &self.state.conversation_id {
            return Ok(id.clone());
        }
        let id = Identifier::conversation();
        debug!(conversation_id = %id, "Started conversation");
        self.state.conversation_id = Some(id.clone());
        self.save()?;
        Ok(id)
    }

    /// The conversation token, if one exists.
    pub fn current_conversation_id(&self) -> Option<&str> {
        self.state.conversation_id.as_deref()
    }

    pub fn run_id(&self) -> Option<&str> {
        self.state.run_id.as_deref()
    }

    pub fn set_run_id(&mut self, run_id: impl Into<String>) -> ClientResult<()> {
        self.state.run_id = Some(run_id.into());
        self.save()
    }

    pub fn first_message(&self) -> Option<&str> {
        self.state.first_message.as_deref()
    }

    pub fn set_first_message(&mut self, text: impl Into<String>) -> ClientResult<()> {
        self.state.first_message = Some(text.into());
        self.save()
    }

    pub fn sandbox_id(&self) -> Option<&str> {
        self.state.sandbox_id.as_deref()
    }

    pub fn set_sandbox_id(&mut self, sandbox_id: impl Into<String>) -> ClientResult<()> {
        self.state.sandbox_id = Some(sandbox_id.into());
        self.save()
    }

    pub fn agent_mode(&self) -> AgentMode {
        self.state.agent_mode
    }

    pub fn set_agent_mode(&mut self, mode: AgentMode) -> ClientResult<()> {
        self.state.agent_mode = mode;
        self.save()
    }

    /// Forget the conversation, run, first message and sandbox. The agent
    /// mode is kept.
    pub fn clear(&mut self) -> ClientResult<()> {
        self.state = SessionState {
            agent_mode: self.state.agent_mode,
            ..Default::default()
        };
        self.save()
    }

    fn save(&self) -> ClientResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&self.state)?)?;
        Ok(())
    }
}
