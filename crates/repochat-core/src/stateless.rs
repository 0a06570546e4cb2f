//! Bash-tool mode.
//!
//! Every request runs one bounded agent turn with a single `bash` tool and
//! nothing is kept between requests except which sandbox belongs to which
//! conversation. That mapping lives in the injected [`SharedStorage`]; with
//! [`repochat_storage::MemoryStorage`] it is local to the process and lost on
//! restart.

use crate::agent::{Agent, AgentConfig};
use crate::chunk::Chunk;
use crate::channel::OutputChannel;
use crate::error::{CoreError, CoreResult};
use crate::journal::Journal;
use crate::ui::{to_model_messages, UiMessage};
use repochat_provider::BoxedLanguageModel;
use repochat_sandbox::SharedSandboxProvider;
use repochat_storage::{SharedStorage, StorageExt};
use repochat_tools::{ToolContext, ToolRegistry};
use std::sync::Arc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, info_span, warn, Instrument};

/// Conversation to sandbox mapping.
#[derive(Clone)]
pub struct SandboxDirectory {
    storage: SharedStorage,
}

impl SandboxDirectory {
    pub fn new(storage: SharedStorage) -> Self {
        Self { storage }
    }

    pub async fn get(&self, conversation_id: &str) -> CoreResult<Option<String>> {
        Ok(self.storage.read(&["sandbox", conversation_id]).await?)
    }

    pub async fn set(&self, conversation_id: &str, sandbox_id: &str) -> CoreResult<()> {
        self.storage
            .write(&["sandbox", conversation_id], &sandbox_id)
            .await?;
        Ok(())
    }

    pub async fn remove(&self, conversation_id: &str) -> CoreResult<()> {
        self.storage.remove(&["sandbox", conversation_id]).await?;
        Ok(())
    }
}

/// One bash-tool request.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub conversation_id: String,
    /// Sandbox the client believes it owns.
    pub sandbox_id: Option<String>,
    pub messages: Vec<UiMessage>,
}

/// A turn that is streaming.
pub struct StartedTurn {
    pub conversation_id: String,
    pub sandbox_id: String,
    pub channel: OutputChannel,
    cancel: CancellationToken,
}

impl StartedTurn {
    /// A guard that stops the turn when dropped.
    pub fn cancel_on_drop(&self) -> DropGuard {
        self.cancel.clone().drop_guard()
    }
}

/// Serves bash-tool requests.
pub struct BashToolAgent {
    model: BoxedLanguageModel,
    sandboxes: SharedSandboxProvider,
    directory: SandboxDirectory,
    tools: Arc<ToolRegistry>,
    config: AgentConfig,
}

impl BashToolAgent {
    pub fn new(
        model: BoxedLanguageModel,
        sandboxes: SharedSandboxProvider,
        directory: SandboxDirectory,
        config: AgentConfig,
    ) -> Self {
        Self {
            model,
            sandboxes,
            directory,
            tools: Arc::new(ToolRegistry::bash_only()),
            config,
        }
    }

    /// Reconnect to the conversation's sandbox, or create one.
    ///
    /// A sandbox id sent by the client wins over the stored one. If
    /// reconnecting fails, a new sandbox replaces it.
    pub async fn get_or_create_sandbox(
        &self,
        conversation_id: &str,
        client_sandbox_id: Option<&str>,
    ) -> CoreResult<String> {
        let known = match client_sandbox_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => Some(id.to_string()),
            None => self.directory.get(conversation_id).await?,
        };

        if let Some(id) = known {
            match self.sandboxes.get(&id).await {
                Ok(sandbox) => {
                    debug!(conversation_id, sandbox_id = %id, "Reconnected to sandbox");
                    self.directory.set(conversation_id, sandbox.id()).await?;
                    return Ok(id);
                }
                Err(e) => {
                    warn!(
                        conversation_id,
                        sandbox_id = %id,
                        error = %e,
                        "Reconnect failed, creating a new sandbox"
                    );
                    self.directory.remove(conversation_id).await?;
                }
            }
        }

        let sandbox = self.sandboxes.create().await?;
        info!(conversation_id, sandbox_id = %sandbox.id(), "Created sandbox");
        self.directory.set(conversation_id, sandbox.id()).await?;
        Ok(sandbox.id().to_string())
    }

    /// Resolve the sandbox and start streaming one turn.
    ///
    /// Failures before streaming begins are returned; later ones arrive on
    /// the channel as `error` chunks.
    pub async fn start(&self, request: TurnRequest) -> CoreResult<StartedTurn> {
        if request.conversation_id.trim().is_empty() {
            return Err(CoreError::InvalidRequest(
                "conversationId is required".to_string(),
            ));
        }
        let history = to_model_messages(&request.messages);
        if history.is_empty() {
            return Err(CoreError::InvalidRequest(
                "at least one message with text is required".to_string(),
            ));
        }

        let sandbox_id = self
            .get_or_create_sandbox(&request.conversation_id, request.sandbox_id.as_deref())
            .await?;

        let channel = OutputChannel::new();
        let cancel = CancellationToken::new();
        let agent = Agent::new(self.model.clone(), self.tools.clone(), self.config.clone())
            .with_cancel(cancel.clone());
        let ctx = ToolContext::new(self.sandboxes.clone(), &sandbox_id);
        let span = info_span!(
            "turn",
            conversation_id = %request.conversation_id,
            sandbox_id = %sandbox_id
        );

        let writer = channel.clone();
        tokio::spawn(
            async move {
                let mut journal = Journal::ephemeral(writer.clone());
                match agent.stream(&history, &ctx, &mut journal).await {
                    Ok(outcome) => debug!(steps = outcome.steps, "Turn finished"),
                    Err(e) => {
                        warn!(error = %e, "Turn failed");
                        writer.push(Chunk::error(e.to_string()));
                    }
                }
                writer.push(Chunk::Finish);
                writer.close();
            }
            .instrument(span),
        );

        Ok(StartedTurn {
            conversation_id: request.conversation_id,
            sandbox_id,
            channel,
            cancel,
        })
    }
}
