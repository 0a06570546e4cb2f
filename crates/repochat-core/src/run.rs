//! Durable conversation runs.
//!
//! A run owns one sandbox and one model history for the lifetime of a
//! conversation. It answers the first message, then parks on the resume
//! channel until the next one arrives, for as long as it takes. Only the
//! `/done` sentinel ends it.

use crate::agent::{Agent, AgentConfig};
use crate::chunk::Chunk;
use crate::channel::OutputChannel;
use crate::error::{CoreError, CoreResult};
use crate::hook::{FollowUp, Hook};
use crate::journal::Journal;
use crate::ui::{to_model_messages, UiMessage};
use chrono::{DateTime, Utc};
use repochat_provider::{BoxedLanguageModel, Message};
use repochat_sandbox::SharedSandboxProvider;
use repochat_storage::{SharedStorage, StorageExt};
use repochat_tools::{ToolContext, ToolRegistry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

/// The message that ends a conversation.
pub const DONE_SENTINEL: &str = "/done";

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Created,
    Streaming,
    Suspended,
    Terminated,
    Failed,
}

impl RunStatus {
    /// Whether the run will never write again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Terminated | RunStatus::Failed)
    }
}

/// Persisted description of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub run_id: String,
    pub conversation_id: String,
    pub status: RunStatus,
    #[serde(default)]
    pub sandbox_id: Option<String>,
    /// Messages the run was started with.
    pub messages: Vec<UiMessage>,
    pub max_steps: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunRecord {
    pub fn new(
        run_id: impl Into<String>,
        conversation_id: impl Into<String>,
        messages: Vec<UiMessage>,
        max_steps: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            conversation_id: conversation_id.into(),
            status: RunStatus::Created,
            sandbox_id: None,
            messages,
            max_steps,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    pub async fn load(storage: &SharedStorage, run_id: &str) -> CoreResult<Option<Self>> {
        Ok(storage.read(&["run", run_id]).await?)
    }

    pub async fn save(&self, storage: &SharedStorage) -> CoreResult<()> {
        storage.write(&["run", &self.run_id], self).await?;
        Ok(())
    }

    /// Model history as of the run's last suspension.
    pub async fn load_history(storage: &SharedStorage, run_id: &str) -> CoreResult<Vec<Message>> {
        Ok(storage
            .read(&["run", run_id, "history"])
            .await?
            .unwrap_or_default())
    }
}

/// Shared collaborators for runs.
#[derive(Clone)]
pub struct RunEnv {
    pub storage: SharedStorage,
    pub sandboxes: SharedSandboxProvider,
    pub model: BoxedLanguageModel,
    pub tools: Arc<ToolRegistry>,
    pub system: String,
}

/// One conversation's durable run.
pub struct ConversationRun {
    env: RunEnv,
    record: RunRecord,
    journal: Journal,
    hook: Hook,
}

impl ConversationRun {
    pub fn new(env: RunEnv, record: RunRecord, journal: Journal, hook: Hook) -> Self {
        Self {
            env,
            record,
            journal,
            hook,
        }
    }

    pub fn channel(&self) -> OutputChannel {
        self.journal.channel().clone()
    }

    /// Drive the run to completion and return its full history.
    ///
    /// `ready` receives the sandbox id once the sandbox exists, or the error
    /// if it could not be created.
    pub async fn execute(
        mut self,
        mut ready: Option<oneshot::Sender<CoreResult<String>>>,
    ) -> CoreResult<Vec<Message>> {
        let sandboxes = self.env.sandboxes.clone();
        let created = self
            .journal
            .step("create-sandbox", || async move {
                let sandbox = sandboxes.create().await?;
                Ok(sandbox.id().to_string())
            })
            .await;

        let sandbox_id = match created {
            Ok(id) => id,
            Err(e) => {
                error!(run_id = %self.record.run_id, error = %e, "Sandbox creation failed");
                self.fail(&e).await;
                return match ready.take() {
                    Some(tx) => {
                        let message = e.to_string();
                        let _ = tx.send(Err(e));
                        Err(CoreError::RunAborted(message))
                    }
                    None => Err(e),
                };
            }
        };
        info!(run_id = %self.record.run_id, sandbox_id = %sandbox_id, "Sandbox ready");
        self.record.sandbox_id = Some(sandbox_id.clone());
        if let Some(tx) = ready.take() {
            let _ = tx.send(Ok(sandbox_id.clone()));
        }

        match self.converse(&sandbox_id).await {
            Ok(history) => Ok(history),
            Err(e) => {
                error!(run_id = %self.record.run_id, error = %e, "Run failed");
                self.fail(&e).await;
                Err(e)
            }
        }
    }

    async fn converse(&mut self, sandbox_id: &str) -> CoreResult<Vec<Message>> {
        self.set_status(RunStatus::Streaming).await?;

        let ctx = ToolContext::new(self.env.sandboxes.clone(), sandbox_id);
        let agent = Agent::new(
            self.env.model.clone(),
            self.env.tools.clone(),
            AgentConfig {
                system: self.env.system.clone(),
                max_steps: self.record.max_steps,
                ..Default::default()
            },
        );
        let mut history = to_model_messages(&self.record.messages);

        loop {
            let turn = agent.stream(&history, &ctx, &mut self.journal).await?;
            history.extend(turn.messages);

            self.env
                .storage
                .write(&["run", &self.record.run_id, "history"], &history)
                .await?;
            self.set_status(RunStatus::Suspended).await?;
            info!(
                run_id = %self.record.run_id,
                history = history.len(),
                "Waiting for the next message"
            );

            let hook = &self.hook;
            let follow_up: FollowUp = self
                .journal
                .step("await-message", || hook.next())
                .await?;
            hook.consume(follow_up.seq).await?;

            if follow_up.message == DONE_SENTINEL {
                info!(run_id = %self.record.run_id, "Conversation ended by user");
                break;
            }

            self.journal
                .emit(Chunk::user_message(&follow_up.message))
                .await?;
            history.push(Message::user(follow_up.message));
            self.set_status(RunStatus::Streaming).await?;
        }

        self.journal.emit(Chunk::Finish).await?;
        self.hook.release();
        self.hook.clear().await?;
        self.set_status(RunStatus::Terminated).await?;
        self.journal.channel().close();
        Ok(history)
    }

    async fn set_status(&mut self, status: RunStatus) -> CoreResult<()> {
        self.record.status = status;
        self.record.updated_at = Utc::now();
        self.record.save(&self.env.storage).await
    }

    async fn fail(&mut self, error: &CoreError) {
        self.hook.release();
        if let Err(e) = self.hook.clear().await {
            warn!(run_id = %self.record.run_id, error = %e, "Could not clear follow-ups");
        }
        let channel = self.journal.channel().clone();
        channel.push(Chunk::error(error.to_string()));

        self.record.error = Some(error.to_string());
        let storage = self.env.storage.clone();
        let run_id = self.record.run_id.clone();
        let persisted = async {
            storage
                .write(&["run", &run_id, "chunks"], &channel.snapshot())
                .await?;
            self.set_status(RunStatus::Failed).await
        };
        if let Err(e) = persisted.await {
            error!(run_id = %run_id, error = %e, "Could not record run failure");
        }
        channel.close();
    }
}
