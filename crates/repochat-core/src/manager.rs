//! Run lifecycle management.
//!
//! The manager starts runs, routes follow-ups to them, lets clients attach to
//! a run's output from any offset, and re-spawns unfinished runs after a
//! restart.

use crate::channel::OutputChannel;
use crate::chunk::Chunk;
use crate::error::{CoreError, CoreResult, HookError};
use crate::hook::{Hook, HookRegistry};
use crate::journal::Journal;
use crate::run::{ConversationRun, RunEnv, RunRecord, RunStatus};
use crate::ui::{to_model_messages, UiMessage};
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use repochat_storage::StorageExt;
use repochat_util::Identifier;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{error, info, info_span, warn, Instrument};

/// A run that was just started.
pub struct StartedRun {
    pub run_id: String,
    pub sandbox_id: String,
    pub channel: OutputChannel,
}

/// Acknowledgement of a follow-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub run_id: Option<String>,
    pub seq: u64,
}

/// Run status as reported to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatusInfo {
    pub run_id: String,
    pub conversation_id: String,
    pub status: RunStatus,
    pub sandbox_id: Option<String>,
    pub message_count: usize,
    pub chunk_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct LiveRun {
    conversation_id: String,
    channel: OutputChannel,
    abort: Option<AbortHandle>,
}

/// Owns every run in this process.
pub struct RunManager {
    env: RunEnv,
    hooks: HookRegistry,
    max_steps: usize,
    runs: Arc<Mutex<HashMap<String, LiveRun>>>,
}

impl RunManager {
    pub fn new(env: RunEnv, max_steps: usize) -> Self {
        Self {
            hooks: HookRegistry::new(env.storage.clone()),
            env,
            max_steps,
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// Number of runs with a live task.
    pub fn live_runs(&self) -> usize {
        self.runs().len()
    }

    /// Start a run for `conversation_id`.
    ///
    /// Returns once the sandbox exists; a sandbox failure is returned here.
    pub async fn start(
        &self,
        conversation_id: &str,
        messages: Vec<UiMessage>,
    ) -> CoreResult<StartedRun> {
        if conversation_id.trim().is_empty() {
            return Err(CoreError::InvalidRequest(
                "conversationId is required".to_string(),
            ));
        }
        if to_model_messages(&messages).is_empty() {
            return Err(CoreError::InvalidRequest(
                "at least one message with text is required".to_string(),
            ));
        }

        let run_id = Identifier::run();
        let hook = self
            .hooks
            .create(conversation_id, &run_id)
            .map_err(|e| match e {
                CoreError::Hook(HookError::AlreadyClaimed(id)) => CoreError::ConversationActive(id),
                other => other,
            })?;

        let record = RunRecord::new(&run_id, conversation_id, messages, self.max_steps);
        record.save(&self.env.storage).await?;
        self.env
            .storage
            .write(&["conversation", conversation_id], &run_id)
            .await?;
        info!(run_id = %run_id, conversation_id, "Starting run");

        let channel = OutputChannel::new();
        let journal = Journal::create(self.env.storage.clone(), &run_id, channel.clone());
        let (tx, rx) = oneshot::channel();
        self.spawn(record, journal, hook, Some(tx));

        match rx.await {
            Ok(Ok(sandbox_id)) => Ok(StartedRun {
                run_id,
                sandbox_id,
                channel,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CoreError::RunAborted(run_id)),
        }
    }

    /// Queue a follow-up for the conversation's live run.
    pub async fn deliver(&self, conversation_id: &str, message: &str) -> CoreResult<Delivery> {
        if message.trim().is_empty() {
            return Err(CoreError::InvalidRequest("message is required".to_string()));
        }
        let seq = self.hooks.deliver(conversation_id, message).await?;
        let run_id = self.latest_run(conversation_id).await?;
        Ok(Delivery { run_id, seq })
    }

    /// Stream a run's output from `start_index`.
    ///
    /// Without `run_id`, the conversation's latest run is used. Finished runs
    /// are served from storage.
    pub async fn attach(
        &self,
        conversation_id: &str,
        run_id: Option<&str>,
        start_index: usize,
    ) -> CoreResult<(String, BoxStream<'static, (usize, Chunk)>)> {
        let run_id = match run_id.filter(|id| !id.is_empty()) {
            Some(id) => id.to_string(),
            None => self
                .latest_run(conversation_id)
                .await?
                .ok_or_else(|| CoreError::RunNotFound(conversation_id.to_string()))?,
        };

        let live = self.runs().get(&run_id).map(|run| {
            (run.conversation_id.clone(), run.channel.clone())
        });
        if let Some((owner, channel)) = live {
            if owner != conversation_id {
                return Err(CoreError::RunNotFound(run_id));
            }
            return Ok((run_id, channel.subscribe(start_index)));
        }

        let record = RunRecord::load(&self.env.storage, &run_id)
            .await?
            .filter(|r| r.conversation_id == conversation_id)
            .ok_or_else(|| CoreError::RunNotFound(run_id.clone()))?;
        let chunks = Journal::load_chunks(&self.env.storage, &record.run_id).await?;
        let channel = OutputChannel::restore(chunks, true);
        Ok((run_id, channel.subscribe(start_index)))
    }

    /// Status of the conversation's latest run.
    pub async fn status(&self, conversation_id: &str) -> CoreResult<RunStatusInfo> {
        let run_id = self
            .latest_run(conversation_id)
            .await?
            .ok_or_else(|| CoreError::RunNotFound(conversation_id.to_string()))?;
        let record = RunRecord::load(&self.env.storage, &run_id)
            .await?
            .ok_or_else(|| CoreError::RunNotFound(run_id.clone()))?;

        let live_len = self.runs().get(&run_id).map(|run| run.channel.len());
        let chunk_count = match live_len {
            Some(len) => len,
            None => Journal::load_chunks(&self.env.storage, &run_id).await?.len(),
        };
        let message_count = RunRecord::load_history(&self.env.storage, &run_id)
            .await?
            .len();

        Ok(RunStatusInfo {
            run_id: record.run_id,
            conversation_id: record.conversation_id,
            status: record.status,
            sandbox_id: record.sandbox_id,
            message_count,
            chunk_count,
            created_at: record.created_at,
            updated_at: record.updated_at,
            error: record.error,
        })
    }

    /// Re-spawn every unfinished run found in storage.
    pub async fn recover(&self) -> CoreResult<usize> {
        let mut recovered = 0;
        for key in self.env.storage.list(&["run"]).await? {
            let Some(run_id) = key.last() else {
                continue;
            };
            if self.runs().contains_key(run_id) {
                continue;
            }
            let Some(record) = RunRecord::load(&self.env.storage, run_id).await? else {
                continue;
            };
            if record.status.is_terminal() {
                continue;
            }

            let hook = match self.hooks.create(&record.conversation_id, run_id) {
                Ok(hook) => hook,
                Err(e) => {
                    warn!(run_id = %run_id, error = %e, "Skipping run recovery");
                    continue;
                }
            };
            let journal = Journal::restore(self.env.storage.clone(), run_id).await?;
            info!(
                run_id = %run_id,
                conversation_id = %record.conversation_id,
                steps = journal.entries().len(),
                "Recovering run"
            );
            self.spawn(record, journal, hook, None);
            recovered += 1;
        }
        Ok(recovered)
    }

    /// Stop every live run task without marking the runs finished.
    pub fn shutdown(&self) {
        let mut runs = self.runs();
        for (run_id, run) in runs.drain() {
            if let Some(abort) = run.abort {
                abort.abort();
                info!(run_id = %run_id, "Stopped run task");
            }
        }
    }

    async fn latest_run(&self, conversation_id: &str) -> CoreResult<Option<String>> {
        Ok(self
            .env
            .storage
            .read(&["conversation", conversation_id])
            .await?)
    }

    fn spawn(
        &self,
        record: RunRecord,
        journal: Journal,
        hook: Hook,
        ready: Option<oneshot::Sender<CoreResult<String>>>,
    ) {
        let run_id = record.run_id.clone();
        let span = info_span!("run", run_id = %run_id, conversation_id = %record.conversation_id);
        self.runs().insert(
            run_id.clone(),
            LiveRun {
                conversation_id: record.conversation_id.clone(),
                channel: journal.channel().clone(),
                abort: None,
            },
        );

        let run = ConversationRun::new(self.env.clone(), record, journal, hook);
        let runs = self.runs.clone();
        let task_run_id = run_id.clone();
        let handle = tokio::spawn(
            async move {
                match run.execute(ready).await {
                    Ok(history) => info!(messages = history.len(), "Run terminated"),
                    Err(e) => error!(error = %e, "Run ended with an error"),
                }
                lock(&runs).remove(&task_run_id);
            }
            .instrument(span),
        );

        if let Some(run) = self.runs().get_mut(&run_id) {
            run.abort = Some(handle.abort_handle());
        }
    }

    fn runs(&self) -> MutexGuard<'_, HashMap<String, LiveRun>> {
        lock(&self.runs)
    }
}

fn lock(runs: &Mutex<HashMap<String, LiveRun>>) -> MutexGuard<'_, HashMap<String, LiveRun>> {
    runs.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system_prompt::system_prompt;
    use crate::AgentMode;
    use futures::StreamExt;
    use repochat_sandbox::SharedSandboxProvider;
    use repochat_storage::{JsonStorage, MemoryStorage, SharedStorage};
    use repochat_test_utils::{RecordingSandboxProvider, ScriptedModel};
    use repochat_tools::ToolRegistry;
    use std::time::Duration;

    fn manager(
        storage: SharedStorage,
        model: &ScriptedModel,
        sandboxes: &RecordingSandboxProvider,
    ) -> RunManager {
        let sandboxes: SharedSandboxProvider = Arc::new(sandboxes.clone());
        RunManager::new(
            RunEnv {
                storage,
                sandboxes,
                model: Arc::new(model.clone()),
                tools: Arc::new(ToolRegistry::workflow()),
                system: system_prompt(AgentMode::Workflow),
            },
            10,
        )
    }

    async fn wait_for(manager: &RunManager, conversation_id: &str, messages: usize) -> RunStatusInfo {
        for _ in 0..400 {
            if let Ok(status) = manager.status(conversation_id).await {
                if status.message_count >= messages && status.status == RunStatus::Suspended {
                    return status;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("run for {conversation_id} never reached {messages} messages");
    }

    fn kinds(chunks: &[Chunk]) -> Vec<&'static str> {
        chunks.iter().map(Chunk::kind).collect()
    }

    #[tokio::test]
    async fn test_clone_then_list_files_then_done() {
        let model = ScriptedModel::new()
            .with_tool_call("toolu_1", "git_clone", r#"{"repoUrl":"https://github.com/a/b"}"#)
            .with_text("Cloned b.")
            .with_tool_call("toolu_2", "list_files", r#"{"path":"b"}"#)
            .with_text("Here are the files.");
        let sandboxes = RecordingSandboxProvider::new();
        let manager = manager(Arc::new(MemoryStorage::new()), &model, &sandboxes);

        let started = manager
            .start("conv-abc1234", vec![UiMessage::user("clone https://github.com/a/b")])
            .await
            .unwrap();
        assert!(started.run_id.starts_with("run_"));
        wait_for(&manager, "conv-abc1234", 4).await;
        assert!(sandboxes.command_was_executed("git clone https://github.com/a/b b"));

        let ack = manager.deliver("conv-abc1234", "list files in b").await.unwrap();
        assert_eq!(ack.run_id.as_deref(), Some(started.run_id.as_str()));
        wait_for(&manager, "conv-abc1234", 8).await;

        let chunks = started.channel.snapshot();
        let marker = chunks
            .iter()
            .position(|c| *c == Chunk::user_message("list files in b"))
            .unwrap();
        assert!(matches!(
            &chunks[marker + 2],
            Chunk::ToolCallStart { tool_name, .. } if tool_name == "list_files"
        ));
        assert_eq!(chunks[marker + 1].kind(), "stream-start");

        manager.deliver("conv-abc1234", "/done").await.unwrap();
        let all: Vec<_> = started.channel.subscribe(0).map(|(_, c)| c).collect().await;
        assert_eq!(all.last(), Some(&Chunk::Finish));

        let status = manager.status("conv-abc1234").await.unwrap();
        assert_eq!(status.status, RunStatus::Terminated);
        let err = manager.deliver("conv-abc1234", "anyone?").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_parallel_start_is_rejected() {
        let model = ScriptedModel::new();
        let sandboxes = RecordingSandboxProvider::new();
        let manager = manager(Arc::new(MemoryStorage::new()), &model, &sandboxes);

        manager
            .start("conv-1", vec![UiMessage::user("hi")])
            .await
            .unwrap();
        let err = manager
            .start("conv-1", vec![UiMessage::user("hi again")])
            .await
            .err()
            .unwrap();
        assert!(matches!(err, CoreError::ConversationActive(_)));
        assert_eq!(sandboxes.created_count(), 1);
    }

    #[tokio::test]
    async fn test_start_validation() {
        let model = ScriptedModel::new();
        let sandboxes = RecordingSandboxProvider::new();
        let manager = manager(Arc::new(MemoryStorage::new()), &model, &sandboxes);

        assert!(matches!(
            manager.start("", vec![UiMessage::user("hi")]).await.err(),
            Some(CoreError::InvalidRequest(_))
        ));
        assert!(matches!(
            manager.start("conv-1", vec![]).await.err(),
            Some(CoreError::InvalidRequest(_))
        ));
        assert!(!manager.hooks().is_claimed("conv-1"));
    }

    #[tokio::test]
    async fn test_sandbox_failure_fails_start() {
        let model = ScriptedModel::new();
        let sandboxes = RecordingSandboxProvider::new().failing_create("no capacity");
        let manager = manager(Arc::new(MemoryStorage::new()), &model, &sandboxes);

        let err = manager
            .start("conv-1", vec![UiMessage::user("hi")])
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("no capacity"));
        assert_eq!(model.call_count(), 0);

        // The failed run released its token.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!manager.hooks().is_claimed("conv-1"));
        let status = manager.status("conv-1").await.unwrap();
        assert_eq!(status.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_attach_from_offset() {
        let model = ScriptedModel::new().with_text("first answer");
        let sandboxes = RecordingSandboxProvider::new();
        let manager = manager(Arc::new(MemoryStorage::new()), &model, &sandboxes);

        let started = manager
            .start("conv-1", vec![UiMessage::user("hi")])
            .await
            .unwrap();
        wait_for(&manager, "conv-1", 2).await;

        let (run_id, mut stream) = manager.attach("conv-1", None, 1).await.unwrap();
        assert_eq!(run_id, started.run_id);
        assert_eq!(stream.next().await, Some((1, Chunk::text("first answer"))));

        assert!(manager
            .attach("conv-other", Some(&started.run_id), 0)
            .await
            .err()
            .unwrap()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_finished_run_is_served_from_storage() {
        let model = ScriptedModel::new();
        let sandboxes = RecordingSandboxProvider::new();
        let manager = manager(Arc::new(MemoryStorage::new()), &model, &sandboxes);

        let started = manager
            .start("conv-1", vec![UiMessage::user("hi")])
            .await
            .unwrap();
        wait_for(&manager, "conv-1", 2).await;
        manager.deliver("conv-1", "/done").await.unwrap();
        started.channel.subscribe(0).count().await;
        for _ in 0..100 {
            if manager.live_runs() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(manager.live_runs(), 0);

        let (_, stream) = manager.attach("conv-1", None, 0).await.unwrap();
        let replayed: Vec<_> = stream.map(|(_, c)| c).collect().await;
        assert_eq!(replayed, started.channel.snapshot());
        assert_eq!(
            kinds(&replayed),
            vec!["stream-start", "text-delta", "finish"]
        );
    }

    #[tokio::test]
    async fn test_recovery_replays_without_repeating_side_effects() {
        let dir = tempfile::TempDir::new().unwrap();
        let storage: SharedStorage = Arc::new(JsonStorage::new(dir.path()));

        let first_model = ScriptedModel::new().with_text("Before the restart.");
        let first_sandboxes = RecordingSandboxProvider::new();
        let before = manager(storage.clone(), &first_model, &first_sandboxes);
        let started = before
            .start("conv-1", vec![UiMessage::user("hello")])
            .await
            .unwrap();
        wait_for(&before, "conv-1", 2).await;
        before.shutdown();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second_model = ScriptedModel::new().with_text("After the restart.");
        let second_sandboxes = RecordingSandboxProvider::new();
        let after = manager(storage, &second_model, &second_sandboxes);
        assert_eq!(after.recover().await.unwrap(), 1);
        wait_for(&after, "conv-1", 2).await;

        // Replayed: no new sandbox and no model call for the first turn.
        assert_eq!(second_sandboxes.created_count(), 0);
        assert_eq!(second_model.call_count(), 0);

        after.deliver("conv-1", "and now?").await.unwrap();
        let status = wait_for(&after, "conv-1", 4).await;
        assert_eq!(status.sandbox_id.as_deref(), Some(started.sandbox_id.as_str()));
        assert_eq!(second_model.call_count(), 1);
        let call = second_model.last_call().unwrap();
        assert_eq!(call.messages[1].text(), "Before the restart.");
        assert_eq!(call.last_user_text().as_deref(), Some("and now?"));

        let (_, stream) = after.attach("conv-1", None, 0).await.unwrap();
        let texts: Vec<_> = stream
            .take_while(|(_, c)| futures::future::ready(*c != Chunk::text("After the restart.")))
            .map(|(_, c)| c)
            .collect()
            .await;
        assert_eq!(
            kinds(&texts),
            vec!["stream-start", "text-delta", "data-user-message", "stream-start"]
        );
    }
}
