//! Checkpoint log for conversation runs.
//!
//! Every side effect a run performs (creating the sandbox, calling the model,
//! running a tool, waiting for a follow-up, writing a marker chunk) goes
//! through [`Journal::step`]. The first time through, the step executes and
//! its result is appended to the log. When a run is re-spawned after a
//! restart, steps are matched against the log in order and the recorded
//! results are returned without executing anything.
//!
//! The output channel is persisted together with each checkpoint, along with
//! the channel length at that point. On recovery the channel is cut back to
//! the last recorded length, since the step that was in flight will run again
//! and write its chunks a second time.

use crate::channel::OutputChannel;
use crate::chunk::Chunk;
use crate::error::{CoreError, CoreResult};
use repochat_storage::{SharedStorage, StorageExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use tracing::debug;

/// A completed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub seq: usize,
    pub step: String,
    pub result: Value,
    /// Output channel length when the step completed.
    pub chunk_mark: usize,
}

/// Ordered step results for one run.
pub struct Journal {
    storage: Option<SharedStorage>,
    run_id: String,
    channel: OutputChannel,
    entries: Vec<Checkpoint>,
    cursor: usize,
}

impl Journal {
    /// A journal that keeps nothing beyond this process.
    pub fn ephemeral(channel: OutputChannel) -> Self {
        Self {
            storage: None,
            run_id: String::new(),
            channel,
            entries: Vec::new(),
            cursor: 0,
        }
    }

    /// A fresh, persisted journal for a new run.
    pub fn create(storage: SharedStorage, run_id: &str, channel: OutputChannel) -> Self {
        Self {
            storage: Some(storage),
            run_id: run_id.to_string(),
            channel,
            entries: Vec::new(),
            cursor: 0,
        }
    }

    /// Load a run's journal and rebuild its output channel up to the last
    /// checkpoint.
    pub async fn restore(storage: SharedStorage, run_id: &str) -> CoreResult<Self> {
        let entries: Vec<Checkpoint> = storage
            .read(&["run", run_id, "journal"])
            .await?
            .unwrap_or_default();
        let mut chunks: Vec<Chunk> = storage
            .read(&["run", run_id, "chunks"])
            .await?
            .unwrap_or_default();

        let mark = entries.last().map(|c| c.chunk_mark).unwrap_or(0);
        if chunks.len() > mark {
            debug!(run_id, dropped = chunks.len() - mark, "Truncating unconfirmed chunks");
        }
        chunks.truncate(mark);

        Ok(Self {
            storage: Some(storage),
            run_id: run_id.to_string(),
            channel: OutputChannel::restore(chunks, false),
            entries,
            cursor: 0,
        })
    }

    /// Persisted chunks of a run, as of its last checkpoint.
    pub async fn load_chunks(storage: &SharedStorage, run_id: &str) -> CoreResult<Vec<Chunk>> {
        Ok(storage
            .read(&["run", run_id, "chunks"])
            .await?
            .unwrap_or_default())
    }

    pub fn channel(&self) -> &OutputChannel {
        &self.channel
    }

    pub fn entries(&self) -> &[Checkpoint] {
        &self.entries
    }

    /// Whether recorded steps remain to be replayed.
    pub fn is_replaying(&self) -> bool {
        self.cursor < self.entries.len()
    }

    /// Run `f` once, or return its recorded result on replay.
    pub async fn step<T, F, Fut>(&mut self, name: &str, f: F) -> CoreResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = CoreResult<T>>,
    {
        if let Some(entry) = self.entries.get(self.cursor) {
            if entry.step != name {
                return Err(CoreError::JournalMismatch {
                    seq: self.cursor,
                    expected: entry.step.clone(),
                    found: name.to_string(),
                });
            }
            debug!(run_id = %self.run_id, step = name, seq = self.cursor, "Replayed step");
            self.cursor += 1;
            return Ok(serde_json::from_value(entry.result.clone())?);
        }

        let value = f().await?;
        self.record(name, serde_json::to_value(&value)?).await?;
        Ok(value)
    }

    /// Write a chunk to the channel as a step of its own.
    pub async fn emit(&mut self, chunk: Chunk) -> CoreResult<()> {
        let name = format!("emit:{}", chunk.kind());
        let channel = self.channel.clone();
        self.step(&name, move || async move {
            channel.push(chunk);
            Ok(())
        })
        .await
    }

    async fn record(&mut self, name: &str, result: Value) -> CoreResult<()> {
        let checkpoint = Checkpoint {
            seq: self.entries.len(),
            step: name.to_string(),
            result,
            chunk_mark: self.channel.len(),
        };
        self.entries.push(checkpoint);
        self.cursor = self.entries.len();

        if let Some(storage) = &self.storage {
            let run_id = self.run_id.as_str();
            storage
                .write(&["run", run_id, "chunks"], &self.channel.snapshot())
                .await?;
            storage
                .write(&["run", run_id, "journal"], &self.entries)
                .await?;
        }
        debug!(run_id = %self.run_id, step = name, seq = self.cursor - 1, "Recorded step");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use repochat_storage::{MemoryStorage, Storage, StorageError, StorageResult};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Reads work, writes fail.
    struct ReadOnly(MemoryStorage);

    #[async_trait]
    impl Storage for ReadOnly {
        async fn read_value(&self, key: &[&str]) -> StorageResult<Option<Value>> {
            self.0.read_value(key).await
        }

        async fn write_value(&self, _key: &[&str], _value: Value) -> StorageResult<()> {
            Err(StorageError::invalid_key("read-only"))
        }

        async fn remove(&self, key: &[&str]) -> StorageResult<()> {
            self.0.remove(key).await
        }

        async fn list(&self, prefix: &[&str]) -> StorageResult<Vec<Vec<String>>> {
            self.0.list(prefix).await
        }

        async fn exists(&self, key: &[&str]) -> StorageResult<bool> {
            self.0.exists(key).await
        }
    }

    fn storage() -> SharedStorage {
        Arc::new(MemoryStorage::new())
    }

    #[tokio::test]
    async fn test_replay_skips_execution() {
        let storage = storage();
        let calls = AtomicUsize::new(0);

        let mut journal = Journal::create(storage.clone(), "run_1", OutputChannel::new());
        let id: String = journal
            .step("create-sandbox", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("sbx_1".to_string())
            })
            .await
            .unwrap();
        assert_eq!(id, "sbx_1");

        let mut replay = Journal::restore(storage, "run_1").await.unwrap();
        assert!(replay.is_replaying());
        let id: String = replay
            .step("create-sandbox", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("sbx_2".to_string())
            })
            .await
            .unwrap();
        assert_eq!(id, "sbx_1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!replay.is_replaying());
    }

    #[tokio::test]
    async fn test_replay_mismatch() {
        let storage = storage();
        let mut journal = Journal::create(storage.clone(), "run_1", OutputChannel::new());
        journal
            .step("create-sandbox", || async { Ok(1u32) })
            .await
            .unwrap();

        let mut replay = Journal::restore(storage, "run_1").await.unwrap();
        let err = replay
            .step("model-call", || async { Ok(2u32) })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::JournalMismatch { seq: 0, .. }));
    }

    #[tokio::test]
    async fn test_failed_step_is_not_recorded() {
        let mut journal = Journal::create(storage(), "run_1", OutputChannel::new());
        let result: CoreResult<u32> = journal
            .step("create-sandbox", || async {
                Err(CoreError::InvalidRequest("boom".into()))
            })
            .await;
        assert!(result.is_err());
        assert!(journal.entries().is_empty());
    }

    #[tokio::test]
    async fn test_emit_is_not_repeated_on_replay() {
        let storage = storage();
        let channel = OutputChannel::new();
        let mut journal = Journal::create(storage.clone(), "run_1", channel.clone());
        journal.emit(Chunk::user_message("hi")).await.unwrap();
        assert_eq!(channel.len(), 1);

        let mut replay = Journal::restore(storage, "run_1").await.unwrap();
        assert_eq!(replay.channel().snapshot(), vec![Chunk::user_message("hi")]);
        replay.emit(Chunk::user_message("hi")).await.unwrap();
        assert_eq!(replay.channel().len(), 1);

        replay.emit(Chunk::Finish).await.unwrap();
        assert_eq!(replay.channel().len(), 2);
    }

    #[tokio::test]
    async fn test_restore_truncates_to_last_checkpoint() {
        let storage = storage();
        let channel = OutputChannel::new();
        let mut journal = Journal::create(storage.clone(), "run_1", channel.clone());
        journal
            .step("model-call", || async {
                channel.push(Chunk::text("kept"));
                Ok(())
            })
            .await
            .unwrap();

        // Written by an unfinished step, then persisted by a later write.
        channel.push(Chunk::text("lost"));
        storage
            .write(&["run", "run_1", "chunks"], &channel.snapshot())
            .await
            .unwrap();

        let replay = Journal::restore(storage.clone(), "run_1").await.unwrap();
        assert_eq!(replay.channel().snapshot(), vec![Chunk::text("kept")]);
        assert_eq!(replay.entries()[0].chunk_mark, 1);
        assert_eq!(Journal::load_chunks(&storage, "run_1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_ephemeral_does_not_persist() {
        let storage = storage();
        let mut journal = Journal::ephemeral(OutputChannel::new());
        journal.step("model-call", || async { Ok(1u8) }).await.unwrap();
        assert_eq!(journal.entries().len(), 1);
        assert!(storage.list(&["run"]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_storage_failure_fails_step() {
        let backend = ReadOnly(MemoryStorage::new());
        let mut journal = Journal::create(Arc::new(backend), "run_1", OutputChannel::new());
        let err = journal
            .step("create-sandbox", || async { Ok("sbx_1".to_string()) })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Storage(_)));
    }
}
