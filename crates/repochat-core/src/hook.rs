//! Resume channel.
//!
//! A run claims its conversation token once and then waits on the returned
//! [`Hook`] at the end of every turn. Follow-up messages for a claimed token
//! go into a persisted FIFO mailbox, so a message delivered while the run is
//! still busy (or while the process restarts) is picked up by the next wait.
//! Mailboxes belong to one run: a later run on the same token starts empty.
//!
//! Reading a message does not remove it. The run records the message in its
//! journal first and then calls [`Hook::consume`], so a crash between the two
//! replays the recorded message instead of reading a new one.

use crate::error::{CoreResult, HookError};
use repochat_storage::{SharedStorage, StorageExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::debug;

const MAILBOX_KEY: &str = "hook";

/// A follow-up message delivered to a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowUp {
    /// Per-token delivery sequence number.
    pub seq: u64,
    pub message: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Mailbox {
    next_seq: u64,
    queue: VecDeque<FollowUp>,
}

struct Claim {
    run_id: String,
    notify: Arc<Notify>,
}

/// Token claims and mailboxes for every conversation.
#[derive(Clone)]
pub struct HookRegistry {
    storage: SharedStorage,
    claims: Arc<Mutex<HashMap<String, Claim>>>,
    mailbox_lock: Arc<tokio::sync::Mutex<()>>,
}

impl HookRegistry {
    pub fn new(storage: SharedStorage) -> Self {
        Self {
            storage,
            claims: Arc::new(Mutex::new(HashMap::new())),
            mailbox_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Claim `token` for the run `run_id`.
    pub fn create(&self, token: &str, run_id: &str) -> CoreResult<Hook> {
        let mut claims = self.claims();
        if claims.contains_key(token) {
            return Err(HookError::AlreadyClaimed(token.to_string()).into());
        }
        let notify = Arc::new(Notify::new());
        claims.insert(
            token.to_string(),
            Claim {
                run_id: run_id.to_string(),
                notify: notify.clone(),
            },
        );
        debug!(conversation_id = %token, run_id, "Claimed resume channel");

        Ok(Hook {
            token: token.to_string(),
            run_id: run_id.to_string(),
            registry: self.clone(),
            notify,
        })
    }

    pub fn is_claimed(&self, token: &str) -> bool {
        self.claims().contains_key(token)
    }

    /// Queue a follow-up for the run holding `token`.
    ///
    /// Returns the message's sequence number.
    pub async fn deliver(&self, token: &str, message: impl Into<String>) -> CoreResult<u64> {
        let Some((run_id, notify)) = self
            .claims()
            .get(token)
            .map(|claim| (claim.run_id.clone(), claim.notify.clone()))
        else {
            return Err(HookError::NotRegistered(token.to_string()).into());
        };

        let message = message.into();
        let seq = {
            let _guard = self.mailbox_lock.lock().await;
            let key = [MAILBOX_KEY, token, run_id.as_str()];
            let mailbox = self
                .storage
                .update(&key, |mailbox: &mut Mailbox| {
                    let seq = mailbox.next_seq;
                    mailbox.next_seq += 1;
                    mailbox.queue.push_back(FollowUp { seq, message });
                })
                .await?;
            mailbox.next_seq - 1
        };

        notify.notify_one();
        debug!(conversation_id = %token, run_id = %run_id, seq, "Delivered follow-up");
        Ok(seq)
    }

    /// Drop any queued messages for the run `run_id` on `token`.
    pub async fn clear(&self, token: &str, run_id: &str) -> CoreResult<()> {
        let _guard = self.mailbox_lock.lock().await;
        self.storage.remove(&[MAILBOX_KEY, token, run_id]).await?;
        Ok(())
    }

    async fn peek(&self, token: &str, run_id: &str) -> CoreResult<Option<FollowUp>> {
        let _guard = self.mailbox_lock.lock().await;
        let mailbox: Option<Mailbox> = self.storage.read(&[MAILBOX_KEY, token, run_id]).await?;
        Ok(mailbox.and_then(|m| m.queue.front().cloned()))
    }

    async fn consume(&self, token: &str, run_id: &str, seq: u64) -> CoreResult<()> {
        let _guard = self.mailbox_lock.lock().await;
        let key = [MAILBOX_KEY, token, run_id];
        let Some(mut mailbox) = self.storage.read::<Mailbox>(&key).await? else {
            return Ok(());
        };
        let before = mailbox.queue.len();
        mailbox.queue.retain(|f| f.seq > seq);
        if mailbox.queue.len() != before {
            self.storage.write(&key, &mailbox).await?;
        }
        Ok(())
    }

    fn release(&self, token: &str, notify: &Arc<Notify>) {
        let mut claims = self.claims();
        if claims
            .get(token)
            .is_some_and(|current| Arc::ptr_eq(&current.notify, notify))
        {
            claims.remove(token);
            debug!(conversation_id = %token, "Released resume channel");
        }
    }

    fn claims(&self) -> MutexGuard<'_, HashMap<String, Claim>> {
        self.claims.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A run's claim on its conversation token. Dropping it releases the token.
pub struct Hook {
    token: String,
    run_id: String,
    registry: HookRegistry,
    notify: Arc<Notify>,
}

impl Hook {
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Wait for the oldest unconsumed follow-up.
    pub async fn next(&self) -> CoreResult<FollowUp> {
        loop {
            if let Some(follow_up) = self.registry.peek(&self.token, &self.run_id).await? {
                return Ok(follow_up);
            }
            self.notify.notified().await;
        }
    }

    /// Remove every queued message up to and including `seq`.
    pub async fn consume(&self, seq: u64) -> CoreResult<()> {
        self.registry.consume(&self.token, &self.run_id, seq).await
    }

    /// Drop every queued message.
    pub async fn clear(&self) -> CoreResult<()> {
        self.registry.clear(&self.token, &self.run_id).await
    }

    /// Give up the token. Later deliveries are rejected.
    pub fn release(&self) {
        self.registry.release(&self.token, &self.notify);
    }
}

impl Drop for Hook {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use repochat_storage::{JsonStorage, MemoryStorage};
    use std::time::Duration;

    fn registry() -> HookRegistry {
        HookRegistry::new(Arc::new(MemoryStorage::new()))
    }

    #[tokio::test]
    async fn test_deliver_without_claim_is_rejected() {
        let hooks = registry();
        let err = hooks.deliver("conv-1", "hello").await.unwrap_err();
        assert!(matches!(err, CoreError::Hook(HookError::NotRegistered(_))));
    }

    #[tokio::test]
    async fn test_single_claim_per_token() {
        let hooks = registry();
        let hook = hooks.create("conv-1", "run_a").unwrap();
        assert!(matches!(
            hooks.create("conv-1", "run_a"),
            Err(CoreError::Hook(HookError::AlreadyClaimed(_)))
        ));
        drop(hook);
        assert!(!hooks.is_claimed("conv-1"));
        assert!(hooks.create("conv-1", "run_a").is_ok());
    }

    #[tokio::test]
    async fn test_queued_messages_are_fifo() {
        let hooks = registry();
        let hook = hooks.create("conv-1", "run_a").unwrap();
        assert_eq!(hooks.deliver("conv-1", "first").await.unwrap(), 0);
        assert_eq!(hooks.deliver("conv-1", "second").await.unwrap(), 1);

        let first = hook.next().await.unwrap();
        assert_eq!(first.message, "first");
        // Not consumed yet: reading again yields the same message.
        assert_eq!(hook.next().await.unwrap(), first);

        hook.consume(first.seq).await.unwrap();
        let second = hook.next().await.unwrap();
        assert_eq!((second.seq, second.message.as_str()), (1, "second"));
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_delivery() {
        let hooks = registry();
        let hook = hooks.create("conv-1", "run_a").unwrap();

        let sender = hooks.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            sender.deliver("conv-1", "later").await.unwrap();
        });

        let follow_up = tokio::time::timeout(Duration::from_secs(2), hook.next())
            .await
            .expect("waiter was never woken")
            .unwrap();
        assert_eq!(follow_up.message, "later");
    }

    #[tokio::test]
    async fn test_mailbox_survives_restart() {
        let dir = tempfile::TempDir::new().unwrap();
        let storage: SharedStorage = Arc::new(JsonStorage::new(dir.path()));

        let before = HookRegistry::new(storage.clone());
        let hook = before.create("conv-1", "run_a").unwrap();
        before.deliver("conv-1", "queued").await.unwrap();
        drop(hook);

        let after = HookRegistry::new(storage);
        let hook = after.create("conv-1", "run_a").unwrap();
        assert_eq!(hook.next().await.unwrap().message, "queued");

        after.clear("conv-1", "run_a").await.unwrap();
        assert_eq!(after.deliver("conv-1", "fresh").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_later_run_does_not_inherit_mailbox() {
        let hooks = registry();
        let first = hooks.create("conv-1", "run_a").unwrap();
        hooks.deliver("conv-1", "meant for run_a").await.unwrap();
        drop(first);

        let second = hooks.create("conv-1", "run_b").unwrap();
        let waited = tokio::time::timeout(Duration::from_millis(50), second.next()).await;
        assert!(waited.is_err(), "run_b read {:?}", waited);

        assert_eq!(hooks.deliver("conv-1", "for run_b").await.unwrap(), 0);
        assert_eq!(second.next().await.unwrap().message, "for run_b");
    }
}
