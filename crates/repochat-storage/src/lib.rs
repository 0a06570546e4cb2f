//! Storage layer for repochat.
//!
//! This crate provides a key-value storage abstraction with multiple backends:
//! - JSON file storage (durable, one file per key)
//! - In-memory storage (single process, lost on restart)
//!
//! The [`Storage`] trait works on raw JSON values so it can be shared as a
//! trait object; [`StorageExt`] layers typed reads and writes on top.

pub mod error;
pub mod json;
pub mod memory;

pub use error::{StorageError, StorageResult};
pub use json::{default_storage, JsonStorage};
pub use memory::MemoryStorage;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// A trait for key-value storage backends.
///
/// Keys are represented as path segments, e.g., `["run", "run_01h...", "journal"]`.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read a raw value from storage.
    ///
    /// Returns `None` if the key doesn't exist.
    async fn read_value(&self, key: &[&str]) -> StorageResult<Option<Value>>;

    /// Write a raw value to storage, replacing any previous value.
    async fn write_value(&self, key: &[&str], value: Value) -> StorageResult<()>;

    /// Remove a value from storage. Removing a missing key is not an error.
    async fn remove(&self, key: &[&str]) -> StorageResult<()>;

    /// List all keys directly under a prefix.
    ///
    /// Returns the full key paths for each item.
    async fn list(&self, prefix: &[&str]) -> StorageResult<Vec<Vec<String>>>;

    /// Check if a key exists.
    async fn exists(&self, key: &[&str]) -> StorageResult<bool>;
}

/// A shared storage handle.
pub type SharedStorage = Arc<dyn Storage>;

/// Typed helpers over [`Storage`].
#[async_trait]
pub trait StorageExt: Storage {
    /// Read and deserialize a value.
    async fn read<T: DeserializeOwned + Send>(&self, key: &[&str]) -> StorageResult<Option<T>> {
        match self.read_value(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Serialize and write a value.
    async fn write<T: Serialize + Send + Sync>(&self, key: &[&str], value: &T) -> StorageResult<()> {
        let value = serde_json::to_value(value)?;
        self.write_value(key, value).await
    }

    /// Read-modify-write a value.
    ///
    /// The editor is called with the current value (or default if missing)
    /// and the result is written back.
    async fn update<T, F>(&self, key: &[&str], editor: F) -> StorageResult<T>
    where
        T: DeserializeOwned + Serialize + Send + Sync + Default,
        F: FnOnce(&mut T) + Send,
    {
        let mut value: T = self.read(key).await?.unwrap_or_default();
        editor(&mut value);
        self.write(key, &value).await?;
        Ok(value)
    }
}

impl<S: Storage + ?Sized> StorageExt for S {}
