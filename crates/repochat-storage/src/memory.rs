//! In-memory storage implementation.

use crate::{Storage, StorageError, StorageResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// In-memory storage.
///
/// Data lives only as long as this value and is visible only to the current
/// process. Suitable for tests and for the single-process default of the
/// stateless chat mode.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: RwLock<BTreeMap<String, Value>>,
}

impl MemoryStorage {
    /// Create a new in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Convert a key slice to a storage key string.
    fn key_to_string(key: &[&str]) -> String {
        key.join("/")
    }

    fn poisoned<E: std::fmt::Display>(e: E) -> StorageError {
        StorageError::LockPoisoned(e.to_string())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn read_value(&self, key: &[&str]) -> StorageResult<Option<Value>> {
        let data = self.data.read().map_err(Self::poisoned)?;
        Ok(data.get(&Self::key_to_string(key)).cloned())
    }

    async fn write_value(&self, key: &[&str], value: Value) -> StorageResult<()> {
        if key.is_empty() {
            return Err(StorageError::invalid_key("Key cannot be empty"));
        }
        let mut data = self.data.write().map_err(Self::poisoned)?;
        data.insert(Self::key_to_string(key), value);
        Ok(())
    }

    async fn remove(&self, key: &[&str]) -> StorageResult<()> {
        let mut data = self.data.write().map_err(Self::poisoned)?;
        data.remove(&Self::key_to_string(key));
        Ok(())
    }

    async fn list(&self, prefix: &[&str]) -> StorageResult<Vec<Vec<String>>> {
        let prefix_str = Self::key_to_string(prefix);
        let prefix_with_sep = if prefix_str.is_empty() {
            String::new()
        } else {
            format!("{prefix_str}/")
        };

        let data = self.data.read().map_err(Self::poisoned)?;
        let results = data
            .keys()
            .filter_map(|k| {
                let remainder = k.strip_prefix(&prefix_with_sep)?;
                // Only direct children
                if remainder.is_empty() || remainder.contains('/') {
                    return None;
                }
                Some(k.split('/').map(|s| s.to_string()).collect())
            })
            .collect();

        Ok(results)
    }

    async fn exists(&self, key: &[&str]) -> StorageResult<bool> {
        let data = self.data.read().map_err(Self::poisoned)?;
        Ok(data.contains_key(&Self::key_to_string(key)))
    }
}
