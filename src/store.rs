//! Durable key -> JSON document storage.
//!
//! [`KeyValueStore`] serializes values to JSON text and hands them to a
//! [`StorageBackend`]. Reads fail soft: a missing or undecodable value comes
//! back as `None` and is logged. Writes report success as a boolean, or as a
//! [`StorageError`] through the `try_` variants when the caller wants the
//! diagnostic.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::cell::RefCell;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::database::DatabaseError;

/// Storage keys used by the planner
pub mod keys {
    pub const TASKS: &str = "weekly-planner-tasks";
    pub const IDEAS: &str = "weekly-planner-ideas";
}

/// Browser local storage allows about 5 MiB per origin
pub const DEFAULT_QUOTA_BYTES: u64 = 5 * 1024 * 1024;

const PROBE_KEY: &str = "__planner_storage_test__";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Storage quota exceeded: writing '{key}' would use {required} of {quota} bytes")]
    QuotaExceeded {
        key: String,
        required: u64,
        quota: u64,
    },
    #[error("Failed to serialize '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to deserialize '{key}': {source}")]
    Deserialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Raw text storage underneath a [`KeyValueStore`]
pub trait StorageBackend {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError>;
    /// Write every entry or none of them
    fn write(&self, entries: &[(String, String)]) -> Result<(), StorageError>;
    fn delete(&self, key: &str) -> Result<(), StorageError>;
    fn delete_all(&self) -> Result<(), StorageError>;
    /// Sum of key and value byte lengths across the whole backend
    fn total_size(&self) -> Result<u64, StorageError>;
}

/// Volatile backend, for tests and throwaway sessions
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: RefCell<BTreeMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn write(&self, entries: &[(String, String)]) -> Result<(), StorageError> {
        let mut map = self.entries.borrow_mut();
        for (key, value) in entries {
            map.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.entries.borrow_mut().remove(key);
        Ok(())
    }

    fn delete_all(&self) -> Result<(), StorageError> {
        self.entries.borrow_mut().clear();
        Ok(())
    }

    fn total_size(&self) -> Result<u64, StorageError> {
        Ok(self
            .entries
            .borrow()
            .iter()
            .map(|(k, v)| (k.len() + v.len()) as u64)
            .sum())
    }
}

/// Serialized values waiting to be written together
#[derive(Debug, Default)]
pub struct WriteBatch {
    entries: Vec<(String, String)>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<(), StorageError> {
        let text = serde_json::to_string(value).map_err(|source| StorageError::Serialize {
            key: key.to_string(),
            source,
        })?;
        self.entries.push((key.to_string(), text));
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Current usage against the configured quota
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageUsage {
    pub bytes: u64,
    pub quota: Option<u64>,
    /// Above 80% of the quota
    pub near_limit: bool,
}

pub struct KeyValueStore {
    backend: Box<dyn StorageBackend>,
    quota: Option<u64>,
}

impl KeyValueStore {
    pub fn new(backend: impl StorageBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            quota: None,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    /// Limit the total stored bytes; `None` removes the limit
    pub fn with_quota(mut self, quota: Option<u64>) -> Self {
        self.quota = quota;
        self
    }

    pub fn quota(&self) -> Option<u64> {
        self.quota
    }

    /// Read and decode a value. `Ok(None)` if the key was never set.
    pub fn try_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let Some(text) = self.backend.read(key)? else {
            return Ok(None);
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| StorageError::Deserialize {
                key: key.to_string(),
                source,
            })
    }

    /// Read and decode a value, treating any failure as absent
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.try_get(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "error reading stored value");
                None
            }
        }
    }

    pub fn try_set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let mut batch = WriteBatch::new();
        batch.put(key, value)?;
        self.try_write_batch(batch)
    }

    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        match self.try_set(key, value) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(key, error = %e, "error writing stored value");
                false
            }
        }
    }

    /// Write every entry of the batch in one backend transaction
    pub fn try_write_batch(&self, batch: WriteBatch) -> Result<(), StorageError> {
        if batch.is_empty() {
            return Ok(());
        }
        if let Some(quota) = self.quota {
            self.check_quota(&batch.entries, quota)?;
        }
        self.backend.write(&batch.entries)
    }

    pub fn write_batch(&self, batch: WriteBatch) -> bool {
        match self.try_write_batch(batch) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "error writing batch");
                false
            }
        }
    }

    fn check_quota(&self, entries: &[(String, String)], quota: u64) -> Result<(), StorageError> {
        let mut required = self.backend.total_size()?;
        for (key, value) in entries {
            if let Some(old) = self.backend.read(key)? {
                required = required.saturating_sub((key.len() + old.len()) as u64);
            }
            required += (key.len() + value.len()) as u64;
        }
        if required > quota {
            let key = entries
                .iter()
                .map(|(k, _)| k.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(StorageError::QuotaExceeded {
                key,
                required,
                quota,
            });
        }
        Ok(())
    }

    pub fn try_remove(&self, key: &str) -> Result<(), StorageError> {
        self.backend.delete(key)
    }

    pub fn remove(&self, key: &str) -> bool {
        match self.try_remove(key) {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(key, error = %e, "error removing stored value");
                false
            }
        }
    }

    /// Remove every key in the backend, not only the planner's
    pub fn clear(&self) -> bool {
        match self.backend.delete_all() {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "error clearing storage");
                false
            }
        }
    }

    /// Probe the backend by writing and removing a sentinel key
    pub fn is_available(&self) -> bool {
        let probe = [(PROBE_KEY.to_string(), PROBE_KEY.to_string())];
        self.backend.write(&probe).is_ok() && self.backend.delete(PROBE_KEY).is_ok()
    }

    /// Approximate bytes used by every key in the backend
    pub fn size_bytes(&self) -> u64 {
        self.backend.total_size().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "error measuring storage size");
            0
        })
    }

    pub fn usage(&self) -> StorageUsage {
        let bytes = self.size_bytes();
        StorageUsage {
            bytes,
            quota: self.quota,
            near_limit: self.quota.is_some_and(|q| bytes.saturating_mul(5) > q.saturating_mul(4)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    #[test]
    fn get_returns_none_for_missing_and_undecodable() {
        let store = KeyValueStore::in_memory();
        assert_eq!(store.get::<Vec<u32>>("missing"), None);

        assert!(store.set("numbers", "not a list"));
        assert_eq!(store.get::<Vec<u32>>("numbers"), None);
        assert!(matches!(
            store.try_get::<Vec<u32>>("numbers"),
            Err(StorageError::Deserialize { .. })
        ));
    }

    #[test]
    fn set_then_get_round_trips() {
        let store = KeyValueStore::in_memory();
        assert!(store.set("numbers", &vec![1, 2, 3]));
        assert_eq!(store.get::<Vec<u32>>("numbers"), Some(vec![1, 2, 3]));
    }

    #[test]
    fn quota_rejects_oversized_writes_without_touching_existing_value() {
        let store = KeyValueStore::in_memory().with_quota(Some(32));
        assert!(store.set("k", "small"));
        let big = "x".repeat(64);
        assert!(!store.set("k", &big));
        assert!(matches!(
            store.try_set("k", &big),
            Err(StorageError::QuotaExceeded { quota: 32, .. })
        ));
        assert_eq!(store.get::<String>("k").as_deref(), Some("small"));
    }

    #[test]
    fn quota_accounts_for_replaced_value() {
        // "k" + "\"aaaaaaaa\"" is 11 bytes; replacing it with the same size must fit
        let store = KeyValueStore::in_memory().with_quota(Some(11));
        assert!(store.set("k", "aaaaaaaa"));
        assert!(store.set("k", "bbbbbbbb"));
    }

    #[test]
    fn batch_writes_are_all_or_nothing_under_quota() {
        let store = KeyValueStore::in_memory().with_quota(Some(20));
        let mut batch = WriteBatch::new();
        batch.put("a", "1234").unwrap();
        batch.put("b", "1234567890123").unwrap();
        assert!(!store.write_batch(batch));
        assert_eq!(store.get::<String>("a"), None);
        assert_eq!(store.get::<String>("b"), None);
    }

    #[test]
    fn remove_and_clear() {
        let store = KeyValueStore::in_memory();
        store.set("a", &1);
        store.set("b", &2);
        assert!(store.remove("a"));
        assert!(store.remove("a"));
        assert_eq!(store.get::<u32>("a"), None);
        assert!(store.clear());
        assert_eq!(store.size_bytes(), 0);
    }

    #[test]
    fn availability_probe_leaves_nothing_behind() {
        let store = KeyValueStore::new(Database::in_memory().unwrap());
        assert!(store.is_available());
        assert_eq!(store.size_bytes(), 0);
    }

    #[test]
    fn usage_flags_near_limit() {
        let store = KeyValueStore::in_memory().with_quota(Some(9));
        store.set("k", &1234567);
        let usage = store.usage();
        assert_eq!(usage.bytes, 8);
        assert!(usage.near_limit);

        let unlimited = KeyValueStore::in_memory();
        assert!(!unlimited.usage().near_limit);
    }
}
