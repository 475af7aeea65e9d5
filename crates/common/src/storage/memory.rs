//! In-memory secure storage

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::{SecureStorage, StorageResult};

/// Process-local [`SecureStorage`]
///
/// Clones share the same map, so a test can hand one clone to a session and
/// inspect the other.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<DashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a blob exists under `key`
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

#[async_trait]
impl SecureStorage for MemoryStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        debug!(key = %key, bytes = value.len(), "Storing blob in memory storage");
        self.entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for storage::memory.
    use super::*;

    /// Validates `MemoryStorage` set/get/delete behavior.
    ///
    /// Assertions:
    /// - Confirms a stored blob is returned verbatim.
    /// - Ensures deleting twice succeeds and leaves the key absent.
    #[tokio::test]
    async fn test_memory_storage_lifecycle() {
        let storage = MemoryStorage::new();
        storage.set("credential.user", b"payload").await.unwrap();

        assert_eq!(storage.get("credential.user").await.unwrap(), Some(b"payload".to_vec()));
        assert!(storage.contains("credential.user"));

        storage.delete("credential.user").await.unwrap();
        storage.delete("credential.user").await.unwrap();
        assert_eq!(storage.get("credential.user").await.unwrap(), None);
        assert!(storage.is_empty());
    }

    /// Validates that clones share entries.
    ///
    /// Assertions:
    /// - Confirms a write through one clone is visible through the other.
    #[tokio::test]
    async fn test_memory_storage_clones_share_entries() {
        let storage = MemoryStorage::new();
        let observer = storage.clone();

        storage.set("k", b"v").await.unwrap();
        assert_eq!(observer.len(), 1);
    }
}
