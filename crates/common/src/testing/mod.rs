//! Test doubles shared across crates
//!
//! Enabled with the `test-utils` feature.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::storage::{MemoryStorage, SecureStorage, StorageError, StorageResult};

pub use crate::time::MockClock;

/// Storage whose writes can be switched to fail
///
/// Reads and deletes always go to an inner [`MemoryStorage`]; `set` fails
/// with [`StorageError::AccessFailed`] while failure is enabled. Counts every
/// attempted write.
#[derive(Debug, Clone, Default)]
pub struct FailingStorage {
    inner: MemoryStorage,
    fail_writes: Arc<AtomicBool>,
    write_attempts: Arc<AtomicUsize>,
}

impl FailingStorage {
    /// Storage that rejects every write
    #[must_use]
    pub fn rejecting_writes() -> Self {
        let storage = Self::default();
        storage.set_fail_writes(true);
        storage
    }

    /// Toggle write failures
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of `set` calls observed, successful or not
    #[must_use]
    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }

    /// Underlying store
    #[must_use]
    pub fn inner(&self) -> &MemoryStorage {
        &self.inner
    }
}

#[async_trait]
impl SecureStorage for FailingStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::AccessFailed(format!("write rejected for {key}")));
        }
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.inner.delete(key).await
    }
}
