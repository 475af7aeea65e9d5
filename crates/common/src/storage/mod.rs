//! Secure storage contract for persisted credentials
//!
//! Tokens survive process restarts by being written as opaque blobs to a
//! [`SecureStorage`] implementation. The contract is deliberately small:
//! get, set and delete a byte blob by key.
//!
//! - [`MemoryStorage`]: process-local store, used by default and in tests
//! - [`KeychainStorage`] (`platform` feature): OS keychain via `keyring`

use async_trait::async_trait;

pub mod error;
#[cfg(feature = "platform")]
pub mod keychain;
pub mod memory;

pub use error::{StorageError, StorageResult};
#[cfg(feature = "platform")]
pub use keychain::KeychainStorage;
pub use memory::MemoryStorage;

/// Blob storage keyed by string
///
/// Implementations must treat `delete` of a missing key as success.
#[async_trait]
pub trait SecureStorage: Send + Sync + std::fmt::Debug {
    /// Fetch the blob stored under `key`, `None` when absent
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous blob
    async fn set(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Remove the blob stored under `key` (idempotent)
    async fn delete(&self, key: &str) -> StorageResult<()>;
}
