//! OS keychain storage
//!
//! Wraps the platform keychain (macOS Keychain, Windows Credential Manager,
//! Linux Secret Service) through the `keyring` crate. Blob access is
//! synchronous in `keyring`, so each call runs on the blocking pool.
//!
//! ```no_run
//! use sessionkit_common::storage::{KeychainStorage, SecureStorage};
//!
//! # async fn demo() -> sessionkit_common::storage::StorageResult<()> {
//! let storage = KeychainStorage::new("com.example.app");
//! storage.set("session.credential.user", b"{}").await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use keyring::Entry;
use tracing::debug;

use super::{SecureStorage, StorageError, StorageResult};

/// [`SecureStorage`] backed by the platform keychain
#[derive(Debug, Clone)]
pub struct KeychainStorage {
    service_name: String,
}

impl KeychainStorage {
    /// Create a keychain storage for a service identifier
    pub fn new(service_name: impl Into<String>) -> Self {
        Self { service_name: service_name.into() }
    }

    /// Service identifier entries are filed under
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    fn entry(service: &str, key: &str) -> StorageResult<Entry> {
        Entry::new(service, key).map_err(|e| {
            StorageError::AccessFailed(format!("Failed to open keychain entry {key}: {e}"))
        })
    }

    async fn run_blocking<T, F>(&self, key: &str, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(Entry) -> StorageResult<T> + Send + 'static,
    {
        let entry = Self::entry(&self.service_name, key)?;
        tokio::task::spawn_blocking(move || op(entry))
            .await
            .map_err(|e| StorageError::AccessFailed(format!("Keychain task failed: {e}")))?
    }
}

#[async_trait]
impl SecureStorage for KeychainStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        debug!(service = %self.service_name, key = %key, "Retrieving secret from keychain");

        let owned_key = key.to_string();
        self.run_blocking(key, move |entry| match entry.get_secret() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(StorageError::AccessFailed(format!(
                "Failed to retrieve secret for {owned_key}: {e}"
            ))),
        })
        .await
    }

    async fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        debug!(service = %self.service_name, key = %key, "Storing secret in keychain");

        let owned_key = key.to_string();
        let value = value.to_vec();
        self.run_blocking(key, move |entry| {
            entry.set_secret(&value).map_err(|e| {
                StorageError::AccessFailed(format!("Failed to store secret for {owned_key}: {e}"))
            })
        })
        .await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        debug!(service = %self.service_name, key = %key, "Deleting secret from keychain");

        let owned_key = key.to_string();
        self.run_blocking(key, move |entry| match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StorageError::AccessFailed(format!(
                "Failed to delete secret for {owned_key}: {e}"
            ))),
        })
        .await
    }
}
