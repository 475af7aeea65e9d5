//! Storage error types

use std::time::Duration;

use thiserror::Error;

use crate::error::{ErrorClassification, ErrorSeverity};

/// Storage error type
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// Nothing is stored under the key
    #[error("No entry stored for key '{0}'")]
    NotFound(String),

    /// The backing store refused or failed the operation
    #[error("Storage access failed: {0}")]
    AccessFailed(String),

    /// A stored blob could not be encoded or decoded
    #[error("Storage serialization error: {0}")]
    Serialization(String),
}

/// Storage result type
pub type StorageResult<T> = Result<T, StorageError>;

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl ErrorClassification for StorageError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::AccessFailed(_))
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::NotFound(_) => ErrorSeverity::Info,
            Self::AccessFailed(_) => ErrorSeverity::Warning,
            Self::Serialization(_) => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Validates `StorageError` classification for each variant.
    ///
    /// Assertions:
    /// - Ensures only `AccessFailed` is retryable.
    /// - Confirms `NotFound` is informational.
    #[test]
    fn test_storage_error_classification() {
        assert!(StorageError::AccessFailed("locked".into()).is_retryable());
        assert!(!StorageError::NotFound("k".into()).is_retryable());
        assert!(!StorageError::Serialization("bad".into()).is_retryable());
        assert_eq!(StorageError::NotFound("k".into()).severity(), ErrorSeverity::Info);
        assert!(!StorageError::AccessFailed("x".into()).is_critical());
    }

    /// Validates `From<serde_json::Error>` conversion.
    ///
    /// Assertions:
    /// - Ensures JSON failures map to `Serialization`.
    #[test]
    fn test_from_serde_json_error() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(StorageError::from(err), StorageError::Serialization(_)));
    }
}
