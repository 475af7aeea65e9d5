//! Error classification shared by the SessionKit crates
//!
//! Each crate owns its error enums (built with `thiserror`). What they share
//! is a uniform way of asking an error how it should be handled:
//!
//! 1. **`ErrorClassification` trait**: retryability, severity, criticality and
//!    an optional retry delay
//! 2. **`ErrorSeverity` enum**: a single severity scale used for logging
//!    decisions
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use sessionkit_common::error::{ErrorClassification, ErrorSeverity};
//!
//! #[derive(Debug)]
//! enum FetchError {
//!     Timeout,
//!     Rejected,
//! }
//!
//! impl ErrorClassification for FetchError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, Self::Timeout)
//!     }
//!
//!     fn severity(&self) -> ErrorSeverity {
//!         match self {
//!             Self::Timeout => ErrorSeverity::Warning,
//!             Self::Rejected => ErrorSeverity::Error,
//!         }
//!     }
//!
//!     fn is_critical(&self) -> bool {
//!         self.severity() == ErrorSeverity::Critical
//!     }
//!
//!     fn retry_after(&self) -> Option<Duration> {
//!         self.is_retryable().then(|| Duration::from_secs(1))
//!     }
//! }
//!
//! assert!(FetchError::Timeout.is_retryable());
//! assert_eq!(FetchError::Rejected.severity(), ErrorSeverity::Error);
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Error classification trait for consistent error handling across crates
///
/// Implemented by every public error enum so callers can make retry and
/// logging decisions without matching on crate-specific variants.
pub trait ErrorClassification {
    /// Check if this error is retryable
    ///
    /// Retryable errors are transient issues that may succeed if attempted
    /// again, such as:
    /// - Network timeouts
    /// - Unreachable hosts
    /// - Server-side (5xx) failures
    fn is_retryable(&self) -> bool;

    /// Get the error severity level
    ///
    /// Used for logging decisions.
    fn severity(&self) -> ErrorSeverity;

    /// Check if this is a critical error requiring immediate attention
    fn is_critical(&self) -> bool;

    /// Get the suggested retry delay if applicable
    ///
    /// Returns `Some(Duration)` for retryable errors when a specific retry
    /// delay is recommended, or `None` if no specific delay is suggested.
    fn retry_after(&self) -> Option<Duration>;
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Warning, should be monitored but not critical
    Warning,
    /// Error, requires attention and action
    Error,
    /// Critical, immediate action required
    Critical,
}

impl ErrorSeverity {
    /// Short uppercase label used in log lines
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARN",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
