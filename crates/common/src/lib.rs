//! Shared building blocks for the SessionKit crates.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: error classification and serde helpers
//! - `runtime`: clocks and the secure storage contract with an in-memory store
//! - `platform`: OS keychain storage backed by `keyring`
//! - `test-utils`: failure-injecting storage for tests

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod error;
#[cfg(feature = "foundation")]
pub mod utils;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod storage;
#[cfg(feature = "runtime")]
pub mod time;

// Testing utilities
// ---------------------------------------------------------------
#[cfg(feature = "test-utils")]
pub mod testing;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "foundation")]
pub use error::{ErrorClassification, ErrorSeverity};
#[cfg(feature = "platform")]
pub use storage::KeychainStorage;
#[cfg(feature = "runtime")]
pub use storage::{MemoryStorage, SecureStorage, StorageError, StorageResult};
#[cfg(feature = "runtime")]
pub use time::{Clock, MockClock, SystemClock};
#[cfg(feature = "foundation")]
pub use utils::serde::{duration_millis, duration_secs};
