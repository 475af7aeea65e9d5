//! Common utility helpers
//!
//! - **[`serde`]**: Serialization helpers for `Duration` configuration fields

pub mod serde;

// Re-export commonly used items for convenience
pub use self::serde::{duration_millis, duration_secs};
