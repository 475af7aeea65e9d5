//! Serialization utilities for configuration types
//!
//! Configuration files express timeouts and TTLs as plain integers. These
//! modules plug into `#[serde(with = "...")]` to map them onto
//! [`Duration`].

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

/// Serde serialization result type
type SerializeResult<S> = Result<<S as Serializer>::Ok, <S as Serializer>::Error>;

/// Custom serialization module for Duration as milliseconds
///
/// # Usage
/// ```rust
/// use std::time::Duration;
///
/// use sessionkit_common::duration_millis;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Example {
///     #[serde(with = "duration_millis")]
///     timeout: Duration,
/// }
/// ```
pub mod duration_millis {
    use super::*;

    /// Serialize a Duration as milliseconds (u64)
    pub fn serialize<S>(duration: &Duration, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    /// Deserialize milliseconds (u64) into a Duration
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Custom serialization module for Duration as whole seconds
///
/// Sub-second precision is dropped on serialization.
pub mod duration_secs {
    use super::*;

    /// Serialize a Duration as seconds (u64)
    pub fn serialize<S>(duration: &Duration, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    /// Deserialize seconds (u64) into a Duration
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
