//! Clock abstraction for credential expiry checks
//!
//! Credential validity is a comparison against wall-clock time, so every
//! component that asks "is this token still good?" goes through a [`Clock`].
//! Production code uses [`SystemClock`]; tests use [`MockClock`] to move time
//! forward without sleeping.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Source of the current wall-clock time
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current UTC time
    fn now(&self) -> DateTime<Utc>;

    /// Milliseconds since the Unix epoch
    fn millis_since_epoch(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// Clock backed by the operating system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Mock clock for deterministic testing
///
/// Starts at the real time of construction (or a fixed instant) and only
/// moves when [`MockClock::advance`] or [`MockClock::set`] is called. Clones
/// share the same underlying time.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use sessionkit_common::time::{Clock, MockClock};
///
/// let clock = MockClock::new();
/// let start = clock.now();
///
/// clock.advance(Duration::from_secs(5));
///
/// assert_eq!((clock.now() - start).num_seconds(), 5);
/// ```
#[derive(Debug, Clone)]
pub struct MockClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl MockClock {
    /// Create a mock clock starting at the current real time
    #[must_use]
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    /// Create a mock clock frozen at `instant`
    #[must_use]
    pub fn at(instant: DateTime<Utc>) -> Self {
        Self { current: Arc::new(Mutex::new(instant)) }
    }

    /// Advance the mock clock by a duration
    pub fn advance(&self, duration: Duration) {
        let Ok(delta) = chrono::Duration::from_std(duration) else {
            return;
        };
        let mut current = self.current.lock();
        *current = current.checked_add_signed(delta).unwrap_or(*current);
    }

    /// Set the mock clock to an absolute instant
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.current.lock() = instant;
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock()
    }
}
