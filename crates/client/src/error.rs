//! Request pipeline error types
//!
//! [`ApiError`] is what a caller finds in [`Response::error`]. It carries the
//! full failure taxonomy of the pipeline: transport failures, HTTP status
//! failures, credential and session failures, and cancellation.
//!
//! Every variant is `Clone` so one failed token exchange can be delivered
//! identically to every request that was waiting on it.
//!
//! [`Response::error`]: crate::response::Response::error

use std::time::Duration;

use sessionkit_common::error::{ErrorClassification, ErrorSeverity};
use thiserror::Error;

/// Failures reported by a [`Transport`](crate::transport::Transport)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Not connected to the network")]
    Offline,

    #[error("Host unreachable: {0}")]
    Unreachable(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport failure: {0}")]
    Other(String),
}

impl TransportError {
    /// Connectivity-class failure, eligible for the offline cache fallback
    #[must_use]
    pub const fn is_network(&self) -> bool {
        !matches!(self, Self::Other(_))
    }
}

/// Categories of API errors for retry and logging decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiErrorCategory {
    /// Transport-level failure (offline, unreachable, timeout)
    Network,
    /// 4xx other than authorization rejections
    Client,
    /// 5xx responses
    Server,
    /// Rejected or missing credentials
    Authentication,
    /// The session was logged out while the request was pending
    Session,
    /// The caller cancelled the request
    Cancelled,
    /// Bad configuration or an unbuildable request
    Config,
    /// Body encoding or decoding failed
    Serialization,
    /// Produced by a client delegate from an error payload
    Application,
}

/// API operation errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(#[from] TransportError),

    #[error("HTTP error: status {status}")]
    Http { status: u16 },

    #[error("Malformed credential: {0}")]
    MalformedCredential(String),

    #[error("Session authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    #[error("Session logged out")]
    LoggedOut,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("API error {code}: {message}")]
    Custom { code: i64, message: String },
}

impl ApiError {
    /// Shorthand for [`ApiError::AuthenticationFailed`]
    pub fn authentication_failed(reason: impl Into<String>) -> Self {
        Self::AuthenticationFailed { reason: reason.into() }
    }

    /// Get the error category for this error
    #[must_use]
    pub const fn category(&self) -> ApiErrorCategory {
        match self {
            Self::Network(_) => ApiErrorCategory::Network,
            Self::Http { status: 401 | 403 }
            | Self::MalformedCredential(_)
            | Self::AuthenticationFailed { .. } => ApiErrorCategory::Authentication,
            Self::Http { status } if *status >= 500 => ApiErrorCategory::Server,
            Self::Http { .. } => ApiErrorCategory::Client,
            Self::LoggedOut => ApiErrorCategory::Session,
            Self::Cancelled => ApiErrorCategory::Cancelled,
            Self::Config(_) | Self::InvalidRequest(_) => ApiErrorCategory::Config,
            Self::Serialization(_) => ApiErrorCategory::Serialization,
            Self::Custom { .. } => ApiErrorCategory::Application,
        }
    }

    /// Whether the error means the caller has no usable session
    ///
    /// True for failed exchanges, malformed token bodies and logout races.
    #[must_use]
    pub const fn is_session_failure(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed { .. } | Self::MalformedCredential(_) | Self::LoggedOut
        )
    }

    /// HTTP status carried by the error, if any
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status } => Some(*status),
            _ => None,
        }
    }
}

impl ErrorClassification for ApiError {
    fn is_retryable(&self) -> bool {
        matches!(self.category(), ApiErrorCategory::Network | ApiErrorCategory::Server)
    }

    fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ApiErrorCategory::Cancelled | ApiErrorCategory::Session => ErrorSeverity::Info,
            ApiErrorCategory::Network
            | ApiErrorCategory::Client
            | ApiErrorCategory::Authentication
            | ApiErrorCategory::Application => ErrorSeverity::Warning,
            ApiErrorCategory::Server
            | ApiErrorCategory::Config
            | ApiErrorCategory::Serialization => ErrorSeverity::Error,
        }
    }

    fn is_critical(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        match self.category() {
            ApiErrorCategory::Network => Some(Duration::from_secs(5)),
            ApiErrorCategory::Server => Some(Duration::from_secs(10)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(
            ApiError::Network(TransportError::Offline).category(),
            ApiErrorCategory::Network
        );
        assert_eq!(ApiError::Http { status: 401 }.category(), ApiErrorCategory::Authentication);
        assert_eq!(ApiError::Http { status: 403 }.category(), ApiErrorCategory::Authentication);
        assert_eq!(ApiError::Http { status: 404 }.category(), ApiErrorCategory::Client);
        assert_eq!(ApiError::Http { status: 503 }.category(), ApiErrorCategory::Server);
        assert_eq!(ApiError::LoggedOut.category(), ApiErrorCategory::Session);
        assert_eq!(
            ApiError::authentication_failed("invalid_grant").category(),
            ApiErrorCategory::Authentication
        );
    }

    #[test]
    fn test_should_retry() {
        assert!(ApiError::Network(TransportError::Timeout(Duration::from_secs(1))).is_retryable());
        assert!(ApiError::Http { status: 500 }.is_retryable());
        assert!(!ApiError::Http { status: 400 }.is_retryable());
        assert!(!ApiError::Http { status: 401 }.is_retryable());
        assert!(!ApiError::Cancelled.is_retryable());
        assert!(!ApiError::LoggedOut.is_retryable());
    }

    #[test]
    fn test_retry_delays() {
        assert_eq!(
            ApiError::Network(TransportError::Offline).retry_after(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(ApiError::Http { status: 502 }.retry_after(), Some(Duration::from_secs(10)));
        assert_eq!(ApiError::Http { status: 422 }.retry_after(), None);
    }

    #[test]
    fn test_transport_error_network_class() {
        assert!(TransportError::Offline.is_network());
        assert!(TransportError::Unreachable("api.example.com".into()).is_network());
        assert!(TransportError::Timeout(Duration::from_secs(30)).is_network());
        assert!(!TransportError::Other("tls handshake".into()).is_network());
    }

    #[test]
    fn test_session_failures() {
        assert!(ApiError::LoggedOut.is_session_failure());
        assert!(ApiError::MalformedCredential("missing access_token".into()).is_session_failure());
        assert!(!ApiError::Http { status: 401 }.is_session_failure());
        assert_eq!(ApiError::Http { status: 418 }.status(), Some(418));
    }
}
