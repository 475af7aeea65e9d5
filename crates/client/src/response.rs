//! Terminal response of a dispatched request
//!
//! A [`Response`] can carry a decoded body and an error at the same time:
//! a 422 with a structured JSON payload has both. `error` is authoritative
//! for success or failure; the body is kept so callers and delegates can
//! inspect the server's explanation.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::error::ApiError;
use crate::request::Request;

/// Decoded response body
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Json(Value),
    Raw(Vec<u8>),
}

impl ResponseBody {
    #[must_use]
    pub const fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Raw(_) => None,
        }
    }

    /// Raw bytes, re-encoding JSON bodies
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Json(value) => value.to_string().into_bytes(),
            Self::Raw(bytes) => bytes.clone(),
        }
    }
}

/// Where the body of a response came from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    #[default]
    Network,
    /// Served by the offline cache after a network failure
    Cache,
}

/// HTTP status class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusClass {
    Informational,
    Success,
    Redirection,
    ClientError,
    ServerError,
}

impl StatusClass {
    /// Class of a status code, `None` outside 100..=599
    #[must_use]
    pub const fn of(status: u16) -> Option<Self> {
        match status {
            100..=199 => Some(Self::Informational),
            200..=299 => Some(Self::Success),
            300..=399 => Some(Self::Redirection),
            400..=499 => Some(Self::ClientError),
            500..=599 => Some(Self::ServerError),
            _ => None,
        }
    }
}

/// Outcome of one dispatched request
#[derive(Debug, Clone)]
pub struct Response {
    /// The request this answers
    pub request: Arc<Request>,
    /// Transport status, `None` when nothing was received
    pub status: Option<u16>,
    pub headers: Option<BTreeMap<String, String>>,
    pub body: Option<ResponseBody>,
    pub error: Option<ApiError>,
    pub source: ResponseSource,
}

impl Response {
    /// A response for a request that never reached the transport
    #[must_use]
    pub fn failure(request: Arc<Request>, error: ApiError) -> Self {
        Self {
            request,
            status: None,
            headers: None,
            body: None,
            error: Some(error),
            source: ResponseSource::Network,
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Whether the server rejected the attached credential (401 or 403)
    #[must_use]
    pub const fn is_auth_rejection(&self) -> bool {
        matches!(self.status, Some(401 | 403))
    }

    #[must_use]
    pub fn status_class(&self) -> Option<StatusClass> {
        self.status.and_then(StatusClass::of)
    }

    #[must_use]
    pub fn is_cache_sourced(&self) -> bool {
        self.source == ResponseSource::Cache
    }

    /// JSON body, if the body decoded as JSON
    #[must_use]
    pub fn json(&self) -> Option<&Value> {
        self.body.as_ref().and_then(ResponseBody::as_json)
    }

    /// Header value by case-insensitive name
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.as_ref().and_then(|headers| {
            headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.as_str())
        })
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for response.
    use serde_json::json;

    use super::*;

    fn request() -> Arc<Request> {
        Arc::new(Request::builder("/items").build().unwrap())
    }

    /// Validates `StatusClass::of` boundaries.
    ///
    /// Assertions:
    /// - Confirms each class boundary maps to its class.
    /// - Ensures out-of-range codes have no class.
    #[test]
    fn test_status_classes() {
        assert_eq!(StatusClass::of(100), Some(StatusClass::Informational));
        assert_eq!(StatusClass::of(204), Some(StatusClass::Success));
        assert_eq!(StatusClass::of(304), Some(StatusClass::Redirection));
        assert_eq!(StatusClass::of(499), Some(StatusClass::ClientError));
        assert_eq!(StatusClass::of(503), Some(StatusClass::ServerError));
        assert_eq!(StatusClass::of(42), None);
        assert_eq!(StatusClass::of(600), None);
    }

    /// Validates the dual body and error channel scenario.
    ///
    /// Assertions:
    /// - Confirms a 422 keeps its JSON body alongside the error.
    /// - Confirms header lookup is case-insensitive.
    #[test]
    fn test_error_response_keeps_body() {
        let response = Response {
            request: request(),
            status: Some(422),
            headers: Some(BTreeMap::from([("Content-Type".into(), "application/json".into())])),
            body: Some(ResponseBody::Json(json!({"message": "invalid"}))),
            error: Some(ApiError::Http { status: 422 }),
            source: ResponseSource::Network,
        };

        assert!(!response.is_success());
        assert!(!response.is_auth_rejection());
        assert_eq!(response.status_class(), Some(StatusClass::ClientError));
        assert_eq!(response.json().and_then(|v| v["message"].as_str()), Some("invalid"));
        assert_eq!(response.header("content-type"), Some("application/json"));
    }

    /// Validates `Response::failure` scenario.
    ///
    /// Assertions:
    /// - Confirms no status, headers or body and a network source.
    #[test]
    fn test_failure_response() {
        let response = Response::failure(request(), ApiError::Cancelled);

        assert_eq!(response.status, None);
        assert!(response.body.is_none());
        assert_eq!(response.error, Some(ApiError::Cancelled));
        assert!(!response.is_cache_sourced());
        assert_eq!(response.status_class(), None);
    }

    /// Validates `is_auth_rejection` for 401 and 403.
    ///
    /// Assertions:
    /// - Confirms both statuses count as rejections.
    #[test]
    fn test_auth_rejection() {
        for status in [401, 403] {
            let mut response = Response::failure(request(), ApiError::Http { status });
            response.status = Some(status);
            assert!(response.is_auth_rejection());
        }
    }

    #[test]
    fn test_body_bytes() {
        assert_eq!(ResponseBody::Json(json!({"a": 1})).to_bytes(), br#"{"a":1}"#.to_vec());
        assert_eq!(ResponseBody::Raw(b"raw".to_vec()).to_bytes(), b"raw".to_vec());
    }
}
