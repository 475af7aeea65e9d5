//! Transport contract
//!
//! The client hands a fully-formed [`TransportRequest`] to a [`Transport`]
//! and gets back status, headers and raw body, or a [`TransportError`].
//! Connection handling, TLS and the transport's own retry policy live
//! behind this trait.
//!
//! Cancellation is by drop: the client races `send` against the task's
//! cancellation token and drops the future when the task is cancelled.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::error::TransportError;
use crate::request::HttpMethod;

#[cfg(feature = "reqwest-transport")]
pub mod http;

#[cfg(feature = "reqwest-transport")]
pub use http::{ReqwestTransport, ReqwestTransportBuilder};

/// A fully-formed HTTP request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Vec<u8>>,
    pub timeout: Duration,
}

impl TransportRequest {
    /// Header value by case-insensitive name
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// What came back over the wire
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self { status, headers: BTreeMap::new(), body: body.into() }
    }

    /// JSON body with a matching content type
    #[must_use]
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        let mut response = Self::new(status, body.to_string());
        response.headers.insert("content-type".into(), "application/json".into());
        response
    }
}

/// Sends bytes, gets bytes back
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Execute one request
    ///
    /// # Errors
    /// Returns a [`TransportError`] when no HTTP response was received.
    /// Non-2xx statuses are not errors at this layer.
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}
