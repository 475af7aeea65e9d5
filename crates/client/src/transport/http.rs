use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as ReqwestClient, Method};
use tracing::debug;

use super::{Transport, TransportRequest, TransportResponse};
use crate::config::{TransportConfig, DEFAULT_RETRY_BACKOFF};
use crate::error::TransportError;
use crate::request::HttpMethod;

/// [`Transport`] backed by reqwest, with retry on connection failures.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: ReqwestClient,
    max_attempts: usize,
    base_backoff: Duration,
}

impl ReqwestTransport {
    /// Start building a new transport.
    pub fn builder() -> ReqwestTransportBuilder {
        ReqwestTransportBuilder::default()
    }

    /// Convenience constructor with default configuration.
    ///
    /// # Errors
    /// Returns `TransportError::Other` if the TLS backend fails to initialize.
    pub fn new() -> Result<Self, TransportError> {
        Self::builder().build()
    }

    fn backoff_delay(&self, retry_number: usize) -> Duration {
        let shift = u32::try_from(retry_number.saturating_sub(1).min(8)).unwrap_or(8);
        let multiplier = 1u32 << shift;
        self.base_backoff.saturating_mul(multiplier)
    }

    async fn sleep_with_backoff(&self, retry_number: usize) {
        let delay = self.backoff_delay(retry_number);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let attempts = self.max_attempts.max(1);
        let method = to_reqwest_method(request.method);

        for attempt in 0..attempts {
            let mut builder = self
                .client
                .request(method.clone(), request.url.clone())
                .timeout(request.timeout);
            for (name, value) in &request.headers {
                builder = builder.header(name, value);
            }
            if let Some(body) = &request.body {
                builder = builder.body(body.clone());
            }

            let url = &request.url;
            debug!(attempt = attempt + 1, %method, %url, "sending HTTP request");

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    debug!(attempt = attempt + 1, %method, %url, %status, "received HTTP response");

                    if status.is_server_error() && attempt + 1 < attempts {
                        self.sleep_with_backoff(attempt + 1).await;
                        continue;
                    }

                    let headers = response
                        .headers()
                        .iter()
                        .filter_map(|(name, value)| {
                            value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string()))
                        })
                        .collect::<BTreeMap<_, _>>();
                    let body = response
                        .bytes()
                        .await
                        .map_err(|err| map_error(&err, request.timeout))?;

                    return Ok(TransportResponse { status: status.as_u16(), headers, body: body.to_vec() });
                }
                Err(err) => {
                    debug!(attempt = attempt + 1, %method, %url, error = %err, "HTTP request failed");

                    if attempt + 1 < attempts && should_retry_error(&err) {
                        self.sleep_with_backoff(attempt + 1).await;
                        continue;
                    }

                    return Err(map_error(&err, request.timeout));
                }
            }
        }

        Err(TransportError::Other("transport exhausted retries without producing a result".into()))
    }
}

/// Builder for [`ReqwestTransport`].
#[derive(Debug)]
pub struct ReqwestTransportBuilder {
    max_attempts: usize,
    base_backoff: Duration,
    user_agent: Option<String>,
    accept_invalid_certs: bool,
}

impl Default for ReqwestTransportBuilder {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_backoff: DEFAULT_RETRY_BACKOFF,
            user_agent: None,
            accept_invalid_certs: false,
        }
    }
}

impl ReqwestTransportBuilder {
    /// Configure the total number of attempts (initial try + retries).
    #[must_use]
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    #[must_use]
    pub const fn base_backoff(mut self, backoff: Duration) -> Self {
        self.base_backoff = backoff;
        self
    }

    /// Apply a loaded `[transport]` retry policy.
    #[must_use]
    pub fn config(self, config: &TransportConfig) -> Self {
        self.max_attempts(config.max_attempts).base_backoff(config.base_backoff)
    }

    #[must_use]
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Test-only helper to allow insecure TLS (e.g., self-signed certs).
    #[cfg(test)]
    #[must_use]
    pub const fn accept_invalid_certs(mut self, enabled: bool) -> Self {
        self.accept_invalid_certs = enabled;
        self
    }

    /// # Errors
    /// Returns `TransportError::Other` if the reqwest client cannot be built.
    pub fn build(self) -> Result<ReqwestTransport, TransportError> {
        let mut builder = ReqwestClient::builder().no_proxy();

        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }

        if self.accept_invalid_certs {
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build().map_err(|err| TransportError::Other(err.to_string()))?;

        Ok(ReqwestTransport {
            client,
            max_attempts: self.max_attempts.max(1),
            base_backoff: self.base_backoff,
        })
    }
}

fn to_reqwest_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Patch => Method::PATCH,
    }
}

fn map_error(err: &reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        return TransportError::Timeout(timeout);
    }
    if err.is_connect() {
        return TransportError::Unreachable(err.to_string());
    }
    if err.is_request() {
        return TransportError::Unreachable(err.to_string());
    }
    TransportError::Other(err.to_string())
}

fn should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_request() || err.is_connect()
}
