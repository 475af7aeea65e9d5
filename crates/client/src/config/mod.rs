//! Client and session configuration
//!
//! Configuration is immutable once built: [`ClientConfig`] and
//! [`SessionConfig`] are produced by builders (or loaded from env / file
//! through [`loader`]), validated once, and then owned by the client or
//! session they configure.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sessionkit_common::{duration_millis, duration_secs};
use thiserror::Error;
use url::Url;

use crate::credential::{CredentialFields, ExpiryStrategy};
use crate::error::ApiError;

pub mod environment;
pub mod loader;

pub use environment::{Environment, EnvironmentConfig, HostConfig};
pub use loader::{load, load_from_env, load_from_file, Settings};

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default pause before the first transport retry
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Default safety margin before credential expiry
pub const DEFAULT_VALID_TOKEN_OFFSET: Duration = Duration::from_secs(60);

/// Default TTL for offline cache entries (24 hours)
///
/// Override via `SESSIONKIT_CACHE_TTL_SECONDS` environment variable
pub const DEFAULT_OFFLINE_CACHE_TTL_SECONDS: u64 = 86_400;

/// Default max capacity for the offline cache
///
/// Override via `SESSIONKIT_CACHE_MAX_CAPACITY` environment variable
pub const DEFAULT_OFFLINE_CACHE_MAX_CAPACITY: u64 = 500;

/// Configuration errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(String),

    #[error("Invalid value for '{field}': {message}")]
    Invalid { field: String, message: String },

    #[error("Failed to read config file: {0}")]
    Io(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::Invalid { field: field.to_string(), message: message.into() }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Cache fallback policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheManagement {
    /// Always hit the network and surface network errors
    #[default]
    Default,
    /// Serve the last cached GET response when the network is unavailable
    Offline,
}

/// Request body encoding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestSerializer {
    #[default]
    Json,
    FormUrlencoded,
}

/// Response body decoding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSerializer {
    #[default]
    Json,
    Raw,
}

/// Where the locale is attached to outgoing requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "name")]
pub enum LocaleAttachment {
    Header(String),
    Parameter(String),
}

/// Locale sent with every request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locale {
    pub value: String,
    pub attachment: LocaleAttachment,
}

impl Locale {
    /// `Accept-Language: <value>`
    pub fn header(value: impl Into<String>) -> Self {
        Self { value: value.into(), attachment: LocaleAttachment::Header("Accept-Language".into()) }
    }

    /// `?<key>=<value>` (or a body field for non-query methods)
    pub fn parameter(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { value: value.into(), attachment: LocaleAttachment::Parameter(key.into()) }
    }
}

/// Request logging verbosity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestLog {
    #[default]
    Off,
    Summary,
    /// Render each request as an equivalent curl command
    Curl,
}

/// Response logging verbosity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseLog {
    #[default]
    Off,
    Summary,
    /// Include the decoded body
    Body,
}

/// Log verbosity for requests and responses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogLevel {
    pub requests: RequestLog,
    pub responses: ResponseLog,
}

/// Offline cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineCacheConfig {
    /// Time-to-live for cached responses
    #[serde(with = "duration_secs")]
    pub ttl: Duration,

    /// Maximum number of cached responses
    pub max_capacity: u64,
}

impl Default for OfflineCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(
                std::env::var("SESSIONKIT_CACHE_TTL_SECONDS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_OFFLINE_CACHE_TTL_SECONDS),
            ),
            max_capacity: std::env::var("SESSIONKIT_CACHE_MAX_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_OFFLINE_CACHE_MAX_CAPACITY),
        }
    }
}

impl OfflineCacheConfig {
    /// Log configuration at startup
    pub fn log_config(&self) {
        tracing::info!(
            ttl_seconds = self.ttl.as_secs(),
            max_capacity = self.max_capacity,
            "Offline cache configuration loaded"
        );
    }
}

/// Retry policy of the HTTP transport (`[transport]` in config files)
///
/// Only connection-level failures are retried; the backoff doubles after
/// each retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Total attempts per call, the first one included
    pub max_attempts: usize,
    /// Pause before the first retry
    #[serde(rename = "base_backoff_ms", with = "duration_millis")]
    pub base_backoff: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self { max_attempts: 1, base_backoff: DEFAULT_RETRY_BACKOFF }
    }
}

/// Transport-facing configuration of a [`Client`](crate::client::Client)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server root, e.g. `https://api.example.com`
    pub server_path: String,
    /// Prefix between server root and request path, e.g. `/api/v1`
    pub api_path: String,
    pub cache_management: CacheManagement,
    pub request_serializer: RequestSerializer,
    pub response_serializer: ResponseSerializer,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Merged into every request; request parameters win on conflict
    pub global_parameters: BTreeMap<String, Value>,
    /// Merged into every request; request headers win on conflict
    pub global_headers: BTreeMap<String, String>,
    pub locale: Option<Locale>,
    pub log_level: LogLevel,
    pub offline_cache: OfflineCacheConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_path: String::new(),
            api_path: String::new(),
            cache_management: CacheManagement::default(),
            request_serializer: RequestSerializer::default(),
            response_serializer: ResponseSerializer::default(),
            timeout: DEFAULT_TIMEOUT,
            global_parameters: BTreeMap::new(),
            global_headers: BTreeMap::new(),
            locale: None,
            log_level: LogLevel::default(),
            offline_cache: OfflineCacheConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Start building a configuration for a server root
    pub fn builder(server_path: impl Into<String>) -> ClientConfigBuilder {
        ClientConfigBuilder {
            config: Self { server_path: server_path.into(), ..Self::default() },
        }
    }

    /// Check invariants that serde cannot express
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` for an unparseable server path, an
    /// API path not starting with `/`, or a zero timeout.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_path.is_empty() {
            return Err(ConfigError::Missing("server_path".into()));
        }
        let url = Url::parse(&self.server_path)
            .map_err(|e| ConfigError::invalid("server_path", e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(ConfigError::invalid("server_path", "expected an http(s) URL with a host"));
        }
        validate_path("api_path", &self.api_path, true)?;
        if self.timeout.is_zero() {
            return Err(ConfigError::invalid("timeout", "must be positive"));
        }
        Ok(())
    }

    /// Absolute URL for `path` under `api_path` (or the override)
    ///
    /// # Errors
    /// Returns `InvalidRequest` if the joined URL does not parse.
    pub fn endpoint(&self, api_path: Option<&str>, path: &str) -> Result<Url, ApiError> {
        let api_path = api_path.unwrap_or(&self.api_path);
        let mut joined = String::with_capacity(
            self.server_path.len() + api_path.len() + path.len() + 2,
        );
        joined.push_str(self.server_path.trim_end_matches('/'));
        let api_path = api_path.trim_end_matches('/');
        if !api_path.is_empty() {
            if !api_path.starts_with('/') {
                joined.push('/');
            }
            joined.push_str(api_path);
        }
        if !path.starts_with('/') {
            joined.push('/');
        }
        joined.push_str(path);

        Url::parse(&joined).map_err(|e| ApiError::InvalidRequest(format!("{joined}: {e}")))
    }
}

fn validate_path(field: &str, value: &str, allow_empty: bool) -> Result<(), ConfigError> {
    if value.is_empty() {
        return if allow_empty { Ok(()) } else { Err(ConfigError::Missing(field.to_string())) };
    }
    if !value.starts_with('/') {
        return Err(ConfigError::invalid(field, "must be prefixed with '/'"));
    }
    Ok(())
}

/// Builder for [`ClientConfig`]
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    #[must_use]
    pub fn api_path(mut self, api_path: impl Into<String>) -> Self {
        self.config.api_path = api_path.into();
        self
    }

    #[must_use]
    pub const fn cache_management(mut self, policy: CacheManagement) -> Self {
        self.config.cache_management = policy;
        self
    }

    #[must_use]
    pub const fn request_serializer(mut self, serializer: RequestSerializer) -> Self {
        self.config.request_serializer = serializer;
        self
    }

    #[must_use]
    pub const fn response_serializer(mut self, serializer: ResponseSerializer) -> Self {
        self.config.response_serializer = serializer;
        self
    }

    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    #[must_use]
    pub fn global_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.global_parameters.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn global_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.global_headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn locale(mut self, locale: Locale) -> Self {
        self.config.locale = Some(locale);
        self
    }

    #[must_use]
    pub const fn log_level(mut self, log_level: LogLevel) -> Self {
        self.config.log_level = log_level;
        self
    }

    #[must_use]
    pub fn offline_cache(mut self, offline_cache: OfflineCacheConfig) -> Self {
        self.config.offline_cache = offline_cache;
        self
    }

    /// Validate and produce the configuration
    ///
    /// # Errors
    /// See [`ClientConfig::validate`].
    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// OAuth configuration of a [`Session`](crate::session::Session)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Token endpoint path from the server root, e.g. `/api/v1/oauth/token`
    pub api_oauth_path: String,
    pub client_id: String,
    pub client_secret: String,
    /// Use an app credential alongside the user credential
    pub use_app_token: bool,
    /// Credentials expiring within this margin are refreshed first
    #[serde(with = "duration_secs")]
    pub valid_token_offset: Duration,
    pub credential_fields: CredentialFields,
    #[serde(skip)]
    pub expiry_strategy: ExpiryStrategy,
    /// Key prefix for persisted credentials
    pub storage_namespace: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_oauth_path: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            use_app_token: true,
            valid_token_offset: DEFAULT_VALID_TOKEN_OFFSET,
            credential_fields: CredentialFields::default(),
            expiry_strategy: ExpiryStrategy::default(),
            storage_namespace: "sessionkit".to_string(),
        }
    }
}

impl SessionConfig {
    pub fn builder(
        api_oauth_path: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> SessionConfigBuilder {
        SessionConfigBuilder {
            config: Self {
                api_oauth_path: api_oauth_path.into(),
                client_id: client_id.into(),
                client_secret: client_secret.into(),
                ..Self::default()
            },
        }
    }

    /// # Errors
    /// Returns `ConfigError` for a missing client id or token path, or a
    /// token path not starting with `/`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_path("api_oauth_path", &self.api_oauth_path, false)?;
        if self.client_id.is_empty() {
            return Err(ConfigError::Missing("client_id".into()));
        }
        if self.credential_fields.access_token.is_empty() {
            return Err(ConfigError::invalid("credential_fields.access_token", "must not be empty"));
        }
        Ok(())
    }

    /// Storage key for a slot's persisted credential
    #[must_use]
    pub fn storage_key(&self, slot: &str) -> String {
        format!("{}.credential.{slot}", self.storage_namespace)
    }
}

/// Builder for [`SessionConfig`]
#[derive(Debug, Clone)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    #[must_use]
    pub const fn use_app_token(mut self, enabled: bool) -> Self {
        self.config.use_app_token = enabled;
        self
    }

    #[must_use]
    pub const fn valid_token_offset(mut self, offset: Duration) -> Self {
        self.config.valid_token_offset = offset;
        self
    }

    #[must_use]
    pub fn credential_fields(mut self, fields: CredentialFields) -> Self {
        self.config.credential_fields = fields;
        self
    }

    #[must_use]
    pub fn expiry_strategy(mut self, strategy: ExpiryStrategy) -> Self {
        self.config.expiry_strategy = strategy;
        self
    }

    #[must_use]
    pub fn storage_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.storage_namespace = namespace.into();
        self
    }

    /// # Errors
    /// See [`SessionConfig::validate`].
    pub fn build(self) -> Result<SessionConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
