//! Host configuration per deployment environment
//!
//! An [`EnvironmentConfig`] lists the host of each environment the app can
//! talk to; the active one is turned into a [`ClientConfigBuilder`].
//!
//! ```toml
//! [production]
//! host = "api.example.com"
//! path = "/api/v1"
//!
//! [development]
//! scheme = "http"
//! host = "localhost"
//! port = 8080
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ClientConfig, ClientConfigBuilder, ConfigError};

/// Deployment environment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    #[default]
    Production,
}

impl Environment {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "staging" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            other => Err(ConfigError::invalid("environment", format!("unknown environment '{other}'"))),
        }
    }
}

/// One environment's host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_scheme")]
    pub scheme: String,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    /// API path, e.g. `/api/v1`
    #[serde(default)]
    pub path: String,
    /// Free-form values (API keys, feature switches) carried along
    #[serde(default)]
    pub info: BTreeMap<String, Value>,
}

fn default_scheme() -> String {
    "https".to_string()
}

impl HostConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            scheme: default_scheme(),
            host: host.into(),
            port: None,
            path: String::new(),
            info: BTreeMap::new(),
        }
    }

    /// `scheme://host[:port]`
    #[must_use]
    pub fn server_path(&self) -> String {
        match self.port {
            Some(port) => format!("{}://{}:{port}", self.scheme, self.host),
            None => format!("{}://{}", self.scheme, self.host),
        }
    }
}

/// Hosts keyed by environment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvironmentConfig {
    hosts: BTreeMap<Environment, HostConfig>,
}

impl EnvironmentConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_host(mut self, environment: Environment, host: HostConfig) -> Self {
        self.hosts.insert(environment, host);
        self
    }

    #[must_use]
    pub fn host(&self, environment: Environment) -> Option<&HostConfig> {
        self.hosts.get(&environment)
    }

    /// Client configuration builder targeting `environment`
    ///
    /// # Errors
    /// Returns `ConfigError::Missing` if no host is configured for it.
    pub fn client_config(&self, environment: Environment) -> Result<ClientConfigBuilder, ConfigError> {
        let host = self
            .host(environment)
            .ok_or_else(|| ConfigError::Missing(format!("host for {environment}")))?;
        tracing::debug!(%environment, host = %host.host, "Resolved environment host");
        Ok(ClientConfig::builder(host.server_path()).api_path(host.path.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parsing() {
        assert_eq!("prod".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!("Staging".parse::<Environment>().unwrap(), Environment::Staging);
        assert!("qa".parse::<Environment>().is_err());
    }

    #[test]
    fn test_host_resolution() {
        let mut dev = HostConfig::new("localhost");
        dev.scheme = "http".into();
        dev.port = Some(8080);
        dev.path = "/api".into();

        let environments = EnvironmentConfig::new()
            .with_host(Environment::Development, dev)
            .with_host(Environment::Production, HostConfig::new("api.example.com"));

        let config = environments.client_config(Environment::Development).unwrap().build().unwrap();
        assert_eq!(config.server_path, "http://localhost:8080");
        assert_eq!(config.api_path, "/api");

        let prod = environments.client_config(Environment::Production).unwrap().build().unwrap();
        assert_eq!(prod.server_path, "https://api.example.com");

        assert!(environments.client_config(Environment::Staging).is_err());
    }

    #[test]
    fn test_environment_config_from_toml() {
        let parsed: EnvironmentConfig = toml::from_str(
            r#"
            [production]
            host = "api.example.com"
            path = "/api/v1"

            [production.info]
            api_key = "abc"
            "#,
        )
        .unwrap();

        let host = parsed.host(Environment::Production).unwrap();
        assert_eq!(host.scheme, "https");
        assert_eq!(host.info.get("api_key"), Some(&Value::from("abc")));
    }
}
