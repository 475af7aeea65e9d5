//! Configuration loader
//!
//! Loads client and session settings from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If `SESSIONKIT_SERVER_PATH` is missing, falls back to a config file
//! 3. Probes a few well-known paths for config files
//! 4. Supports JSON and TOML formats
//!
//! ## Environment Variables
//! - `SESSIONKIT_SERVER_PATH`: Server root URL (required)
//! - `SESSIONKIT_API_PATH`: API path prefix
//! - `SESSIONKIT_CACHE_MANAGEMENT`: `default` or `offline`
//! - `SESSIONKIT_TIMEOUT_SECONDS`: Request timeout in seconds
//! - `SESSIONKIT_OAUTH_PATH`: Token endpoint path (enables the session block)
//! - `SESSIONKIT_CLIENT_ID` / `SESSIONKIT_CLIENT_SECRET`: OAuth client
//! - `SESSIONKIT_USE_APP_TOKEN`: Whether to use app tokens (true/false)
//! - `SESSIONKIT_VALID_TOKEN_OFFSET_SECONDS`: Pre-expiry refresh margin
//! - `SESSIONKIT_MAX_ATTEMPTS` / `SESSIONKIT_RETRY_BACKOFF_MS`: Transport retries
//!
//! ## File Layout
//! ```toml
//! [client]
//! server_path = "https://api.example.com"
//! api_path = "/api/v1"
//!
//! [session]
//! api_oauth_path = "/oauth/token"
//! client_id = "ios"
//! client_secret = "secret"
//!
//! [transport]
//! max_attempts = 3
//! base_backoff_ms = 250
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{CacheManagement, ClientConfig, ConfigError, SessionConfig, TransportConfig};

/// Loaded client settings with optional session and transport blocks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub client: ClientConfig,
    #[serde(default)]
    pub session: Option<SessionConfig>,
    #[serde(default)]
    pub transport: TransportConfig,
}

impl Settings {
    /// # Errors
    /// Returns the first validation failure of either block.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.client.validate()?;
        if let Some(session) = &self.session {
            session.validate()?;
        }
        Ok(())
    }
}

/// Load settings with automatic fallback strategy
///
/// # Errors
/// Returns `ConfigError` if neither source yields valid settings.
pub fn load() -> Result<Settings, ConfigError> {
    match load_from_env() {
        Ok(settings) => {
            tracing::info!("Configuration loaded from environment variables");
            Ok(settings)
        }
        Err(e) => {
            tracing::debug!(error = ?e, "Failed to load from environment, trying file");
            load_from_file(None)
        }
    }
}

/// Load settings from environment variables
///
/// # Errors
/// Returns `ConfigError` if required variables are missing or invalid.
pub fn load_from_env() -> Result<Settings, ConfigError> {
    let mut client = ClientConfig {
        server_path: env_var("SESSIONKIT_SERVER_PATH")?,
        api_path: std::env::var("SESSIONKIT_API_PATH").unwrap_or_default(),
        ..ClientConfig::default()
    };
    if let Ok(policy) = std::env::var("SESSIONKIT_CACHE_MANAGEMENT") {
        client.cache_management = match policy.to_ascii_lowercase().as_str() {
            "default" => CacheManagement::Default,
            "offline" => CacheManagement::Offline,
            other => {
                return Err(ConfigError::invalid(
                    "SESSIONKIT_CACHE_MANAGEMENT",
                    format!("unknown policy '{other}'"),
                ))
            }
        };
    }
    if let Some(secs) = env_u64("SESSIONKIT_TIMEOUT_SECONDS")? {
        client.timeout = Duration::from_secs(secs);
    }

    let session = match std::env::var("SESSIONKIT_OAUTH_PATH") {
        Ok(api_oauth_path) => {
            let mut session = SessionConfig {
                api_oauth_path,
                client_id: env_var("SESSIONKIT_CLIENT_ID")?,
                client_secret: std::env::var("SESSIONKIT_CLIENT_SECRET").unwrap_or_default(),
                use_app_token: env_bool("SESSIONKIT_USE_APP_TOKEN", true),
                ..SessionConfig::default()
            };
            if let Some(secs) = env_u64("SESSIONKIT_VALID_TOKEN_OFFSET_SECONDS")? {
                session.valid_token_offset = Duration::from_secs(secs);
            }
            Some(session)
        }
        Err(_) => None,
    };

    let mut transport = TransportConfig::default();
    if let Some(attempts) = env_u64("SESSIONKIT_MAX_ATTEMPTS")? {
        transport.max_attempts = usize::try_from(attempts)
            .map_err(|e| ConfigError::invalid("SESSIONKIT_MAX_ATTEMPTS", e.to_string()))?;
    }
    if let Some(millis) = env_u64("SESSIONKIT_RETRY_BACKOFF_MS")? {
        transport.base_backoff = Duration::from_millis(millis);
    }

    let settings = Settings { client, session, transport };
    settings.validate()?;
    Ok(settings)
}

/// Load settings from a file
///
/// If `path` is `None`, probes [`probe_config_paths`].
///
/// # Errors
/// Returns `ConfigError` if the file is missing, unreadable, malformed or
/// fails validation.
pub fn load_from_file(path: Option<PathBuf>) -> Result<Settings, ConfigError> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(ConfigError::Io(format!("Config file not found: {}", p.display())));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            ConfigError::Missing("config file in any of the standard locations".to_string())
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path).map_err(|e| ConfigError::Io(e.to_string()))?;

    let settings = parse_settings(&contents, &config_path)?;
    settings.validate()?;
    Ok(settings)
}

/// Parse settings by file extension (`.json` or `.toml`)
fn parse_settings(contents: &str, path: &Path) -> Result<Settings, ConfigError> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| ConfigError::Parse(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| ConfigError::Parse(format!("Invalid JSON format: {e}"))),
        _ => Err(ConfigError::Parse(format!("Unsupported config format: {extension}"))),
    }
}

/// Probe well-known paths for a configuration file
///
/// Looks for `sessionkit.toml` / `sessionkit.json` in the working directory
/// and next to the executable; returns the first that exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join("sessionkit.toml"));
        candidates.push(cwd.join("sessionkit.json"));
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            candidates.push(exe_dir.join("sessionkit.toml"));
            candidates.push(exe_dir.join("sessionkit.json"));
        }
    }

    candidates.into_iter().find(|path| path.exists())
}

fn env_var(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::Missing(key.to_string()))
}

fn env_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::invalid(key, e.to_string())),
        Err(_) => Ok(None),
    }
}

/// Accepts `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}
