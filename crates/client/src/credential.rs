//! OAuth credential value type
//!
//! A [`Credential`] is created from a token-exchange response (password,
//! refresh-token or client-credentials grant) and is never modified after
//! it is handed to a session slot: a refresh produces a new credential that
//! replaces the old one wholesale.
//!
//! The JSON keys of the exchange response and the interpretation of the
//! expiry field are configurable through [`CredentialFields`] and
//! [`ExpiryStrategy`], since token endpoints disagree on both.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ApiError;

/// Token type used when the exchange response omits one
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

/// Which credential a request is authorized with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionAccess {
    /// No credential; the request is sent without authorization
    #[default]
    None,
    /// Application-level credential (client-credentials grant)
    App,
    /// User-level credential (password grant)
    User,
}

impl SessionAccess {
    /// Lowercase name used in storage keys and log fields
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::App => "app",
            Self::User => "user",
        }
    }
}

impl fmt::Display for SessionAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON keys read from a token-exchange response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialFields {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: String,
    pub token_type: String,
    pub scope: String,
}

impl Default for CredentialFields {
    fn default() -> Self {
        Self {
            access_token: "access_token".to_string(),
            refresh_token: "refresh_token".to_string(),
            expires_in: "expires_in".to_string(),
            token_type: "token_type".to_string(),
            scope: "scope".to_string(),
        }
    }
}

/// Custom expiry computation: `(raw value, now) -> expiry`
pub type ExpiryFn = Arc<dyn Fn(&Value, DateTime<Utc>) -> Option<DateTime<Utc>> + Send + Sync>;

/// How the expires-in field of an exchange response becomes an instant
#[derive(Clone, Default)]
pub enum ExpiryStrategy {
    /// Number (or numeric string) of seconds from now
    #[default]
    SecondsFromNow,
    /// Absolute Unix timestamp in seconds
    UnixTimestamp,
    /// RFC 3339 timestamp string
    Rfc3339,
    /// Caller-supplied conversion; `None` means the value is unusable
    Custom(ExpiryFn),
}

impl fmt::Debug for ExpiryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SecondsFromNow => f.write_str("SecondsFromNow"),
            Self::UnixTimestamp => f.write_str("UnixTimestamp"),
            Self::Rfc3339 => f.write_str("Rfc3339"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl ExpiryStrategy {
    /// Convert a raw expires-in value into an expiry instant
    ///
    /// # Errors
    /// Returns `MalformedCredential` when the value cannot be interpreted.
    pub fn resolve(&self, value: &Value, now: DateTime<Utc>) -> Result<DateTime<Utc>, ApiError> {
        let resolved = match self {
            Self::SecondsFromNow => numeric(value)
                .and_then(|secs| chrono::Duration::try_milliseconds((secs * 1000.0) as i64))
                .and_then(|delta| now.checked_add_signed(delta)),
            Self::UnixTimestamp => numeric(value)
                .and_then(|secs| Utc.timestamp_opt(secs as i64, 0).single()),
            Self::Rfc3339 => value
                .as_str()
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            Self::Custom(convert) => convert(value, now),
        };

        resolved.ok_or_else(|| {
            ApiError::MalformedCredential(format!("unusable expiry value: {value}"))
        })
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(raw) => raw.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|secs| secs.is_finite())
}

/// Bearer credential issued by a token endpoint
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CredentialRecord")]
pub struct Credential {
    access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expiry: Option<DateTime<Utc>>,
    token_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
}

#[derive(Deserialize)]
struct CredentialRecord {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

impl TryFrom<CredentialRecord> for Credential {
    type Error = ApiError;

    fn try_from(record: CredentialRecord) -> Result<Self, Self::Error> {
        let mut credential = Self::new(record.access_token)?;
        credential.refresh_token = record.refresh_token.filter(|t| !t.is_empty());
        credential.expiry = record.expiry;
        credential.scope = record.scope;
        if let Some(token_type) = record.token_type.filter(|t| !t.is_empty()) {
            credential.token_type = token_type;
        }
        Ok(credential)
    }
}

impl Credential {
    /// Create a credential with no refresh token and no expiry
    ///
    /// # Errors
    /// Returns `MalformedCredential` if `access_token` is empty.
    pub fn new(access_token: impl Into<String>) -> Result<Self, ApiError> {
        let access_token = access_token.into();
        if access_token.is_empty() {
            return Err(ApiError::MalformedCredential("access token is empty".into()));
        }
        Ok(Self {
            access_token,
            refresh_token: None,
            expiry: None,
            token_type: DEFAULT_TOKEN_TYPE.to_string(),
            scope: None,
        })
    }

    /// Build a credential from a decoded token-exchange body
    ///
    /// # Errors
    /// Returns `MalformedCredential` if the body is not an object, the
    /// access-token key is absent or empty, or the expiry value is unusable.
    pub fn from_json(
        body: &Value,
        fields: &CredentialFields,
        strategy: &ExpiryStrategy,
        now: DateTime<Utc>,
    ) -> Result<Self, ApiError> {
        let object = body.as_object().ok_or_else(|| {
            ApiError::MalformedCredential("token response is not a JSON object".into())
        })?;

        let access_token = object
            .get(&fields.access_token)
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                ApiError::MalformedCredential(format!("missing `{}`", fields.access_token))
            })?;

        let text = |key: &str| {
            object.get(key).and_then(Value::as_str).filter(|s| !s.is_empty()).map(str::to_owned)
        };

        let expiry = match object.get(&fields.expires_in) {
            None | Some(Value::Null) => None,
            Some(value) => Some(strategy.resolve(value, now)?),
        };

        Ok(Self {
            access_token: access_token.to_owned(),
            refresh_token: text(&fields.refresh_token),
            expiry,
            token_type: text(&fields.token_type).unwrap_or_else(|| DEFAULT_TOKEN_TYPE.to_string()),
            scope: text(&fields.scope),
        })
    }

    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        let token = refresh_token.into();
        self.refresh_token = (!token.is_empty()).then_some(token);
        self
    }

    #[must_use]
    pub fn with_expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry = Some(expiry);
        self
    }

    #[must_use]
    pub fn with_token_type(mut self, token_type: impl Into<String>) -> Self {
        self.token_type = token_type.into();
        self
    }

    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    #[must_use]
    pub const fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expiry
    }

    #[must_use]
    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    #[must_use]
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// Valid right now, with no safety offset
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now(), Duration::ZERO)
    }

    /// Valid right now, treating the last `offset` before expiry as expired
    #[must_use]
    pub fn is_valid_with_offset(&self, offset: Duration) -> bool {
        self.is_valid_at(Utc::now(), offset)
    }

    /// `true` iff there is no expiry or `now + offset < expiry`
    ///
    /// The comparison is strict: a credential whose expiry equals
    /// `now + offset` is already invalid.
    #[must_use]
    pub fn is_valid_at(&self, now: DateTime<Utc>, offset: Duration) -> bool {
        let Some(expiry) = self.expiry else {
            return true;
        };
        let Ok(offset) = chrono::Duration::from_std(offset) else {
            return false;
        };
        now.checked_add_signed(offset).is_some_and(|threshold| threshold < expiry)
    }

    /// Seconds until expiry relative to `now`, negative once expired
    #[must_use]
    pub fn seconds_until_expiry(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expiry.map(|expiry| (expiry - now).num_seconds())
    }

    /// `Authorization` header value, e.g. `Bearer abc123`
    #[must_use]
    pub fn authorization_value(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expiry", &self.expiry)
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for credential.
    use serde_json::json;

    use super::*;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    /// Validates `Credential::new` behavior for the empty token scenario.
    ///
    /// Assertions:
    /// - Ensures an empty access token yields `MalformedCredential`.
    /// - Confirms defaults for token type and validity.
    #[test]
    fn test_new_rejects_empty_token() {
        assert!(matches!(Credential::new(""), Err(ApiError::MalformedCredential(_))));

        let credential = Credential::new("abc").unwrap();
        assert_eq!(credential.token_type(), DEFAULT_TOKEN_TYPE);
        assert!(credential.is_valid());
        assert!(credential.refresh_token().is_none());
    }

    /// Validates `Credential::is_valid_at` behavior for the strict boundary
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures `now + offset == expiry` is not valid.
    /// - Ensures one second earlier is valid.
    /// - Ensures a past expiry is invalid.
    #[test]
    fn test_validity_boundary_is_strict() {
        let now = fixed_now();
        let credential =
            Credential::new("abc").unwrap().with_expiry(now + chrono::Duration::seconds(60));

        assert!(!credential.is_valid_at(now, Duration::from_secs(60)));
        assert!(credential.is_valid_at(now, Duration::from_secs(59)));
        assert!(credential.is_valid_at(now, Duration::ZERO));
        assert!(!credential.is_valid_at(now + chrono::Duration::seconds(61), Duration::ZERO));
        assert!(!credential.is_valid_at(now + chrono::Duration::seconds(60), Duration::ZERO));
    }

    /// Validates `Credential::from_json` behavior for the default field
    /// mapping scenario.
    ///
    /// Assertions:
    /// - Confirms every mapped field is read.
    /// - Confirms expiry is `now + expires_in`.
    #[test]
    fn test_from_json_default_fields() {
        let now = fixed_now();
        let body = json!({
            "access_token": "access-1",
            "refresh_token": "refresh-1",
            "expires_in": 3600,
            "token_type": "bearer",
            "scope": "read write",
        });

        let credential = Credential::from_json(
            &body,
            &CredentialFields::default(),
            &ExpiryStrategy::default(),
            now,
        )
        .unwrap();

        assert_eq!(credential.access_token(), "access-1");
        assert_eq!(credential.refresh_token(), Some("refresh-1"));
        assert_eq!(credential.token_type(), "bearer");
        assert_eq!(credential.scope(), Some("read write"));
        assert_eq!(credential.expiry(), Some(now + chrono::Duration::seconds(3600)));
        assert_eq!(credential.seconds_until_expiry(now), Some(3600));
    }

    /// Validates `Credential::from_json` behavior for the missing access
    /// token scenario.
    ///
    /// Assertions:
    /// - Ensures absent, empty and non-object bodies are `MalformedCredential`.
    #[test]
    fn test_from_json_missing_access_token() {
        let fields = CredentialFields::default();
        let strategy = ExpiryStrategy::default();

        for body in [json!({"refresh_token": "r"}), json!({"access_token": ""}), json!([1, 2])] {
            let result = Credential::from_json(&body, &fields, &strategy, fixed_now());
            assert!(matches!(result, Err(ApiError::MalformedCredential(_))), "{body}");
        }
    }

    /// Validates `Credential::from_json` behavior for the custom field mapping
    /// and string expiry scenario.
    ///
    /// Assertions:
    /// - Confirms renamed keys are honored.
    /// - Confirms a numeric string expires-in is accepted.
    /// - Confirms the token type falls back to `Bearer`.
    #[test]
    fn test_from_json_custom_fields() {
        let now = fixed_now();
        let fields = CredentialFields {
            access_token: "token".into(),
            refresh_token: "refresh".into(),
            expires_in: "ttl".into(),
            ..CredentialFields::default()
        };
        let body = json!({"token": "t-1", "refresh": "r-1", "ttl": "120"});

        let credential =
            Credential::from_json(&body, &fields, &ExpiryStrategy::SecondsFromNow, now).unwrap();

        assert_eq!(credential.access_token(), "t-1");
        assert_eq!(credential.refresh_token(), Some("r-1"));
        assert_eq!(credential.token_type(), DEFAULT_TOKEN_TYPE);
        assert_eq!(credential.expiry(), Some(now + chrono::Duration::seconds(120)));
    }

    /// Validates `ExpiryStrategy` variants.
    ///
    /// Assertions:
    /// - Confirms unix timestamps, RFC 3339 strings and custom functions
    ///   resolve.
    /// - Ensures unusable values are `MalformedCredential`.
    #[test]
    fn test_expiry_strategies() {
        let now = fixed_now();
        let later = now + chrono::Duration::hours(2);

        assert_eq!(
            ExpiryStrategy::UnixTimestamp.resolve(&json!(later.timestamp()), now).unwrap(),
            later
        );
        assert_eq!(
            ExpiryStrategy::Rfc3339.resolve(&json!(later.to_rfc3339()), now).unwrap(),
            later
        );

        let custom = ExpiryStrategy::Custom(Arc::new(|value: &Value, now: DateTime<Utc>| {
            value.as_i64().map(|minutes| now + chrono::Duration::minutes(minutes))
        }));
        assert_eq!(custom.resolve(&json!(120), now).unwrap(), later);
        assert_eq!(format!("{custom:?}"), "Custom(..)");

        assert!(matches!(
            ExpiryStrategy::SecondsFromNow.resolve(&json!("soon"), now),
            Err(ApiError::MalformedCredential(_))
        ));
    }

    /// Validates credential persistence encoding.
    ///
    /// Assertions:
    /// - Confirms a serialized credential reads back equal.
    /// - Ensures a stored record with an empty token is rejected.
    #[test]
    fn test_serde_round_trip_and_validation() {
        let credential = Credential::new("abc")
            .unwrap()
            .with_refresh_token("def")
            .with_expiry(fixed_now())
            .with_scope("profile");

        let bytes = serde_json::to_vec(&credential).unwrap();
        let restored: Credential = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(restored, credential);

        let invalid: Result<Credential, _> = serde_json::from_str(r#"{"access_token": ""}"#);
        assert!(invalid.is_err());
    }

    /// Validates `Debug` redaction and header rendering.
    ///
    /// Assertions:
    /// - Ensures tokens never appear in debug output.
    /// - Confirms `authorization_value` uses the token type.
    #[test]
    fn test_debug_redacts_tokens() {
        let credential = Credential::new("secret-access").unwrap().with_refresh_token("secret-r");
        let debug = format!("{credential:?}");

        assert!(!debug.contains("secret-access"));
        assert!(!debug.contains("secret-r"));
        assert_eq!(credential.authorization_value(), "Bearer secret-access");
        assert_eq!(SessionAccess::User.to_string(), "user");
    }
}
