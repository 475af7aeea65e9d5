//! Token endpoint exchanges
//!
//! Every grant is a form-encoded POST to the configured OAuth path,
//! resolved from the server root rather than under the API path. The
//! exchange goes through the session's client, so it shares the transport,
//! global parameters and headers of ordinary requests, but it is never
//! cached, never authorized, and never queued behind a slot.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::client::{Authorization, Client};
use crate::config::{CacheManagement, RequestSerializer, SessionConfig};
use crate::credential::{Credential, SessionAccess};
use crate::error::ApiError;
use crate::request::{HttpMethod, Request};
use crate::response::{Response, ResponseBody};
use crate::task::TaskControl;

/// OAuth grant sent to the token endpoint
#[derive(Clone, PartialEq, Eq)]
pub(crate) enum Grant {
    Password { username: String, password: String },
    RefreshToken(String),
    ClientCredentials,
}

impl fmt::Debug for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.grant_type())
    }
}

impl Grant {
    const fn grant_type(&self) -> &'static str {
        match self {
            Self::Password { .. } => "password",
            Self::RefreshToken(_) => "refresh_token",
            Self::ClientCredentials => "client_credentials",
        }
    }

    /// Form fields of the exchange request
    pub(crate) fn parameters(&self, config: &SessionConfig) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("grant_type", self.grant_type().to_string()),
            ("client_id", config.client_id.clone()),
        ];
        if !config.client_secret.is_empty() {
            params.push(("client_secret", config.client_secret.clone()));
        }
        match self {
            Self::Password { username, password } => {
                params.push(("username", username.clone()));
                params.push(("password", password.clone()));
            }
            Self::RefreshToken(token) => params.push(("refresh_token", token.clone())),
            Self::ClientCredentials => {}
        }
        params
    }
}

/// Error payload of a rejected exchange (RFC 6749 section 5.2)
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

impl fmt::Display for OAuthErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error_description {
            Some(description) => write!(f, "{}: {description}", self.error),
            None => f.write_str(&self.error),
        }
    }
}

/// Run one grant against the token endpoint
///
/// # Errors
/// - `AuthenticationFailed` when the endpoint is unreachable or rejects the
///   grant
/// - `MalformedCredential` when the response body is not a usable token
pub(crate) async fn exchange(
    client: &Client,
    config: &SessionConfig,
    now: DateTime<Utc>,
    grant: &Grant,
) -> Result<Credential, ApiError> {
    let request = Request::builder(config.api_oauth_path.as_str())
        .method(HttpMethod::Post)
        .params(grant.parameters(config))
        .serializer(RequestSerializer::FormUrlencoded)
        .cache_policy(CacheManagement::Default)
        .access(SessionAccess::None)
        .build()?;

    tracing::debug!(grant = ?grant, path = %config.api_oauth_path, "exchanging credentials");
    let response = client
        .execute(&Arc::new(request), Some(""), &Authorization::None, &TaskControl::new())
        .await;

    credential_from_response(response, config, now)
}

fn credential_from_response(
    response: Response,
    config: &SessionConfig,
    now: DateTime<Utc>,
) -> Result<Credential, ApiError> {
    match response.error {
        None => {}
        Some(ApiError::Network(err)) => {
            return Err(ApiError::authentication_failed(format!("token endpoint unreachable: {err}")));
        }
        Some(ApiError::Http { status }) => {
            let reason = response
                .json()
                .and_then(|body| OAuthErrorBody::deserialize(body).ok())
                .map_or_else(|| format!("token endpoint returned {status}"), |body| body.to_string());
            return Err(ApiError::authentication_failed(reason));
        }
        Some(ApiError::Serialization(message)) => return Err(ApiError::MalformedCredential(message)),
        Some(other) => return Err(other),
    }

    match &response.body {
        Some(ResponseBody::Json(body)) => {
            Credential::from_json(body, &config.credential_fields, &config.expiry_strategy, now)
        }
        Some(ResponseBody::Raw(bytes)) => match serde_json::from_slice::<Value>(bytes) {
            Ok(body) => Credential::from_json(
                &body,
                &config.credential_fields,
                &config.expiry_strategy,
                now,
            ),
            Err(err) => Err(ApiError::MalformedCredential(format!("token response is not JSON: {err}"))),
        },
        None => Err(ApiError::MalformedCredential("token response has no body".into())),
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for exchange.
    use serde_json::json;

    use super::*;
    use crate::config::ClientConfig;
    use crate::error::TransportError;
    use crate::testing::{token_body, MockTransport};

    fn setup() -> (MockTransport, Client, SessionConfig) {
        let transport = MockTransport::new();
        let client_config =
            ClientConfig::builder("https://api.example.com").api_path("/v1").build().unwrap();
        let client = Client::new(client_config, Arc::new(transport.clone())).unwrap();
        let config = SessionConfig::builder("/oauth/token", "client-1", "s3cret").build().unwrap();
        (transport, client, config)
    }

    fn form(body: &[u8]) -> String {
        String::from_utf8(body.to_vec()).unwrap()
    }

    /// Validates the password grant scenario.
    ///
    /// Assertions:
    /// - Confirms the request goes to the OAuth path from the server root.
    /// - Confirms the grant is form encoded with client credentials.
    /// - Confirms the credential is read from the body.
    #[tokio::test]
    async fn test_password_grant() {
        let (transport, client, config) = setup();
        transport.respond_json(HttpMethod::Post, "/oauth/token", 200, token_body("a-1", Some("r-1"), 3600));
        let now = Utc::now();

        let grant = Grant::Password { username: "ann".into(), password: "pw d".into() };
        let credential = exchange(&client, &config, now, &grant).await.unwrap();

        assert_eq!(credential.access_token(), "a-1");
        assert_eq!(credential.refresh_token(), Some("r-1"));
        assert_eq!(credential.expiry(), Some(now + chrono::Duration::seconds(3600)));

        let call = transport.last_call().unwrap();
        assert_eq!(call.url.as_str(), "https://api.example.com/oauth/token");
        assert_eq!(call.header("authorization"), None);
        assert_eq!(call.header("content-type"), Some("application/x-www-form-urlencoded"));
        let body = form(call.body.as_deref().unwrap());
        assert!(body.contains("grant_type=password"));
        assert!(body.contains("client_id=client-1"));
        assert!(body.contains("client_secret=s3cret"));
        assert!(body.contains("username=ann"));
        assert!(body.contains("password=pw%20d"));
    }

    /// Validates the refresh and client credentials grant fields.
    ///
    /// Assertions:
    /// - Confirms the refresh token is sent.
    /// - Ensures an empty client secret is omitted.
    #[test]
    fn test_grant_parameters() {
        let config = SessionConfig::builder("/oauth/token", "client-1", "").build().unwrap();

        let refresh = Grant::RefreshToken("r-9".into()).parameters(&config);
        assert!(refresh.contains(&("grant_type", "refresh_token".to_string())));
        assert!(refresh.contains(&("refresh_token", "r-9".to_string())));
        assert!(!refresh.iter().any(|(key, _)| *key == "client_secret"));

        let app = Grant::ClientCredentials.parameters(&config);
        assert_eq!(app.len(), 2);
        assert_eq!(format!("{:?}", Grant::Password { username: "u".into(), password: "p".into() }), "password");
    }

    /// Validates rejected exchange mapping.
    ///
    /// Assertions:
    /// - Ensures an OAuth error body becomes the failure reason.
    /// - Ensures a bare status is reported when the body is not an OAuth error.
    /// - Ensures transport failures become `AuthenticationFailed`.
    #[tokio::test]
    async fn test_failed_exchanges() {
        let (transport, client, config) = setup();
        transport.respond_json(
            HttpMethod::Post,
            "/oauth/token",
            400,
            json!({"error": "invalid_grant", "error_description": "refresh token revoked"}),
        );
        transport.respond_json(HttpMethod::Post, "/oauth/token", 500, json!({"oops": true}));
        let grant = Grant::RefreshToken("r".into());

        let revoked = exchange(&client, &config, Utc::now(), &grant).await;
        assert_eq!(
            revoked.unwrap_err(),
            ApiError::authentication_failed("invalid_grant: refresh token revoked")
        );

        let server = exchange(&client, &config, Utc::now(), &grant).await;
        assert_eq!(server.unwrap_err(), ApiError::authentication_failed("token endpoint returned 500"));

        transport.set_offline(true);
        let offline = exchange(&client, &config, Utc::now(), &grant).await.unwrap_err();
        assert!(matches!(offline, ApiError::AuthenticationFailed { .. }));
        assert!(offline.to_string().contains(&TransportError::Offline.to_string()));
    }

    /// Validates malformed token bodies.
    ///
    /// Assertions:
    /// - Ensures a body without an access token is `MalformedCredential`.
    /// - Ensures an empty or non-JSON body is `MalformedCredential`.
    #[tokio::test]
    async fn test_malformed_token_bodies() {
        let (transport, client, config) = setup();
        transport.respond_json(HttpMethod::Post, "/oauth/token", 200, json!({"token_type": "Bearer"}));
        transport.respond(
            HttpMethod::Post,
            "/oauth/token",
            crate::transport::TransportResponse::new(200, "<html>"),
        );
        transport.respond(HttpMethod::Post, "/oauth/token", crate::transport::TransportResponse::new(200, ""));
        let grant = Grant::ClientCredentials;

        for _ in 0..3 {
            let result = exchange(&client, &config, Utc::now(), &grant).await;
            assert!(matches!(result, Err(ApiError::MalformedCredential(_))), "{result:?}");
        }
    }
}
