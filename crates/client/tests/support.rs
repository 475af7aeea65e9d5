//! Shared fixtures for client integration tests

use std::sync::Arc;
use std::time::Duration;

use sessionkit_client::config::{ClientConfig, SessionConfig};
use sessionkit_client::testing::MockTransport;
use sessionkit_client::transport::TransportRequest;
use sessionkit_client::{Client, Credential, Session};
use sessionkit_common::{Clock, MockClock, SecureStorage};

pub const TOKEN_PATH: &str = "/oauth/token";
pub const SERVER: &str = "https://api.example.com";

/// Install a test-writer subscriber once; later calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("sessionkit_client=debug")
        .with_test_writer()
        .try_init();
}

pub fn client(transport: &MockTransport) -> Client {
    let config = ClientConfig::builder(SERVER).api_path("/v1").build().expect("valid client config");
    Client::new(config, Arc::new(transport.clone())).expect("client should build")
}

pub fn session(
    transport: &MockTransport,
    storage: Arc<dyn SecureStorage>,
    clock: &MockClock,
    use_app_token: bool,
) -> Session {
    let config = SessionConfig::builder(TOKEN_PATH, "client-1", "secret")
        .use_app_token(use_app_token)
        .build()
        .expect("valid session config");
    Session::builder(client(transport), config)
        .storage(storage)
        .clock(Arc::new(clock.clone()))
        .build()
        .expect("session should build")
}

/// Credential that expired one second before the clock's current time
pub fn expired_credential(clock: &MockClock, token: &str, refresh_token: &str) -> Credential {
    Credential::new(token)
        .expect("non-empty token")
        .with_refresh_token(refresh_token)
        .with_expiry(clock.now() - chrono::Duration::seconds(1))
}

pub fn valid_credential(clock: &MockClock, token: &str, refresh_token: &str) -> Credential {
    Credential::new(token)
        .expect("non-empty token")
        .with_refresh_token(refresh_token)
        .with_expiry(clock.now() + chrono::Duration::hours(1))
}

/// `grant_type` of a recorded token exchange
pub fn grant_type(call: &TransportRequest) -> String {
    let body = String::from_utf8(call.body.clone().unwrap_or_default()).unwrap_or_default();
    body.split('&').find_map(|pair| pair.strip_prefix("grant_type=")).unwrap_or_default().to_string()
}

/// Poll `condition` until it holds, failing the test after two seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition should become true");
}
