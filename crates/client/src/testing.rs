//! Scripted transport for tests
//!
//! [`MockTransport`] answers by `(method, path)` from per-route FIFO
//! queues; the last scripted answer of a route repeats. Unscripted routes
//! answer 404. Every call is recorded, and holds can keep calls in flight
//! until released.
//!
//! ```
//! use serde_json::json;
//! use sessionkit_client::request::HttpMethod;
//! use sessionkit_client::testing::MockTransport;
//!
//! let transport = MockTransport::new();
//! transport.respond_json(HttpMethod::Get, "/v1/items/5", 200, json!({"id": 5}));
//! assert_eq!(transport.call_count(), 0);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::watch;

use crate::error::TransportError;
use crate::request::HttpMethod;
use crate::transport::{Transport, TransportRequest, TransportResponse};

type Route = (HttpMethod, String);

#[derive(Debug, Clone)]
enum Scripted {
    Response(TransportResponse),
    Error(TransportError),
}

#[derive(Debug, Default)]
struct Holds {
    all: usize,
    routes: HashMap<Route, usize>,
}

impl Holds {
    fn blocks(&self, route: &Route) -> bool {
        self.all > 0 || self.routes.get(route).is_some_and(|count| *count > 0)
    }
}

#[derive(Debug)]
struct MockState {
    routes: Mutex<HashMap<Route, VecDeque<Scripted>>>,
    calls: Mutex<Vec<TransportRequest>>,
    offline: AtomicBool,
    holds: watch::Sender<Holds>,
    call_count: watch::Sender<usize>,
}

/// Scripted in-memory [`Transport`]
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        let (holds, _) = watch::channel(Holds::default());
        let (call_count, _) = watch::channel(0);
        Self {
            state: Arc::new(MockState {
                routes: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
                offline: AtomicBool::new(false),
                holds,
                call_count,
            }),
        }
    }

    fn script(&self, method: HttpMethod, path: &str, scripted: Scripted) {
        self.state.routes.lock().entry((method, path.to_string())).or_default().push_back(scripted);
    }

    /// Queue a response for a route
    pub fn respond(&self, method: HttpMethod, path: &str, response: TransportResponse) {
        self.script(method, path, Scripted::Response(response));
    }

    pub fn respond_json(&self, method: HttpMethod, path: &str, status: u16, body: Value) {
        self.respond(method, path, TransportResponse::json(status, &body));
    }

    /// Queue a transport failure for a route
    pub fn fail(&self, method: HttpMethod, path: &str, error: TransportError) {
        self.script(method, path, Scripted::Error(error));
    }

    /// While offline every call fails with [`TransportError::Offline`]
    pub fn set_offline(&self, offline: bool) {
        self.state.offline.store(offline, Ordering::SeqCst);
    }

    /// Keep every call in flight until the guard is dropped
    #[must_use = "calls are released when the guard is dropped"]
    pub fn hold(&self) -> HoldGuard {
        self.state.holds.send_modify(|holds| holds.all += 1);
        HoldGuard { state: Arc::clone(&self.state), route: None }
    }

    /// Keep calls to one route in flight until the guard is dropped
    #[must_use = "calls are released when the guard is dropped"]
    pub fn hold_route(&self, method: HttpMethod, path: &str) -> HoldGuard {
        let route = (method, path.to_string());
        self.state.holds.send_modify(|holds| *holds.routes.entry(route.clone()).or_default() += 1);
        HoldGuard { state: Arc::clone(&self.state), route: Some(route) }
    }

    #[must_use]
    pub fn calls(&self) -> Vec<TransportRequest> {
        self.state.calls.lock().clone()
    }

    #[must_use]
    pub fn last_call(&self) -> Option<TransportRequest> {
        self.state.calls.lock().last().cloned()
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.state.calls.lock().len()
    }

    /// Calls made to one route
    #[must_use]
    pub fn calls_to(&self, method: HttpMethod, path: &str) -> Vec<TransportRequest> {
        self.state
            .calls
            .lock()
            .iter()
            .filter(|call| call.method == method && call.url.path() == path)
            .cloned()
            .collect()
    }

    /// Wait until at least `count` calls have been received
    pub async fn wait_for_calls(&self, count: usize) {
        let mut rx = self.state.call_count.subscribe();
        let _ = rx.wait_for(|seen| *seen >= count).await;
    }

    fn next_answer(&self, route: &Route) -> Scripted {
        let mut routes = self.state.routes.lock();
        let answer = match routes.get_mut(route) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        answer.unwrap_or_else(|| Scripted::Response(TransportResponse::new(404, "")))
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let route = (request.method, request.url.path().to_string());
        self.state.calls.lock().push(request);
        self.state.call_count.send_modify(|count| *count += 1);

        let mut holds = self.state.holds.subscribe();
        let _ = holds.wait_for(|holds| !holds.blocks(&route)).await;

        if self.state.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Offline);
        }
        match self.next_answer(&route) {
            Scripted::Response(response) => Ok(response),
            Scripted::Error(error) => Err(error),
        }
    }
}

/// Releases a hold on drop
#[derive(Debug)]
pub struct HoldGuard {
    state: Arc<MockState>,
    route: Option<Route>,
}

impl Drop for HoldGuard {
    fn drop(&mut self) {
        let route = self.route.take();
        self.state.holds.send_modify(|holds| match &route {
            None => holds.all = holds.all.saturating_sub(1),
            Some(route) => {
                if let Some(count) = holds.routes.get_mut(route) {
                    *count = count.saturating_sub(1);
                }
            }
        });
    }
}

/// Token endpoint body in the default field layout
#[must_use]
pub fn token_body(access_token: &str, refresh_token: Option<&str>, expires_in: i64) -> Value {
    let mut body = json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": expires_in,
    });
    if let Some(refresh_token) = refresh_token {
        body["refresh_token"] = Value::from(refresh_token);
    }
    body
}
