//! Request dispatch
//!
//! [`Client`] turns a [`Request`] into a transport call and a decoded
//! [`Response`]:
//!
//! 1. merge global parameters and headers (request values win), attach the
//!    locale and the current authorization header;
//! 2. encode parameters into the query string or the body;
//! 3. send through the [`Transport`], racing the task's cancellation;
//! 4. decode the body, classify the status, and under the `Offline` policy
//!    either store the response or answer a network failure from cache;
//! 5. let the [`ClientDelegate`] remap the error once, then deliver.
//!
//! Every dispatch runs as its own tokio task and is delivered through a
//! [`PendingResponse`], even when the answer is known immediately.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::{CachedResponse, OfflineCache};
use crate::config::{CacheManagement, ClientConfig, LocaleAttachment, ResponseSerializer};
use crate::error::ApiError;
use crate::group::RequestGroup;
use crate::logging::{log_request, log_response};
use crate::request::{CompletionContext, Request};
use crate::response::{Response, ResponseBody, ResponseSource};
use crate::serializer::{decode_body, encode_body, encode_multipart, query_string};
use crate::task::{PendingResponse, TaskControl, TaskId, TaskRegistry};
use crate::transport::{Transport, TransportRequest};

/// Authorization header state of a client
#[derive(Clone, Default, PartialEq, Eq)]
pub enum Authorization {
    #[default]
    None,
    Bearer(String),
    Basic { username: String, password: String },
}

impl Authorization {
    /// `Authorization` header value, `None` when unauthenticated
    #[must_use]
    pub fn header_value(&self) -> Option<String> {
        match self {
            Self::None => None,
            Self::Bearer(token) => Some(format!("Bearer {token}")),
            Self::Basic { username, password } => {
                Some(format!("Basic {}", BASE64.encode(format!("{username}:{password}"))))
            }
        }
    }
}

impl fmt::Debug for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bearer(_) => f.write_str("Bearer(<redacted>)"),
            Self::Basic { username, .. } => {
                f.debug_struct("Basic").field("username", username).finish_non_exhaustive()
            }
        }
    }
}

/// Hooks called for every terminal response
pub trait ClientDelegate: Send + Sync {
    /// Replace the response error given the decoded body
    ///
    /// Called exactly once per response, after the offline cache decision
    /// and before delivery. Returning `None` keeps the current error.
    fn remap_error(&self, body: Option<&ResponseBody>, error: Option<&ApiError>) -> Option<ApiError> {
        let _ = (body, error);
        None
    }

    /// Notified after remapping when the response carries an error
    fn did_receive_error(&self, response: &Response) {
        let _ = response;
    }
}

/// Something that dispatches requests: a bare [`Client`] or a
/// [`Session`](crate::session::Session)
pub trait RequestExecutor: Send + Sync {
    /// Dispatch with an API path replacing the configured one
    fn perform_with_api_path(&self, request: Request, api_path: Option<&str>) -> PendingResponse;

    fn perform(&self, request: Request) -> PendingResponse {
        self.perform_with_api_path(request, None)
    }

    /// Client owning the dispatched tasks
    fn client(&self) -> &Client;
}

pub(crate) struct ClientInner {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    authorization: RwLock<Authorization>,
    pub(crate) tasks: Arc<TaskRegistry>,
    cache: OfflineCache,
    delegate: Option<Arc<dyn ClientDelegate>>,
    default_context: Option<CompletionContext>,
}

/// HTTP client for one API server
///
/// Cheap to clone; clones share configuration, authorization state,
/// outstanding tasks and the offline cache.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("server_path", &self.inner.config.server_path)
            .field("transport", &self.inner.transport)
            .field("authorization", &*self.inner.authorization.read())
            .field("active_tasks", &self.inner.tasks.len())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// # Errors
    /// Returns `ApiError::Config` if the configuration is invalid.
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Result<Self, ApiError> {
        Self::builder(config).transport(transport).build()
    }

    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder { config, transport: None, delegate: None, completion_context: None }
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn offline_cache(&self) -> &OfflineCache {
        &self.inner.cache
    }

    /// Send `Authorization: Bearer <token>` from now on
    pub fn set_bearer_token(&self, token: impl Into<String>) {
        *self.inner.authorization.write() = Authorization::Bearer(token.into());
    }

    /// Send HTTP basic authorization from now on
    pub fn set_basic_auth(&self, username: impl Into<String>, password: impl Into<String>) {
        *self.inner.authorization.write() =
            Authorization::Basic { username: username.into(), password: password.into() };
    }

    pub fn clear_auth_headers(&self) {
        *self.inner.authorization.write() = Authorization::None;
    }

    #[must_use]
    pub fn authorization(&self) -> Authorization {
        self.inner.authorization.read().clone()
    }

    /// Cancel a dispatched request; `false` if it already resolved
    pub fn cancel(&self, task: TaskId) -> bool {
        self.inner.tasks.cancel(task)
    }

    pub fn suspend(&self, task: TaskId) -> bool {
        self.inner.tasks.suspend(task)
    }

    pub fn resume(&self, task: TaskId) -> bool {
        self.inner.tasks.resume(task)
    }

    pub fn cancel_all(&self) -> usize {
        self.inner.tasks.cancel_all()
    }

    pub fn suspend_all(&self) -> usize {
        self.inner.tasks.suspend_all()
    }

    pub fn resume_all(&self) -> usize {
        self.inner.tasks.resume_all()
    }

    /// Number of dispatched requests not yet resolved
    #[must_use]
    pub fn active_tasks(&self) -> usize {
        self.inner.tasks.len()
    }

    /// New request group over this client's tasks
    #[must_use]
    pub fn group(&self) -> RequestGroup {
        RequestGroup::new(self)
    }

    pub(crate) fn downgrade(&self) -> std::sync::Weak<ClientInner> {
        Arc::downgrade(&self.inner)
    }

    /// Run `work` as a registered task and deliver its response
    ///
    /// The task runs on the request's completion context, else the client's
    /// default context, else the caller's runtime.
    pub(crate) fn spawn_task<F, Fut>(&self, request: Arc<Request>, work: F) -> PendingResponse
    where
        F: FnOnce(Arc<Request>, TaskControl) -> Fut + Send + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        let control = TaskControl::new();
        let id = control.id();
        let guard = self.inner.tasks.register(control.clone());
        let (tx, rx) = oneshot::channel();
        let pending = PendingResponse::new(id, Arc::clone(&request), rx);

        let handle = request
            .completion_context()
            .or(self.inner.default_context.as_ref())
            .map(|context| context.handle().clone())
            .or_else(|| Handle::try_current().ok());
        let Some(handle) = handle else {
            drop(guard);
            let _ = tx.send(Response::failure(
                request,
                ApiError::Config("no tokio runtime to run the request on".into()),
            ));
            return pending;
        };

        let inner = Arc::clone(&self.inner);
        handle.spawn(async move {
            let started = Instant::now();
            let mut response = work(Arc::clone(&request), control.clone()).await;
            // Suspension also holds back delivery of a finished response.
            if let Err(err) = control.checkpoint().await {
                response = Response::failure(Arc::clone(&request), err);
            }
            inner.finalize(id, &mut response, started);
            drop(guard);
            // The caller may have dropped the pending response.
            let _ = tx.send(response);
        });
        pending
    }

    /// One transport round trip with an explicit authorization
    pub(crate) async fn execute(
        &self,
        request: &Arc<Request>,
        api_path: Option<&str>,
        authorization: &Authorization,
        control: &TaskControl,
    ) -> Response {
        self.inner.execute(request, api_path, authorization, control).await
    }
}

impl RequestExecutor for Client {
    fn perform_with_api_path(&self, request: Request, api_path: Option<&str>) -> PendingResponse {
        let authorization = self.authorization();
        let api_path = api_path.map(str::to_string);
        let client = self.clone();
        self.spawn_task(Arc::new(request), move |request, control| async move {
            client.execute(&request, api_path.as_deref(), &authorization, &control).await
        })
    }

    fn client(&self) -> &Client {
        self
    }
}

impl ClientInner {
    async fn execute(
        &self,
        request: &Arc<Request>,
        api_path: Option<&str>,
        authorization: &Authorization,
        control: &TaskControl,
    ) -> Response {
        if let Err(err) = control.checkpoint().await {
            return Response::failure(Arc::clone(request), err);
        }

        let transport_request = match self.build_transport_request(request, api_path, authorization) {
            Ok(transport_request) => transport_request,
            Err(err) => return Response::failure(Arc::clone(request), err),
        };

        let policy = request.cache_policy().unwrap_or(self.config.cache_management);
        let cache_key = match policy {
            CacheManagement::Offline => {
                OfflineCache::key(transport_request.method, &transport_request.url)
            }
            CacheManagement::Default => None,
        };

        let task = control.id();
        debug!(
            %task,
            request = %request.identifier(),
            method = %transport_request.method,
            url = %transport_request.url,
            "dispatching request"
        );
        log_request(self.config.log_level, task, &transport_request);

        let result = tokio::select! {
            biased;
            () = control.cancelled() => return Response::failure(Arc::clone(request), ApiError::Cancelled),
            result = self.transport.send(transport_request) => result,
        };

        match result {
            Ok(received) => {
                let status = received.status;
                let (body, decode_error) =
                    decode_body(self.config.response_serializer, status, received.body);
                let error = if (200..300).contains(&status) {
                    decode_error
                } else {
                    Some(ApiError::Http { status })
                };
                if let (Some(key), None) = (cache_key, &error) {
                    self.cache.insert(
                        key,
                        CachedResponse { status, headers: received.headers.clone(), body: body.clone() },
                    );
                }
                Response {
                    request: Arc::clone(request),
                    status: Some(status),
                    headers: Some(received.headers),
                    body,
                    error,
                    source: ResponseSource::Network,
                }
            }
            Err(err) => {
                if err.is_network() {
                    if let Some(hit) = cache_key.as_deref().and_then(|key| self.cache.get(key)) {
                        info!(%task, error = %err, "Network unavailable, serving cached response");
                        return Response {
                            request: Arc::clone(request),
                            status: Some(hit.status),
                            headers: Some(hit.headers.clone()),
                            body: hit.body.clone(),
                            error: None,
                            source: ResponseSource::Cache,
                        };
                    }
                }
                Response::failure(Arc::clone(request), ApiError::Network(err))
            }
        }
    }

    fn build_transport_request(
        &self,
        request: &Request,
        api_path: Option<&str>,
        authorization: &Authorization,
    ) -> Result<TransportRequest, ApiError> {
        let config = &self.config;
        let mut url = config.endpoint(api_path.or_else(|| request.api_path()), request.path())?;

        let mut parameters = config.global_parameters.clone();
        parameters.extend(request.parameters().iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut headers = config.global_headers.clone();
        for (name, value) in request.headers() {
            set_header(&mut headers, name, value.clone());
        }

        if let Some(locale) = &config.locale {
            match &locale.attachment {
                LocaleAttachment::Header(name) => {
                    if find_header(&headers, name).is_none() {
                        headers.insert(name.clone(), locale.value.clone());
                    }
                }
                LocaleAttachment::Parameter(key) => {
                    parameters.entry(key.clone()).or_insert_with(|| Value::from(locale.value.clone()));
                }
            }
        }

        if let Some(value) = authorization.header_value() {
            set_header(&mut headers, "Authorization", value);
        }
        if config.response_serializer == ResponseSerializer::Json && find_header(&headers, "Accept").is_none() {
            headers.insert("Accept".into(), "application/json".into());
        }

        let method = request.method();
        let body = if !request.uploads().is_empty() {
            let boundary = format!("Boundary-{}", Uuid::new_v4().simple());
            let encoded = encode_multipart(&parameters, request.uploads(), &boundary);
            set_header(&mut headers, "Content-Type", encoded.content_type);
            Some(encoded.bytes)
        } else if method.encodes_parameters_in_query() {
            if !parameters.is_empty() {
                let encoded = query_string(&parameters);
                let query = match url.query() {
                    Some(existing) if !existing.is_empty() => format!("{existing}&{encoded}"),
                    _ => encoded,
                };
                url.set_query(Some(&query));
            }
            None
        } else {
            let serializer = request.serializer().unwrap_or(config.request_serializer);
            let encoded = encode_body(serializer, &parameters)?;
            if find_header(&headers, "Content-Type").is_none() {
                headers.insert("Content-Type".into(), encoded.content_type);
            }
            Some(encoded.bytes)
        };

        Ok(TransportRequest { method, url, headers, body, timeout: config.timeout })
    }

    fn finalize(&self, task: TaskId, response: &mut Response, started: Instant) {
        if let Some(delegate) = &self.delegate {
            if let Some(remapped) = delegate.remap_error(response.body.as_ref(), response.error.as_ref()) {
                response.error = Some(remapped);
            }
            if response.error.is_some() {
                delegate.did_receive_error(response);
            }
        }

        let elapsed = started.elapsed();
        debug!(
            %task,
            status = response.status.unwrap_or_default(),
            source = ?response.source,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            success = response.is_success(),
            "request finished"
        );
        log_response(self.config.log_level, task, response, elapsed);
    }
}

fn find_header<'a>(headers: &'a BTreeMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Insert a header, replacing any existing spelling of the same name
fn set_header(headers: &mut BTreeMap<String, String>, name: &str, value: String) {
    headers.retain(|key, _| !key.eq_ignore_ascii_case(name));
    headers.insert(name.to_string(), value);
}

/// Builder for [`Client`]
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    delegate: Option<Arc<dyn ClientDelegate>>,
    completion_context: Option<CompletionContext>,
}

impl ClientBuilder {
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[must_use]
    pub fn delegate(mut self, delegate: Arc<dyn ClientDelegate>) -> Self {
        self.delegate = Some(delegate);
        self
    }

    /// Default runtime for requests that do not name one
    #[must_use]
    pub fn completion_context(mut self, context: CompletionContext) -> Self {
        self.completion_context = Some(context);
        self
    }

    /// # Errors
    /// Returns `ApiError::Config` for an invalid configuration, or when no
    /// transport was given and the reqwest transport is not compiled in.
    pub fn build(self) -> Result<Client, ApiError> {
        self.config.validate()?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => default_transport()?,
        };
        let cache = OfflineCache::new(&self.config.offline_cache);

        Ok(Client {
            inner: Arc::new(ClientInner {
                config: self.config,
                transport,
                authorization: RwLock::new(Authorization::None),
                tasks: Arc::new(TaskRegistry::new()),
                cache,
                delegate: self.delegate,
                default_context: self.completion_context,
            }),
        })
    }
}

#[cfg(feature = "reqwest-transport")]
fn default_transport() -> Result<Arc<dyn Transport>, ApiError> {
    let transport = crate::transport::ReqwestTransport::new()
        .map_err(|err| ApiError::Config(format!("transport: {err}")))?;
    Ok(Arc::new(transport))
}

#[cfg(not(feature = "reqwest-transport"))]
fn default_transport() -> Result<Arc<dyn Transport>, ApiError> {
    Err(ApiError::Config("no transport configured".into()))
}

#[cfg(test)]
mod tests {
    //! Unit tests for client.
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::config::{Locale, RequestSerializer};
    use crate::error::TransportError;
    use crate::request::{HttpMethod, UploadPart};
    use crate::testing::MockTransport;
    use crate::transport::TransportResponse;

    fn client_with(transport: &MockTransport, config: ClientConfig) -> Client {
        Client::new(config, Arc::new(transport.clone())).unwrap()
    }

    fn config() -> ClientConfig {
        ClientConfig::builder("https://api.example.com").api_path("/v1").build().unwrap()
    }

    /// Validates `Authorization::header_value` and mutual exclusion.
    ///
    /// Assertions:
    /// - Confirms bearer and basic encodings.
    /// - Confirms each setter replaces the previous state.
    #[test]
    fn test_authorization_state() {
        let client = client_with(&MockTransport::new(), config());

        client.set_basic_auth("user", "pass");
        assert_eq!(client.authorization().header_value().as_deref(), Some("Basic dXNlcjpwYXNz"));

        client.set_bearer_token("abc");
        assert_eq!(client.authorization(), Authorization::Bearer("abc".into()));

        client.clear_auth_headers();
        assert_eq!(client.authorization().header_value(), None);
        assert_eq!(format!("{:?}", Authorization::Bearer("secret".into())), "Bearer(<redacted>)");
    }

    /// Validates request shaping for a GET scenario.
    ///
    /// Assertions:
    /// - Confirms global parameters merge into the query with request values winning.
    /// - Confirms global headers, locale header and bearer token are attached.
    #[tokio::test]
    async fn test_get_request_shaping() {
        let transport = MockTransport::new();
        transport.respond_json(HttpMethod::Get, "/v1/items", 200, json!([]));
        let config = ClientConfig::builder("https://api.example.com")
            .api_path("/v1")
            .global_parameter("platform", "ios")
            .global_parameter("page", 1)
            .global_header("X-App", "demo")
            .locale(Locale::header("fr"))
            .build()
            .unwrap();
        let client = client_with(&transport, config);
        client.set_bearer_token("tok");

        let request = Request::builder("/items").param("page", 3).build().unwrap();
        let response = client.perform(request).await;

        assert!(response.is_success());
        let call = transport.last_call().unwrap();
        assert_eq!(call.url.as_str(), "https://api.example.com/v1/items?page=3&platform=ios");
        assert_eq!(call.header("authorization"), Some("Bearer tok"));
        assert_eq!(call.header("x-app"), Some("demo"));
        assert_eq!(call.header("accept-language"), Some("fr"));
        assert!(call.body.is_none());
    }

    /// Validates body encoding for POST with serializer override.
    ///
    /// Assertions:
    /// - Confirms the JSON body and content type by default.
    /// - Confirms the per-request form serializer and locale parameter.
    #[tokio::test]
    async fn test_post_body_encoding() {
        let transport = MockTransport::new();
        transport.respond(HttpMethod::Post, "/v1/items", TransportResponse::new(201, ""));
        transport.respond(HttpMethod::Post, "/v1/items", TransportResponse::new(201, ""));
        let config = ClientConfig::builder("https://api.example.com")
            .api_path("/v1")
            .locale(Locale::parameter("lang", "en"))
            .build()
            .unwrap();
        let client = client_with(&transport, config);

        let json_request =
            Request::builder("/items").method(HttpMethod::Post).param("name", "x").build().unwrap();
        assert!(client.perform(json_request).await.is_success());

        let form_request = Request::builder("/items")
            .method(HttpMethod::Post)
            .param("name", "a b")
            .serializer(RequestSerializer::FormUrlencoded)
            .build()
            .unwrap();
        assert!(client.perform(form_request).await.is_success());

        let calls = transport.calls();
        assert_eq!(calls[0].header("content-type"), Some("application/json"));
        assert_eq!(calls[0].body.as_deref(), Some(br#"{"lang":"en","name":"x"}"#.as_slice()));
        assert_eq!(calls[1].header("content-type"), Some("application/x-www-form-urlencoded"));
        assert_eq!(calls[1].body.as_deref(), Some(b"lang=en&name=a%20b".as_slice()));
    }

    /// Validates multipart uploads scenario.
    ///
    /// Assertions:
    /// - Confirms uploads default to POST with a multipart content type.
    #[tokio::test]
    async fn test_upload_request() {
        let transport = MockTransport::new();
        transport.respond(HttpMethod::Post, "/v1/avatar", TransportResponse::new(204, ""));
        let client = client_with(&transport, config());

        let request = Request::builder("/avatar")
            .upload(UploadPart::new("file", "a.png", "image/png", b"PNG".to_vec()))
            .build()
            .unwrap();
        let response = client.perform(request).await;

        assert!(response.is_success());
        let call = transport.last_call().unwrap();
        assert_eq!(call.method, HttpMethod::Post);
        assert!(call.header("content-type").unwrap().starts_with("multipart/form-data; boundary="));
    }

    /// Validates HTTP error classification.
    ///
    /// Assertions:
    /// - Ensures a 404 yields `Http { status: 404 }` while keeping the JSON body.
    #[tokio::test]
    async fn test_http_error_keeps_body() {
        let transport = MockTransport::new();
        transport.respond_json(HttpMethod::Get, "/v1/items/9", 404, json!({"message": "missing"}));
        let client = client_with(&transport, config());

        let response = client.perform(Request::builder("/items/9").build().unwrap()).await;

        assert_eq!(response.error, Some(ApiError::Http { status: 404 }));
        assert_eq!(response.status, Some(404));
        assert_eq!(response.json().unwrap()["message"], "missing");
    }

    /// Validates the API path override scenario.
    ///
    /// Assertions:
    /// - Confirms the override replaces the configured API path.
    #[tokio::test]
    async fn test_api_path_override() {
        let transport = MockTransport::new();
        transport.respond_json(HttpMethod::Get, "/v2/items", 200, json!({}));
        let client = client_with(&transport, config());

        let response = client
            .perform_with_api_path(Request::builder("/items").build().unwrap(), Some("/v2"))
            .await;

        assert!(response.is_success());
        assert_eq!(transport.last_call().unwrap().url.path(), "/v2/items");
    }

    /// Validates network failure under the default policy.
    ///
    /// Assertions:
    /// - Ensures the transport error is surfaced as `Network`.
    #[tokio::test]
    async fn test_network_error_surfaced_by_default() {
        let transport = MockTransport::new();
        transport.set_offline(true);
        let client = client_with(&transport, config());

        let response = client.perform(Request::builder("/items").build().unwrap()).await;

        assert_eq!(response.error, Some(ApiError::Network(TransportError::Offline)));
        assert_eq!(response.status, None);
    }

    struct CountingDelegate {
        remaps: AtomicUsize,
        errors: AtomicUsize,
    }

    impl ClientDelegate for CountingDelegate {
        fn remap_error(&self, body: Option<&ResponseBody>, error: Option<&ApiError>) -> Option<ApiError> {
            self.remaps.fetch_add(1, Ordering::SeqCst);
            let message = body?.as_json()?.get("error")?.as_str()?.to_string();
            error.map(|_| ApiError::Custom { code: 42, message })
        }

        fn did_receive_error(&self, _response: &Response) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Validates delegate remapping scenario.
    ///
    /// Assertions:
    /// - Confirms remap runs once per response, success or failure.
    /// - Confirms the remapped error is delivered and the error hook fires once.
    #[tokio::test]
    async fn test_delegate_remaps_error_once() {
        let transport = MockTransport::new();
        transport.respond_json(HttpMethod::Get, "/v1/fail", 400, json!({"error": "quota"}));
        transport.respond_json(HttpMethod::Get, "/v1/ok", 200, json!({}));
        let delegate = Arc::new(CountingDelegate { remaps: AtomicUsize::new(0), errors: AtomicUsize::new(0) });
        let client = Client::builder(config())
            .transport(Arc::new(transport.clone()))
            .delegate(delegate.clone())
            .build()
            .unwrap();

        let failed = client.perform(Request::builder("/fail").build().unwrap()).await;
        let ok = client.perform(Request::builder("/ok").build().unwrap()).await;

        assert_eq!(failed.error, Some(ApiError::Custom { code: 42, message: "quota".into() }));
        assert!(ok.is_success());
        assert_eq!(delegate.remaps.load(Ordering::SeqCst), 2);
        assert_eq!(delegate.errors.load(Ordering::SeqCst), 1);
    }

    /// Validates cancellation of an in-flight request.
    ///
    /// Assertions:
    /// - Ensures a held request resolves `Cancelled` after `cancel`.
    /// - Confirms the task is unregistered once resolved.
    #[tokio::test]
    async fn test_cancel_in_flight_request() {
        let transport = MockTransport::new();
        transport.respond_json(HttpMethod::Get, "/v1/slow", 200, json!({}));
        let gate = transport.hold();
        let client = client_with(&transport, config());

        let pending = client.perform(Request::builder("/slow").build().unwrap());
        let task = pending.task_id();
        transport.wait_for_calls(1).await;

        assert!(client.cancel(task));
        let response = pending.await;

        assert_eq!(response.error, Some(ApiError::Cancelled));
        assert_eq!(client.active_tasks(), 0);
        assert!(!client.cancel(task));
        drop(gate);
    }

    /// Validates suspension before send.
    ///
    /// Assertions:
    /// - Ensures a suspended request does not reach the transport until resumed.
    #[tokio::test]
    async fn test_suspend_and_resume() {
        let transport = MockTransport::new();
        transport.respond_json(HttpMethod::Get, "/v1/items", 200, json!({}));
        let client = client_with(&transport, config());

        let pending = client.perform(Request::builder("/items").build().unwrap());
        assert!(client.suspend(pending.task_id()));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(transport.call_count(), 0);

        assert_eq!(client.resume_all(), 1);
        let response = pending.await;
        assert!(response.is_success());
        assert_eq!(transport.call_count(), 1);
    }

    #[derive(Debug, Default)]
    struct ThreadRecordingTransport {
        threads: parking_lot::Mutex<Vec<Option<String>>>,
    }

    #[async_trait::async_trait]
    impl Transport for ThreadRecordingTransport {
        async fn send(&self, _request: TransportRequest) -> Result<TransportResponse, TransportError> {
            self.threads.lock().push(std::thread::current().name().map(str::to_string));
            Ok(TransportResponse::new(200, ""))
        }
    }

    fn named_runtime(name: &str) -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(name)
            .enable_all()
            .build()
            .unwrap()
    }

    /// Validates where a request runs for each completion context source.
    ///
    /// Assertions:
    /// - Confirms a request-level context wins over the client default.
    /// - Confirms the client default is used when the request has none.
    /// - Confirms the caller's runtime is used when neither is set.
    #[test]
    fn test_completion_context_selection() {
        let caller = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let default_runtime = named_runtime("default-context");
        let request_runtime = named_runtime("request-context");
        let transport = Arc::new(ThreadRecordingTransport::default());
        let with_default = Client::builder(config())
            .transport(transport.clone())
            .completion_context(CompletionContext::new(default_runtime.handle().clone()))
            .build()
            .unwrap();
        let plain = Client::new(config(), transport.clone()).unwrap();

        caller.block_on(async {
            let pinned = Request::builder("/a")
                .completion_context(CompletionContext::new(request_runtime.handle().clone()))
                .build()
                .unwrap();
            assert!(with_default.perform(pinned).await.is_success());
            assert!(with_default.perform(Request::builder("/b").build().unwrap()).await.is_success());
            assert!(plain.perform(Request::builder("/c").build().unwrap()).await.is_success());
        });

        let threads = transport.threads.lock().clone();
        assert_eq!(threads.len(), 3);
        assert_eq!(threads[0].as_deref(), Some("request-context"));
        assert_eq!(threads[1].as_deref(), Some("default-context"));
        assert_eq!(threads[2].as_deref(), std::thread::current().name());
    }

    #[derive(Clone, Default)]
    struct LogBuffer(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Validates the dispatch log line scenario.
    ///
    /// Assertions:
    /// - Confirms the request identifier is logged with the dispatched request.
    #[tokio::test]
    async fn test_dispatch_log_carries_identifier() {
        let buffer = LogBuffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _default = tracing::subscriber::set_default(subscriber);

        let transport = MockTransport::new();
        transport.respond_json(HttpMethod::Get, "/v1/items", 200, json!([]));
        let client = client_with(&transport, config());
        let request = Request::builder("/items").param("page", 2).build().unwrap();
        let identifier = request.identifier();

        let response = client.perform(request).await;
        assert!(response.is_success());

        let output = String::from_utf8(buffer.0.lock().clone()).unwrap();
        let line = output.lines().find(|line| line.contains("dispatching request")).unwrap();
        assert!(line.contains(&format!("request={identifier}")), "{line}");
    }
}
