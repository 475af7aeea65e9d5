//! Request descriptor
//!
//! A [`Request`] describes one logical API call: method, resolved path,
//! parameters and per-request overrides. It is built once through
//! [`RequestBuilder`] and then shared read-only by the client, the session
//! and any retry.
//!
//! Path templates accept positional (`{}`) and keyed (`{name}`)
//! placeholders; substituted values are percent-encoded.
//!
//! ```
//! use sessionkit_client::request::{HttpMethod, Request};
//!
//! let request = Request::builder("/users/{}/posts/{post}")
//!     .method(HttpMethod::Get)
//!     .arg(42)
//!     .var("post", "hello world")
//!     .param("page", 2)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(request.path(), "/users/42/posts/hello%20world");
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::runtime::Handle;

use crate::config::{CacheManagement, RequestSerializer};
use crate::credential::SessionAccess;
use crate::error::ApiError;

static PLACEHOLDER: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)?\}"));

/// HTTP methods supported by the pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Head,
    Patch,
}

impl HttpMethod {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Patch => "PATCH",
        }
    }

    /// Parameters travel in the query string rather than the body
    #[must_use]
    pub const fn encodes_parameters_in_query(&self) -> bool {
        matches!(self, Self::Get | Self::Head | Self::Delete)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "DELETE" => Ok(Self::Delete),
            "HEAD" => Ok(Self::Head),
            "PATCH" => Ok(Self::Patch),
            other => Err(ApiError::InvalidRequest(format!("unsupported HTTP method: {other}"))),
        }
    }
}

/// A file attached to a multipart upload
#[derive(Clone, PartialEq, Eq)]
pub struct UploadPart {
    pub field_name: String,
    pub filename: String,
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl UploadPart {
    pub fn new(
        field_name: impl Into<String>,
        filename: impl Into<String>,
        mime_type: impl Into<String>,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            filename: filename.into(),
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }
}

impl fmt::Debug for UploadPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadPart")
            .field("field_name", &self.field_name)
            .field("filename", &self.filename)
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Runtime the response of a request is produced and delivered on
#[derive(Clone)]
pub struct CompletionContext(Handle);

impl CompletionContext {
    #[must_use]
    pub const fn new(handle: Handle) -> Self {
        Self(handle)
    }

    /// Context of the runtime the caller is running on, if any
    #[must_use]
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self)
    }

    #[must_use]
    pub const fn handle(&self) -> &Handle {
        &self.0
    }
}

impl fmt::Debug for CompletionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CompletionContext(..)")
    }
}

/// Logical API request
#[derive(Debug, Clone)]
pub struct Request {
    method: HttpMethod,
    path: String,
    parameters: BTreeMap<String, Value>,
    headers: BTreeMap<String, String>,
    completion_context: Option<CompletionContext>,
    api_path: Option<String>,
    cache_policy: Option<CacheManagement>,
    access: Option<SessionAccess>,
    serializer: Option<RequestSerializer>,
    uploads: Vec<UploadPart>,
}

impl Request {
    /// Start a request for a path template
    pub fn builder(path: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(path)
    }

    #[must_use]
    pub const fn method(&self) -> HttpMethod {
        self.method
    }

    /// Path with every placeholder substituted
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub const fn parameters(&self) -> &BTreeMap<String, Value> {
        &self.parameters
    }

    #[must_use]
    pub const fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    #[must_use]
    pub const fn completion_context(&self) -> Option<&CompletionContext> {
        self.completion_context.as_ref()
    }

    /// API path that replaces the client's for this request
    #[must_use]
    pub fn api_path(&self) -> Option<&str> {
        self.api_path.as_deref()
    }

    #[must_use]
    pub const fn cache_policy(&self) -> Option<CacheManagement> {
        self.cache_policy
    }

    /// Access level the request is pinned to, `None` when unpinned
    #[must_use]
    pub const fn access(&self) -> Option<SessionAccess> {
        self.access
    }

    #[must_use]
    pub const fn serializer(&self) -> Option<RequestSerializer> {
        self.serializer
    }

    #[must_use]
    pub fn uploads(&self) -> &[UploadPart] {
        &self.uploads
    }

    /// Stable hash of method, resolved path and parameters
    ///
    /// Parameter order does not matter. Used for logging and de-duplication.
    #[must_use]
    pub fn identifier(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.method.as_str().as_bytes());
        hasher.update(b" ");
        hasher.update(self.path.as_bytes());
        hasher.update(b"\n");
        // BTreeMap and serde_json's default map are both key-ordered.
        for (key, value) in &self.parameters {
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            hasher.update(value.to_string().as_bytes());
            hasher.update(b"&");
        }
        hex::encode(hasher.finalize())
    }
}

/// Builder for [`Request`]
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    template: String,
    method: Option<HttpMethod>,
    positional: Vec<String>,
    keyed: HashMap<String, String>,
    parameters: BTreeMap<String, Value>,
    headers: BTreeMap<String, String>,
    completion_context: Option<CompletionContext>,
    api_path: Option<String>,
    cache_policy: Option<CacheManagement>,
    access: Option<SessionAccess>,
    serializer: Option<RequestSerializer>,
    uploads: Vec<UploadPart>,
}

impl RequestBuilder {
    fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            method: None,
            positional: Vec::new(),
            keyed: HashMap::new(),
            parameters: BTreeMap::new(),
            headers: BTreeMap::new(),
            completion_context: None,
            api_path: None,
            cache_policy: None,
            access: None,
            serializer: None,
            uploads: Vec::new(),
        }
    }

    /// Defaults to `GET`, or `POST` when upload parts are attached
    #[must_use]
    pub const fn method(mut self, method: HttpMethod) -> Self {
        self.method = Some(method);
        self
    }

    /// Value for the next `{}` placeholder
    #[must_use]
    pub fn arg(mut self, value: impl fmt::Display) -> Self {
        self.positional.push(value.to_string());
        self
    }

    /// Value for the `{name}` placeholder
    #[must_use]
    pub fn var(mut self, name: impl Into<String>, value: impl fmt::Display) -> Self {
        self.keyed.insert(name.into(), value.to_string());
        self
    }

    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.parameters.extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Header sent with this request only; overrides client-level headers
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn completion_context(mut self, context: CompletionContext) -> Self {
        self.completion_context = Some(context);
        self
    }

    #[must_use]
    pub fn api_path(mut self, api_path: impl Into<String>) -> Self {
        self.api_path = Some(api_path.into());
        self
    }

    #[must_use]
    pub const fn cache_policy(mut self, policy: CacheManagement) -> Self {
        self.cache_policy = Some(policy);
        self
    }

    /// Pin the credential slot used by a session
    #[must_use]
    pub const fn access(mut self, access: SessionAccess) -> Self {
        self.access = Some(access);
        self
    }

    #[must_use]
    pub const fn serializer(mut self, serializer: RequestSerializer) -> Self {
        self.serializer = Some(serializer);
        self
    }

    #[must_use]
    pub fn upload(mut self, part: UploadPart) -> Self {
        self.uploads.push(part);
        self
    }

    /// Resolve the path template and produce the request
    ///
    /// # Errors
    /// Returns `InvalidRequest` if a placeholder has no value or positional
    /// arguments are left over.
    pub fn build(self) -> Result<Request, ApiError> {
        let path = resolve_path(&self.template, &self.positional, &self.keyed)?;
        let method = self.method.unwrap_or(if self.uploads.is_empty() {
            HttpMethod::Get
        } else {
            HttpMethod::Post
        });

        Ok(Request {
            method,
            path,
            parameters: self.parameters,
            headers: self.headers,
            completion_context: self.completion_context,
            api_path: self.api_path,
            cache_policy: self.cache_policy,
            access: self.access,
            serializer: self.serializer,
            uploads: self.uploads,
        })
    }
}

fn resolve_path(
    template: &str,
    positional: &[String],
    keyed: &HashMap<String, String>,
) -> Result<String, ApiError> {
    let pattern = match &*PLACEHOLDER {
        Ok(pattern) => pattern,
        Err(e) => return Err(ApiError::InvalidRequest(format!("placeholder pattern: {e}"))),
    };

    let mut resolved = String::with_capacity(template.len());
    let mut remaining = positional.iter();
    let mut last = 0;

    for captures in pattern.captures_iter(template) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        resolved.push_str(&template[last..whole.start()]);

        let value = match captures.get(1) {
            Some(name) => keyed.get(name.as_str()).ok_or_else(|| {
                ApiError::InvalidRequest(format!(
                    "no value for placeholder `{{{}}}` in {template}",
                    name.as_str()
                ))
            })?,
            None => remaining.next().ok_or_else(|| {
                ApiError::InvalidRequest(format!("not enough arguments for {template}"))
            })?,
        };
        resolved.push_str(&urlencoding::encode(value));
        last = whole.end();
    }
    resolved.push_str(&template[last..]);

    let unused = remaining.count();
    if unused > 0 {
        return Err(ApiError::InvalidRequest(format!(
            "{unused} unused path argument(s) for {template}"
        )));
    }

    Ok(resolved)
}
