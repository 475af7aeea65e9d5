//! Authenticated dispatch
//!
//! A [`Session`] wraps a [`Client`] and guarantees every request leaves
//! with a usable bearer credential. It owns two independent credential
//! slots, `app` and `user`:
//!
//! - a request picks its slot (pinned on the request, else `user` when the
//!   user slot holds a credential, else `app` when app tokens are enabled);
//! - a valid credential is attached and the request is sent at once;
//! - an expiring credential starts exactly one refresh exchange for that
//!   slot, and every request arriving meanwhile is parked behind it and
//!   released in arrival order once the exchange resolves;
//! - a `401`/`403` answer triggers one refresh and one retry, never more.
//!
//! Credentials are persisted to [`SecureStorage`] after every exchange and
//! can be restored at startup with [`Session::restore`]. Slot transitions
//! are published as [`SessionEvent`]s through [`Session::subscribe`].
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use sessionkit_client::client::{Client, RequestExecutor};
//! use sessionkit_client::config::{ClientConfig, SessionConfig};
//! use sessionkit_client::request::Request;
//! use sessionkit_client::session::Session;
//!
//! # async fn run() -> Result<(), sessionkit_client::error::ApiError> {
//! let client = Client::builder(ClientConfig::builder("https://api.example.com").build()?).build()?;
//! let session = Session::new(client, SessionConfig::builder("/oauth/token", "app-id", "").build()?)?;
//!
//! session.login("ann", "secret").await?;
//! let response = session.perform(Request::builder("/me").build()?).await;
//! assert!(response.is_success());
//! # Ok(())
//! # }
//! ```

mod events;
mod exchange;
mod slot;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use sessionkit_common::{Clock, MemoryStorage, SecureStorage, SystemClock};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub use events::{CredentialSource, SessionEvent};

use self::exchange::Grant;
use self::slot::{Acquire, CredentialSlot};
use crate::client::{Client, RequestExecutor};
use crate::config::SessionConfig;
use crate::credential::{Credential, SessionAccess};
use crate::error::ApiError;
use crate::request::Request;
use crate::response::Response;
use crate::task::{PendingResponse, TaskControl};

const EVENT_CAPACITY: usize = 32;

struct SessionInner {
    client: Client,
    config: SessionConfig,
    app: CredentialSlot,
    user: CredentialSlot,
    storage: Arc<dyn SecureStorage>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<SessionEvent>,
    /// Serializes "set the client's authorization, then snapshot it"
    auth_lock: Mutex<()>,
}

/// OAuth session over a [`Client`]
///
/// Cheap to clone; clones share slots, storage and subscribers.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("client", &self.inner.client)
            .field("access", &self.access())
            .field("app_refreshing", &self.inner.app.is_refreshing())
            .field("user_refreshing", &self.inner.user.is_refreshing())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Session with in-memory storage and the system clock
    ///
    /// # Errors
    /// Returns `ApiError::Config` if the session configuration is invalid.
    pub fn new(client: Client, config: SessionConfig) -> Result<Self, ApiError> {
        Self::builder(client, config).build()
    }

    pub fn builder(client: Client, config: SessionConfig) -> SessionBuilder {
        SessionBuilder { client, config, storage: None, clock: None }
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Highest access level currently held (valid or not)
    #[must_use]
    pub fn access(&self) -> SessionAccess {
        if self.inner.user.is_present() {
            SessionAccess::User
        } else if self.inner.app.is_present() {
            SessionAccess::App
        } else {
            SessionAccess::None
        }
    }

    /// Snapshot of a slot's credential, valid or not
    #[must_use]
    pub fn credential(&self, access: SessionAccess) -> Option<Credential> {
        self.inner.slot(access)?.current().map(|credential| Credential::clone(&credential))
    }

    /// Requests parked behind the slot's refresh
    #[must_use]
    pub fn pending_count(&self, access: SessionAccess) -> usize {
        self.inner.slot(access).map_or(0, CredentialSlot::pending_count)
    }

    #[must_use]
    pub fn is_refreshing(&self, access: SessionAccess) -> bool {
        self.inner.slot(access).is_some_and(CredentialSlot::is_refreshing)
    }

    /// Observe slot transitions from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Password grant into the `user` slot
    ///
    /// With app tokens enabled, also obtains an app credential when the app
    /// slot has no valid one; failing that is logged, not returned.
    /// Concurrent logins are not coalesced.
    ///
    /// # Errors
    /// `AuthenticationFailed` if the endpoint rejects the grant,
    /// `MalformedCredential` if the answer is not a usable token.
    pub async fn login(&self, username: &str, password: &str) -> Result<Credential, ApiError> {
        let grant = Grant::Password { username: username.to_string(), password: password.to_string() };
        let credential = match self.inner.exchange(&grant).await {
            Ok(credential) => credential,
            Err(err) => {
                warn!(error = %err, "login failed");
                return Err(err);
            }
        };
        let installed = self.inner.install(&self.inner.user, credential, CredentialSource::Login).await;

        if self.inner.config.use_app_token && !self.inner.holds_valid(&self.inner.app) {
            if let Err(error) = self.authenticate_app().await {
                warn!(%error, "app credential unavailable after login");
            }
        }
        Ok(Credential::clone(&installed))
    }

    /// Client-credentials grant into the `app` slot
    ///
    /// # Errors
    /// Same as [`Session::login`].
    pub async fn authenticate_app(&self) -> Result<Credential, ApiError> {
        let credential = self.inner.exchange(&Grant::ClientCredentials).await?;
        let installed =
            self.inner.install(&self.inner.app, credential, CredentialSource::ClientCredentials).await;
        Ok(Credential::clone(&installed))
    }

    /// Clear both slots, persisted credentials and the offline cache
    ///
    /// Requests parked behind a refresh fail with `LoggedOut`, as do
    /// requests already sent whose credential is rejected afterwards; a
    /// refresh still in flight is discarded when it resolves. Cached responses were
    /// fetched with the cleared credentials, so none survive the logout.
    pub async fn logout(&self) {
        let inner = &self.inner;
        let had_app = inner.app.clear();
        let had_user = inner.user.clear();
        {
            let _attach = inner.auth_lock.lock();
            inner.client.clear_auth_headers();
        }
        inner.client.offline_cache().clear();
        inner.forget(SessionAccess::App).await;
        inner.forget(SessionAccess::User).await;

        info!(had_app, had_user, "logged out");
        inner.emit(SessionEvent::LoggedOut);
    }

    /// Install a credential without an exchange
    ///
    /// Releases any requests parked behind the slot with it.
    ///
    /// # Errors
    /// Returns `ApiError::Config` for `SessionAccess::None`.
    pub async fn configure_credential(
        &self,
        credential: Credential,
        access: SessionAccess,
    ) -> Result<(), ApiError> {
        let slot = self.inner.slot(access).ok_or_else(|| {
            ApiError::Config("credentials can only be configured for the app or user slot".into())
        })?;
        self.inner.install(slot, credential, CredentialSource::Manual).await;
        Ok(())
    }

    /// Load persisted credentials into both slots
    ///
    /// Expired credentials are restored too and refreshed on first use.
    /// Unreadable entries are deleted. Returns the number of slots filled.
    pub async fn restore(&self) -> usize {
        let inner = &self.inner;
        let mut restored = 0;
        for slot in [&inner.app, &inner.user] {
            let access = slot.access();
            let key = inner.config.storage_key(access.as_str());
            let bytes = match inner.storage.get(&key).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(error) => {
                    warn!(%access, %error, "failed to read persisted credential");
                    continue;
                }
            };
            match serde_json::from_slice::<Credential>(&bytes) {
                Ok(credential) => {
                    inner.install(slot, credential, CredentialSource::Restored).await;
                    restored += 1;
                }
                Err(error) => {
                    warn!(%access, %error, "discarding unreadable persisted credential");
                    inner.forget(access).await;
                }
            }
        }
        restored
    }

    /// Resolve once the slot for `access` holds a valid credential
    ///
    /// Drives a refresh when needed; `SessionAccess::None` resolves at once.
    ///
    /// # Errors
    /// `AuthenticationFailed` when the slot is empty or its refresh fails,
    /// `LoggedOut` when a logout overtakes the refresh.
    pub async fn validate_access(&self, access: SessionAccess) -> Result<(), ApiError> {
        let Some(slot) = self.inner.slot(access) else {
            return Ok(());
        };
        let acquire = slot.acquire(self.inner.clock.now(), self.inner.config.valid_token_offset);
        self.inner.obtain(access, acquire, &TaskControl::new()).await.map(|_| ())
    }
}

impl RequestExecutor for Session {
    fn perform_with_api_path(&self, request: Request, api_path: Option<&str>) -> PendingResponse {
        let inner = Arc::clone(&self.inner);
        let api_path = api_path.map(str::to_string);
        self.inner.client.spawn_task(Arc::new(request), move |request, control| async move {
            inner.dispatch(request, api_path.as_deref(), &control).await
        })
    }

    fn client(&self) -> &Client {
        &self.inner.client
    }
}

impl SessionInner {
    const fn slot(&self, access: SessionAccess) -> Option<&CredentialSlot> {
        match access {
            SessionAccess::None => None,
            SessionAccess::App => Some(&self.app),
            SessionAccess::User => Some(&self.user),
        }
    }

    fn resolve_access(&self, request: &Request) -> SessionAccess {
        match request.access() {
            Some(access) => access,
            None if self.user.is_present() => SessionAccess::User,
            None if self.config.use_app_token => SessionAccess::App,
            None => SessionAccess::None,
        }
    }

    fn holds_valid(&self, slot: &CredentialSlot) -> bool {
        slot.current()
            .is_some_and(|credential| credential.is_valid_at(self.clock.now(), self.config.valid_token_offset))
    }

    async fn dispatch(
        self: &Arc<Self>,
        request: Arc<Request>,
        api_path: Option<&str>,
        control: &TaskControl,
    ) -> Response {
        let access = self.resolve_access(&request);
        let Some(slot) = self.slot(access) else {
            return self.send(&request, api_path, None, control).await;
        };

        let seen_clears = slot.clear_count();
        let acquire = slot.acquire(self.clock.now(), self.config.valid_token_offset);
        let credential = match self.obtain(access, acquire, control).await {
            Ok(credential) => credential,
            Err(err) => return Response::failure(request, err),
        };
        let response = self.send(&request, api_path, Some(&credential), control).await;
        if !response.is_auth_rejection() {
            return response;
        }

        debug!(task = %control.id(), %access, status = ?response.status, "credential rejected, retrying once");
        let retry = slot.invalidate(&credential, seen_clears);
        let credential = match self.obtain(access, retry, control).await {
            Ok(credential) => credential,
            Err(err) => return Response::failure(request, err),
        };
        self.send(&request, api_path, Some(&credential), control).await
    }

    /// Turn a slot answer into a credential, running or awaiting the refresh
    async fn obtain(
        self: &Arc<Self>,
        access: SessionAccess,
        acquire: Acquire,
        control: &TaskControl,
    ) -> Result<Arc<Credential>, ApiError> {
        let mut ticket = match acquire {
            Acquire::Ready(credential) => return Ok(credential),
            Acquire::Unavailable => {
                return Err(ApiError::authentication_failed(format!("no {access} credential")));
            }
            Acquire::LoggedOut => return Err(ApiError::LoggedOut),
            Acquire::Wait(ticket) => {
                debug!(task = %control.id(), %access, "queued behind credential refresh");
                ticket
            }
            Acquire::Refresh { ticket, previous, generation } => {
                info!(%access, "credential expiring, refreshing");
                // Detached so cancelling the request that started it does
                // not abandon the requests queued behind it.
                let refresh = Arc::clone(self).run_refresh(access, previous, generation);
                match Handle::try_current() {
                    Ok(handle) => {
                        handle.spawn(refresh);
                    }
                    Err(_) => refresh.await,
                }
                ticket
            }
        };

        tokio::select! {
            biased;
            () = control.cancelled() => Err(ApiError::Cancelled),
            outcome = ticket.wait() => outcome,
        }
    }

    async fn run_refresh(
        self: Arc<Self>,
        access: SessionAccess,
        previous: Arc<Credential>,
        generation: u64,
    ) {
        let Some(slot) = self.slot(access) else {
            return;
        };
        let grant = match (previous.refresh_token(), access) {
            (Some(token), _) => Ok(Grant::RefreshToken(token.to_string())),
            (None, SessionAccess::App) => Ok(Grant::ClientCredentials),
            (None, _) => Err(ApiError::authentication_failed(format!(
                "{access} credential expired without a refresh token"
            ))),
        };
        let outcome = match grant {
            Ok(grant) => self
                .exchange(&grant)
                .await
                .map(|credential| keep_refresh_token(credential, &previous)),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(credential) => {
                let credential = Arc::new(credential);
                if !slot.resolve(generation, Ok(Arc::clone(&credential))) {
                    debug!(%access, "refresh overtaken, result discarded");
                    return;
                }
                info!(%access, "credential refreshed");
                self.persist(access, &credential).await;
                self.emit(SessionEvent::CredentialConfigured { access, source: CredentialSource::Refresh });
            }
            Err(err) => {
                if !slot.resolve(generation, Err(err.clone())) {
                    debug!(%access, error = %err, "refresh overtaken, failure discarded");
                    return;
                }
                warn!(%access, error = %err, "credential refresh failed, slot cleared");
                self.forget(access).await;
                self.emit(SessionEvent::SlotCleared { access, reason: err.to_string() });
            }
        }
    }

    async fn send(
        &self,
        request: &Arc<Request>,
        api_path: Option<&str>,
        credential: Option<&Credential>,
        control: &TaskControl,
    ) -> Response {
        let authorization = {
            let _attach = self.auth_lock.lock();
            match credential {
                Some(credential) => self.client.set_bearer_token(credential.access_token()),
                None => self.client.clear_auth_headers(),
            }
            self.client.authorization()
        };
        self.client.execute(request, api_path, &authorization, control).await
    }

    async fn exchange(&self, grant: &Grant) -> Result<Credential, ApiError> {
        exchange::exchange(&self.client, &self.config, self.clock.now(), grant).await
    }

    async fn install(
        &self,
        slot: &CredentialSlot,
        credential: Credential,
        source: CredentialSource,
    ) -> Arc<Credential> {
        let access = slot.access();
        let credential = slot.configure(credential);
        info!(%access, ?source, "credential configured");
        if source != CredentialSource::Restored {
            self.persist(access, &credential).await;
        }
        self.emit(SessionEvent::CredentialConfigured { access, source });
        credential
    }

    /// Best-effort write of a slot's credential
    async fn persist(&self, access: SessionAccess, credential: &Credential) {
        let key = self.config.storage_key(access.as_str());
        let written = match serde_json::to_vec(credential) {
            Ok(bytes) => self.storage.set(&key, &bytes).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(error) = written {
            warn!(%access, %error, "failed to persist credential");
        }
    }

    async fn forget(&self, access: SessionAccess) {
        let key = self.config.storage_key(access.as_str());
        if let Err(error) = self.storage.delete(&key).await {
            warn!(%access, %error, "failed to delete persisted credential");
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// A refresh answer without a refresh token keeps the previous one
fn keep_refresh_token(credential: Credential, previous: &Credential) -> Credential {
    if credential.refresh_token().is_none() {
        if let Some(token) = previous.refresh_token() {
            return credential.with_refresh_token(token);
        }
    }
    credential
}

/// Builder for [`Session`]
pub struct SessionBuilder {
    client: Client,
    config: SessionConfig,
    storage: Option<Arc<dyn SecureStorage>>,
    clock: Option<Arc<dyn Clock>>,
}

impl SessionBuilder {
    /// Where credentials are persisted; in-memory by default
    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn SecureStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Time source for validity checks and expiry computation
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// # Errors
    /// Returns `ApiError::Config` if the session configuration is invalid.
    pub fn build(self) -> Result<Session, ApiError> {
        self.config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Session {
            inner: Arc::new(SessionInner {
                client: self.client,
                config: self.config,
                app: CredentialSlot::new(SessionAccess::App),
                user: CredentialSlot::new(SessionAccess::User),
                storage: self.storage.unwrap_or_else(|| Arc::new(MemoryStorage::new())),
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                events,
                auth_lock: Mutex::new(()),
            }),
        })
    }
}
