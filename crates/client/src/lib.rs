//! # SessionKit Client
//!
//! Authenticated, cacheable, cancellable access to a JSON REST API.
//!
//! This crate contains:
//! - [`Client`]: request shaping, body encoding, offline cache fallback and
//!   task control over a pluggable [`Transport`]
//! - [`Session`]: OAuth app and user credentials with single-flight refresh
//!   and a one-time retry on `401`/`403`
//! - [`RequestGroup`]: cancel, suspend or resume related requests together
//! - [`ReqwestTransport`] (`reqwest-transport` feature, on by default)
//! - [`testing::MockTransport`]: scripted transport for tests
//!
//! ## Architecture
//! - Configuration is immutable and built once ([`config`])
//! - Every dispatch runs as a tokio task and resolves through a
//!   [`PendingResponse`]
//! - Persistence and time come from `sessionkit-common`
//!   ([`SecureStorage`](sessionkit_common::SecureStorage),
//!   [`Clock`](sessionkit_common::Clock))

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod cache;
pub mod client;
pub mod config;
pub mod credential;
pub mod error;
pub mod group;
pub mod logging;
pub mod request;
pub mod response;
pub mod serializer;
pub mod session;
pub mod task;
pub mod testing;
pub mod transport;

// Re-export commonly used items
pub use client::{Authorization, Client, ClientBuilder, ClientDelegate, RequestExecutor};
pub use config::{CacheManagement, ClientConfig, SessionConfig, TransportConfig};
pub use credential::{Credential, SessionAccess};
pub use error::{ApiError, ApiErrorCategory, TransportError};
pub use group::RequestGroup;
pub use request::{HttpMethod, Request, RequestBuilder};
pub use response::{Response, ResponseBody, ResponseSource};
pub use session::{CredentialSource, Session, SessionBuilder, SessionEvent};
pub use task::{PendingResponse, TaskId};
#[cfg(feature = "reqwest-transport")]
pub use transport::ReqwestTransport;
pub use transport::Transport;
