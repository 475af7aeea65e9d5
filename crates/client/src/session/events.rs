//! Session observer events
//!
//! Delivered through [`Session::subscribe`](super::Session::subscribe).
//! Receivers that fall behind lose the oldest events.

use serde::Serialize;

use crate::credential::SessionAccess;

/// How a slot's credential was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    /// Password grant
    Login,
    /// Refresh-token grant, or client credentials re-run for the app slot
    Refresh,
    /// Explicit client-credentials grant
    ClientCredentials,
    /// Installed by the caller
    Manual,
    /// Loaded from secure storage
    Restored,
}

/// Slot transitions worth surfacing to the host application
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    CredentialConfigured { access: SessionAccess, source: CredentialSource },
    /// A refresh failed and the slot is now empty; the user should sign in
    /// again
    SlotCleared { access: SessionAccess, reason: String },
    LoggedOut,
}

impl SessionEvent {
    /// Slot the event concerns, `None` for session-wide events
    #[must_use]
    pub const fn access(&self) -> Option<SessionAccess> {
        match self {
            Self::CredentialConfigured { access, .. } | Self::SlotCleared { access, .. } => {
                Some(*access)
            }
            Self::LoggedOut => None,
        }
    }
}
