//! Credential slot state machine
//!
//! One slot per access level. All reads and writes go through the slot's
//! mutex, and every transition happens while it is held:
//!
//! ```text
//! Absent ──configure──▶ Present ──acquire (expiring)──▶ Refreshing
//!    ▲                     ▲                               │
//!    │                     └──────── resolve(Ok) ──────────┤
//!    └──────────────────────────────  resolve(Err) ────────┘
//! ```
//!
//! A request that finds the slot `Refreshing` parks a waiter in the slot's
//! FIFO queue; `resolve` drains the queue in arrival order under the lock,
//! so a request arriving mid-drain either sees the final state or is
//! drained with the batch. The generation counter discards results of a
//! refresh that was overtaken by `clear` or `configure`; the clear counter
//! lets a request that was in flight across a logout report `LoggedOut`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::credential::{Credential, SessionAccess};
use crate::error::ApiError;

type Outcome = Result<Arc<Credential>, ApiError>;

#[derive(Debug)]
struct Waiter {
    id: u64,
    tx: oneshot::Sender<Outcome>,
}

#[derive(Debug)]
enum SlotState {
    Absent,
    Present(Arc<Credential>),
    Refreshing { previous: Arc<Credential>, waiters: VecDeque<Waiter> },
}

#[derive(Debug)]
struct SlotInner {
    state: SlotState,
    generation: u64,
    clears: u64,
    next_waiter: u64,
}

impl SlotInner {
    fn enqueue(&mut self, slot: &Arc<Mutex<Self>>) -> Option<WaitTicket> {
        let id = self.next_waiter;
        let SlotState::Refreshing { waiters, .. } = &mut self.state else {
            return None;
        };
        self.next_waiter += 1;
        let (tx, rx) = oneshot::channel();
        waiters.push_back(Waiter { id, tx });
        Some(WaitTicket { id, rx, slot: Arc::clone(slot) })
    }

    /// Enter `Refreshing` from `Present`, queueing the caller first
    fn start_refresh(&mut self, slot: &Arc<Mutex<Self>>, previous: Arc<Credential>) -> Acquire {
        self.generation += 1;
        self.state = SlotState::Refreshing { previous: Arc::clone(&previous), waiters: VecDeque::new() };
        match self.enqueue(slot) {
            Some(ticket) => Acquire::Refresh { ticket, previous, generation: self.generation },
            None => Acquire::Unavailable,
        }
    }

    /// Replace the state, releasing every waiter in arrival order
    fn settle(&mut self, state: SlotState, outcome: &Outcome) -> usize {
        let previous = std::mem::replace(&mut self.state, state);
        let SlotState::Refreshing { waiters, .. } = previous else {
            return 0;
        };
        let released = waiters.len();
        for waiter in waiters {
            // A waiter whose request was dropped mid-wait is skipped.
            let _ = waiter.tx.send(outcome.clone());
        }
        released
    }
}

/// Result of asking a slot for a credential
#[derive(Debug)]
pub(crate) enum Acquire {
    /// Valid credential, use it now
    Ready(Arc<Credential>),
    /// A refresh is in flight; wait for it
    Wait(WaitTicket),
    /// The caller must run the refresh for `generation`, then wait
    Refresh { ticket: WaitTicket, previous: Arc<Credential>, generation: u64 },
    /// Nothing to refresh from
    Unavailable,
    /// The slot was cleared since the caller first looked at it
    LoggedOut,
}

/// One credential holder (`app` or `user`)
#[derive(Debug)]
pub(crate) struct CredentialSlot {
    access: SessionAccess,
    inner: Arc<Mutex<SlotInner>>,
}

impl CredentialSlot {
    pub(crate) fn new(access: SessionAccess) -> Self {
        Self {
            access,
            inner: Arc::new(Mutex::new(SlotInner {
                state: SlotState::Absent,
                generation: 0,
                clears: 0,
                next_waiter: 0,
            })),
        }
    }

    pub(crate) const fn access(&self) -> SessionAccess {
        self.access
    }

    /// Credential valid at `now + offset`, or the way to get one
    pub(crate) fn acquire(&self, now: DateTime<Utc>, offset: Duration) -> Acquire {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let previous = match &inner.state {
            SlotState::Absent => return Acquire::Unavailable,
            SlotState::Present(credential) if credential.is_valid_at(now, offset) => {
                return Acquire::Ready(Arc::clone(credential));
            }
            SlotState::Present(credential) => Some(Arc::clone(credential)),
            SlotState::Refreshing { .. } => None,
        };
        match previous {
            Some(previous) => inner.start_refresh(&self.inner, previous),
            None => inner.enqueue(&self.inner).map_or(Acquire::Unavailable, Acquire::Wait),
        }
    }

    /// Report `stale` as rejected by the server
    ///
    /// Starts a refresh only if `stale` is still the slot's credential; if
    /// another request already replaced it, the newer one is returned.
    /// `seen_clears` is the [`clear_count`](Self::clear_count) read before
    /// `stale` was acquired; a clear since then yields `LoggedOut`.
    pub(crate) fn invalidate(&self, stale: &Arc<Credential>, seen_clears: u64) -> Acquire {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if inner.clears != seen_clears {
            return Acquire::LoggedOut;
        }
        let previous = match &inner.state {
            SlotState::Absent => return Acquire::Unavailable,
            SlotState::Present(current) if !Arc::ptr_eq(current, stale) && current != stale => {
                return Acquire::Ready(Arc::clone(current));
            }
            SlotState::Present(current) => Some(Arc::clone(current)),
            SlotState::Refreshing { .. } => None,
        };
        match previous {
            Some(previous) => inner.start_refresh(&self.inner, previous),
            None => inner.enqueue(&self.inner).map_or(Acquire::Unavailable, Acquire::Wait),
        }
    }

    /// Finish the refresh started for `generation`
    ///
    /// Returns `false` (and changes nothing) if the slot moved on since.
    pub(crate) fn resolve(&self, generation: u64, outcome: Outcome) -> bool {
        let mut inner = self.inner.lock();
        if inner.generation != generation || !matches!(inner.state, SlotState::Refreshing { .. }) {
            return false;
        }
        let next = match &outcome {
            Ok(credential) => SlotState::Present(Arc::clone(credential)),
            Err(_) => SlotState::Absent,
        };
        inner.settle(next, &outcome);
        true
    }

    /// Install a credential, releasing any waiters with it
    pub(crate) fn configure(&self, credential: Credential) -> Arc<Credential> {
        let credential = Arc::new(credential);
        let mut inner = self.inner.lock();
        inner.generation += 1;
        inner.settle(SlotState::Present(Arc::clone(&credential)), &Ok(Arc::clone(&credential)));
        credential
    }

    /// Drop the credential, failing any waiters with `LoggedOut`
    ///
    /// Returns whether the slot held anything.
    pub(crate) fn clear(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        inner.clears += 1;
        let had_credential = !matches!(inner.state, SlotState::Absent);
        inner.settle(SlotState::Absent, &Err(ApiError::LoggedOut));
        had_credential
    }

    /// Current credential, valid or not
    pub(crate) fn current(&self) -> Option<Arc<Credential>> {
        match &self.inner.lock().state {
            SlotState::Absent => None,
            SlotState::Present(credential) | SlotState::Refreshing { previous: credential, .. } => {
                Some(Arc::clone(credential))
            }
        }
    }

    /// Number of `clear` calls so far
    pub(crate) fn clear_count(&self) -> u64 {
        self.inner.lock().clears
    }

    pub(crate) fn is_present(&self) -> bool {
        !matches!(self.inner.lock().state, SlotState::Absent)
    }

    pub(crate) fn is_refreshing(&self) -> bool {
        matches!(self.inner.lock().state, SlotState::Refreshing { .. })
    }

    /// Requests queued behind the in-flight refresh
    pub(crate) fn pending_count(&self) -> usize {
        match &self.inner.lock().state {
            SlotState::Refreshing { waiters, .. } => waiters.len(),
            _ => 0,
        }
    }
}

/// A place in a slot's refresh queue
///
/// Dropping the ticket before the refresh resolves removes exactly this
/// waiter from the queue.
#[derive(Debug)]
pub(crate) struct WaitTicket {
    id: u64,
    rx: oneshot::Receiver<Outcome>,
    slot: Arc<Mutex<SlotInner>>,
}

impl WaitTicket {
    pub(crate) async fn wait(&mut self) -> Outcome {
        match (&mut self.rx).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ApiError::authentication_failed("credential refresh was abandoned")),
        }
    }
}

impl Drop for WaitTicket {
    fn drop(&mut self) {
        let mut inner = self.slot.lock();
        if let SlotState::Refreshing { waiters, .. } = &mut inner.state {
            waiters.retain(|waiter| waiter.id != self.id);
        }
    }
}
