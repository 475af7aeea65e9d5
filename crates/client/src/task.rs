//! Dispatched request tasks
//!
//! Every dispatch gets a [`TaskId`] and a [`TaskControl`] registered with the
//! client. The control carries two signals:
//!
//! - a cancellation token: the task stops at its next checkpoint and resolves
//!   with [`ApiError::Cancelled`];
//! - a run gate: while suspended, the task parks at its next checkpoint
//!   (before sending, and before delivering the response).
//!
//! The registry entry is removed when the task resolves, so later
//! cancel/suspend/resume calls on the id are no-ops.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use dashmap::DashMap;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::error::ApiError;
use crate::request::Request;
use crate::response::Response;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque handle identifying a dispatched request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Cancel and suspend signals for one task
#[derive(Debug, Clone)]
pub struct TaskControl {
    id: TaskId,
    cancel: CancellationToken,
    running: Arc<watch::Sender<bool>>,
}

impl Default for TaskControl {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskControl {
    #[must_use]
    pub fn new() -> Self {
        let (running, _) = watch::channel(true);
        Self { id: TaskId::next(), cancel: CancellationToken::new(), running: Arc::new(running) }
    }

    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
        // Wake a suspended task so it observes the cancellation.
        self.running.send_replace(true);
    }

    pub fn suspend(&self) {
        if !self.cancel.is_cancelled() {
            self.running.send_replace(false);
        }
    }

    pub fn resume(&self) {
        self.running.send_replace(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    #[must_use]
    pub fn is_suspended(&self) -> bool {
        !*self.running.borrow()
    }

    /// Resolves once cancelled
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Wait while suspended
    ///
    /// # Errors
    /// Returns `ApiError::Cancelled` once the task is cancelled.
    pub async fn checkpoint(&self) -> Result<(), ApiError> {
        if self.cancel.is_cancelled() {
            return Err(ApiError::Cancelled);
        }
        let mut rx = self.running.subscribe();
        let resumed = async move {
            // The sender lives in `self`, so the channel cannot close here.
            let _ = rx.wait_for(|running| *running).await;
        };
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(ApiError::Cancelled),
            () = resumed => {}
        }
        if self.cancel.is_cancelled() {
            return Err(ApiError::Cancelled);
        }
        Ok(())
    }
}

/// Outstanding tasks of a client
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: DashMap<TaskId, TaskControl>,
}

impl TaskRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task; the entry lives as long as the returned guard
    pub(crate) fn register(self: &Arc<Self>, control: TaskControl) -> TaskGuard {
        let id = control.id();
        self.tasks.insert(id, control);
        TaskGuard { id, registry: Arc::clone(self) }
    }

    #[must_use]
    pub fn get(&self, id: TaskId) -> Option<TaskControl> {
        self.tasks.get(&id).map(|entry| entry.value().clone())
    }

    fn apply(&self, id: TaskId, op: impl FnOnce(&TaskControl)) -> bool {
        let Some(control) = self.get(id) else {
            return false;
        };
        op(&control);
        true
    }

    /// Cancel one task; `false` if it already resolved
    pub fn cancel(&self, id: TaskId) -> bool {
        self.apply(id, TaskControl::cancel)
    }

    pub fn suspend(&self, id: TaskId) -> bool {
        self.apply(id, TaskControl::suspend)
    }

    pub fn resume(&self, id: TaskId) -> bool {
        self.apply(id, TaskControl::resume)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    fn controls(&self) -> Vec<TaskControl> {
        self.tasks.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn cancel_all(&self) -> usize {
        let controls = self.controls();
        controls.iter().for_each(TaskControl::cancel);
        controls.len()
    }

    pub fn suspend_all(&self) -> usize {
        let controls = self.controls();
        controls.iter().for_each(TaskControl::suspend);
        controls.len()
    }

    pub fn resume_all(&self) -> usize {
        let controls = self.controls();
        controls.iter().for_each(TaskControl::resume);
        controls.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Removes a task from its registry on drop
#[derive(Debug)]
pub(crate) struct TaskGuard {
    id: TaskId,
    registry: Arc<TaskRegistry>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.registry.tasks.remove(&self.id);
    }
}

/// Response of a dispatched request, resolved exactly once
///
/// Dropping it detaches from the task without cancelling it; use
/// [`Client::cancel`](crate::client::Client::cancel) with
/// [`task_id`](Self::task_id) to cancel.
#[derive(Debug)]
pub struct PendingResponse {
    id: TaskId,
    request: Arc<Request>,
    receiver: oneshot::Receiver<Response>,
}

impl PendingResponse {
    pub(crate) const fn new(
        id: TaskId,
        request: Arc<Request>,
        receiver: oneshot::Receiver<Response>,
    ) -> Self {
        Self { id, request, receiver }
    }

    /// Handle for cancel, suspend, resume and request groups
    #[must_use]
    pub const fn task_id(&self) -> TaskId {
        self.id
    }

    #[must_use]
    pub fn request(&self) -> &Arc<Request> {
        &self.request
    }
}

impl Future for PendingResponse {
    type Output = Response;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(response)) => Poll::Ready(response),
            // The task was dropped before delivering, e.g. runtime shutdown.
            Poll::Ready(Err(_)) => {
                Poll::Ready(Response::failure(Arc::clone(&this.request), ApiError::Cancelled))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
