//! Request groups
//!
//! A [`RequestGroup`] collects task handles so a caller can cancel,
//! suspend or resume them together, e.g. everything a screen started.
//! The group holds only a weak reference to its client; once the client
//! is gone every group operation is a no-op.

use std::sync::Weak;

use parking_lot::Mutex;

use crate::client::{Client, ClientInner};
use crate::task::{PendingResponse, TaskControl, TaskId};

/// Cancellation and suspension scope over dispatched requests
#[derive(Debug)]
pub struct RequestGroup {
    client: Weak<ClientInner>,
    handles: Mutex<Vec<TaskId>>,
}

impl RequestGroup {
    #[must_use]
    pub fn new(client: &Client) -> Self {
        Self { client: client.downgrade(), handles: Mutex::new(Vec::new()) }
    }

    /// Track a dispatched request
    pub fn add_handle(&self, task: TaskId) {
        let mut handles = self.handles.lock();
        if !handles.contains(&task) {
            handles.push(task);
        }
    }

    /// Track a pending response, returning it for chaining
    pub fn track(&self, pending: PendingResponse) -> PendingResponse {
        self.add_handle(pending.task_id());
        pending
    }

    /// Stop tracking a handle; `true` if it was tracked
    pub fn remove_handle(&self, task: TaskId) -> bool {
        let mut handles = self.handles.lock();
        let before = handles.len();
        handles.retain(|id| *id != task);
        handles.len() != before
    }

    /// Apply `op` to every unresolved handle, forgetting resolved ones
    fn for_each_live(&self, op: impl Fn(&TaskControl)) -> usize {
        let Some(client) = self.client.upgrade() else {
            self.handles.lock().clear();
            return 0;
        };
        let mut handles = self.handles.lock();
        let mut applied = 0;
        handles.retain(|id| match client.tasks.get(*id) {
            Some(control) => {
                op(&control);
                applied += 1;
                true
            }
            None => false,
        });
        applied
    }

    /// Cancel every tracked request still in flight
    pub fn cancel_all(&self) -> usize {
        let cancelled = self.for_each_live(TaskControl::cancel);
        tracing::debug!(cancelled, "Request group cancelled");
        cancelled
    }

    pub fn suspend_all(&self) -> usize {
        self.for_each_live(TaskControl::suspend)
    }

    pub fn resume_all(&self) -> usize {
        self.for_each_live(TaskControl::resume)
    }

    /// Number of tracked handles, resolved ones included until the next
    /// group operation
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }
}
