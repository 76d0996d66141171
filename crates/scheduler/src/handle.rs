use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::item::{TaskState, WorkItem};
use crate::runner::Shared;

/// Returned by every submission; cancels the item if it has not started.
#[derive(Clone)]
pub struct CancellationHandle {
    item: Arc<WorkItem>,
    shared: Arc<Shared>,
}

impl CancellationHandle {
    pub(crate) fn new(item: Arc<WorkItem>, shared: Arc<Shared>) -> Self {
        Self { item, shared }
    }

    /// Prevent the item from running.
    ///
    /// Returns `true` if the item is (now) cancelled, whether it was still
    /// queued or already dequeued by a worker that had not claimed it yet.
    /// Returns `false` as soon as the action has started, even while it is
    /// still running. A started action is never interrupted.
    pub fn cancel(&self) -> bool {
        self.try_cancel() || self.is_cancelled()
    }

    /// Like [`cancel`](Self::cancel) but only `true` for the call that made
    /// the transition.
    pub(crate) fn try_cancel(&self) -> bool {
        if !self.item.mark_cancelled() {
            return false;
        }
        // Losing to a concurrent take is fine: the worker's claim fails.
        let removed = self.shared.queue.remove(&self.item);
        if let Ok(mut m) = self.shared.metrics.write() {
            m.record_cancellation(1);
        }
        trace!(sequence = self.item.sequence(), removed, "item cancelled");
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.item.state() == TaskState::Cancelled
    }

    /// Whether the item reached a final state (ran or was cancelled).
    pub fn is_done(&self) -> bool {
        matches!(self.item.state(), TaskState::Completed | TaskState::Cancelled)
    }

    pub fn state(&self) -> TaskState {
        self.item.state()
    }

    pub fn priority(&self) -> i32 {
        self.item.priority()
    }

    pub(crate) fn sequence(&self) -> u64 {
        self.item.sequence()
    }
}

impl fmt::Debug for CancellationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationHandle")
            .field("item", &self.item)
            .finish()
    }
}
