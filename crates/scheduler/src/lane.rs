use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use crate::error::SchedulerError;
use crate::group::WorkerGroup;
use crate::handle::CancellationHandle;
use crate::item::WorkItem;
use crate::runner::Shared;
use crate::sync::lock;

/// Tracked handles below this count are never pruned.
const PRUNE_THRESHOLD: usize = 64;

/// Handles given out by a lane. Finished ones are dropped in batches, once
/// the set doubles past the size left by the previous prune.
struct Outstanding {
    handles: Vec<CancellationHandle>,
    prune_at: usize,
}

impl Outstanding {
    fn new() -> Self {
        Self {
            handles: Vec::new(),
            prune_at: PRUNE_THRESHOLD,
        }
    }

    fn track(&mut self, handle: CancellationHandle) {
        if self.handles.len() >= self.prune_at {
            self.handles.retain(|h| !h.is_done());
            self.prune_at = (self.handles.len() * 2).max(PRUNE_THRESHOLD);
        }
        self.handles.push(handle);
    }

    fn forget(&mut self, sequence: u64) {
        self.handles.retain(|h| h.sequence() != sequence);
    }
}

/// Caller-facing handle bound to one priority value.
///
/// Obtained from [`crate::PriorityScheduler::priority`]. Every item submitted
/// through a lane carries the lane's priority; the lane remembers the handles
/// it gave out so [`dispose_all`](Self::dispose_all) can cancel them.
/// Dropping a lane does not cancel anything.
pub struct Lane {
    priority: i32,
    group: Arc<WorkerGroup>,
    shared: Arc<Shared>,
    outstanding: Mutex<Outstanding>,
}

impl Lane {
    pub(crate) fn new(priority: i32, group: Arc<WorkerGroup>, shared: Arc<Shared>) -> Self {
        Self {
            priority,
            group,
            shared,
            outstanding: Mutex::new(Outstanding::new()),
        }
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Queue `action` to run as soon as a worker is free and nothing with
    /// a higher priority is waiting.
    pub fn submit<F>(&self, action: F) -> Result<CancellationHandle, SchedulerError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_delayed(action, Duration::ZERO)
    }

    /// Queue `action`, eligible to run no earlier than `delay` from now.
    pub fn submit_delayed<F>(
        &self,
        action: F,
        delay: Duration,
    ) -> Result<CancellationHandle, SchedulerError>
    where
        F: FnOnce() + Send + 'static,
    {
        let item = Arc::new(WorkItem::new(
            Box::new(action),
            self.priority,
            delay,
            &self.shared.sequencer,
        ));
        self.group.ensure_worker()?;

        let handle = CancellationHandle::new(Arc::clone(&item), Arc::clone(&self.shared));
        lock(&self.outstanding).track(handle.clone());

        if let Err(e) = self.shared.queue.offer(item) {
            lock(&self.outstanding).forget(handle.sequence());
            return Err(e);
        }

        if let Ok(mut m) = self.shared.metrics.write() {
            m.record_submission();
        }
        Ok(handle)
    }

    /// Cancel one of this lane's items. See [`CancellationHandle::cancel`].
    pub fn cancel(&self, handle: &CancellationHandle) -> bool {
        handle.cancel()
    }

    /// Cancel every item this lane submitted that has not started yet.
    ///
    /// Returns how many items this call cancelled. Safe to call repeatedly;
    /// the lane stays usable for new submissions.
    pub fn dispose_all(&self) -> usize {
        let drained = {
            let mut outstanding = lock(&self.outstanding);
            outstanding.prune_at = PRUNE_THRESHOLD;
            std::mem::take(&mut outstanding.handles)
        };
        let cancelled = drained.iter().filter(|h| h.try_cancel()).count();
        if cancelled > 0 {
            debug!(priority = self.priority, cancelled, "lane disposed");
        }
        cancelled
    }

    /// Items submitted through this lane that have not reached a final state.
    pub fn outstanding(&self) -> usize {
        lock(&self.outstanding)
            .handles
            .iter()
            .filter(|h| !h.is_done())
            .count()
    }
}

impl fmt::Debug for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lane")
            .field("priority", &self.priority)
            .field("outstanding", &self.outstanding())
            .finish()
    }
}
