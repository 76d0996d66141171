//! Worker groups and the worker loop.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{debug, trace, warn};

use crate::error::{ActionFailure, SchedulerError};
use crate::runner::Shared;
use crate::sync::lock;

/// Identifies which pool a lane's spawn requests count against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum GroupKey {
    Tier(i32),
    Shared,
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Tier(p) => write!(f, "tier:{}", p),
            GroupKey::Shared => write!(f, "shared"),
        }
    }
}

#[derive(Default)]
struct Workers {
    spawned: usize,
    handles: Vec<JoinHandle<()>>,
}

/// A capped set of worker loops, all draining the scheduler's shared queue.
///
/// Workers are added one at a time as lanes are created and are only torn
/// down together, when the queue closes.
pub(crate) struct WorkerGroup {
    key: GroupKey,
    concurrency: usize,
    workers: Mutex<Workers>,
    shared: Arc<Shared>,
}

impl WorkerGroup {
    pub(crate) fn new(key: GroupKey, concurrency: usize, shared: Arc<Shared>) -> Self {
        Self {
            key,
            concurrency,
            workers: Mutex::new(Workers::default()),
            shared,
        }
    }

    /// Spawn one more worker if the group is under its cap.
    ///
    /// Returns whether a worker was spawned.
    pub(crate) fn try_spawn(&self) -> Result<bool, SchedulerError> {
        let mut workers = lock(&self.workers);
        if self.shared.queue.is_closed() {
            return Err(SchedulerError::ShutDown);
        }
        if workers.spawned >= self.concurrency {
            return Ok(false);
        }
        self.spawn_locked(&mut workers)?;
        Ok(true)
    }

    /// Make sure at least one worker serves this group.
    pub(crate) fn ensure_worker(&self) -> Result<(), SchedulerError> {
        let mut workers = lock(&self.workers);
        if self.shared.queue.is_closed() {
            return Err(SchedulerError::ShutDown);
        }
        if workers.spawned == 0 && self.concurrency > 0 {
            self.spawn_locked(&mut workers)?;
        }
        Ok(())
    }

    fn spawn_locked(&self, workers: &mut Workers) -> Result<(), SchedulerError> {
        let index = workers.spawned;
        let group = self.key.to_string();
        let config = &self.shared.config;

        let mut builder =
            thread::Builder::new().name(format!("{}-{}-{}", config.thread_name, group, index));
        if let Some(size) = config.stack_size {
            builder = builder.stack_size(size);
        }

        let shared = Arc::clone(&self.shared);
        let worker_group = group.clone();
        let handle = builder
            .spawn(move || run_worker(shared, worker_group, index))
            .map_err(|source| SchedulerError::Spawn {
                group: group.clone(),
                source,
            })?;

        workers.spawned += 1;
        workers.handles.push(handle);
        if let Ok(mut m) = self.shared.metrics.write() {
            m.record_worker(&group);
        }
        debug!(group = %group, index, cap = self.concurrency, "worker spawned");
        Ok(())
    }

    pub(crate) fn active_workers(&self) -> usize {
        lock(&self.workers).spawned
    }

    /// Wait for every worker to exit. Only returns once the queue is closed.
    /// A worker joining its own group skips itself.
    pub(crate) fn join(&self) {
        let handles = std::mem::take(&mut lock(&self.workers).handles);
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!(group = %self.key, "worker thread panicked outside an action");
            }
        }
    }
}

/// Idle (blocked in `take`) -> Running -> Idle ... -> Terminated once the
/// queue closes.
fn run_worker(shared: Arc<Shared>, group: String, index: usize) {
    debug!(group = %group, index, "worker started");

    while let Some(item) = shared.queue.take() {
        let Some(action) = item.claim() else {
            trace!(sequence = item.sequence(), "skipping cancelled item");
            continue;
        };

        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(action));
        item.complete();

        if let Ok(mut m) = shared.metrics.write() {
            m.record_execution(started.elapsed(), outcome.is_err());
        }

        if let Err(payload) = outcome {
            let failure = ActionFailure::from_panic(item.priority(), item.sequence(), payload);
            warn!(
                group = %group,
                priority = failure.priority,
                sequence = failure.sequence,
                error = %failure.message,
                "action panicked"
            );
            if let Some(hook) = &shared.failure_hook {
                if panic::catch_unwind(AssertUnwindSafe(|| (**hook)(&failure))).is_err() {
                    warn!(group = %group, "failure hook panicked");
                }
            }
        }
    }

    debug!(group = %group, index, "worker terminated");
}
