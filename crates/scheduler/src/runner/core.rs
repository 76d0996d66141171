use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use tracing::info;

use crate::config::{SchedulerConfig, WorkerPolicy};
use crate::error::{ActionFailure, SchedulerError};
use crate::group::{GroupKey, WorkerGroup};
use crate::item::Sequencer;
use crate::metrics::SchedulerMetrics;
use crate::queue::{PriorityQueue, TaskQueue};
use crate::sync::lock;

/// Host callback invoked with every action that panicked.
pub type FailureHook = Arc<dyn Fn(&ActionFailure) + Send + Sync>;

/// State shared by the facade, its worker groups, lanes and handles.
pub(crate) struct Shared {
    pub(crate) config: SchedulerConfig,
    pub(crate) queue: Arc<dyn TaskQueue>,
    pub(crate) sequencer: Sequencer,
    pub(crate) metrics: RwLock<SchedulerMetrics>,
    pub(crate) failure_hook: Option<FailureHook>,
}

impl Shared {
    pub(crate) fn new(
        config: SchedulerConfig,
        queue: Arc<dyn TaskQueue>,
        failure_hook: Option<FailureHook>,
    ) -> Self {
        Self {
            config,
            queue,
            sequencer: Sequencer::new(),
            metrics: RwLock::new(SchedulerMetrics::default()),
            failure_hook,
        }
    }
}

/// Priority scheduler facade.
///
/// Owns one shared priority queue. [`priority`](Self::priority) hands out
/// [`crate::Lane`]s that submit into it; worker threads are spawned lazily,
/// at most `concurrency` per worker group (see [`WorkerPolicy`]).
///
/// Priority order is only guaranteed at dequeue: with several workers, a
/// lower-priority action dequeued first may still finish after a
/// higher-priority one dequeued moments later.
///
/// Dropping the scheduler shuts it down without waiting for workers.
pub struct PriorityScheduler {
    pub(super) shared: Arc<Shared>,
    pub(super) concurrency: usize,
    pub(super) groups: Mutex<HashMap<GroupKey, Arc<WorkerGroup>>>,
}

impl PriorityScheduler {
    /// Create a scheduler backed by a fresh [`PriorityQueue`].
    ///
    /// Fails with [`SchedulerError::Config`] if `config` does not validate.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        Ok(Self::from_parts(config, Arc::new(PriorityQueue::new()), None))
    }

    /// Create a scheduler allowing at most `concurrency` workers per group.
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self::from_parts(
            SchedulerConfig::with_concurrency(concurrency),
            Arc::new(PriorityQueue::new()),
            None,
        )
    }

    /// `config` must already be validated.
    pub(super) fn from_parts(
        config: SchedulerConfig,
        queue: Arc<dyn TaskQueue>,
        failure_hook: Option<FailureHook>,
    ) -> Self {
        let concurrency = config.resolved_concurrency();
        info!(
            "Priority scheduler created (concurrency: {}, policy: {})",
            concurrency, config.worker_policy
        );
        Self {
            shared: Arc::new(Shared::new(config, queue, failure_hook)),
            concurrency,
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// Per-group worker cap after resolving `0` to available parallelism.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn worker_policy(&self) -> WorkerPolicy {
        self.shared.config.worker_policy
    }

    /// Live worker threads across all groups.
    pub fn active_workers(&self) -> usize {
        lock(&self.groups).values().map(|g| g.active_workers()).sum()
    }

    /// Items queued and not yet dequeued.
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    /// Get a snapshot of the current scheduler metrics.
    pub fn metrics(&self) -> SchedulerMetrics {
        let mut snapshot = match self.shared.metrics.read() {
            Ok(m) => m.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        snapshot.pending = self.shared.queue.len();
        snapshot
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.queue.is_closed()
    }

    /// Close the queue: cancel everything still queued and let workers
    /// terminate once their current action returns.
    ///
    /// Returns how many queued items were cancelled. Idempotent.
    pub fn shutdown(&self) -> usize {
        if self.shared.queue.is_closed() {
            return 0;
        }
        let drained = self.shared.queue.close();
        let cancelled = drained.iter().filter(|item| item.mark_cancelled()).count();
        if let Ok(mut m) = self.shared.metrics.write() {
            m.record_cancellation(cancelled as u64);
        }
        info!("Priority scheduler shut down ({} pending items cancelled)", cancelled);
        cancelled
    }

    /// Block until every worker thread has exited. Call after
    /// [`shutdown`](Self::shutdown); otherwise this waits forever.
    pub fn join(&self) {
        let groups: Vec<Arc<WorkerGroup>> = lock(&self.groups).values().cloned().collect();
        for group in groups {
            group.join();
        }
    }
}

impl Default for PriorityScheduler {
    /// One worker per group for each available core.
    fn default() -> Self {
        Self::from_parts(SchedulerConfig::default(), Arc::new(PriorityQueue::new()), None)
    }
}

impl fmt::Debug for PriorityScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityScheduler")
            .field("concurrency", &self.concurrency)
            .field("worker_policy", &self.shared.config.worker_policy)
            .field("active_workers", &self.active_workers())
            .field("pending", &self.pending())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl Drop for PriorityScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
