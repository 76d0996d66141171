use std::sync::Arc;

use crate::config::{SchedulerConfig, WorkerPolicy};
use crate::error::{ActionFailure, SchedulerError};
use crate::queue::{PriorityQueue, TaskQueue};

use super::core::{FailureHook, PriorityScheduler};

/// Fluent builder for a [`PriorityScheduler`].
///
/// # Example
/// ```
/// use prio_lanes::{PriorityScheduler, WorkerPolicy};
///
/// let scheduler = PriorityScheduler::builder()
///     .concurrency(2)
///     .worker_policy(WorkerPolicy::Shared)
///     .on_action_failure(|failure| eprintln!("{}", failure))
///     .build()
///     .unwrap();
/// let lane = scheduler.priority(10).unwrap();
/// lane.submit(|| println!("hello")).unwrap();
/// ```
#[derive(Default)]
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    queue: Option<Arc<dyn TaskQueue>>,
    failure_hook: Option<FailureHook>,
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Per-group worker cap (0 = available parallelism).
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    pub fn worker_policy(mut self, policy: WorkerPolicy) -> Self {
        self.config.worker_policy = policy;
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.config.stack_size = Some(bytes);
        self
    }

    /// Use a custom queue instead of the default [`PriorityQueue`].
    pub fn queue(mut self, queue: Arc<dyn TaskQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Called on the worker thread for every action that panics.
    pub fn on_action_failure<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ActionFailure) + Send + Sync + 'static,
    {
        self.failure_hook = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> Result<PriorityScheduler, SchedulerError> {
        self.config.validate()?;
        let queue = self
            .queue
            .unwrap_or_else(|| Arc::new(PriorityQueue::new()));
        Ok(PriorityScheduler::from_parts(self.config, queue, self.failure_hook))
    }
}

impl PriorityScheduler {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }
}
