use std::sync::Arc;

use tracing::debug;

use crate::config::WorkerPolicy;
use crate::error::SchedulerError;
use crate::group::{GroupKey, WorkerGroup};
use crate::lane::Lane;
use crate::sync::lock;

use super::core::PriorityScheduler;

impl PriorityScheduler {
    /// Get a fresh lane whose submissions run at `priority` (higher runs sooner).
    ///
    /// Each call may add one worker to the lane's group, up to the
    /// concurrency cap. Under [`WorkerPolicy::PerTier`] every distinct
    /// priority has its own group, so the total worker count is the sum over
    /// tiers of `min(concurrency, lanes requested for that tier)`.
    pub fn priority(&self, priority: i32) -> Result<Lane, SchedulerError> {
        if self.shared.queue.is_closed() {
            return Err(SchedulerError::ShutDown);
        }

        let group = self.group_for(priority);
        let spawned = group.try_spawn()?;
        debug!(priority, spawned, workers = group.active_workers(), "lane created");

        Ok(Lane::new(priority, group, Arc::clone(&self.shared)))
    }

    fn group_for(&self, priority: i32) -> Arc<WorkerGroup> {
        let key = match self.shared.config.worker_policy {
            WorkerPolicy::PerTier => GroupKey::Tier(priority),
            WorkerPolicy::Shared => GroupKey::Shared,
        };
        let mut groups = lock(&self.groups);
        let group = groups.entry(key).or_insert_with(|| {
            Arc::new(WorkerGroup::new(key, self.concurrency, Arc::clone(&self.shared)))
        });
        Arc::clone(group)
    }
}
