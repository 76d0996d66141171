use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Scheduler operational metrics, snapshotted by [`crate::PriorityScheduler::metrics`].
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerMetrics {
    /// Items accepted by `submit`.
    pub submitted: u64,
    /// Actions that ran to completion.
    pub executed: u64,
    /// Actions that panicked.
    pub failed: u64,
    /// Items cancelled before they started (including those drained at shutdown).
    pub cancelled: u64,
    /// Items still queued when the snapshot was taken.
    pub pending: usize,
    /// Live worker threads per group (`tier:<p>` or `shared`).
    pub workers_by_group: BTreeMap<String, usize>,
    /// Mean wall time of finished actions, failures included.
    pub avg_action_duration: Duration,
    /// When a worker last finished an action.
    pub last_execution: Option<DateTime<Utc>>,
    /// When the scheduler was created.
    pub started_at: DateTime<Utc>,
}

impl Default for SchedulerMetrics {
    fn default() -> Self {
        Self {
            submitted: 0,
            executed: 0,
            failed: 0,
            cancelled: 0,
            pending: 0,
            workers_by_group: BTreeMap::new(),
            avg_action_duration: Duration::ZERO,
            last_execution: None,
            started_at: Utc::now(),
        }
    }
}

impl SchedulerMetrics {
    pub fn record_submission(&mut self) {
        self.submitted += 1;
    }

    pub fn record_cancellation(&mut self, count: u64) {
        self.cancelled += count;
    }

    pub fn record_worker(&mut self, group: &str) {
        *self.workers_by_group.entry(group.to_string()).or_default() += 1;
    }

    /// Record a finished action.
    pub fn record_execution(&mut self, duration: Duration, failed: bool) {
        if failed {
            self.failed += 1;
        } else {
            self.executed += 1;
        }
        self.last_execution = Some(Utc::now());

        let count = self.executed + self.failed;
        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        self.avg_action_duration = if count == 1 {
            duration
        } else {
            let prev_nanos = self.avg_action_duration.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };
    }

    /// Total live workers across every group.
    pub fn total_workers(&self) -> usize {
        self.workers_by_group.values().sum()
    }
}
