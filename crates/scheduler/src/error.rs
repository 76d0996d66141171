//! Scheduler error types.

use std::any::Any;
use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Work was submitted (or a lane requested) after the scheduler was shut down.
    #[error("submission rejected: scheduler has been shut down")]
    ShutDown,

    /// The OS refused to create a worker thread.
    #[error("failed to spawn worker for group {group}: {source}")]
    Spawn {
        group: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

/// An action that panicked while a worker was running it.
///
/// Never surfaced to the submitter; it is logged and handed to the
/// failure hook installed on the scheduler, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionFailure {
    /// Priority the failed item was submitted with.
    pub priority: i32,
    /// Submission sequence number of the failed item.
    pub sequence: u64,
    /// Panic payload rendered as text.
    pub message: String,
}

impl ActionFailure {
    pub(crate) fn from_panic(priority: i32, sequence: u64, payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self { priority, sequence, message }
    }
}

impl fmt::Display for ActionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "action #{} (priority {}) panicked: {}",
            self.sequence, self.priority, self.message
        )
    }
}
