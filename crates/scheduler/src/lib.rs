//! Priority-ordered task scheduler for embedding in a host execution framework.
//!
//! A [`PriorityScheduler`] owns one shared priority queue. Callers obtain a
//! [`Lane`] per priority tier and submit closures through it; worker threads
//! always dequeue the highest-priority eligible item across every lane, with
//! FIFO order among equal priorities. Each submission returns a
//! [`CancellationHandle`] that can stop the item before it starts.

pub mod config;
pub mod error;
pub mod handle;
pub mod item;
pub mod lane;
pub mod metrics;
pub mod queue;
pub mod runner;

mod group;
mod sync;

pub use config::{SchedulerConfig, WorkerPolicy};
pub use error::{ActionFailure, SchedulerError};
pub use handle::CancellationHandle;
pub use item::{Action, Sequencer, TaskState, WorkItem};
pub use lane::Lane;
pub use metrics::SchedulerMetrics;
pub use queue::{PriorityQueue, TaskQueue};
pub use runner::{FailureHook, PriorityScheduler, SchedulerBuilder};
