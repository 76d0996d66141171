//! Scheduler facade -- owns the shared queue and hands out lanes.
//!
//! Split into focused submodules:
//! - `core`: PriorityScheduler struct, constructors, shutdown and accessors
//! - `builder`: fluent construction with an injected queue or failure hook
//! - `lanes`: lane creation and worker group lookup

mod builder;
mod core;
mod lanes;

pub use self::builder::SchedulerBuilder;
pub use self::core::{FailureHook, PriorityScheduler};
pub(crate) use self::core::Shared;
