//! Cooperative multi-rate task scheduling.
//!
//! - [`task`] - task descriptors, actions, execution records
//! - [`scheduler`] - readiness, priority ordering, failure isolation
//! - [`stats`] - per-task statistics and cycle health flags

pub mod scheduler;
pub mod stats;
pub mod task;

pub use scheduler::Scheduler;
pub use stats::{CycleHealth, TaskStats};
pub use task::{ExecutionRecord, TaskAction, TaskDescriptor, TaskResult};
