//! Periodic execution of manager callbacks.
//!
//! - [`Job`] / [`JobFn`] the action to run
//! - [`ScheduledTask`] a job with its interval, condition and timeout
//! - [`Scheduler`] the single tick loop that runs due tasks

mod engine;
mod job;
mod task;

pub use engine::{Scheduler, SchedulerConfig, SchedulerStats};
pub use job::{Job, JobFn, JobRef};
pub use task::{ScheduledTask, TaskStats};
