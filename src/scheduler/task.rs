//! # Scheduled task: a job plus its timing rules.
//!
//! [`ScheduledTask`] pairs a [`Job`](crate::Job) with an interval, an optional
//! condition and an optional per-run timeout. Only the scheduler's tick loop
//! mutates it.
//!
//! ## Due rule
//! ```text
//! should_run(now) ⇔ (last_run unset ∨ now − last_run ≥ interval) ∧ (no condition ∨ condition())
//! ```
//! The boundary is inclusive: a task with interval `I` last run at `t` is due at exactly `t + I`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::warn;

use super::job::JobRef;

type Condition = Box<dyn Fn() -> bool + Send + Sync>;

/// Snapshot of one task's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub name: String,
    pub interval_ms: u64,
    pub runs: u64,
    pub failures: u64,
    pub last_error: Option<String>,
}

/// A job with its schedule.
pub struct ScheduledTask {
    pub(crate) job: JobRef,
    interval: Duration,
    condition: Option<Condition>,
    timeout: Option<Duration>,
    pub(crate) last_run: Option<Instant>,
    pub(crate) runs: u64,
    pub(crate) failures: u64,
    pub(crate) last_error: Option<String>,
    /// Registering manager, if any.
    pub(crate) owner: Option<Arc<str>>,
}

impl ScheduledTask {
    /// Runs `job` every `interval` (first run on the first tick after registration).
    pub fn new(job: JobRef, interval: Duration) -> Self {
        Self {
            job,
            interval,
            condition: None,
            timeout: None,
            last_run: None,
            runs: 0,
            failures: 0,
            last_error: None,
            owner: None,
        }
    }

    /// Only run while `condition` returns `true`.
    pub fn with_condition<C>(mut self, condition: C) -> Self
    where
        C: Fn() -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Box::new(condition));
        self
    }

    /// Bounds each run; an overrun counts as a failure ([`TaskError::Timeout`](crate::TaskError::Timeout)).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        self.job.name()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Time of the last run, if any.
    pub fn last_run(&self) -> Option<Instant> {
        self.last_run
    }

    /// True if the task is due now.
    pub fn should_run(&self) -> bool {
        self.should_run_at(Instant::now())
    }

    /// True if the task is due at `now`.
    ///
    /// A panicking condition counts as `false`.
    pub fn should_run_at(&self, now: Instant) -> bool {
        let interval_elapsed = match self.last_run {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if !interval_elapsed {
            return false;
        }
        match &self.condition {
            None => true,
            Some(cond) => catch_unwind(AssertUnwindSafe(cond)).unwrap_or_else(|_| {
                warn!(task = self.name(), "task condition panicked; skipping run");
                false
            }),
        }
    }

    pub fn stats(&self) -> TaskStats {
        TaskStats {
            name: self.name().to_string(),
            interval_ms: self.interval.as_millis() as u64,
            runs: self.runs,
            failures: self.failures,
            last_error: self.last_error.clone(),
        }
    }
}

impl std::fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("name", &self.name())
            .field("interval", &self.interval)
            .field("conditional", &self.condition.is_some())
            .field("timeout", &self.timeout)
            .field("last_run", &self.last_run)
            .field("owner", &self.owner)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::scheduler::JobFn;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn task(interval: Duration) -> ScheduledTask {
        ScheduledTask::new(JobFn::arc("t", || async { Ok::<_, TaskError>(()) }), interval)
    }

    #[test]
    fn never_run_is_due() {
        assert!(task(Duration::from_secs(10)).should_run_at(Instant::now()));
    }

    #[test]
    fn boundary_is_exact() {
        let mut t = task(Duration::from_secs(10));
        let start = Instant::now();
        t.last_run = Some(start);

        assert!(!t.should_run_at(start));
        assert!(!t.should_run_at(start + Duration::from_millis(9_999)));
        assert!(t.should_run_at(start + Duration::from_secs(10)));
        assert!(t.should_run_at(start + Duration::from_secs(11)));
    }

    #[test]
    fn condition_gates_run() {
        let open = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&open);
        let t = task(Duration::ZERO).with_condition(move || flag.load(Ordering::SeqCst));

        assert!(!t.should_run());
        open.store(true, Ordering::SeqCst);
        assert!(t.should_run());
    }

    #[test]
    fn panicking_condition_is_false() {
        let t = task(Duration::ZERO).with_condition(|| panic!("bad condition"));
        assert!(!t.should_run());
    }
}
