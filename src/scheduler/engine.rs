//! # Periodic task scheduler.
//!
//! One tick loop drives every registered [`ScheduledTask`]. Each tick:
//!
//! ```text
//! tick():
//!   lock tasks ─► apply queued add/remove ─► for task in registration order:
//!                                               should_run_at(now)? ──no──► next
//!                                                     │ yes
//!                                                     ▼
//!                                          last_run = now; run_once(job, timeout)
//!                                                     │
//!                                          Ok ─► debug!   Err/panic/timeout ─► warn!, failures++
//! ```
//!
//! ## Rules
//! - Due tasks run **sequentially** within a tick, in registration order; priority plays no role.
//! - `last_run` is stamped **before** the job runs, so a slow job does not shift its own schedule.
//! - A failing, panicking or timed-out job is logged and isolated; the loop never stops for it.
//! - [`Scheduler::add_task`]/[`Scheduler::remove_task`] never block: changes are queued and applied
//!   at the start of the next tick, so jobs may (de)register tasks from inside a run.
//! - [`Scheduler::stop`] cancels the loop and joins it; a tick in progress finishes first.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::job::JobRef;
use super::task::{ScheduledTask, TaskStats};
use crate::error::{panic_info, RuntimeError, TaskError};

/// Scheduler settings.
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Period of the tick loop.
    pub tick: Duration,
    /// Default per-run timeout for tasks without their own (`0` = unbounded).
    pub task_timeout: Duration,
}

impl Default for SchedulerConfig {
    /// - `tick = 1s`
    /// - `task_timeout = 0` (unbounded)
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            task_timeout: Duration::ZERO,
        }
    }
}

impl SchedulerConfig {
    fn task_timeout_opt(&self) -> Option<Duration> {
        (!self.task_timeout.is_zero()).then_some(self.task_timeout)
    }

    fn tick_period(&self) -> Duration {
        self.tick.max(Duration::from_millis(1))
    }
}

/// Scheduler counters plus one entry per registered task.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStats {
    pub running: bool,
    pub ticks: u64,
    pub runs: u64,
    pub failures: u64,
    pub tasks: Vec<TaskStats>,
}

enum Change {
    Add(ScheduledTask),
    Remove(String),
    RemoveOwned(Arc<str>),
}

struct Running {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct SchedulerInner {
    cfg: SchedulerConfig,
    tasks: tokio::sync::Mutex<Vec<ScheduledTask>>,
    pending: Mutex<Vec<Change>>,
    running: Mutex<Option<Running>>,
    ticks: AtomicU64,
}

/// Periodic task scheduler (cheap to clone).
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
    owner: Option<Arc<str>>,
}

impl Scheduler {
    pub fn new(cfg: SchedulerConfig) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                cfg,
                tasks: tokio::sync::Mutex::new(Vec::new()),
                pending: Mutex::new(Vec::new()),
                running: Mutex::new(None),
                ticks: AtomicU64::new(0),
            }),
            owner: None,
        }
    }

    /// Handle to the same scheduler that tags every task it adds with `owner`.
    ///
    /// [`remove_owned_by`](Self::remove_owned_by) later drops them all at once.
    pub fn owned_by(&self, owner: &str) -> Scheduler {
        Scheduler {
            inner: Arc::clone(&self.inner),
            owner: Some(Arc::from(owner)),
        }
    }

    /// Removes every task added through `owned_by(owner)` before the next tick.
    pub fn remove_owned_by(&self, owner: &str) {
        self.queue(Change::RemoveOwned(Arc::from(owner)));
    }

    /// Registers a task; it is considered from the next tick on.
    pub fn add_task(&self, mut task: ScheduledTask) {
        if task.owner.is_none() {
            task.owner = self.owner.clone();
        }
        debug!(task = task.name(), interval = ?task.interval(), "task queued for registration");
        self.queue(Change::Add(task));
    }

    /// Convenience for `add_task(ScheduledTask::new(job, interval))`.
    pub fn every(&self, interval: Duration, job: JobRef) {
        self.add_task(ScheduledTask::new(job, interval));
    }

    /// Removes every task named `name` before the next tick.
    pub fn remove_task(&self, name: impl Into<String>) {
        self.queue(Change::Remove(name.into()));
    }

    /// Names of the registered tasks, in registration order.
    pub async fn task_names(&self) -> Vec<String> {
        let mut tasks = self.inner.tasks.lock().await;
        self.inner.apply_pending(&mut tasks);
        tasks.iter().map(|t| t.name().to_string()).collect()
    }

    /// Runs one pass over the tasks; returns how many ran.
    pub async fn tick(&self) -> usize {
        self.inner.tick().await
    }

    /// Starts the tick loop on the current tokio runtime.
    pub fn start(&self) -> Result<(), RuntimeError> {
        let mut running = self.inner.lock_running();
        if running.is_some() {
            return Err(RuntimeError::AlreadyRunning {
                component: "scheduler",
            });
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(run_loop(Arc::clone(&self.inner), token.clone()));
        *running = Some(Running { token, handle });
        info!(tick = ?self.inner.cfg.tick, "scheduler started");
        Ok(())
    }

    /// Stops the loop and waits for it to exit. No-op if not running.
    pub async fn stop(&self) {
        let Some(Running { token, handle }) = self.inner.lock_running().take() else {
            return;
        };
        token.cancel();
        if let Err(e) = handle.await {
            error!(error = %e, "scheduler loop terminated abnormally");
        }
        info!("scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock_running().is_some()
    }

    /// Snapshot of scheduler and per-task counters. Waits for a tick in progress.
    pub async fn stats(&self) -> SchedulerStats {
        let mut tasks = self.inner.tasks.lock().await;
        self.inner.apply_pending(&mut tasks);
        let tasks: Vec<TaskStats> = tasks.iter().map(ScheduledTask::stats).collect();
        SchedulerStats {
            running: self.is_running(),
            ticks: self.inner.ticks.load(Ordering::Relaxed),
            runs: tasks.iter().map(|t| t.runs).sum(),
            failures: tasks.iter().map(|t| t.failures).sum(),
            tasks,
        }
    }

    fn queue(&self, change: Change) {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(change);
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("cfg", &self.inner.cfg)
            .field("running", &self.is_running())
            .finish()
    }
}

impl SchedulerInner {
    fn lock_running(&self) -> std::sync::MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn apply_pending(&self, tasks: &mut Vec<ScheduledTask>) {
        let changes = std::mem::take(&mut *self.pending.lock().unwrap_or_else(|p| p.into_inner()));
        for change in changes {
            match change {
                Change::Add(task) => {
                    info!(task = task.name(), interval = ?task.interval(), "task registered");
                    tasks.push(task);
                }
                Change::RemoveOwned(owner) => {
                    let before = tasks.len();
                    tasks.retain(|t| t.owner.as_deref() != Some(&*owner));
                    let removed = before - tasks.len();
                    if removed > 0 {
                        info!(owner = %owner, removed, "owned tasks removed");
                    }
                }
                Change::Remove(name) => {
                    let before = tasks.len();
                    tasks.retain(|t| t.name() != name);
                    if tasks.len() < before {
                        info!(task = %name, "task removed");
                    } else {
                        debug!(task = %name, "remove requested for unknown task");
                    }
                }
            }
        }
    }

    async fn tick(&self) -> usize {
        let mut tasks = self.tasks.lock().await;
        self.apply_pending(&mut tasks);
        self.ticks.fetch_add(1, Ordering::Relaxed);

        let mut ran = 0;
        for task in tasks.iter_mut() {
            let now = Instant::now();
            if !task.should_run_at(now) {
                continue;
            }
            task.last_run = Some(now);
            task.runs += 1;
            ran += 1;

            let limit = task.timeout().or(self.cfg.task_timeout_opt());
            match run_once(&task.job, limit).await {
                Ok(()) => {
                    debug!(task = task.name(), "task run completed");
                    task.last_error = None;
                }
                Err(err) => {
                    warn!(task = task.name(), error = %err, label = err.as_label(), "task run failed");
                    task.failures += 1;
                    task.last_error = Some(err.to_string());
                }
            }
        }
        ran
    }
}

/// Runs one job with panic isolation and an optional timeout.
async fn run_once(job: &JobRef, limit: Option<Duration>) -> Result<(), TaskError> {
    let guarded = std::panic::AssertUnwindSafe(job.run()).catch_unwind();
    let caught = match limit {
        Some(dur) => match tokio::time::timeout(dur, guarded).await {
            Ok(r) => r,
            Err(_elapsed) => return Err(TaskError::Timeout { timeout: dur }),
        },
        None => guarded.await,
    };
    caught.unwrap_or_else(|payload| {
        Err(TaskError::Panicked {
            info: panic_info(&*payload),
        })
    })
}

async fn run_loop(inner: Arc<SchedulerInner>, token: CancellationToken) {
    let mut ticker = tokio::time::interval(inner.cfg.tick_period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        inner.tick().await;
    }
}
