//! # Auto-scaling worker pool.
//!
//! [`WorkerPool`] runs submitted futures on a bounded set of worker tasks whose
//! size follows load between `min_workers` and `max_workers`.
//!
//! ## Architecture
//! ```text
//!  try_submit / submit / spawn
//!        │  (queued += 1, submit time captured)
//!        ▼
//!  [ shared job queue ] ◄── pulled by ──┐
//!                                       │
//!  ┌──────────── Mutex<PoolState> ──────┴───────────────────────┐
//!  │ sender + current generation (N workers)                    │
//!  └────────────────────────────────────────────────────────────┘
//!        ▲ resize: swap in a new generation          │ retire
//!        │                                           ▼
//!  monitor (every check_interval)          drain task: old workers finish
//!  ScaleDecision::evaluate(...)            the job in hand, then exit
//! ```
//!
//! ## Rules
//! - **No job is dropped by resizing**: the queue outlives generations; a retired
//!   generation only finishes the jobs it already pulled.
//! - **Panics are isolated**: a panicking job yields [`PoolError::Panicked`]; the worker survives.
//! - **Backpressure**: with a bounded queue, [`WorkerPool::submit`] waits for space while
//!   [`WorkerPool::try_submit`] and [`WorkerPool::spawn`] fail fast with [`PoolError::QueueFull`].
//! - **Durations** are measured from submission to completion over a rolling window.
//! - **Shutdown** stops the monitor, retires the current generation and waits, bounded by a grace.

use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use super::config::PoolConfig;
use super::generation::{self, Generation, Job, JobSender, SharedReceiver, TrySend};
use super::handle::TaskHandle;
use super::load::{HostLoad, LoadSample, SysinfoLoad};
use super::monitor::{self, ScaleInputs};
use crate::error::{panic_info, PoolError, RuntimeError};

/// Snapshot of pool counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolStats {
    pub workers: usize,
    pub min_workers: usize,
    pub max_workers: usize,
    pub generation: u64,
    pub queued: usize,
    pub active: usize,
    pub submitted: u64,
    pub completed: u64,
    pub panicked: u64,
    pub rejected: u64,
    pub avg_task_ms: f64,
    pub utilization: f64,
    pub scale_ups: u64,
    pub scale_downs: u64,
    pub cpu_percent: f32,
    pub memory_percent: f32,
}

/// Counters shared with in-flight jobs.
struct PoolMetrics {
    queued: AtomicUsize,
    active: AtomicUsize,
    submitted: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
    rejected: AtomicU64,
    window: usize,
    durations: Mutex<VecDeque<Duration>>,
}

impl PoolMetrics {
    fn started(&self) {
        self.queued.fetch_sub(1, Ordering::AcqRel);
        self.active.fetch_add(1, Ordering::AcqRel);
    }

    fn finished(&self, took: Duration, panicked: bool) {
        self.active.fetch_sub(1, Ordering::AcqRel);
        self.completed.fetch_add(1, Ordering::Relaxed);
        if panicked {
            self.panicked.fetch_add(1, Ordering::Relaxed);
        }
        let mut d = self.durations.lock().unwrap_or_else(|p| p.into_inner());
        if d.len() == self.window {
            d.pop_front();
        }
        d.push_back(took);
    }

    fn avg_duration(&self) -> Option<Duration> {
        let d = self.durations.lock().unwrap_or_else(|p| p.into_inner());
        if d.is_empty() {
            return None;
        }
        Some(d.iter().sum::<Duration>() / d.len() as u32)
    }

    fn pending(&self) -> usize {
        self.queued.load(Ordering::Acquire) + self.active.load(Ordering::Acquire)
    }
}

/// Queue sender and current generation; both `None` after shutdown.
struct PoolState {
    sender: Option<JobSender>,
    generation: Option<Generation>,
}

pub(crate) struct PoolShared {
    cfg: PoolConfig,
    load: Arc<dyn HostLoad>,
    state: Mutex<PoolState>,
    receiver: SharedReceiver,
    next_generation: AtomicU64,
    drains: TaskTracker,
    metrics: Arc<PoolMetrics>,
    last_submit: Mutex<Instant>,
    last_load: Mutex<LoadSample>,
    scale_ups: AtomicU64,
    scale_downs: AtomicU64,
    token: CancellationToken,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl PoolShared {
    pub(crate) fn config(&self) -> &PoolConfig {
        &self.cfg
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn workers(&self) -> usize {
        self.state().generation.as_ref().map_or(0, |g| g.workers)
    }

    /// Gathers monitor inputs. `None` if the load sampler panicked.
    pub(crate) async fn scale_inputs(&self) -> Option<ScaleInputs> {
        // sysinfo refreshes block; keep them off the async workers.
        let sampler = Arc::clone(&self.load);
        let load = match tokio::task::spawn_blocking(move || sampler.sample()).await {
            Ok(load) => load,
            Err(e) => {
                warn!(error = %e, "host load sample failed");
                return None;
            }
        };
        *self.last_load.lock().unwrap_or_else(|p| p.into_inner()) = load;
        let idle_for = self
            .last_submit
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .elapsed();
        Some(ScaleInputs {
            workers: self.workers(),
            queued: self.metrics.queued.load(Ordering::Acquire),
            avg_duration: self.metrics.avg_duration(),
            idle_for,
            load,
        })
    }

    /// Swaps in a generation of `target` workers. Returns `false` if nothing changed.
    pub(crate) fn resize(&self, target: usize) -> bool {
        let target = self.cfg.clamp(target);
        let mut state = self.state();
        let current = match state.generation.as_ref() {
            Some(g) if g.workers != target => g.workers,
            _ => return false,
        };

        let id = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let fresh = Generation::spawn(id, target, &self.receiver);
        let retired = state.generation.replace(fresh);
        drop(state);

        if target > current {
            self.scale_ups.fetch_add(1, Ordering::Relaxed);
        } else {
            self.scale_downs.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(old) = retired {
            let (id, workers) = (old.id, old.workers);
            self.drain(id, workers, old.retire());
        }
        true
    }

    /// Detached task logging once a retired generation's workers have exited.
    fn drain(&self, id: u64, workers: usize, tracker: TaskTracker) {
        self.drains.spawn(async move {
            tracker.wait().await;
            debug!(generation = id, workers, "retired generation drained");
        });
    }

    fn touch(&self) {
        *self.last_submit.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now();
    }
}

/// Auto-scaling pool of async workers.
///
/// Cloning yields another handle to the same pool.
///
/// ## Example
/// ```rust
/// use tunevisor::{PoolConfig, WorkerPool};
///
/// # #[tokio::main]
/// # async fn main() {
/// let pool = WorkerPool::new(PoolConfig::default());
/// let handle = pool.try_submit(async { 2 + 2 }).unwrap();
/// assert_eq!(handle.await.unwrap(), 4);
/// pool.shutdown(std::time::Duration::from_secs(1)).await.unwrap();
/// # }
/// ```
#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    /// Creates a pool sampling host load through `sysinfo`.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(cfg: PoolConfig) -> Self {
        Self::with_load(cfg, Arc::new(SysinfoLoad::new()))
    }

    /// Creates a pool with a custom host load probe.
    ///
    /// Starts `min_workers` workers and, unless `check_interval` is zero, the monitor.
    pub fn with_load(cfg: PoolConfig, load: Arc<dyn HostLoad>) -> Self {
        let initial = cfg.min();
        let (sender, receiver) = generation::queue(cfg.queue_capacity_opt());
        let first = Generation::spawn(0, initial, &receiver);
        let metrics = Arc::new(PoolMetrics {
            queued: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            panicked: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            window: cfg.duration_window.max(1),
            durations: Mutex::new(VecDeque::with_capacity(cfg.duration_window.max(1))),
        });
        let interval = cfg.check_interval_opt();

        let shared = Arc::new(PoolShared {
            cfg,
            load,
            state: Mutex::new(PoolState {
                sender: Some(sender),
                generation: Some(first),
            }),
            receiver,
            next_generation: AtomicU64::new(1),
            drains: TaskTracker::new(),
            metrics,
            last_submit: Mutex::new(Instant::now()),
            last_load: Mutex::new(LoadSample::default()),
            scale_ups: AtomicU64::new(0),
            scale_downs: AtomicU64::new(0),
            token: CancellationToken::new(),
            monitor: Mutex::new(None),
        });

        if let Some(interval) = interval {
            let handle = tokio::spawn(monitor::run(
                Arc::downgrade(&shared),
                interval,
                shared.token.child_token(),
            ));
            *shared.monitor.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
        }
        debug!(workers = initial, "worker pool started");
        Self { shared }
    }

    /// Queues `fut` without waiting; the output is discarded.
    ///
    /// Used for fire-and-forget dispatch. Fails with [`PoolError::QueueFull`] or
    /// [`PoolError::ShutDown`].
    pub fn spawn<F>(&self, fut: F) -> Result<(), PoolError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.enqueue_now(self.job(fut, None))
    }

    /// Queues `fut` without waiting and returns a handle to its output.
    pub fn try_submit<F>(&self, fut: F) -> Result<TaskHandle<F::Output>, PoolError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.enqueue_now(self.job(fut, Some(tx)))?;
        Ok(TaskHandle::new(rx))
    }

    /// Queues `fut`, waiting for queue space if the queue is bounded and full.
    pub async fn submit<F>(&self, fut: F) -> Result<TaskHandle<F::Output>, PoolError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job = self.job(fut, Some(tx));

        let sender = self.shared.state().sender.clone();
        let Some(sender) = sender else {
            return Err(self.reject(PoolError::ShutDown));
        };
        // Workers keep pulling while any sender clone is alive, even mid-shutdown.
        if sender.send(job).await.is_err() {
            return Err(self.reject(PoolError::ShutDown));
        }
        Ok(TaskHandle::new(rx))
    }

    /// Resizes to `workers` (clamped to `[min, max]`). Returns `false` if unchanged
    /// or the pool is shut down.
    pub fn resize(&self, workers: usize) -> bool {
        let changed = self.shared.resize(workers);
        if changed {
            debug!(workers = self.shared.workers(), "worker pool resized");
        }
        changed
    }

    /// Current worker count (`0` after shutdown).
    pub fn workers(&self) -> usize {
        self.shared.workers()
    }

    /// Jobs queued or running.
    pub fn pending(&self) -> usize {
        self.shared.metrics.pending()
    }

    /// Stops the monitor, closes the queue and waits for every queued and
    /// running job, bounded by `grace`.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), RuntimeError> {
        self.shared.token.cancel();
        let monitor = self
            .shared
            .monitor
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        let current = {
            let mut state = self.shared.state();
            state.sender = None;
            state.generation.take()
        };
        if let Some(current) = current {
            let (id, workers) = (current.id, current.workers);
            self.shared.drain(id, workers, current.finish());
        }
        self.shared.drains.close();

        let drained = tokio::time::timeout(grace, self.shared.drains.wait()).await;
        if let Some(monitor) = monitor {
            let _ = monitor.await;
        }
        match drained {
            Ok(()) => {
                debug!("worker pool drained");
                Ok(())
            }
            Err(_) => {
                let pending = self.pending();
                warn!(pending, grace_ms = grace.as_millis() as u64, "worker pool drain exceeded grace");
                Err(RuntimeError::GraceExceeded {
                    component: "pool",
                    grace,
                    pending,
                })
            }
        }
    }

    /// Returns a snapshot of counters.
    pub fn stats(&self) -> PoolStats {
        let (workers, generation) = self
            .shared
            .state()
            .generation
            .as_ref()
            .map_or((0, 0), |g| (g.workers, g.id));
        let m = &self.shared.metrics;
        let queued = m.queued.load(Ordering::Acquire);
        let active = m.active.load(Ordering::Acquire);
        let load = *self.shared.last_load.lock().unwrap_or_else(|p| p.into_inner());
        PoolStats {
            workers,
            min_workers: self.shared.cfg.min(),
            max_workers: self.shared.cfg.max(),
            generation,
            queued,
            active,
            submitted: m.submitted.load(Ordering::Relaxed),
            completed: m.completed.load(Ordering::Relaxed),
            panicked: m.panicked.load(Ordering::Relaxed),
            rejected: m.rejected.load(Ordering::Relaxed),
            avg_task_ms: m
                .avg_duration()
                .map_or(0.0, |d| d.as_secs_f64() * 1000.0),
            utilization: if workers == 0 {
                0.0
            } else {
                (queued + active) as f64 / workers as f64
            },
            scale_ups: self.shared.scale_ups.load(Ordering::Relaxed),
            scale_downs: self.shared.scale_downs.load(Ordering::Relaxed),
            cpu_percent: load.cpu_percent,
            memory_percent: load.memory_percent,
        }
    }

    /// Wraps `fut` with panic isolation, metrics and optional result delivery.
    fn job<F>(&self, fut: F, tx: Option<oneshot::Sender<Result<F::Output, PoolError>>>) -> Job
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let metrics = Arc::clone(&self.shared.metrics);
        metrics.queued.fetch_add(1, Ordering::AcqRel);
        metrics.submitted.fetch_add(1, Ordering::Relaxed);
        self.shared.touch();
        let submitted = Instant::now();

        Box::pin(async move {
            metrics.started();
            let out = AssertUnwindSafe(fut).catch_unwind().await;
            metrics.finished(submitted.elapsed(), out.is_err());

            let out = out.map_err(|payload| PoolError::Panicked {
                info: panic_info(&*payload),
            });
            if let Err(e) = &out {
                warn!(error = %e, "pool job panicked");
            }
            if let Some(tx) = tx {
                let _ = tx.send(out);
            }
        })
    }

    fn enqueue_now(&self, job: Job) -> Result<(), PoolError> {
        let sent = match self.shared.state().sender.as_ref() {
            Some(sender) => sender.try_send(job),
            None => TrySend::Closed,
        };
        match sent {
            TrySend::Sent => Ok(()),
            TrySend::Full => Err(self.reject(PoolError::QueueFull {
                capacity: self.shared.cfg.queue_capacity,
            })),
            TrySend::Closed => Err(self.reject(PoolError::ShutDown)),
        }
    }

    /// Undoes the submit-side accounting of a job that never reached a queue.
    fn reject(&self, err: PoolError) -> PoolError {
        let m = &self.shared.metrics;
        m.queued.fetch_sub(1, Ordering::AcqRel);
        m.submitted.fetch_sub(1, Ordering::Relaxed);
        m.rejected.fetch_add(1, Ordering::Relaxed);
        err
    }
}
