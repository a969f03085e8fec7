//! # Worker pool configuration.
//!
//! [`PoolConfig`] bounds the worker count and tunes the auto-scaling monitor.
//!
//! - **Sizing:** `min_workers`, `max_workers`, `grow_step`, `shrink_step`
//! - **Scale-up signal:** `queue_scale_trigger`, `slow_task_threshold`
//! - **Host gates:** `cpu_ceiling`, `cpu_floor`
//! - **Timing:** `check_interval`, `idle_timeout`
//! - **Backpressure:** `queue_capacity`
//!
//! Sentinel values follow one convention: `0` disables the feature.

use std::time::Duration;

/// Worker pool configuration.
///
/// ## Field semantics
/// - `min_workers`: lower worker bound, also the initial size (min 1)
/// - `max_workers`: upper worker bound (clamped to at least `min_workers`)
/// - `idle_timeout`: no submissions for this long before shrinking is allowed (`0` = shrink immediately)
/// - `queue_scale_trigger`: queued jobs above which the pool grows
/// - `check_interval`: monitor sampling period (`0` = auto-scaling disabled)
/// - `queue_capacity`: bounded queue size per generation (`0` = unbounded)
/// - `grow_step` / `shrink_step`: workers added/removed per decision
/// - `cpu_ceiling` / `cpu_floor`: host CPU percent gates for growing/shrinking
/// - `slow_task_threshold`: average job duration that counts as "slow"
/// - `duration_window`: number of recent job durations kept for the average
#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub min_workers: usize,
    pub max_workers: usize,
    pub idle_timeout: Duration,
    pub queue_scale_trigger: usize,
    pub check_interval: Duration,
    pub queue_capacity: usize,
    pub grow_step: usize,
    pub shrink_step: usize,
    pub cpu_ceiling: f32,
    pub cpu_floor: f32,
    pub slow_task_threshold: Duration,
    pub duration_window: usize,
}

impl PoolConfig {
    /// Effective lower bound (at least one worker).
    #[inline]
    pub fn min(&self) -> usize {
        self.min_workers.max(1)
    }

    /// Effective upper bound (never below [`min`](Self::min)).
    #[inline]
    pub fn max(&self) -> usize {
        self.max_workers.max(self.min())
    }

    /// Clamps a requested worker count into `[min, max]`.
    #[inline]
    pub fn clamp(&self, workers: usize) -> usize {
        workers.clamp(self.min(), self.max())
    }

    /// Returns `None` if auto-scaling is disabled.
    #[inline]
    pub fn check_interval_opt(&self) -> Option<Duration> {
        (!self.check_interval.is_zero()).then_some(self.check_interval)
    }

    /// Returns `None` if the job queue is unbounded.
    #[inline]
    pub fn queue_capacity_opt(&self) -> Option<usize> {
        (self.queue_capacity > 0).then_some(self.queue_capacity)
    }
}

impl Default for PoolConfig {
    /// Default configuration:
    ///
    /// - `min_workers = 2`, `max_workers = 32`
    /// - `idle_timeout = 60s`
    /// - `queue_scale_trigger = 50`
    /// - `check_interval = 2s`
    /// - `queue_capacity = 0` (unbounded)
    /// - `grow_step = 4`, `shrink_step = 2`
    /// - `cpu_ceiling = 90%`, `cpu_floor = 30%`
    /// - `slow_task_threshold = 1s`
    /// - `duration_window = 100`
    fn default() -> Self {
        Self {
            min_workers: 2,
            max_workers: 32,
            idle_timeout: Duration::from_secs(60),
            queue_scale_trigger: 50,
            check_interval: Duration::from_secs(2),
            queue_capacity: 0,
            grow_step: 4,
            shrink_step: 2,
            cpu_ceiling: 90.0,
            cpu_floor: 30.0,
            slow_task_threshold: Duration::from_secs(1),
            duration_window: 100,
        }
    }
}
