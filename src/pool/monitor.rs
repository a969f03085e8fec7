//! # Auto-scaling monitor.
//!
//! Every `check_interval` the monitor samples the pool (queue depth, average job
//! duration, time since last submission) and the host ([`HostLoad`]), asks
//! [`ScaleDecision::evaluate`] what to do, and resizes the pool accordingly.
//!
//! ## Decision table
//! ```text
//!   grow   ⇐ (queued > trigger  ∨  (avg > slow ∧ queued > workers/2))  ∧  cpu < ceiling
//!   shrink ⇐ queued == 0  ∧  cpu < floor  ∧  idle_for ≥ idle_timeout
//!   hold   ⇐ otherwise, or already at the bound
//! ```
//! Growth is checked first; `grow_step` is larger than `shrink_step` by default so the
//! pool reacts quickly to bursts and relaxes slowly.

use std::sync::Weak;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::config::PoolConfig;
use super::load::LoadSample;
use super::worker_pool::PoolShared;

/// Observations fed into a scaling decision.
#[derive(Debug, Clone, Copy)]
pub struct ScaleInputs {
    /// Current worker count.
    pub workers: usize,
    /// Jobs submitted but not yet picked up by a worker.
    pub queued: usize,
    /// Rolling average job duration (submit to completion), if any job finished.
    pub avg_duration: Option<Duration>,
    /// Time since the last submission.
    pub idle_for: Duration,
    /// Host load sample.
    pub load: LoadSample,
}

/// Outcome of one monitor evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Resize up to the given worker count.
    Grow(usize),
    /// Resize down to the given worker count.
    Shrink(usize),
    /// Keep the current size.
    Hold,
}

impl ScaleDecision {
    /// Pure scaling policy; see the module docs for the decision table.
    pub fn evaluate(cfg: &PoolConfig, inputs: &ScaleInputs) -> ScaleDecision {
        let workers = inputs.workers;
        let cpu = inputs.load.cpu_percent;

        let slow = inputs
            .avg_duration
            .is_some_and(|avg| avg > cfg.slow_task_threshold);
        let backlog = inputs.queued > cfg.queue_scale_trigger
            || (slow && inputs.queued * 2 > workers);

        if backlog && cpu < cfg.cpu_ceiling {
            let target = cfg.clamp(workers.saturating_add(cfg.grow_step.max(1)));
            return if target > workers {
                ScaleDecision::Grow(target)
            } else {
                ScaleDecision::Hold
            };
        }

        let idle_enough = cfg.idle_timeout.is_zero() || inputs.idle_for >= cfg.idle_timeout;
        if inputs.queued == 0 && cpu < cfg.cpu_floor && idle_enough {
            let target = cfg.clamp(workers.saturating_sub(cfg.shrink_step.max(1)));
            if target < workers {
                return ScaleDecision::Shrink(target);
            }
        }
        ScaleDecision::Hold
    }
}

/// Monitor loop. Exits on cancellation or once the pool is gone.
pub(super) async fn run(shared: Weak<PoolShared>, interval: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(shared) = shared.upgrade() else {
            break;
        };

        let Some(inputs) = shared.scale_inputs().await else {
            continue;
        };
        match ScaleDecision::evaluate(shared.config(), &inputs) {
            ScaleDecision::Grow(target) => {
                info!(
                    from = inputs.workers,
                    to = target,
                    queued = inputs.queued,
                    cpu = inputs.load.cpu_percent,
                    "scaling worker pool up"
                );
                shared.resize(target);
            }
            ScaleDecision::Shrink(target) => {
                info!(
                    from = inputs.workers,
                    to = target,
                    cpu = inputs.load.cpu_percent,
                    "scaling worker pool down"
                );
                shared.resize(target);
            }
            ScaleDecision::Hold => {
                debug!(workers = inputs.workers, queued = inputs.queued, "worker pool holds");
            }
        }
    }
    debug!("pool monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(workers: usize, queued: usize, cpu: f32) -> ScaleInputs {
        ScaleInputs {
            workers,
            queued,
            avg_duration: None,
            idle_for: Duration::from_secs(3600),
            load: LoadSample {
                cpu_percent: cpu,
                memory_percent: 40.0,
            },
        }
    }

    #[test]
    fn grows_on_deep_queue() {
        let cfg = PoolConfig::default();
        assert_eq!(
            ScaleDecision::evaluate(&cfg, &inputs(2, 51, 50.0)),
            ScaleDecision::Grow(6)
        );
        assert_eq!(
            ScaleDecision::evaluate(&cfg, &inputs(2, 50, 50.0)),
            ScaleDecision::Hold,
            "trigger is exclusive"
        );
    }

    #[test]
    fn grows_on_slow_jobs_with_moderate_queue() {
        let cfg = PoolConfig::default();
        let mut i = inputs(8, 5, 50.0);
        i.avg_duration = Some(Duration::from_millis(1500));
        assert_eq!(ScaleDecision::evaluate(&cfg, &i), ScaleDecision::Grow(12));

        i.queued = 4;
        assert_eq!(ScaleDecision::evaluate(&cfg, &i), ScaleDecision::Hold);
    }

    #[test]
    fn cpu_ceiling_blocks_growth() {
        let cfg = PoolConfig::default();
        assert_eq!(
            ScaleDecision::evaluate(&cfg, &inputs(2, 500, 95.0)),
            ScaleDecision::Hold
        );
    }

    #[test]
    fn growth_capped_at_max() {
        let cfg = PoolConfig::default();
        assert_eq!(
            ScaleDecision::evaluate(&cfg, &inputs(30, 500, 10.0)),
            ScaleDecision::Grow(32)
        );
        assert_eq!(
            ScaleDecision::evaluate(&cfg, &inputs(32, 500, 10.0)),
            ScaleDecision::Hold
        );
    }

    #[test]
    fn shrinks_when_idle_and_quiet() {
        let cfg = PoolConfig::default();
        assert_eq!(
            ScaleDecision::evaluate(&cfg, &inputs(10, 0, 5.0)),
            ScaleDecision::Shrink(8)
        );
        assert_eq!(
            ScaleDecision::evaluate(&cfg, &inputs(3, 0, 5.0)),
            ScaleDecision::Shrink(2)
        );
        assert_eq!(
            ScaleDecision::evaluate(&cfg, &inputs(2, 0, 5.0)),
            ScaleDecision::Hold
        );
        assert_eq!(
            ScaleDecision::evaluate(&cfg, &inputs(10, 0, 45.0)),
            ScaleDecision::Hold,
            "busy host"
        );
    }

    #[test]
    fn idle_timeout_delays_shrink() {
        let cfg = PoolConfig::default();
        let mut i = inputs(10, 0, 5.0);
        i.idle_for = Duration::from_secs(59);
        assert_eq!(ScaleDecision::evaluate(&cfg, &i), ScaleDecision::Hold);

        let cfg = PoolConfig {
            idle_timeout: Duration::ZERO,
            ..PoolConfig::default()
        };
        assert_eq!(ScaleDecision::evaluate(&cfg, &i), ScaleDecision::Shrink(8));
    }
}
