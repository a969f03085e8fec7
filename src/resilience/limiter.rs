//! # Call-rate limiter with selectable strategy.
//!
//! [`RateLimiter`] admits at most `max_calls` per `window` using one of two strategies:
//!
//! - [`Strategy::TokenBucket`]: bursts up to `max_calls`, refilled continuously at
//!   `max_calls / window` (backed by [`TokenBucket`]).
//! - [`Strategy::SlidingWindow`]: exact count of admitted calls whose timestamps lie
//!   within the last `window`.
//!
//! [`RateLimiter::call`] wraps an async operation and rejects it with
//! [`LimitError::Throttled`] without invoking it when no allowance is available.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use super::bucket::{saturating_secs, BucketConfig, TokenBucket};
use crate::error::LimitError;

/// Limiting strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Continuous refill with burst capacity.
    #[default]
    TokenBucket,
    /// Exact count over a trailing window.
    SlidingWindow,
}

/// Snapshot of limiter counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimiterStats {
    pub strategy: Strategy,
    pub max_calls: u64,
    pub window_ms: u64,
    pub allowed: u64,
    pub throttled: u64,
}

enum Backend {
    Bucket(TokenBucket),
    Window(Mutex<VecDeque<Instant>>),
}

/// Rate limiter admitting at most `max_calls` per `window`.
///
/// ## Example
/// ```rust
/// use std::time::Duration;
/// use tunevisor::{RateLimiter, Strategy};
///
/// let limiter = RateLimiter::new(2, Duration::from_secs(1), Strategy::SlidingWindow);
/// assert!(limiter.allow());
/// assert!(limiter.allow());
/// assert!(!limiter.allow());
/// ```
pub struct RateLimiter {
    max_calls: u64,
    window: Duration,
    strategy: Strategy,
    backend: Backend,
    allowed: AtomicU64,
    throttled: AtomicU64,
}

impl RateLimiter {
    /// Creates a limiter with the given strategy.
    pub fn new(max_calls: u64, window: Duration, strategy: Strategy) -> Self {
        let backend = match strategy {
            Strategy::TokenBucket => {
                Backend::Bucket(TokenBucket::new(BucketConfig::per_window(max_calls, window)))
            }
            Strategy::SlidingWindow => Backend::Window(Mutex::new(VecDeque::new())),
        };
        Self {
            max_calls,
            window,
            strategy,
            backend,
            allowed: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
        }
    }

    /// Token-bucket limiter built from an explicit bucket configuration.
    pub fn from_bucket(cfg: BucketConfig) -> Self {
        let window = if cfg.refill_rate > 0.0 && cfg.refill_rate.is_finite() {
            saturating_secs(cfg.capacity as f64 / cfg.refill_rate)
        } else {
            Duration::ZERO
        };
        Self {
            max_calls: cfg.capacity,
            window,
            strategy: Strategy::TokenBucket,
            backend: Backend::Bucket(TokenBucket::new(cfg)),
            allowed: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
        }
    }

    /// Active strategy.
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Admits one call if allowance is available. Never suspends.
    pub fn allow(&self) -> bool {
        let ok = match &self.backend {
            Backend::Bucket(bucket) => bucket.consume(1),
            Backend::Window(calls) => {
                let now = Instant::now();
                let mut calls = lock(calls);
                self.purge(&mut calls, now);
                if (calls.len() as u64) < self.max_calls {
                    calls.push_back(now);
                    true
                } else {
                    false
                }
            }
        };
        self.count(ok);
        ok
    }

    /// Suspends until one call is admitted.
    ///
    /// Fails only when the limiter can never admit a call (`max_calls == 0`).
    pub async fn wait(&self) -> Result<(), LimitError> {
        if self.max_calls == 0 {
            return Err(LimitError::ExceedsCapacity {
                requested: 1,
                capacity: 0,
            });
        }
        match &self.backend {
            Backend::Bucket(bucket) => bucket.wait(1).await?,
            Backend::Window(calls) => loop {
                let delay = {
                    let now = Instant::now();
                    let mut calls = lock(calls);
                    self.purge(&mut calls, now);
                    if (calls.len() as u64) < self.max_calls {
                        calls.push_back(now);
                        break;
                    }
                    match calls.front() {
                        Some(&oldest) => self
                            .window
                            .saturating_sub(now.saturating_duration_since(oldest)),
                        None => Duration::ZERO,
                    }
                };
                tokio::time::sleep(delay).await;
            },
        }
        self.count(true);
        Ok(())
    }

    /// Runs `f` if a call is admitted right now; otherwise returns
    /// [`LimitError::Throttled`] without invoking it.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T, LimitError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if !self.allow() {
            return Err(LimitError::Throttled);
        }
        Ok(f().await)
    }

    /// Returns a snapshot of counters.
    pub fn stats(&self) -> LimiterStats {
        LimiterStats {
            strategy: self.strategy,
            max_calls: self.max_calls,
            window_ms: u64::try_from(self.window.as_millis()).unwrap_or(u64::MAX),
            allowed: self.allowed.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
        }
    }

    fn purge(&self, calls: &mut VecDeque<Instant>, now: Instant) {
        while let Some(&front) = calls.front() {
            if now.saturating_duration_since(front) >= self.window {
                calls.pop_front();
            } else {
                break;
            }
        }
    }

    fn count(&self, ok: bool) {
        if ok {
            self.allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.throttled.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn lock(calls: &Mutex<VecDeque<Instant>>) -> MutexGuard<'_, VecDeque<Instant>> {
    calls.lock().unwrap_or_else(|p| p.into_inner())
}
