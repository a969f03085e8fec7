//! # Token bucket with lazy refill.
//!
//! [`TokenBucket`] holds up to `capacity` tokens and refills at `refill_rate`
//! tokens per second. Refill is computed lazily from the elapsed time on every
//! observation, so there is no background ticker.
//!
//! ## Rules
//! - `0 ≤ tokens ≤ capacity` at every observation point.
//! - [`TokenBucket::consume`] never suspends.
//! - [`TokenBucket::wait`] sleeps for the computed deficit `(n - tokens) / rate`
//!   and is also woken by [`TokenBucket::refund`]; it never busy-polls.
//! - A request larger than `capacity` can never succeed and is rejected up front.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::LimitError;

/// Token bucket configuration.
#[derive(Clone, Copy, Debug)]
pub struct BucketConfig {
    /// Maximum number of tokens (also the initial fill).
    pub capacity: u64,
    /// Tokens added per second. `0.0` disables refill.
    pub refill_rate: f64,
}

impl Default for BucketConfig {
    /// Default configuration:
    ///
    /// - `capacity = 10`
    /// - `refill_rate = 10.0` tokens/s
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_rate: 10.0,
        }
    }
}

impl BucketConfig {
    /// Bucket allowing `max_calls` per `window` on average, with a burst of `max_calls`.
    pub fn per_window(max_calls: u64, window: Duration) -> Self {
        let secs = window.as_secs_f64();
        let refill_rate = if secs > 0.0 {
            max_calls as f64 / secs
        } else {
            0.0
        };
        Self {
            capacity: max_calls,
            refill_rate,
        }
    }

    #[inline]
    fn rate(&self) -> f64 {
        if self.refill_rate.is_finite() && self.refill_rate > 0.0 {
            self.refill_rate
        } else {
            0.0
        }
    }
}

/// Float seconds to a [`Duration`], saturating instead of panicking on overflow.
pub(crate) fn saturating_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Snapshot of bucket counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketStats {
    pub capacity: u64,
    pub refill_rate: f64,
    pub available: f64,
    pub granted: u64,
    pub denied: u64,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    granted: u64,
    denied: u64,
}

/// Lazily refilled token bucket.
///
/// ## Example
/// ```rust
/// use tunevisor::{BucketConfig, TokenBucket};
///
/// let bucket = TokenBucket::new(BucketConfig { capacity: 2, refill_rate: 1.0 });
/// assert!(bucket.consume(1));
/// assert!(bucket.consume(1));
/// assert!(!bucket.consume(1));
/// ```
#[derive(Debug)]
pub struct TokenBucket {
    cfg: BucketConfig,
    state: Mutex<BucketState>,
    notify: Notify,
}

impl TokenBucket {
    /// Creates a full bucket.
    pub fn new(cfg: BucketConfig) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: cfg.capacity as f64,
                last_refill: Instant::now(),
                granted: 0,
                denied: 0,
            }),
            cfg,
            notify: Notify::new(),
        }
    }

    /// Bucket capacity.
    pub fn capacity(&self) -> u64 {
        self.cfg.capacity
    }

    /// Takes `n` tokens if available. Never suspends.
    pub fn consume(&self, n: u64) -> bool {
        let mut st = self.lock();
        self.refill(&mut st);
        let ok = st.tokens >= n as f64;
        if ok {
            st.tokens -= n as f64;
            st.granted += 1;
        } else {
            st.denied += 1;
        }
        ok
    }

    /// Suspends until `n` tokens are available, then takes them.
    ///
    /// Returns [`LimitError::ExceedsCapacity`] immediately if `n > capacity`.
    /// With a zero refill rate the call only wakes on [`refund`](Self::refund).
    pub async fn wait(&self, n: u64) -> Result<(), LimitError> {
        if n > self.cfg.capacity {
            return Err(LimitError::ExceedsCapacity {
                requested: n,
                capacity: self.cfg.capacity,
            });
        }

        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let deficit = {
                let mut st = self.lock();
                self.refill(&mut st);
                if st.tokens >= n as f64 {
                    st.tokens -= n as f64;
                    st.granted += 1;
                    return Ok(());
                }
                n as f64 - st.tokens
            };

            let rate = self.cfg.rate();
            if rate > 0.0 {
                let delay = saturating_secs(deficit / rate);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = &mut notified => {}
                }
            } else {
                notified.await;
            }
        }
    }

    /// Returns `n` tokens (capped at capacity) and wakes waiters.
    pub fn refund(&self, n: u64) {
        {
            let mut st = self.lock();
            self.refill(&mut st);
            st.tokens = (st.tokens + n as f64).min(self.cfg.capacity as f64);
        }
        self.notify.notify_waiters();
    }

    /// Tokens available right now (after refill).
    pub fn available(&self) -> f64 {
        let mut st = self.lock();
        self.refill(&mut st);
        st.tokens
    }

    /// Returns a snapshot of counters.
    pub fn stats(&self) -> BucketStats {
        let mut st = self.lock();
        self.refill(&mut st);
        BucketStats {
            capacity: self.cfg.capacity,
            refill_rate: self.cfg.rate(),
            available: st.tokens,
            granted: st.granted,
            denied: st.denied,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn refill(&self, st: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(st.last_refill).as_secs_f64();
        let cap = self.cfg.capacity as f64;
        st.tokens = (st.tokens + elapsed * self.cfg.rate()).clamp(0.0, cap);
        st.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn capacity_five_rate_one_scenario() {
        let bucket = TokenBucket::new(BucketConfig {
            capacity: 5,
            refill_rate: 1.0,
        });
        for i in 0..5 {
            assert!(bucket.consume(1), "consume #{i} should succeed");
        }
        assert!(!bucket.consume(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(bucket.consume(1));
        assert!(!bucket.consume(1));
    }

    #[tokio::test(start_paused = true)]
    async fn full_again_after_capacity_over_rate() {
        let bucket = TokenBucket::new(BucketConfig {
            capacity: 4,
            refill_rate: 2.0,
        });
        assert!(bucket.consume(4));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(bucket.consume(4));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_sleeps_for_deficit() {
        let bucket = TokenBucket::new(BucketConfig {
            capacity: 2,
            refill_rate: 1.0,
        });
        assert!(bucket.consume(2));

        let started = Instant::now();
        bucket.wait(2).await.unwrap();
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(2), "waited {waited:?}");
        assert!(waited < Duration::from_millis(2100), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn wait_rejects_oversized_request() {
        let bucket = TokenBucket::new(BucketConfig {
            capacity: 2,
            refill_rate: 1.0,
        });
        assert_eq!(
            bucket.wait(3).await,
            Err(LimitError::ExceedsCapacity {
                requested: 3,
                capacity: 2
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn refund_wakes_waiter_without_refill() {
        let bucket = Arc::new(TokenBucket::new(BucketConfig {
            capacity: 1,
            refill_rate: 0.0,
        }));
        assert!(bucket.consume(1));

        let waiter = {
            let bucket = bucket.clone();
            tokio::spawn(async move { bucket.wait(1).await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        bucket.refund(1);
        waiter.await.unwrap().unwrap();
        assert_eq!(bucket.available(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_capacity() {
        let bucket = TokenBucket::new(BucketConfig {
            capacity: 3,
            refill_rate: 100.0,
        });
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(bucket.available(), 3.0);
        bucket.refund(10);
        assert_eq!(bucket.available(), 3.0);
    }

    #[tokio::test]
    async fn tiny_refill_rate_waits_for_refund() {
        let bucket = Arc::new(TokenBucket::new(BucketConfig {
            capacity: 10,
            refill_rate: 1e-19,
        }));
        assert!(bucket.consume(10));

        let waiter = tokio::spawn({
            let bucket = Arc::clone(&bucket);
            async move { bucket.wait(10).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        bucket.refund(10);
        let res = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter woke")
            .unwrap();
        assert!(res.is_ok());
    }

    #[test]
    fn oversized_delays_saturate() {
        assert_eq!(saturating_secs(1e30), Duration::MAX);
        assert_eq!(saturating_secs(1.5), Duration::from_millis(1500));
    }

    proptest! {
        #[test]
        fn tokens_stay_within_bounds(
            capacity in 1u64..50,
            requests in proptest::collection::vec(0u64..60, 1..40),
        ) {
            let bucket = TokenBucket::new(BucketConfig { capacity, refill_rate: 0.0 });
            let mut expected = capacity;
            for n in requests {
                let ok = bucket.consume(n);
                prop_assert_eq!(ok, n <= expected);
                if ok {
                    expected -= n;
                }
                let avail = bucket.available();
                prop_assert!(avail >= 0.0);
                prop_assert!(avail <= capacity as f64);
            }
        }
    }
}
