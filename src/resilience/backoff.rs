//! # Backoff policy for open-circuit timeouts.
//!
//! [`BackoffPolicy`] controls how long a tripped [`CircuitBreaker`](crate::CircuitBreaker)
//! stays open after repeated trips. It is parameterized by:
//! - [`BackoffPolicy::first`] the base timeout (restored on reset);
//! - [`BackoffPolicy::factor`] the multiplicative growth factor per trip;
//! - [`BackoffPolicy::max`] the timeout cap.
//!
//! The timeout after `n` consecutive trips is `first × factor^n`, clamped to `max`.
//! This is the closed form of compounding `current = min(max, current × factor)` on
//! every trip, so the value is derived from the trip count alone and never drifts.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use tunevisor::BackoffPolicy;
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_secs(10),
//!     max: Duration::from_secs(300),
//!     factor: 2.0,
//! };
//!
//! // No trips yet: the base timeout.
//! assert_eq!(backoff.next(0), Duration::from_secs(10));
//!
//! // First trip: 10s × 2.
//! assert_eq!(backoff.next(1), Duration::from_secs(20));
//!
//! // Sixth trip: 10s × 64 = 640s → capped at 300s.
//! assert_eq!(backoff.next(6), Duration::from_secs(300));
//! ```

use std::time::Duration;

/// Open-circuit timeout growth policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Base timeout (the value restored by a reset).
    pub first: Duration,
    /// Maximum timeout cap.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` recommended).
    pub factor: f64,
}

impl Default for BackoffPolicy {
    /// Returns a policy with:
    /// - `first = 10s`;
    /// - `factor = 2.0`;
    /// - `max = 300s`.
    fn default() -> Self {
        Self {
            first: Duration::from_secs(10),
            max: Duration::from_secs(300),
            factor: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Computes the timeout after `trips` consecutive trips.
    ///
    /// # Notes
    /// - `trips = 0` yields `first` (clamped to `max`).
    /// - If `factor` is less than 1.0, timeouts shrink with more trips (not typical).
    /// - Non-finite or negative intermediate values clamp to `max`.
    pub fn next(&self, trips: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let clamped_exp = trips.min(i32::MAX as u32) as i32;
        let unclamped_secs = self.first.as_secs_f64() * self.factor.powi(clamped_exp);

        if !unclamped_secs.is_finite() || unclamped_secs < 0.0 || unclamped_secs > max_secs {
            self.max
        } else {
            Duration::from_secs_f64(unclamped_secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(first_ms: u64, max_ms: u64, factor: f64) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(first_ms),
            max: Duration::from_millis(max_ms),
            factor,
        }
    }

    #[test]
    fn test_zero_trips_returns_first() {
        assert_eq!(policy(100, 30_000, 2.0).next(0), Duration::from_millis(100));
    }

    #[test]
    fn test_exponential_growth() {
        let p = policy(100, 30_000, 2.0);
        assert_eq!(p.next(1), Duration::from_millis(200));
        assert_eq!(p.next(2), Duration::from_millis(400));
        assert_eq!(p.next(3), Duration::from_millis(800));
        assert_eq!(p.next(4), Duration::from_millis(1600));
    }

    #[test]
    fn test_constant_factor() {
        let p = policy(500, 30_000, 1.0);
        for trips in 0..10 {
            assert_eq!(
                p.next(trips),
                Duration::from_millis(500),
                "trip {} should stay at 500ms",
                trips
            );
        }
    }

    #[test]
    fn test_first_exceeds_max() {
        let p = policy(10_000, 5_000, 2.0);
        assert_eq!(p.next(0), Duration::from_secs(5));
    }

    #[test]
    fn test_monotonic_until_cap() {
        let p = policy(100, 10_000, 1.5);
        let mut prev = Duration::ZERO;
        for trips in 0..40 {
            let d = p.next(trips);
            assert!(d >= prev, "trip {}: {:?} < {:?}", trips, d, prev);
            assert!(d <= Duration::from_secs(10));
            prev = d;
        }
        assert_eq!(prev, Duration::from_secs(10));
    }

    #[test]
    fn test_non_finite_overflow_clamps_to_max() {
        let p = policy(100, 60_000, 1e300);
        assert_eq!(p.next(u32::MAX), Duration::from_secs(60));
    }
}
