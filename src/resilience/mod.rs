//! Resilience primitives guarding calls to flaky collaborators.
//!
//! - [`CircuitBreaker`] stops calling an operation that keeps failing and
//!   probes it again after a compounding timeout ([`BackoffPolicy`]).
//! - [`TokenBucket`] and [`RateLimiter`] bound how often an operation runs.

mod backoff;
mod breaker;
mod bucket;
mod limiter;

pub use backoff::BackoffPolicy;
pub use breaker::{BreakerConfig, BreakerStats, CircuitBreaker, CircuitState};
pub use bucket::{BucketConfig, BucketStats, TokenBucket};
pub use limiter::{LimiterStats, RateLimiter, Strategy};
