//! # Runtime configuration.
//!
//! [`RuntimeConfig`] gathers the settings of every component the
//! [`RuntimeBuilder`](crate::RuntimeBuilder) constructs, plus the shutdown grace.
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use tunevisor::RuntimeConfig;
//!
//! let mut cfg = RuntimeConfig::default();
//! cfg.grace = Duration::from_secs(10);
//! cfg.pool.max_workers = 8;
//! cfg.breaker.failure_threshold = 3;
//! cfg.cache.max_size = 256;
//!
//! assert_eq!(cfg.pool.max_workers, 8);
//! ```
//!
//! ## Sentinel values
//! Every component follows one convention: `0` / `Duration::ZERO` means
//! disabled or unlimited. See the individual config types for details.

use std::time::Duration;

use crate::events::{EVENT_POOL_MAX, EVENT_POOL_PREALLOC};
use crate::memory::CacheConfig;
use crate::pool::PoolConfig;
use crate::resilience::{BreakerConfig, BucketConfig};
use crate::scheduler::SchedulerConfig;

/// Event bus settings.
///
/// The bus itself is unbounded (it dispatches onto the worker pool); these
/// size the shared pool of reusable [`Event`](crate::Event)s.
#[derive(Clone, Debug)]
pub struct BusConfig {
    /// Maximum idle events kept by the event pool (min 1).
    pub event_pool_max: usize,
    /// Events created up front.
    pub event_pool_prealloc: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            event_pool_max: EVENT_POOL_MAX,
            event_pool_prealloc: EVENT_POOL_PREALLOC,
        }
    }
}

/// Configuration for the whole runtime.
///
/// ## Field semantics
/// - `grace`: upper bound for **each** shutdown step (`scheduler → managers → bus → pool`)
/// - `pool`, `scheduler`, `bus`: settings of the components the runtime owns
/// - `breaker`, `bucket`, `cache`: defaults for the primitives handed out by
///   [`Runtime::breaker`](crate::Runtime::breaker), [`Runtime::limiter`](crate::Runtime::limiter)
///   and [`Runtime::cache`](crate::Runtime::cache)
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub grace: Duration,
    pub pool: PoolConfig,
    pub scheduler: SchedulerConfig,
    pub bus: BusConfig,
    pub breaker: BreakerConfig,
    pub bucket: BucketConfig,
    pub cache: CacheConfig,
}

impl Default for RuntimeConfig {
    /// Default configuration:
    ///
    /// - `grace = 30s`
    /// - component defaults otherwise
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(30),
            pool: PoolConfig::default(),
            scheduler: SchedulerConfig::default(),
            bus: BusConfig::default(),
            breaker: BreakerConfig::default(),
            bucket: BucketConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}
