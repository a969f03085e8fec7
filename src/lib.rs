//! # tunevisor
//!
//! **Tunevisor** is the concurrency and reliability runtime shared by a set of
//! host-tuning "managers" (CPU governor, fan curve, GPU profile...). The managers
//! themselves are thin threshold-driven glue; this crate provides everything
//! they stand on: an event bus, a periodic scheduler, an auto-scaling worker
//! pool, resilience wrappers, resource-reuse primitives and an append-only event log.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │  Manager #1  │   │  Manager #2  │   │  Manager #3  │
//!     │  (cpu)       │   │  (fan)       │   │  (gpu)       │
//!     └──┬────────┬──┘   └──┬────────┬──┘   └──┬────────┬──┘
//!        │ tasks  │ events  │        │         │        │
//!        ▼        ▼         ▼        ▼         ▼        ▼
//! ┌──────────────────┐  ┌──────────────────────────────────────────┐
//! │ Scheduler        │  │ EventBus                                 │
//! │ one tick loop,   │  │ snapshot handlers of event.kind (+ "*"), │
//! │ registration     │  │ one pool job per handler                 │
//! │ order            │  └────────────────────┬─────────────────────┘
//! └──────────────────┘                       ▼
//!                        ┌──────────────────────────────────────────┐
//!                        │ WorkerPool                               │
//!                        │ shared queue ─► generation of N workers  │
//!                        │ monitor: queue depth, avg duration,      │
//!                        │ host CPU ─► grow / shrink (swap gen.)    │
//!                        └──────────────────────────────────────────┘
//!
//!  Standalone primitives used by managers:
//!   CircuitBreaker · RateLimiter / TokenBucket · BoundedCache · ObjectPool
//!   EventStore (JSON lines + aggregate index) · BatchWriter
//! ```
//!
//! ### Shutdown
//! ```text
//! Runtime::shutdown():
//!   scheduler.stop()            joins the tick loop
//!   managers.shutdown_all()     Manager::shutdown on every live manager
//!   bus.shutdown()              refuse publishes, drain in-flight handlers
//!   pool.shutdown()             drain the queue, stop workers
//! each step bounded by RuntimeConfig::grace
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                                 |
//! |-------------------|--------------------------------------------------------------|----------------------------------------------------|
//! | **Events**        | Typed events, pooled allocation, concurrent fan-out.         | [`Event`], [`EventBus`], [`Subscribe`]             |
//! | **Scheduling**    | Interval/conditional periodic jobs on one tick loop.         | [`Scheduler`], [`ScheduledTask`], [`Job`]          |
//! | **Execution**     | Auto-scaling worker pool with backpressure.                  | [`WorkerPool`], [`PoolConfig`], [`TaskHandle`]     |
//! | **Resilience**    | Circuit breaker with compounding backoff, rate limiting.     | [`CircuitBreaker`], [`RateLimiter`], [`TokenBucket`] |
//! | **Memory**        | LRU/TTL cache with memory budget, object pool.               | [`BoundedCache`], [`ObjectPool`]                   |
//! | **Persistence**   | Append-only event log with replay; batched writes.           | [`EventStore`], [`DomainEvent`], [`BatchWriter`]   |
//! | **Runtime**       | One-shot assembly, manager registry, ordered shutdown.       | [`RuntimeBuilder`], [`Runtime`], [`Manager`]       |
//! | **Errors**        | Typed errors per concern with stable labels.                 | [`RuntimeError`], [`TaskError`], [`PoolError`]     |
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tunevisor::{Event, FixedLoad, JobFn, Level, RuntimeBuilder, RuntimeConfig, SubscriberFn, TaskError};
//!
//! #[tokio::main(flavor = "multi_thread", worker_threads = 2)]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = RuntimeConfig::default();
//!     cfg.grace = Duration::from_secs(2);
//!
//!     let runtime = RuntimeBuilder::new(cfg)
//!         .with_load(Arc::new(FixedLoad::new(20.0, 40.0)))
//!         .with_subscriber("cpu.high", SubscriberFn::arc("alert", |ev: Arc<Event>| async move {
//!             println!("alert: {}", ev.message);
//!             Ok::<_, TaskError>(())
//!         }))
//!         .build()
//!         .await?;
//!
//!     let bus = runtime.bus().clone();
//!     runtime.scheduler().every(
//!         Duration::from_secs(1),
//!         JobFn::arc("cpu.poll", move || {
//!             let bus = bus.clone();
//!             async move {
//!                 bus.publish(Event::new("cpu.high", "CPU at 95%").with_level(Level::Warning));
//!                 Ok::<_, TaskError>(())
//!             }
//!         }),
//!     );
//!
//!     runtime.start()?;
//!     tokio::time::sleep(Duration::from_millis(50)).await;
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```
mod batch;
mod config;
mod core;
mod error;
mod events;
mod memory;
mod pool;
mod resilience;
mod scheduler;
mod store;
mod subscribers;

pub mod stats;

// ---- Public re-exports ----

pub use batch::{BatchConfig, BatchStats, BatchWriter, FlushSink};
pub use config::{BusConfig, RuntimeConfig};
pub use core::{Manager, ManagerRegistry, Runtime, RuntimeBuilder, RuntimeStats};
pub use error::{BatchError, BreakerError, LimitError, PoolError, RuntimeError, StoreError, TaskError};
pub use events::{
    event_pool, BusStats, Event, EventBus, EventInit, Level, ANY_EVENT, DEFAULT_PRIORITY,
    EVENT_POOL_MAX, EVENT_POOL_PREALLOC,
};
pub use memory::{
    BoundedCache, CacheConfig, CacheStats, EstimateSize, ObjectPool, ObjectPoolBuilder,
    ObjectPoolStats, Pooled,
};
pub use pool::{
    FixedLoad, HostLoad, LoadSample, PoolConfig, PoolStats, ScaleDecision, ScaleInputs,
    SysinfoLoad, TaskHandle, WorkerPool,
};
pub use resilience::{
    BackoffPolicy, BreakerConfig, BreakerStats, BucketConfig, BucketStats, CircuitBreaker,
    CircuitState, LimiterStats, RateLimiter, Strategy, TokenBucket,
};
pub use scheduler::{Job, JobFn, JobRef, ScheduledTask, Scheduler, SchedulerConfig, SchedulerStats, TaskStats};
pub use store::{DomainEvent, EventStore, StoreStats};
pub use subscribers::{LogWriter, Subscribe, SubscriberFn};
