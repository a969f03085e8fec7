//! # Runtime: the assembled set of shared components.
//!
//! A [`Runtime`] is built once by [`RuntimeBuilder`](crate::RuntimeBuilder) and owns
//! the worker pool, event bus, scheduler, manager registry, event pool and the
//! optional event store. Managers receive references from it; nothing is global.
//!
//! ## Lifecycle
//! ```text
//! build() ─► register_manager(..)* ─► start() ─► ... ─► shutdown()
//!                                                          │
//!            scheduler.stop ─► managers.shutdown_all ─► bus.shutdown ─► pool.shutdown
//!            (each step bounded by cfg.grace; later steps run even if one overruns)
//! ```

use std::borrow::Cow;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{info, warn};

use super::registry::{Manager, ManagerRegistry};
use super::shutdown::shutdown_signal;
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::events::{BusStats, Event, EventBus, EventInit};
use crate::memory::{BoundedCache, EstimateSize, ObjectPool, ObjectPoolStats};
use crate::pool::{PoolStats, WorkerPool};
use crate::resilience::{CircuitBreaker, RateLimiter, TokenBucket};
use crate::scheduler::{Scheduler, SchedulerStats};
use crate::store::{EventStore, StoreStats};

/// Combined snapshot of the runtime's components.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStats {
    pub pool: PoolStats,
    pub bus: BusStats,
    pub scheduler: SchedulerStats,
    pub event_pool: ObjectPoolStats,
    pub store: Option<StoreStats>,
    pub managers: Vec<String>,
}

/// Assembled runtime.
pub struct Runtime {
    pub(crate) cfg: RuntimeConfig,
    pub(crate) pool: WorkerPool,
    pub(crate) bus: EventBus,
    pub(crate) scheduler: Scheduler,
    pub(crate) managers: ManagerRegistry,
    pub(crate) events: ObjectPool<Event, EventInit>,
    pub(crate) store: Option<Arc<EventStore>>,
    pub(crate) stopped: AtomicBool,
}

impl Runtime {
    pub fn config(&self) -> &RuntimeConfig {
        &self.cfg
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn managers(&self) -> &ManagerRegistry {
        &self.managers
    }

    /// Pool of reusable events for [`EventBus::publish_pooled`].
    pub fn events(&self) -> &ObjectPool<Event, EventInit> {
        &self.events
    }

    /// The event store, if one was configured.
    pub fn store(&self) -> Option<&Arc<EventStore>> {
        self.store.as_ref()
    }

    /// New circuit breaker with the configured defaults.
    pub fn breaker(&self, name: impl Into<Cow<'static, str>>) -> CircuitBreaker {
        CircuitBreaker::new(name, self.cfg.breaker)
    }

    /// New token-bucket rate limiter with the configured defaults.
    pub fn limiter(&self) -> RateLimiter {
        RateLimiter::from_bucket(self.cfg.bucket)
    }

    /// New token bucket with the configured defaults.
    pub fn bucket(&self) -> TokenBucket {
        TokenBucket::new(self.cfg.bucket)
    }

    /// New bounded cache with the configured defaults.
    pub fn cache<K, V>(&self) -> BoundedCache<K, V>
    where
        K: Eq + Hash + Clone,
        V: Clone + EstimateSize,
    {
        BoundedCache::new(self.cfg.cache)
    }

    /// Registers `manager` and lets it schedule its tasks.
    ///
    /// The runtime keeps only a weak handle: the caller owns the manager.
    /// Returns `false` (and registers nothing) if the name is taken. Tasks are
    /// tagged with the manager name; leftovers from a dead manager of the same
    /// name are dropped first.
    pub fn register_manager(&self, manager: &Arc<dyn Manager>) -> bool {
        if !self.managers.register(manager) {
            return false;
        }
        let name = manager.name();
        self.scheduler.remove_owned_by(name);
        manager.register_tasks(&self.scheduler.owned_by(name));
        true
    }

    /// Removes a manager and, before the next tick, every task it scheduled.
    pub fn deregister_manager(&self, name: &str) -> bool {
        self.scheduler.remove_owned_by(name);
        self.managers.deregister(name)
    }

    /// Starts the scheduler loop.
    pub fn start(&self) -> Result<(), RuntimeError> {
        self.scheduler.start()?;
        info!(
            workers = self.pool.workers(),
            managers = self.managers.len(),
            "runtime started"
        );
        Ok(())
    }

    /// Stops everything in dependency order, each step bounded by `grace`.
    ///
    /// Every step runs even if an earlier one overruns; the first error is returned.
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let grace = self.cfg.grace;
        info!(?grace, "runtime shutting down");

        let scheduler = match tokio::time::timeout(grace, self.scheduler.stop()).await {
            Ok(()) => Ok(()),
            Err(_) => {
                warn!(?grace, "scheduler did not stop within grace");
                Err(RuntimeError::GraceExceeded {
                    component: "scheduler",
                    grace,
                    pending: 1,
                })
            }
        };
        let managers = self.managers.shutdown_all(grace).await;
        let bus = self.bus.shutdown(grace).await;
        let pool = self.pool.shutdown(grace).await;

        let outcome = scheduler.and(managers).and(bus).and(pool);
        match &outcome {
            Ok(()) => info!("runtime stopped"),
            Err(e) => warn!(error = %e, label = e.as_label(), "runtime stopped with errors"),
        }
        outcome
    }

    /// Starts the runtime, waits for a termination signal, then shuts down.
    pub async fn run_until_signal(&self) -> Result<(), RuntimeError> {
        self.start()?;
        match shutdown_signal().await {
            Ok(signal) => info!(signal, "shutdown signal received"),
            Err(e) => {
                let _ = self.shutdown().await;
                return Err(RuntimeError::Signal(e));
            }
        }
        self.shutdown().await
    }

    /// Snapshot of every component.
    pub async fn stats(&self) -> RuntimeStats {
        let store = match &self.store {
            Some(s) => Some(s.stats().await),
            None => None,
        };
        RuntimeStats {
            pool: self.pool.stats(),
            bus: self.bus.stats(),
            scheduler: self.scheduler.stats().await,
            event_pool: self.events.stats(),
            store,
            managers: self.managers.names(),
        }
    }

    /// [`stats`](Self::stats) flattened into `component.field` keys.
    pub async fn flat_stats(&self) -> BTreeMap<String, Value> {
        crate::stats::flatten(&self.stats().await)
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("cfg", &self.cfg)
            .field("scheduler", &self.scheduler)
            .field("managers", &self.managers)
            .field("store", &self.store)
            .finish()
    }
}
