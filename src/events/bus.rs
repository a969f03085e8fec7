//! # Event bus dispatching through the worker pool.
//!
//! [`EventBus`] keeps handler lists per event type and fans every publish out to
//! them as independent jobs on the [`WorkerPool`].
//!
//! ## Architecture
//! ```text
//! publish(event)
//!     │  read-lock, snapshot handlers[kind] + handlers["*"], unlock
//!     ▼
//!  Arc<InFlight(event)> ──┬──► pool job ──► handler1.on_event() ──► Ok / Err / panic → logged
//!                         ├──► pool job ──► handler2.on_event()
//!                         └──► pool job ──► handlerN.on_event()
//!                                  │
//!      last job done → InFlight dropped → event marked processed (pooled: recycled)
//! ```
//!
//! ## Rules
//! - **Non-blocking**: `publish()` never awaits; a job the pool refuses is dropped and counted.
//! - **Exactly once**: each handler registered at publish time runs once for that publish.
//! - **Isolation**: a failing or panicking handler never affects its siblings.
//! - **No ordering** across the handlers of one publish.
//! - **Shutdown**: refuses new publishes and waits for in-flight handlers, bounded by a grace.

use std::collections::HashMap;
use std::ops::Deref;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use super::event::{Event, EventInit};
use crate::error::{panic_info, RuntimeError};
use crate::memory::Pooled;
use crate::pool::WorkerPool;
use crate::subscribers::Subscribe;

/// Event type that matches every published event.
pub const ANY_EVENT: &str = "*";

/// Snapshot of bus counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BusStats {
    pub event_types: usize,
    pub handlers: usize,
    pub published: u64,
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub panicked: u64,
    pub dropped: u64,
    pub in_flight: usize,
}

/// Event owned by a publish until its last handler finishes.
enum InFlight {
    Shared(Arc<Event>),
    Pooled(Pooled<Event, EventInit>),
}

impl Deref for InFlight {
    type Target = Event;

    fn deref(&self) -> &Event {
        match self {
            InFlight::Shared(ev) => ev,
            InFlight::Pooled(ev) => ev,
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        // Pooled events are reset and recycled by their own guard right after.
        if let InFlight::Shared(ev) = self {
            ev.mark_processed();
        }
    }
}

type HandlerMap = HashMap<String, Vec<Arc<dyn Subscribe>>>;

#[derive(Default)]
struct BusCounters {
    published: AtomicU64,
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    dropped: AtomicU64,
}

struct BusInner {
    handlers: RwLock<HandlerMap>,
    pool: WorkerPool,
    closed: AtomicBool,
    in_flight: AtomicUsize,
    idle: Notify,
    counters: BusCounters,
}

impl BusInner {
    fn read(&self) -> RwLockReadGuard<'_, HandlerMap> {
        self.handlers.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HandlerMap> {
        self.handlers.write().unwrap_or_else(|p| p.into_inner())
    }

    fn job_done(&self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

#[inline]
fn same_handler(a: &Arc<dyn Subscribe>, b: &Arc<dyn Subscribe>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Publish/subscribe bus with pool-backed fan-out.
///
/// Cloning yields another handle to the same bus.
///
/// ## Example
/// ```rust
/// use std::sync::Arc;
/// use tunevisor::{Event, EventBus, PoolConfig, SubscriberFn, TaskError, WorkerPool};
///
/// # #[tokio::main]
/// # async fn main() {
/// let pool = WorkerPool::new(PoolConfig::default());
/// let bus = EventBus::new(pool.clone());
/// bus.subscribe("cpu.high", SubscriberFn::arc("throttle", |ev: Arc<Event>| async move {
///     println!("throttling because {}", ev.message);
///     Ok::<_, TaskError>(())
/// }));
/// assert_eq!(bus.publish(Event::new("cpu.high", "95%")), 1);
/// bus.shutdown(std::time::Duration::from_secs(1)).await.unwrap();
/// # }
/// ```
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Creates a bus dispatching on `pool`.
    pub fn new(pool: WorkerPool) -> Self {
        Self {
            inner: Arc::new(BusInner {
                handlers: RwLock::new(HashMap::new()),
                pool,
                closed: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
                counters: BusCounters::default(),
            }),
        }
    }

    /// Registers `handler` for `kind`. Returns `false` if this exact handler
    /// (same `Arc`) is already registered for it.
    pub fn subscribe(&self, kind: impl Into<String>, handler: Arc<dyn Subscribe>) -> bool {
        let kind = kind.into();
        let mut map = self.inner.write();
        let list = map.entry(kind.clone()).or_default();
        if list.iter().any(|h| same_handler(h, &handler)) {
            return false;
        }
        debug!(kind = %kind, handler = handler.name(), "handler subscribed");
        list.push(handler);
        true
    }

    /// Registers `handler` for every event type.
    pub fn subscribe_all(&self, handler: Arc<dyn Subscribe>) -> bool {
        self.subscribe(ANY_EVENT, handler)
    }

    /// Removes `handler` from `kind`. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, kind: &str, handler: &Arc<dyn Subscribe>) -> bool {
        let mut map = self.inner.write();
        let Some(list) = map.get_mut(kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|h| !same_handler(h, handler));
        let removed = list.len() != before;
        if list.is_empty() {
            map.remove(kind);
        }
        removed
    }

    /// Number of handlers a publish of `kind` would reach.
    pub fn handler_count(&self, kind: &str) -> usize {
        let map = self.inner.read();
        map.get(kind).map_or(0, Vec::len) + map.get(ANY_EVENT).map_or(0, Vec::len)
    }

    /// Dispatches `event` to every handler of its type. Never blocks.
    ///
    /// Returns the number of handler jobs queued. Keep a clone of the `Arc` to
    /// observe [`Event::is_processed`].
    pub fn publish(&self, event: impl Into<Arc<Event>>) -> usize {
        self.dispatch(InFlight::Shared(event.into()))
    }

    /// Dispatches a pooled event; it returns to its pool after the last handler.
    pub fn publish_pooled(&self, event: Pooled<Event, EventInit>) -> usize {
        self.dispatch(InFlight::Pooled(event))
    }

    /// Refuses further publishes and waits for in-flight handlers, bounded by `grace`.
    ///
    /// The worker pool is not shut down.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), RuntimeError> {
        self.inner.closed.store(true, Ordering::SeqCst);

        let drained = tokio::time::timeout(grace, async {
            loop {
                let notified = self.inner.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.inner.in_flight.load(Ordering::SeqCst) == 0 {
                    break;
                }
                notified.await;
            }
        })
        .await;

        match drained {
            Ok(()) => {
                debug!("event bus drained");
                Ok(())
            }
            Err(_) => {
                let pending = self.inner.in_flight.load(Ordering::Acquire);
                warn!(pending, "event bus drain exceeded grace");
                Err(RuntimeError::GraceExceeded {
                    component: "bus",
                    grace,
                    pending,
                })
            }
        }
    }

    /// Returns a snapshot of counters.
    pub fn stats(&self) -> BusStats {
        let (event_types, handlers) = {
            let map = self.inner.read();
            (map.len(), map.values().map(Vec::len).sum())
        };
        let c = &self.inner.counters;
        BusStats {
            event_types,
            handlers,
            published: c.published.load(Ordering::Relaxed),
            dispatched: c.dispatched.load(Ordering::Relaxed),
            succeeded: c.succeeded.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            panicked: c.panicked.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            in_flight: self.inner.in_flight.load(Ordering::Acquire),
        }
    }

    fn dispatch(&self, event: InFlight) -> usize {
        // Reserve before the closed check so `shutdown` cannot observe zero
        // while this publish is still fanning out.
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        let queued = self.fan_out(event);
        self.inner.job_done();
        queued
    }

    fn fan_out(&self, event: InFlight) -> usize {
        let counters = &self.inner.counters;
        if self.inner.closed.load(Ordering::SeqCst) {
            counters.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(kind = %event.kind, "event bus closed; event dropped");
            return 0;
        }
        counters.published.fetch_add(1, Ordering::Relaxed);

        let targets: Vec<Arc<dyn Subscribe>> = {
            let map = self.inner.read();
            map.get(event.kind.as_str())
                .into_iter()
                .chain(map.get(ANY_EVENT))
                .flatten()
                .cloned()
                .collect()
        };
        if targets.is_empty() {
            debug!(kind = %event.kind, "no handlers for event");
            return 0;
        }

        let event = Arc::new(event);
        let mut queued = 0;
        for handler in targets {
            self.inner.in_flight.fetch_add(1, Ordering::AcqRel);
            let inner = Arc::clone(&self.inner);
            let ev = Arc::clone(&event);
            let name = handler.name().to_string();

            let job = async move {
                let res = AssertUnwindSafe(handler.on_event(&ev)).catch_unwind().await;
                let c = &inner.counters;
                match res {
                    Ok(Ok(())) => {
                        c.succeeded.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(Err(err)) => {
                        c.failed.fetch_add(1, Ordering::Relaxed);
                        error!(handler = %handler.name(), kind = %ev.kind, error = %err, "event handler failed");
                    }
                    Err(payload) => {
                        c.panicked.fetch_add(1, Ordering::Relaxed);
                        error!(handler = %handler.name(), kind = %ev.kind, info = %panic_info(&*payload), "event handler panicked");
                    }
                }
                drop(ev);
                inner.job_done();
            };

            match self.inner.pool.spawn(job) {
                Ok(()) => {
                    counters.dispatched.fetch_add(1, Ordering::Relaxed);
                    queued += 1;
                }
                Err(err) => {
                    counters.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(handler = %name, kind = %event.kind, error = %err, "event dispatch dropped");
                    self.inner.job_done();
                }
            }
        }
        queued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::events::event_pool;
    use crate::pool::{FixedLoad, PoolConfig};
    use crate::subscribers::SubscriberFn;
    use std::sync::atomic::AtomicUsize;

    fn pool() -> WorkerPool {
        WorkerPool::with_load(
            PoolConfig {
                min_workers: 4,
                max_workers: 4,
                check_interval: Duration::ZERO,
                ..PoolConfig::default()
            },
            Arc::new(FixedLoad::new(10.0, 10.0)),
        )
    }

    fn counter(hits: &Arc<AtomicUsize>) -> Arc<dyn Subscribe> {
        let hits = Arc::clone(hits);
        SubscriberFn::arc("counter", move |_ev: Arc<Event>| {
            let hits = Arc::clone(&hits);
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TaskError>(())
            }
        })
    }

    #[tokio::test]
    async fn each_handler_runs_once_and_failures_are_isolated() {
        let bus = EventBus::new(pool());
        let hits = Arc::new(AtomicUsize::new(0));

        bus.subscribe("cpu.high", counter(&hits));
        bus.subscribe("cpu.high", counter(&hits));
        bus.subscribe(
            "cpu.high",
            SubscriberFn::arc("failing", |_ev: Arc<Event>| async {
                Err::<(), _>(TaskError::fail("boom"))
            }),
        );
        bus.subscribe(
            "cpu.high",
            SubscriberFn::arc("panicking", |ev: Arc<Event>| async move {
                if !ev.kind.is_empty() {
                    panic!("handler exploded");
                }
                Ok::<(), TaskError>(())
            }),
        );

        let ev = Arc::new(Event::new("cpu.high", "97%"));
        assert_eq!(bus.publish(Arc::clone(&ev)), 4);
        bus.shutdown(Duration::from_secs(1)).await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(ev.is_processed());
        let stats = bus.stats();
        assert_eq!(
            (stats.dispatched, stats.succeeded, stats.failed, stats.panicked),
            (4, 2, 1, 1)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_publishers_reach_every_handler_once() {
        let bus = EventBus::new(pool());
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let any = Arc::new(AtomicUsize::new(0));
        bus.subscribe("disk.io", counter(&first));
        bus.subscribe("disk.io", counter(&second));
        bus.subscribe_all(counter(&any));

        let mut publishers = Vec::new();
        for p in 0..4 {
            let bus = bus.clone();
            publishers.push(tokio::spawn(async move {
                let mut queued = 0;
                for i in 0..250 {
                    queued += bus.publish(Event::new("disk.io", format!("{p}/{i}")));
                    if i % 50 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
                queued
            }));
        }
        let mut queued = 0;
        for p in publishers {
            queued += p.await.unwrap();
        }
        bus.shutdown(Duration::from_secs(5)).await.unwrap();

        assert_eq!(queued, 3_000);
        assert_eq!(first.load(Ordering::SeqCst), 1_000);
        assert_eq!(second.load(Ordering::SeqCst), 1_000);
        assert_eq!(any.load(Ordering::SeqCst), 1_000);
        let stats = bus.stats();
        assert_eq!((stats.published, stats.dispatched, stats.succeeded), (1_000, 3_000, 3_000));
        assert_eq!(stats.in_flight, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shutdown_waits_for_publishes_racing_it() {
        let bus = EventBus::new(pool());
        let hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe("net.rx", counter(&hits));
        bus.subscribe("net.rx", counter(&hits));

        let mut publishers = Vec::new();
        for _ in 0..4 {
            let bus = bus.clone();
            publishers.push(tokio::spawn(async move {
                let mut queued = 0;
                for i in 0..2_000 {
                    queued += bus.publish(Event::new("net.rx", format!("{i}")));
                    tokio::task::yield_now().await;
                }
                queued
            }));
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
        bus.shutdown(Duration::from_secs(5)).await.unwrap();
        let seen_at_shutdown = hits.load(Ordering::SeqCst);

        let mut queued = 0;
        for p in publishers {
            queued += p.await.unwrap();
        }
        assert_eq!(seen_at_shutdown, queued);
        assert_eq!(hits.load(Ordering::SeqCst), queued);
    }

    #[tokio::test]
    async fn duplicate_subscribe_is_ignored_and_unsubscribe_removes() {
        let bus = EventBus::new(pool());
        let hits = Arc::new(AtomicUsize::new(0));
        let handler = counter(&hits);

        assert!(bus.subscribe("mem.low", Arc::clone(&handler)));
        assert!(!bus.subscribe("mem.low", Arc::clone(&handler)));
        assert_eq!(bus.handler_count("mem.low"), 1);

        assert!(bus.unsubscribe("mem.low", &handler));
        assert!(!bus.unsubscribe("mem.low", &handler));
        assert_eq!(bus.publish(Event::new("mem.low", "")), 0);
    }

    #[tokio::test]
    async fn wildcard_handlers_see_every_type() {
        let bus = EventBus::new(pool());
        let hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe_all(counter(&hits));

        bus.publish(Event::new("a", ""));
        bus.publish(Event::new("b", ""));
        bus.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn slow_handler_does_not_block_publish() {
        let bus = EventBus::new(pool());
        let gate = Arc::new(Notify::new());
        let gate_for_handler = Arc::clone(&gate);
        bus.subscribe(
            "slow",
            SubscriberFn::arc("slow", move |_ev: Arc<Event>| {
                let gate = Arc::clone(&gate_for_handler);
                async move {
                    gate.notified().await;
                    Ok::<_, TaskError>(())
                }
            }),
        );

        let ev = Arc::new(Event::new("slow", ""));
        assert_eq!(bus.publish(Arc::clone(&ev)), 1);
        assert!(!ev.is_processed());

        gate.notify_one();
        bus.shutdown(Duration::from_secs(1)).await.unwrap();
        assert!(ev.is_processed());
    }

    #[tokio::test]
    async fn pooled_event_returns_to_pool() {
        let bus = EventBus::new(pool());
        let hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe("disk.full", counter(&hits));

        let events = event_pool(4, 0);
        let ev = events.acquire(EventInit::new("disk.full", "98%")).await;
        assert_eq!(bus.publish_pooled(ev), 1);
        bus.shutdown(Duration::from_secs(1)).await.unwrap();

        let stats = events.stats();
        assert_eq!((stats.idle, stats.in_use), (1, 0));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_is_bounded_and_refuses_new_events() {
        let bus = EventBus::new(pool());
        bus.subscribe(
            "stuck",
            SubscriberFn::arc("stuck", |_ev: Arc<Event>| async {
                std::future::pending::<()>().await;
                Ok::<_, TaskError>(())
            }),
        );
        bus.publish(Event::new("stuck", ""));

        let err = bus.shutdown(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, RuntimeError::GraceExceeded { component: "bus", pending: 1, .. }));
        assert_eq!(bus.publish(Event::new("stuck", "")), 0);
        assert_eq!(bus.stats().dropped, 1);
    }
}
