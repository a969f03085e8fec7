//! Domain events: data model, pooling and the dispatch bus.
//!
//! ## Contents
//! - [`Event`], [`Level`], [`EventInit`] the event data model
//! - [`EventBus`] per-type handler registry with pool-backed fan-out
//! - [`event_pool`] a ready-made [`ObjectPool`] of reusable events
//!
//! ## Quick reference
//! - **Publishers**: managers, via `EventBus::publish` / `publish_pooled`.
//! - **Consumers**: [`Subscribe`](crate::Subscribe) implementations registered per type.

mod bus;
mod event;

pub use bus::{BusStats, EventBus, ANY_EVENT};
pub use event::{Event, EventInit, Level, DEFAULT_PRIORITY};

use crate::memory::ObjectPool;

/// Default maximum number of pooled events.
pub const EVENT_POOL_MAX: usize = 500;
/// Default number of events preallocated by [`event_pool`].
pub const EVENT_POOL_PREALLOC: usize = 50;

/// Builds a pool of reusable [`Event`]s.
///
/// Acquired events are re-initialised from an [`EventInit`] (fresh timestamp,
/// id and sequence number) and cleared when they return.
///
/// ```rust
/// use tunevisor::{event_pool, EventInit};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let events = event_pool(8, 2);
/// let ev = events.acquire(EventInit::new("fan.speed", "4200 rpm")).await;
/// assert_eq!(ev.kind, "fan.speed");
/// # }
/// ```
pub fn event_pool(max_size: usize, prealloc: usize) -> ObjectPool<Event, EventInit> {
    ObjectPool::builder(Event::blank)
        .reinit(|ev: &mut Event, init: EventInit| ev.reinit(init))
        .reset(|ev: &mut Event| ev.reset())
        .max_size(max_size)
        .prealloc(prealloc)
        .build()
}
