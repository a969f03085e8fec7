//! Durable, append-only log of [`DomainEvent`]s with replay.

mod domain_event;
mod event_store;

pub use domain_event::DomainEvent;
pub use event_store::{EventStore, StoreStats};
