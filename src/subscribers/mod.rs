//! # Event subscribers for the tunevisor runtime.
//!
//! This module provides the [`Subscribe`] trait, a closure adapter and a built-in
//! logging subscriber for events dispatched by the [`EventBus`](crate::EventBus).
//!
//! ## Architecture
//! ```text
//! Event flow:
//!   Manager ── publish(Event) ──► EventBus ──► snapshot handlers of event.kind (+ "*")
//!                                                 │
//!                                                 ▼ one pool job per handler
//!                                    ┌────────────┼─────────────┐
//!                                    ▼            ▼             ▼
//!                               LogWriter   SubscriberFn    Custom ...
//!                                    │            │             │
//!                                    └── Result / panic logged, never propagated
//! ```
//!
//! ## Implementing custom subscribers
//! ```no_run
//! use tunevisor::{Subscribe, Event, TaskError};
//! use async_trait::async_trait;
//!
//! struct MetricsSubscriber;
//!
//! #[async_trait]
//! impl Subscribe for MetricsSubscriber {
//!     async fn on_event(&self, event: &Event) -> Result<(), TaskError> {
//!         if event.kind == "cpu.high" {
//!             // increment a counter
//!         }
//!         Ok(())
//!     }
//! }
//! ```

mod log;
mod subscribe;
mod subscriber_fn;

pub use log::LogWriter;
pub use subscribe::Subscribe;
pub use subscriber_fn::SubscriberFn;
