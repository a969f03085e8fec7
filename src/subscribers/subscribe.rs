//! # Core subscriber trait
//!
//! `Subscribe` is the extension point for plugging event handlers into the
//! [`EventBus`](crate::EventBus). Handlers register per event type; every publish of
//! that type runs `on_event` once, on the worker pool.
//!
//! ## Contract
//! - Implementations may be slow (I/O, retries): they do **not** block the publisher
//!   nor sibling handlers.
//! - Return `Err` for expected failures; the bus logs it and counts it. A panic is
//!   caught and treated the same way.
//! - Handler order across one publish is unspecified; handlers run concurrently.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use tunevisor::{Event, Subscribe, TaskError};
//!
//! struct Audit;
//!
//! #[async_trait]
//! impl Subscribe for Audit {
//!     async fn on_event(&self, ev: &Event) -> Result<(), TaskError> {
//!         if ev.message.is_empty() {
//!             return Err(TaskError::fail("empty message"));
//!         }
//!         Ok(())
//!     }
//!     fn name(&self) -> &str { "audit" }
//! }
//! ```

use async_trait::async_trait;

use crate::error::TaskError;
use crate::events::Event;

/// Contract for event handlers.
///
/// Called from a worker pool task. Implementations should avoid blocking the async
/// runtime (prefer async I/O and cooperative waits).
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handle a single event.
    ///
    /// # Parameters
    /// - `event`: Reference to the event (shared with sibling handlers)
    async fn on_event(&self, event: &Event) -> Result<(), TaskError>;

    /// Human-readable name (for logs/metrics).
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}
