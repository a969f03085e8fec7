//! # Function-backed subscriber (`SubscriberFn`)
//!
//! [`SubscriberFn`] wraps a closure `F: Fn(Arc<Event>) -> Fut`, producing a fresh
//! future per event. The closure receives a shared handle so the returned future
//! can own it.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use tunevisor::{Event, Subscribe, SubscriberFn, TaskError};
//!
//! let handler = SubscriberFn::arc("print", |ev: Arc<Event>| async move {
//!     println!("{}: {}", ev.kind, ev.message);
//!     Ok::<_, TaskError>(())
//! });
//! assert_eq!(handler.name(), "print");
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TaskError;
use crate::events::Event;
use crate::subscribers::Subscribe;

/// Function-backed subscriber implementation.
#[derive(Debug)]
pub struct SubscriberFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> SubscriberFn<F> {
    /// Creates a new function-backed subscriber.
    ///
    /// Prefer [`SubscriberFn::arc`] when registering on a bus right away.
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Creates the subscriber as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<F, Fut> Subscribe for SubscriberFn<F>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    async fn on_event(&self, event: &Event) -> Result<(), TaskError> {
        (self.f)(Arc::new(event.clone())).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
