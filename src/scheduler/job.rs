//! # Scheduled job abstraction and function-backed implementation.
//!
//! A [`Job`] is the action a [`ScheduledTask`](crate::ScheduledTask) runs each time
//! it is due: a named async unit returning `Result<(), TaskError>`. The common
//! handle type is [`JobRef`], an `Arc<dyn Job>`.
//!
//! [`JobFn`] wraps a closure `F: Fn() -> Fut`, producing a fresh future per run;
//! if runs need shared state, capture an `Arc<...>` explicitly.
//!
//! ## Example
//! ```rust
//! use tunevisor::{Job, JobFn, JobRef, TaskError};
//!
//! let job: JobRef = JobFn::arc("poll-cpu", || async {
//!     // read a metric, compare with a threshold...
//!     Ok::<_, TaskError>(())
//! });
//! assert_eq!(job.name(), "poll-cpu");
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TaskError;

/// Shared handle to a job.
pub type JobRef = Arc<dyn Job>;

/// # Asynchronous periodic action.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use tunevisor::{Job, TaskError};
///
/// struct Flush;
///
/// #[async_trait]
/// impl Job for Flush {
///     fn name(&self) -> &str { "flush" }
///
///     async fn run(&self) -> Result<(), TaskError> {
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// Returns a stable, human-readable job name.
    fn name(&self) -> &str;

    /// Performs one run. Errors are logged by the scheduler and never stop the loop.
    async fn run(&self) -> Result<(), TaskError>;
}

/// Function-backed job implementation.
#[derive(Debug)]
pub struct JobFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> JobFn<F> {
    /// Creates a new function-backed job.
    ///
    /// Prefer [`JobFn::arc`] when you immediately need a [`JobRef`].
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Creates the job and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<F, Fut> Job for JobFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<(), TaskError> {
        (self.f)().await
    }
}
