//! Error types used by the tunevisor runtime and its components.
//!
//! Each concern has its own enum so callers can match precisely:
//!
//! - [`RuntimeError`]: errors raised by runtime assembly and shutdown.
//! - [`TaskError`]: failures returned by handlers, scheduled jobs and pool jobs.
//! - [`PoolError`]: submission and completion failures of the worker pool.
//! - [`BreakerError`]: rejection by an open circuit or the wrapped error.
//! - [`LimitError`]: throttling and capacity violations of the rate limiter.
//! - [`StoreError`]: I/O and encoding failures of the event store.
//! - [`BatchError`]: writes to a closed batch writer and refused flush jobs.
//!
//! All enums expose `as_label()` returning a short stable snake_case label for logs/metrics.

use std::time::Duration;
use thiserror::Error;

use crate::resilience::CircuitState;

/// # Errors produced by the runtime itself.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// A shutdown step did not complete within its grace period.
    #[error("shutdown of {component} exceeded {grace:?}; {pending} unit(s) still pending")]
    GraceExceeded {
        /// Component whose drain timed out.
        component: &'static str,
        /// The configured grace duration.
        grace: Duration,
        /// Units of work still in flight when the grace elapsed.
        pending: usize,
    },

    /// `start()` was called on a component whose loop is already running.
    #[error("{component} is already running")]
    AlreadyRunning {
        /// Component name.
        component: &'static str,
    },

    /// The event store could not be opened while building the runtime.
    #[error("event store unavailable: {0}")]
    Store(#[from] StoreError),

    /// OS signal handlers could not be installed.
    #[error("failed to listen for shutdown signals: {0}")]
    Signal(std::io::Error),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use tunevisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { component: "bus", grace: Duration::from_secs(5), pending: 2 };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::AlreadyRunning { .. } => "runtime_already_running",
            RuntimeError::Store(_) => "runtime_store_unavailable",
            RuntimeError::Signal(_) => "runtime_signal_failed",
        }
    }
}

/// # Failures returned by units of work (handlers, scheduled jobs, pool jobs).
///
/// These never cross a component boundary: the component that ran the unit
/// logs them and carries on.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// The unit failed with an error message.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// The unit panicked; the panic was caught.
    #[error("panicked: {info}")]
    Panicked {
        /// Panic payload rendered as text.
        info: String,
    },

    /// The unit exceeded its timeout.
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// The timeout that was exceeded.
        timeout: Duration,
    },
}

impl TaskError {
    /// Convenience constructor for [`TaskError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        TaskError::Fail {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use tunevisor::TaskError;
    ///
    /// assert_eq!(TaskError::fail("boom").as_label(), "task_failed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Fail { .. } => "task_failed",
            TaskError::Panicked { .. } => "task_panicked",
            TaskError::Timeout { .. } => "task_timeout",
        }
    }
}

/// # Errors produced by the worker pool.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// The pool was shut down; no new work is accepted.
    #[error("worker pool is shut down")]
    ShutDown,

    /// Non-blocking submission found the queue at capacity.
    #[error("worker pool queue full (capacity {capacity})")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// The job panicked while running.
    #[error("job panicked: {info}")]
    Panicked {
        /// Panic payload rendered as text.
        info: String,
    },

    /// The job was dropped before producing a result.
    #[error("job dropped before completion")]
    Dropped,
}

impl PoolError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            PoolError::ShutDown => "pool_shut_down",
            PoolError::QueueFull { .. } => "pool_queue_full",
            PoolError::Panicked { .. } => "pool_job_panicked",
            PoolError::Dropped => "pool_job_dropped",
        }
    }
}

/// # Result of a call guarded by a [`CircuitBreaker`](crate::CircuitBreaker).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BreakerError<E> {
    /// The circuit rejected the call without invoking the operation.
    #[error("circuit {state} - retry after {retry_after:?}")]
    Rejected {
        /// State that caused the rejection (`Open`, or `HalfOpen` with a probe in flight).
        state: CircuitState,
        /// Remaining time until the circuit admits a probe call.
        retry_after: Duration,
    },

    /// The operation ran and returned this error.
    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            BreakerError::Rejected { .. } => "breaker_rejected",
            BreakerError::Inner(_) => "breaker_inner",
        }
    }

    /// True if the breaker rejected the call.
    pub fn is_rejected(&self) -> bool {
        matches!(self, BreakerError::Rejected { .. })
    }

    /// Returns the wrapped operation error, if any.
    pub fn into_inner(self) -> Option<E> {
        match self {
            BreakerError::Inner(e) => Some(e),
            BreakerError::Rejected { .. } => None,
        }
    }
}

/// # Errors produced by rate limiting.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LimitError {
    /// No allowance available right now; the operation was not invoked.
    #[error("rate limit exceeded")]
    Throttled,

    /// The request can never be satisfied by this limiter.
    #[error("requested {requested} tokens but capacity is {capacity}")]
    ExceedsCapacity {
        /// Tokens requested.
        requested: u64,
        /// Bucket capacity.
        capacity: u64,
    },
}

impl LimitError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            LimitError::Throttled => "limit_throttled",
            LimitError::ExceedsCapacity { .. } => "limit_exceeds_capacity",
        }
    }
}

/// # Errors produced by the append-only event store.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying file I/O failed.
    #[error("event log i/o: {0}")]
    Io(#[from] std::io::Error),

    /// An event could not be encoded as JSON.
    #[error("event encoding: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            StoreError::Io(_) => "store_io",
            StoreError::Encode(_) => "store_encode",
        }
    }
}

/// # Errors produced by the batch writer.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    /// The writer was closed; the item was not buffered.
    #[error("batch writer is closed")]
    Closed,

    /// The worker pool refused the flush job; the batch was lost.
    #[error("flush of {items} item(s) refused: {source}")]
    Refused {
        /// Size of the lost batch.
        items: usize,
        /// Why the pool refused the job.
        source: PoolError,
    },
}

impl BatchError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            BatchError::Closed => "batch_closed",
            BatchError::Refused { .. } => "batch_refused",
        }
    }
}

/// Renders a caught panic payload as text.
pub(crate) fn panic_info(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
