//! Completion handle for jobs submitted to the [`WorkerPool`](crate::WorkerPool).

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::PoolError;

/// Resolves to the job's output once a worker has run it.
///
/// Dropping the handle does not cancel the job.
///
/// ## Outcomes
/// - `Ok(T)`: the job completed
/// - `Err(PoolError::Panicked)`: the job panicked; the worker survived
/// - `Err(PoolError::Dropped)`: the job was discarded before running
#[must_use = "a TaskHandle does nothing unless awaited"]
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<Result<T, PoolError>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(rx: oneshot::Receiver<Result<T, PoolError>>) -> Self {
        Self { rx }
    }

    /// Returns the result if the job has already finished.
    pub fn try_result(&mut self) -> Option<Result<T, PoolError>> {
        match self.rx.try_recv() {
            Ok(res) => Some(res),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(PoolError::Dropped)),
        }
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, PoolError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or(Err(PoolError::Dropped)))
    }
}
