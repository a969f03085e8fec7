//! # Job queue and worker generations.
//!
//! The pool owns one job queue. A [`Generation`] is a set of N worker tasks
//! pulling from it. Resizing never mutates a generation: the pool spawns a new
//! one and retires the old.
//!
//! ```text
//!   JobSender ──► [ job queue ] ──► shared receiver ──┬──► gen 3 worker 1..N   (current)
//!                                                     └──► gen 2 worker 1..M   (retired: finishing
//!                                                                               the job in hand)
//! ```
//!
//! ## Retirement
//! - [`Generation::retire`] cancels the workers: each finishes the job in hand and
//!   exits without pulling another. Queued jobs stay in the queue for the next generation.
//! - [`Generation::finish`] leaves the workers running until the queue is closed and empty
//!   (pool shutdown).

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::trace;

/// A type-erased unit of work. Result delivery and metrics are baked in at submit time.
pub(crate) type Job = BoxFuture<'static, ()>;

/// Sending half of the job queue.
#[derive(Clone)]
pub(crate) enum JobSender {
    Bounded(mpsc::Sender<Job>),
    Unbounded(mpsc::UnboundedSender<Job>),
}

/// Outcome of a non-blocking send.
pub(crate) enum TrySend {
    Sent,
    Full,
    Closed,
}

impl JobSender {
    pub(crate) fn try_send(&self, job: Job) -> TrySend {
        match self {
            JobSender::Bounded(tx) => match tx.try_send(job) {
                Ok(()) => TrySend::Sent,
                Err(mpsc::error::TrySendError::Full(_)) => TrySend::Full,
                Err(mpsc::error::TrySendError::Closed(_)) => TrySend::Closed,
            },
            JobSender::Unbounded(tx) => match tx.send(job) {
                Ok(()) => TrySend::Sent,
                Err(_) => TrySend::Closed,
            },
        }
    }

    /// Waits for queue space. Fails only if the queue closed.
    pub(crate) async fn send(&self, job: Job) -> Result<(), ()> {
        match self {
            JobSender::Bounded(tx) => tx.send(job).await.map_err(|_| ()),
            JobSender::Unbounded(tx) => tx.send(job).map_err(|_| ()),
        }
    }
}

pub(crate) enum JobReceiver {
    Bounded(mpsc::Receiver<Job>),
    Unbounded(mpsc::UnboundedReceiver<Job>),
}

impl JobReceiver {
    async fn recv(&mut self) -> Option<Job> {
        match self {
            JobReceiver::Bounded(rx) => rx.recv().await,
            JobReceiver::Unbounded(rx) => rx.recv().await,
        }
    }
}

/// Receiver shared by every worker of every generation.
pub(crate) type SharedReceiver = Arc<Mutex<JobReceiver>>;

/// Creates the job queue (`None` = unbounded).
pub(crate) fn queue(capacity: Option<usize>) -> (JobSender, SharedReceiver) {
    let (tx, rx) = match capacity {
        Some(cap) => {
            let (tx, rx) = mpsc::channel(cap.max(1));
            (JobSender::Bounded(tx), JobReceiver::Bounded(rx))
        }
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (JobSender::Unbounded(tx), JobReceiver::Unbounded(rx))
        }
    };
    (tx, Arc::new(Mutex::new(rx)))
}

/// A set of workers pulling from the shared queue.
pub(crate) struct Generation {
    pub(crate) id: u64,
    pub(crate) workers: usize,
    token: CancellationToken,
    tracker: TaskTracker,
}

impl Generation {
    /// Spawns `workers` tasks over `receiver`.
    ///
    /// Must be called within a Tokio runtime.
    pub(crate) fn spawn(id: u64, workers: usize, receiver: &SharedReceiver) -> Self {
        let token = CancellationToken::new();
        let tracker = TaskTracker::new();

        for worker in 0..workers {
            let rx = Arc::clone(receiver);
            let token = token.clone();
            tracker.spawn(async move {
                loop {
                    let job = tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        job = async { rx.lock().await.recv().await } => job,
                    };
                    match job {
                        Some(job) => job.await,
                        None => break,
                    }
                }
                trace!(generation = id, worker, "worker exited");
            });
        }
        tracker.close();

        Self {
            id,
            workers,
            token,
            tracker,
        }
    }

    /// Stops pulling new jobs; returns a tracker completing once every worker exited.
    pub(crate) fn retire(self) -> TaskTracker {
        self.token.cancel();
        self.tracker
    }

    /// Keeps pulling until the queue is closed and empty; returns the worker tracker.
    pub(crate) fn finish(self) -> TaskTracker {
        self.tracker
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting_job(done: &Arc<AtomicUsize>) -> Job {
        let done = Arc::clone(done);
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(2)).await;
            done.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn finished_generation_drains_queue() {
        let (tx, rx) = queue(None);
        let generation = Generation::spawn(1, 2, &rx);
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            assert!(matches!(tx.try_send(counting_job(&done)), TrySend::Sent));
        }
        drop(tx);

        generation.finish().wait().await;
        assert_eq!(done.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn retired_generation_leaves_queue_to_successor() {
        let (tx, rx) = queue(None);
        let old = Generation::spawn(1, 1, &rx);
        old.retire().wait().await;

        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            assert!(matches!(tx.try_send(counting_job(&done)), TrySend::Sent));
        }
        drop(tx);

        Generation::spawn(2, 3, &rx).finish().wait().await;
        assert_eq!(done.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn bounded_queue_reports_full() {
        let (tx, _rx) = queue(Some(1));
        assert!(matches!(tx.try_send(Box::pin(async {})), TrySend::Sent));
        assert!(matches!(tx.try_send(Box::pin(async {})), TrySend::Full));
    }
}
