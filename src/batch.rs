//! # Batched writes flushed on the worker pool.
//!
//! [`BatchWriter`] buffers items and hands them to a [`FlushSink`] in batches:
//!
//! ```text
//! write(item) ─► buffer ──len ≥ batch_size──┐
//! timer (flush_interval) ──buffer idle──────┼─► take batch ─► acquire flush permit ─► pool.submit(sink.flush(batch))
//! flush() ──────────────────────────────────┘        (awaits when max_concurrent_flushes are in flight)
//! ```
//!
//! - At most `max_concurrent_flushes` flushes run at once; a writer that fills a batch
//!   while all permits are taken waits for one.
//! - Sink errors and panics are logged and counted; the writer keeps going.
//! - [`BatchWriter::close`] stops the timer, flushes the remainder and waits for every
//!   in-flight flush. Writes after close fail with [`BatchError::Closed`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::error::{panic_info, BatchError, TaskError};
use crate::pool::WorkerPool;

/// Batch writer settings.
#[derive(Clone, Debug)]
pub struct BatchConfig {
    /// Items per batch (min 1).
    pub batch_size: usize,
    /// Period of the background flush (`0` = size-triggered and manual flushes only).
    pub flush_interval: Duration,
    /// Concurrent flush limit (min 1).
    pub max_concurrent_flushes: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval: Duration::from_secs(5),
            max_concurrent_flushes: 5,
        }
    }
}

/// Destination of flushed batches.
#[async_trait]
pub trait FlushSink<T>: Send + Sync + 'static {
    async fn flush(&self, batch: Vec<T>) -> Result<(), TaskError>;
}

/// Snapshot of writer counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub buffered: usize,
    pub batches: u64,
    pub items: u64,
    pub failed_batches: u64,
    pub closed: bool,
}

#[derive(Default)]
struct Counters {
    batches: AtomicU64,
    items: AtomicU64,
    failed: AtomicU64,
}

struct Buffer<T> {
    items: Vec<T>,
    last_flush: Instant,
    closed: bool,
}

/// A drained batch; the token keeps `close` waiting until it is flushed or dropped.
struct Taken<T> {
    batch: Vec<T>,
    token: TaskTrackerToken,
}

struct Inner<T> {
    cfg: BatchConfig,
    sink: Arc<dyn FlushSink<T>>,
    pool: WorkerPool,
    buffer: Mutex<Buffer<T>>,
    permits: Arc<Semaphore>,
    flushes: TaskTracker,
    counters: Arc<Counters>,
    timer: CancellationToken,
}

/// Buffers items and flushes them in batches.
pub struct BatchWriter<T> {
    inner: Arc<Inner<T>>,
}

impl<T: Send + 'static> BatchWriter<T> {
    /// Creates the writer and, if `flush_interval` is non-zero, starts its timer.
    pub fn new(cfg: BatchConfig, pool: WorkerPool, sink: Arc<dyn FlushSink<T>>) -> Self {
        let cfg = BatchConfig {
            batch_size: cfg.batch_size.max(1),
            max_concurrent_flushes: cfg.max_concurrent_flushes.max(1),
            ..cfg
        };
        let inner = Arc::new(Inner {
            permits: Arc::new(Semaphore::new(cfg.max_concurrent_flushes)),
            buffer: Mutex::new(Buffer {
                items: Vec::with_capacity(cfg.batch_size),
                last_flush: Instant::now(),
                closed: false,
            }),
            cfg,
            sink,
            pool,
            flushes: TaskTracker::new(),
            counters: Arc::new(Counters::default()),
            timer: CancellationToken::new(),
        });

        if !inner.cfg.flush_interval.is_zero() {
            tokio::spawn(run_timer(Arc::downgrade(&inner), inner.timer.clone()));
        }
        Self { inner }
    }

    /// Buffers one item; a full batch is flushed before returning.
    pub async fn write(&self, item: T) -> Result<(), BatchError> {
        let full = {
            let mut buf = self.inner.lock();
            if buf.closed {
                return Err(BatchError::Closed);
            }
            buf.items.push(item);
            (buf.items.len() >= self.inner.cfg.batch_size).then(|| self.inner.take(&mut buf))
        };
        match full {
            Some(taken) => self.inner.dispatch(taken).await,
            None => Ok(()),
        }
    }

    /// Flushes whatever is buffered. Does not wait for the sink.
    pub async fn flush(&self) -> Result<(), BatchError> {
        self.inner.flush_buffered().await
    }

    /// Stops the timer, flushes the remainder and waits for in-flight flushes.
    pub async fn close(&self) -> Result<(), BatchError> {
        let remainder = {
            let mut buf = self.inner.lock();
            if buf.closed {
                return Ok(());
            }
            buf.closed = true;
            self.inner.take(&mut buf)
        };
        self.inner.timer.cancel();
        let res = if remainder.batch.is_empty() {
            Ok(())
        } else {
            self.inner.dispatch(remainder).await
        };
        self.inner.flushes.close();
        self.inner.flushes.wait().await;
        debug!("batch writer closed");
        res
    }

    pub fn buffered(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn stats(&self) -> BatchStats {
        let c = &self.inner.counters;
        let (buffered, closed) = {
            let buf = self.inner.lock();
            (buf.items.len(), buf.closed)
        };
        BatchStats {
            buffered,
            batches: c.batches.load(Ordering::Relaxed),
            items: c.items.load(Ordering::Relaxed),
            failed_batches: c.failed.load(Ordering::Relaxed),
            closed,
        }
    }
}

impl<T> Drop for BatchWriter<T> {
    fn drop(&mut self) {
        self.inner.timer.cancel();
    }
}

impl<T: Send + 'static> Inner<T> {
    fn lock(&self) -> std::sync::MutexGuard<'_, Buffer<T>> {
        self.buffer.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Drains the buffer. Call with the buffer lock held.
    fn take(&self, buf: &mut Buffer<T>) -> Taken<T> {
        buf.last_flush = Instant::now();
        Taken {
            batch: std::mem::take(&mut buf.items),
            token: self.flushes.token(),
        }
    }

    async fn flush_buffered(&self) -> Result<(), BatchError> {
        let taken = {
            let mut buf = self.lock();
            self.take(&mut buf)
        };
        if taken.batch.is_empty() {
            return Ok(());
        }
        self.dispatch(taken).await
    }

    async fn dispatch(&self, taken: Taken<T>) -> Result<(), BatchError> {
        let Taken { batch, token } = taken;
        let items = batch.len();
        let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
            return Err(BatchError::Closed);
        };

        let sink = Arc::clone(&self.sink);
        let counters = Arc::clone(&self.counters);
        let job = async move {
            let _token = token;
            let _permit = permit;
            let res = std::panic::AssertUnwindSafe(sink.flush(batch))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    Err(TaskError::Panicked {
                        info: panic_info(&*payload),
                    })
                });
            counters.batches.fetch_add(1, Ordering::Relaxed);
            match res {
                Ok(()) => {
                    counters.items.fetch_add(items as u64, Ordering::Relaxed);
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(items, error = %e, label = e.as_label(), "batch flush failed");
                }
            }
        };

        match self.pool.submit(job).await {
            Ok(_handle) => {
                debug!(items, "batch flush queued");
                Ok(())
            }
            Err(source) => {
                warn!(items, error = %source, "batch flush refused by pool; batch lost");
                Err(BatchError::Refused { items, source })
            }
        }
    }
}

async fn run_timer<T: Send + 'static>(inner: Weak<Inner<T>>, token: CancellationToken) {
    let Some(period) = inner.upgrade().map(|i| i.cfg.flush_interval) else {
        return;
    };
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(inner) = inner.upgrade() else { break };
        let due = {
            let buf = inner.lock();
            !buf.items.is_empty() && buf.last_flush.elapsed() >= period
        };
        if due {
            if let Err(e) = inner.flush_buffered().await {
                warn!(error = %e, "timed batch flush failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{FixedLoad, PoolConfig};

    #[derive(Default)]
    struct Collect {
        batches: Mutex<Vec<Vec<u32>>>,
    }

    #[async_trait]
    impl FlushSink<u32> for Collect {
        async fn flush(&self, batch: Vec<u32>) -> Result<(), TaskError> {
            if batch.contains(&13) {
                return Err(TaskError::fail("unlucky batch"));
            }
            self.batches.lock().unwrap().push(batch);
            Ok(())
        }
    }

    fn pool() -> WorkerPool {
        let cfg = PoolConfig {
            min_workers: 2,
            max_workers: 2,
            check_interval: Duration::ZERO,
            ..PoolConfig::default()
        };
        WorkerPool::with_load(cfg, Arc::new(FixedLoad::new(10.0, 10.0)))
    }

    fn writer(cfg: BatchConfig) -> (BatchWriter<u32>, Arc<Collect>) {
        let sink = Arc::new(Collect::default());
        (BatchWriter::new(cfg, pool(), sink.clone()), sink)
    }

    #[tokio::test]
    async fn full_batch_flushes() {
        let (w, sink) = writer(BatchConfig {
            batch_size: 3,
            flush_interval: Duration::ZERO,
            ..BatchConfig::default()
        });
        for i in 0..7 {
            w.write(i).await.unwrap();
        }
        assert_eq!(w.buffered(), 1);

        w.close().await.unwrap();
        let batches = sink.batches.lock().unwrap().clone();
        let mut flat: Vec<u32> = batches.iter().flatten().copied().collect();
        flat.sort_unstable();
        assert_eq!(flat, (0..7).collect::<Vec<_>>());
        assert_eq!(batches.len(), 3);
        assert_eq!(w.stats().items, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_flushes_idle_buffer() {
        let (w, sink) = writer(BatchConfig {
            batch_size: 100,
            flush_interval: Duration::from_secs(5),
            ..BatchConfig::default()
        });
        w.write(1).await.unwrap();
        w.write(2).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5_100)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(w.buffered(), 0);
        assert_eq!(*sink.batches.lock().unwrap(), vec![vec![1, 2]]);
        w.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn accepted_writes_racing_close_are_delivered() {
        let (w, sink) = writer(BatchConfig {
            batch_size: 4,
            flush_interval: Duration::ZERO,
            max_concurrent_flushes: 2,
        });
        let w = Arc::new(w);

        let mut writers = Vec::new();
        for t in 0..4u32 {
            let w = Arc::clone(&w);
            writers.push(tokio::spawn(async move {
                let mut accepted = Vec::new();
                for i in 0..200u32 {
                    let item = 1_000 + t * 1_000 + i;
                    match w.write(item).await {
                        Ok(()) => accepted.push(item),
                        Err(BatchError::Closed) => break,
                        Err(e) => panic!("unexpected {e}"),
                    }
                    tokio::task::yield_now().await;
                }
                accepted
            }));
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
        w.close().await.unwrap();

        let mut accepted: Vec<u32> = Vec::new();
        for h in writers {
            accepted.extend(h.await.unwrap());
        }
        let mut delivered: Vec<u32> = sink
            .batches
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .copied()
            .collect();
        accepted.sort_unstable();
        delivered.sort_unstable();
        assert_eq!(delivered, accepted);
        assert_eq!(w.stats().buffered, 0);
    }

    #[tokio::test]
    async fn write_after_close_is_rejected() {
        let (w, _sink) = writer(BatchConfig::default());
        w.write(1).await.unwrap();
        w.close().await.unwrap();
        assert_eq!(w.write(2).await, Err(BatchError::Closed));
        assert!(w.stats().closed);
        assert_eq!(w.stats().items, 1);
    }

    #[tokio::test]
    async fn failing_flush_is_counted() {
        let (w, sink) = writer(BatchConfig {
            batch_size: 2,
            flush_interval: Duration::ZERO,
            ..BatchConfig::default()
        });
        for i in [12, 13, 14, 15] {
            w.write(i).await.unwrap();
        }
        w.close().await.unwrap();

        let stats = w.stats();
        assert_eq!(stats.batches, 2);
        assert_eq!(stats.failed_batches, 1);
        assert_eq!(*sink.batches.lock().unwrap(), vec![vec![14, 15]]);
    }

    #[tokio::test]
    async fn concurrent_flushes_are_bounded() {
        struct Slow {
            running: std::sync::atomic::AtomicUsize,
            peak: std::sync::atomic::AtomicUsize,
        }

        #[async_trait]
        impl FlushSink<u32> for Slow {
            async fn flush(&self, _batch: Vec<u32>) -> Result<(), TaskError> {
                let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let sink = Arc::new(Slow {
            running: Default::default(),
            peak: Default::default(),
        });
        let cfg = PoolConfig {
            min_workers: 8,
            max_workers: 8,
            check_interval: Duration::ZERO,
            ..PoolConfig::default()
        };
        let pool = WorkerPool::with_load(cfg, Arc::new(FixedLoad::new(10.0, 10.0)));
        let w = BatchWriter::new(
            BatchConfig {
                batch_size: 1,
                flush_interval: Duration::ZERO,
                max_concurrent_flushes: 2,
            },
            pool,
            sink.clone(),
        );

        for i in 0..10 {
            w.write(i).await.unwrap();
        }
        w.close().await.unwrap();

        assert!(sink.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(w.stats().items, 10);
    }
}
