//! # Reusable object pool.
//!
//! [`ObjectPool`] hands out [`Pooled`] guards over objects that are recycled
//! instead of reallocated. Ownership alternates between the pool (idle) and exactly
//! one caller (acquired).
//!
//! ## Lifecycle
//! ```text
//!  acquire(args) ──► idle object?  ── yes ──► reinit(obj, args) ──► Pooled<T>
//!                        │ no                                          │ drop
//!                        ▼                                             ▼
//!                 created < max? ── yes ──► factory()           reset(obj)
//!                        │ no                                          │
//!                        ▼                                             ▼
//!                 wait for a release                    idle full? ── yes ──► dropped
//!                                                              │ no
//!                                                              ▼
//!                                                          back to idle
//! ```
//!
//! ## Rules
//! - At most `max_size` objects are checked out at once; further `acquire` calls suspend.
//! - `reinit` runs on every acquire with the call-site arguments; `reset` on every return.
//! - [`Pooled::into_inner`] detaches an object permanently; [`ObjectPool::release`]
//!   can hand it back later.

use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

type Factory<T> = Box<dyn Fn() -> T + Send + Sync>;
type Reinit<T, A> = Box<dyn Fn(&mut T, A) + Send + Sync>;
type Reset<T> = Box<dyn Fn(&mut T) + Send + Sync>;

/// Snapshot of pool counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectPoolStats {
    pub max_size: usize,
    pub idle: usize,
    pub in_use: usize,
    pub created: u64,
    pub reused: u64,
    pub dropped: u64,
}

struct PoolInner<T, A> {
    factory: Factory<T>,
    reinit: Option<Reinit<T, A>>,
    reset: Option<Reset<T>>,
    max_size: usize,
    idle: Mutex<Vec<T>>,
    checkout: Arc<Semaphore>,
    created: AtomicU64,
    reused: AtomicU64,
    dropped: AtomicU64,
}

impl<T, A> PoolInner<T, A> {
    fn idle(&self) -> MutexGuard<'_, Vec<T>> {
        self.idle.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn take(&self, args: A) -> T {
        let recycled = self.idle().pop();
        let mut obj = match recycled {
            Some(obj) => {
                self.reused.fetch_add(1, Ordering::Relaxed);
                obj
            }
            None => {
                self.created.fetch_add(1, Ordering::Relaxed);
                (self.factory)()
            }
        };
        if let Some(reinit) = &self.reinit {
            reinit(&mut obj, args);
        }
        obj
    }

    fn give_back(&self, mut obj: T) {
        if let Some(reset) = &self.reset {
            reset(&mut obj);
        }
        let mut idle = self.idle();
        if idle.len() < self.max_size {
            idle.push(obj);
        } else {
            drop(idle);
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Builder-style constructor for [`ObjectPool`].
pub struct ObjectPoolBuilder<T, A = ()> {
    factory: Factory<T>,
    reinit: Option<Reinit<T, A>>,
    reset: Option<Reset<T>>,
    max_size: usize,
    prealloc: usize,
}

impl<T: Send + 'static, A: 'static> ObjectPoolBuilder<T, A> {
    /// Hook applied with the call-site arguments on every acquire.
    pub fn reinit<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut T, A) + Send + Sync + 'static,
    {
        self.reinit = Some(Box::new(f));
        self
    }

    /// Hook that clears state when an object returns to the pool.
    pub fn reset<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut T) + Send + Sync + 'static,
    {
        self.reset = Some(Box::new(f));
        self
    }

    /// Maximum checked-out objects (also the idle capacity). Minimum 1.
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size.max(1);
        self
    }

    /// Objects created eagerly at build time (capped at `max_size`).
    pub fn prealloc(mut self, prealloc: usize) -> Self {
        self.prealloc = prealloc;
        self
    }

    pub fn build(self) -> ObjectPool<T, A> {
        let count = self.prealloc.min(self.max_size);
        let idle: Vec<T> = (0..count).map(|_| (self.factory)()).collect();
        ObjectPool {
            inner: Arc::new(PoolInner {
                factory: self.factory,
                reinit: self.reinit,
                reset: self.reset,
                max_size: self.max_size,
                idle: Mutex::new(idle),
                checkout: Arc::new(Semaphore::new(self.max_size)),
                created: AtomicU64::new(count as u64),
                reused: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }
}

/// Thread-safe pool of reusable objects.
///
/// `A` is the argument type passed to the `reinit` hook on acquire (`()` if unused).
/// Cloning the pool yields another handle to the same objects.
///
/// ## Example
/// ```rust
/// use tunevisor::ObjectPool;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let pool = ObjectPool::builder(Vec::<u8>::new)
///     .reset(|buf| buf.clear())
///     .max_size(4)
///     .build();
///
/// {
///     let mut buf = pool.acquire(()).await;
///     buf.extend_from_slice(b"sample");
/// } // returned (and cleared) here
///
/// let buf = pool.acquire(()).await;
/// assert!(buf.is_empty());
/// # }
/// ```
pub struct ObjectPool<T, A = ()> {
    inner: Arc<PoolInner<T, A>>,
}

impl<T, A> Clone for ObjectPool<T, A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static, A: 'static> ObjectPool<T, A> {
    /// Starts a builder with the given factory. Defaults: `max_size = 100`, `prealloc = 10`.
    pub fn builder<F>(factory: F) -> ObjectPoolBuilder<T, A>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        ObjectPoolBuilder {
            factory: Box::new(factory),
            reinit: None,
            reset: None,
            max_size: 100,
            prealloc: 10,
        }
    }

    /// Takes an object, suspending while `max_size` objects are checked out.
    pub async fn acquire(&self, args: A) -> Pooled<T, A> {
        let permit = match Arc::clone(&self.inner.checkout).acquire_owned().await {
            Ok(permit) => Some(permit),
            // The semaphore is never closed; fall through unbounded if it ever is.
            Err(_) => None,
        };
        self.wrap(args, permit)
    }

    /// Takes an object if one can be checked out right now.
    pub fn try_acquire(&self, args: A) -> Option<Pooled<T, A>> {
        let permit = Arc::clone(&self.inner.checkout).try_acquire_owned().ok()?;
        Some(self.wrap(args, Some(permit)))
    }

    /// Returns a detached object to the pool (reset applied).
    ///
    /// If the idle set is already full, the object is dropped.
    pub fn release(&self, obj: T) {
        self.inner.give_back(obj);
    }

    /// Returns a snapshot of counters.
    pub fn stats(&self) -> ObjectPoolStats {
        ObjectPoolStats {
            max_size: self.inner.max_size,
            idle: self.inner.idle().len(),
            in_use: self.inner.max_size - self.inner.checkout.available_permits(),
            created: self.inner.created.load(Ordering::Relaxed),
            reused: self.inner.reused.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
        }
    }

    fn wrap(&self, args: A, permit: Option<OwnedSemaphorePermit>) -> Pooled<T, A> {
        Pooled {
            obj: ManuallyDrop::new(self.inner.take(args)),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        }
    }
}

/// An object checked out of an [`ObjectPool`]; returned to it on drop.
pub struct Pooled<T, A = ()> {
    // Moved out exactly once: by `Drop` or by `into_inner`, never both.
    obj: ManuallyDrop<T>,
    pool: Arc<PoolInner<T, A>>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl<T, A> Pooled<T, A> {
    /// Detaches the object from the pool; it will not be returned on drop.
    pub fn into_inner(self) -> T {
        let mut this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so `Drop for Pooled` cannot also take `obj`,
        // and each field below is moved or dropped exactly once.
        unsafe {
            let obj = ManuallyDrop::take(&mut this.obj);
            std::ptr::drop_in_place(&mut this.pool);
            std::ptr::drop_in_place(&mut this._permit);
            obj
        }
    }
}

impl<T, A> Deref for Pooled<T, A> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.obj
    }
}

impl<T, A> DerefMut for Pooled<T, A> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.obj
    }
}

impl<T, A> Drop for Pooled<T, A> {
    fn drop(&mut self) {
        // SAFETY: `obj` is not touched again after this; `into_inner` skips this impl.
        let obj = unsafe { ManuallyDrop::take(&mut self.obj) };
        self.pool.give_back(obj);
    }
}

impl<T: std::fmt::Debug, A> std::fmt::Debug for Pooled<T, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Pooled").field(&*self.obj).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct Conn {
        id: usize,
        label: String,
        uses: u32,
    }

    fn conn_pool(max_size: usize, prealloc: usize) -> ObjectPool<Conn, &'static str> {
        let next_id = std::sync::atomic::AtomicUsize::new(0);
        ObjectPool::builder(move || Conn {
            id: next_id.fetch_add(1, Ordering::SeqCst),
            ..Default::default()
        })
        .reinit(|c: &mut Conn, label: &'static str| c.label = label.to_string())
        .reset(|c: &mut Conn| {
            c.label.clear();
            c.uses = 0;
        })
        .max_size(max_size)
        .prealloc(prealloc)
        .build()
    }

    #[tokio::test]
    async fn reuses_instance_with_state_cleared() {
        let pool = conn_pool(2, 0);
        let first_id = {
            let mut c = pool.acquire("a").await;
            assert_eq!(c.label, "a");
            c.uses = 5;
            c.id
        };

        let c = pool.acquire("b").await;
        assert_eq!(c.id, first_id);
        assert_eq!(c.label, "b");
        assert_eq!(c.uses, 0);

        let stats = pool.stats();
        assert_eq!((stats.created, stats.reused, stats.in_use), (1, 1, 1));
    }

    #[tokio::test]
    async fn prealloc_fills_idle() {
        let pool = conn_pool(4, 10);
        let stats = pool.stats();
        assert_eq!((stats.idle, stats.created), (4, 4));
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_blocks_until_release() {
        let pool = conn_pool(1, 0);
        let held = pool.acquire("held").await;
        assert!(pool.try_acquire("x").is_none());

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire("next").await.label.clone() })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(held);
        assert_eq!(waiter.await.unwrap(), "next");
    }

    #[tokio::test]
    async fn release_into_full_pool_drops() {
        let pool = conn_pool(1, 1);
        pool.release(Conn::default());
        let stats = pool.stats();
        assert_eq!((stats.idle, stats.dropped), (1, 1));
    }

    #[tokio::test]
    async fn into_inner_detaches_and_frees_slot() {
        let pool = conn_pool(1, 0);
        let conn = pool.acquire("a").await.into_inner();
        assert_eq!(conn.label, "a");
        assert_eq!(pool.stats().idle, 0);

        let again = pool.try_acquire("b");
        assert!(again.is_some());
        drop(again);

        pool.release(conn);
        let stats = pool.stats();
        assert_eq!((stats.idle, stats.dropped), (1, 1), "idle already full");
    }

    #[tokio::test]
    async fn guard_moves_its_object_exactly_once() {
        let tracker = Arc::new(());
        let pool: ObjectPool<Arc<()>> = {
            let tracker = Arc::clone(&tracker);
            ObjectPool::builder(move || Arc::clone(&tracker))
                .max_size(2)
                .prealloc(0)
                .build()
        };
        // tracker + factory closure
        assert_eq!(Arc::strong_count(&tracker), 2);

        let detached = pool.acquire(()).await.into_inner();
        assert_eq!(Arc::strong_count(&tracker), 3);
        assert_eq!(pool.stats().in_use, 0);
        drop(detached);
        assert_eq!(Arc::strong_count(&tracker), 2);

        drop(pool.acquire(()).await);
        assert_eq!(Arc::strong_count(&tracker), 3, "one object idle");
        assert_eq!(format!("{:?}", pool.acquire(()).await), "Pooled(())");
    }
}
