//! # Bounded LRU cache with TTL and a memory budget.
//!
//! [`BoundedCache`] keeps at most `max_size` entries whose estimated sizes sum to
//! at most `max_memory_bytes`. Entries expire lazily: an expired entry is found
//! and dropped on read, or purged when a write needs room.
//!
//! ## Rules
//! - `get` returns only present, unexpired values and promotes them to most recently used.
//! - `set` evicts expired entries first, then least recently used ones, until both budgets hold.
//! - A single value larger than the whole memory budget is refused (`set` returns `false`).
//! - A TTL of zero means the entry never expires.
//!
//! ```text
//!   recency (tick → key)            entries (key → value, size, ttl, hits)
//!   ┌────┬────┬────┬────┐
//!   │ 3  │ 7  │ 8  │ 12 │  ◄── get/set moves a key to the newest tick
//!   └────┴────┴────┴────┘
//!     ▲ evicted first
//! ```

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::trace;

/// Estimated heap + inline footprint of a cached value, in bytes.
///
/// Estimates only need to be consistent, not exact: they drive the memory budget.
pub trait EstimateSize {
    fn estimate_size(&self) -> usize;
}

macro_rules! fixed_size {
    ($($t:ty),* $(,)?) => {
        $(impl EstimateSize for $t {
            #[inline]
            fn estimate_size(&self) -> usize {
                std::mem::size_of::<$t>()
            }
        })*
    };
}

fixed_size!(bool, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64, char, ());

impl EstimateSize for String {
    fn estimate_size(&self) -> usize {
        std::mem::size_of::<String>() + self.capacity()
    }
}

impl EstimateSize for &'static str {
    fn estimate_size(&self) -> usize {
        std::mem::size_of::<&str>() + self.len()
    }
}

impl<T: EstimateSize> EstimateSize for Vec<T> {
    fn estimate_size(&self) -> usize {
        std::mem::size_of::<Vec<T>>() + self.iter().map(EstimateSize::estimate_size).sum::<usize>()
    }
}

impl<T: EstimateSize> EstimateSize for Option<T> {
    fn estimate_size(&self) -> usize {
        std::mem::size_of::<Option<T>>()
            + self.as_ref().map_or(0, |v| v.estimate_size().saturating_sub(std::mem::size_of::<T>()))
    }
}

impl<T: EstimateSize + ?Sized> EstimateSize for Arc<T> {
    fn estimate_size(&self) -> usize {
        std::mem::size_of::<Arc<T>>() + (**self).estimate_size()
    }
}

impl<A: EstimateSize, B: EstimateSize> EstimateSize for (A, B) {
    fn estimate_size(&self) -> usize {
        self.0.estimate_size() + self.1.estimate_size()
    }
}

impl EstimateSize for serde_json::Value {
    fn estimate_size(&self) -> usize {
        use serde_json::Value;
        let base = std::mem::size_of::<Value>();
        match self {
            Value::Null | Value::Bool(_) | Value::Number(_) => base,
            Value::String(s) => base + s.capacity(),
            Value::Array(items) => base + items.iter().map(EstimateSize::estimate_size).sum::<usize>(),
            Value::Object(map) => {
                base + map
                    .iter()
                    .map(|(k, v)| k.capacity() + v.estimate_size())
                    .sum::<usize>()
            }
        }
    }
}

/// Cache configuration.
///
/// ## Field semantics
/// - `max_size`: maximum number of entries (`0` = unlimited)
/// - `max_memory_bytes`: budget for the sum of estimated entry sizes (`0` = unlimited)
/// - `default_ttl`: TTL used by [`BoundedCache::set`] (`Duration::ZERO` = never expires)
#[derive(Clone, Copy, Debug)]
pub struct CacheConfig {
    pub max_size: usize,
    pub max_memory_bytes: usize,
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    /// Default configuration:
    ///
    /// - `max_size = 1000`
    /// - `max_memory_bytes = 100 MiB`
    /// - `default_ttl = 60s`
    fn default() -> Self {
        Self {
            max_size: 1000,
            max_memory_bytes: 100 * 1024 * 1024,
            default_ttl: Duration::from_secs(60),
        }
    }
}

impl CacheConfig {
    #[inline]
    fn entry_limit(&self) -> Option<usize> {
        (self.max_size > 0).then_some(self.max_size)
    }

    #[inline]
    fn memory_limit(&self) -> Option<usize> {
        (self.max_memory_bytes > 0).then_some(self.max_memory_bytes)
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub memory_bytes: usize,
    pub max_size: usize,
    pub max_memory_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub hit_rate: f64,
}

struct Entry<V> {
    value: V,
    inserted: Instant,
    ttl: Duration,
    size: usize,
    hit_count: u64,
    tick: u64,
}

impl<V> Entry<V> {
    #[inline]
    fn is_expired(&self, now: Instant) -> bool {
        !self.ttl.is_zero() && now.saturating_duration_since(self.inserted) >= self.ttl
    }
}

struct CacheInner<K, V> {
    entries: HashMap<K, Entry<V>>,
    recency: BTreeMap<u64, K>,
    next_tick: u64,
    memory: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl<K: Eq + Hash + Clone, V> CacheInner<K, V> {
    fn touch(&mut self, key: &K) {
        let tick = self.next_tick;
        self.next_tick += 1;
        if let Some(entry) = self.entries.get_mut(key) {
            self.recency.remove(&entry.tick);
            entry.tick = tick;
            self.recency.insert(tick, key.clone());
        }
    }

    fn remove(&mut self, key: &K) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.tick);
        self.memory -= entry.size;
        Some(entry)
    }

    fn purge_expired(&mut self, now: Instant) {
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            self.remove(&key);
            self.expirations += 1;
        }
    }

    fn evict_lru(&mut self) -> bool {
        match self.recency.pop_first() {
            Some((_, key)) => {
                if let Some(entry) = self.entries.remove(&key) {
                    self.memory -= entry.size;
                    trace!(hits = entry.hit_count, size = entry.size, "cache entry evicted");
                }
                self.evictions += 1;
                true
            }
            None => false,
        }
    }
}

/// Thread-safe bounded LRU cache.
///
/// Values are cloned out on read; wrap large values in `Arc` to share them.
///
/// ## Example
/// ```rust
/// use tunevisor::{BoundedCache, CacheConfig};
///
/// let cache: BoundedCache<String, u64> = BoundedCache::new(CacheConfig { max_size: 2, ..Default::default() });
/// cache.set("a".into(), 1);
/// cache.set("b".into(), 2);
/// assert_eq!(cache.get(&"a".to_string()), Some(1));
/// cache.set("c".into(), 3); // evicts "b", the least recently used
/// assert_eq!(cache.get(&"b".to_string()), None);
/// ```
pub struct BoundedCache<K, V> {
    cfg: CacheConfig,
    inner: Mutex<CacheInner<K, V>>,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + EstimateSize,
{
    /// Creates an empty cache.
    pub fn new(cfg: CacheConfig) -> Self {
        Self {
            cfg,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                recency: BTreeMap::new(),
                next_tick: 0,
                memory: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
                expirations: 0,
            }),
        }
    }

    /// Returns a clone of the value if present and unexpired, promoting it.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut guard = self.lock();
        let inner = &mut *guard;

        let expired = match inner.entries.get(key) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(entry) => entry.is_expired(now),
        };
        if expired {
            inner.remove(key);
            inner.expirations += 1;
            inner.misses += 1;
            return None;
        }

        inner.hits += 1;
        inner.touch(key);
        let entry = inner.entries.get_mut(key)?;
        entry.hit_count += 1;
        Some(entry.value.clone())
    }

    /// Inserts with the default TTL. See [`set_with_ttl`](Self::set_with_ttl).
    pub fn set(&self, key: K, value: V) -> bool {
        self.set_with_ttl(key, value, self.cfg.default_ttl)
    }

    /// Inserts or replaces `key`, evicting until both budgets hold.
    ///
    /// Returns `false` (and stores nothing) if the value alone exceeds the memory budget.
    pub fn set_with_ttl(&self, key: K, value: V, ttl: Duration) -> bool {
        let size = value.estimate_size() + std::mem::size_of::<K>();
        if self.cfg.memory_limit().is_some_and(|limit| size > limit) {
            return false;
        }

        let now = Instant::now();
        let mut inner = self.lock();
        inner.remove(&key);

        if self.over_budget(&inner, size) {
            inner.purge_expired(now);
        }
        while self.over_budget(&inner, size) {
            if !inner.evict_lru() {
                break;
            }
        }

        let tick = inner.next_tick;
        inner.next_tick += 1;
        inner.recency.insert(tick, key.clone());
        inner.memory += size;
        inner.entries.insert(
            key,
            Entry {
                value,
                inserted: now,
                ttl,
                size,
                hit_count: 0,
                tick,
            },
        );
        true
    }

    /// Returns the cached value, or computes, stores (default TTL) and returns it.
    pub fn get_or_insert_with<F>(&self, key: K, f: F) -> V
    where
        F: FnOnce() -> V,
    {
        if let Some(v) = self.get(&key) {
            return v;
        }
        let value = f();
        self.set(key, value.clone());
        value
    }

    /// Removes `key`. Returns `true` if it was present.
    pub fn invalidate(&self, key: &K) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Removes every entry. Counters are kept.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.recency.clear();
        inner.memory = 0;
    }

    /// Number of stored entries (expired ones included until purged).
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a snapshot of counters.
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let lookups = inner.hits + inner.misses;
        CacheStats {
            entries: inner.entries.len(),
            memory_bytes: inner.memory,
            max_size: self.cfg.max_size,
            max_memory_bytes: self.cfg.max_memory_bytes,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            expirations: inner.expirations,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64
            },
        }
    }

    fn over_budget(&self, inner: &CacheInner<K, V>, incoming: usize) -> bool {
        let too_many = self
            .cfg
            .entry_limit()
            .is_some_and(|limit| inner.entries.len() >= limit);
        let too_big = self
            .cfg
            .memory_limit()
            .is_some_and(|limit| inner.memory + incoming > limit);
        too_many || too_big
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner<K, V>> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cache(max_size: usize, ttl_secs: u64) -> BoundedCache<u32, u64> {
        BoundedCache::new(CacheConfig {
            max_size,
            max_memory_bytes: 0,
            default_ttl: Duration::from_secs(ttl_secs),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn round_trip_before_ttl_absent_after() {
        let c = cache(10, 5);
        assert!(c.set(1, 100));
        tokio::time::advance(Duration::from_millis(4999)).await;
        assert_eq!(c.get(&1), Some(100));
        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(c.get(&1), None);

        let stats = c.stats();
        assert_eq!((stats.hits, stats.misses, stats.expirations), (1, 1, 1));
        assert_eq!(stats.entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_ttl_never_expires() {
        let c = cache(10, 60);
        c.set_with_ttl(1, 7, Duration::ZERO);
        tokio::time::advance(Duration::from_secs(86_400)).await;
        assert_eq!(c.get(&1), Some(7));
    }

    #[test]
    fn evicts_least_recently_accessed() {
        let c = cache(3, 0);
        c.set(1, 1);
        c.set(2, 2);
        c.set(3, 3);
        assert_eq!(c.get(&1), Some(1));

        c.set(4, 4);
        assert_eq!(c.get(&2), None, "2 was least recently used");
        assert_eq!(c.get(&1), Some(1));
        assert_eq!(c.get(&3), Some(3));
        assert_eq!(c.get(&4), Some(4));
        assert_eq!(c.stats().evictions, 1);
    }

    #[test]
    fn replacing_a_key_does_not_evict() {
        let c = cache(2, 0);
        c.set(1, 1);
        c.set(2, 2);
        c.set(1, 10);
        assert_eq!(c.len(), 2);
        assert_eq!(c.get(&1), Some(10));
        assert_eq!(c.get(&2), Some(2));
        assert_eq!(c.stats().evictions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_go_before_live_ones() {
        let c = cache(2, 0);
        c.set(1, 1);
        c.set_with_ttl(2, 2, Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(2)).await;

        c.set(3, 3);
        assert_eq!(c.get(&1), Some(1));
        assert_eq!(c.get(&3), Some(3));
        let stats = c.stats();
        assert_eq!((stats.evictions, stats.expirations), (0, 1));
    }

    #[test]
    fn memory_budget_evicts_and_refuses_oversized() {
        let per_entry = String::from("x").estimate_size() + std::mem::size_of::<u32>();
        let c: BoundedCache<u32, String> = BoundedCache::new(CacheConfig {
            max_size: 0,
            max_memory_bytes: per_entry * 2,
            default_ttl: Duration::ZERO,
        });
        assert!(c.set(1, String::from("x")));
        assert!(c.set(2, String::from("y")));
        assert!(c.set(3, String::from("z")));
        assert_eq!(c.len(), 2);
        assert!(c.stats().memory_bytes <= per_entry * 2);

        assert!(!c.set(4, "w".repeat(per_entry * 4)));
        assert_eq!(c.get(&4), None);
    }

    #[test]
    fn get_or_insert_with_computes_once() {
        let c = cache(10, 0);
        let mut calls = 0;
        let a = c.get_or_insert_with(9, || {
            calls += 1;
            81
        });
        let b = c.get_or_insert_with(9, || {
            calls += 1;
            0
        });
        assert_eq!((a, b, calls), (81, 81, 1));
    }

    #[test]
    fn invalidate_and_clear() {
        let c = cache(10, 0);
        c.set(1, 1);
        c.set(2, 2);
        assert!(c.invalidate(&1));
        assert!(!c.invalidate(&1));
        c.clear();
        assert!(c.is_empty());
        assert_eq!(c.stats().memory_bytes, 0);
    }

    proptest! {
        #[test]
        fn budgets_always_hold(
            max_size in 1usize..16,
            ops in proptest::collection::vec((0u32..32, 0usize..64), 1..200),
        ) {
            let budget = 256;
            let c: BoundedCache<u32, String> = BoundedCache::new(CacheConfig {
                max_size,
                max_memory_bytes: budget,
                default_ttl: Duration::ZERO,
            });
            for (key, len) in ops {
                c.set(key, "v".repeat(len));
                let stats = c.stats();
                prop_assert!(stats.entries <= max_size);
                prop_assert!(stats.memory_bytes <= budget);
            }
        }
    }
}
