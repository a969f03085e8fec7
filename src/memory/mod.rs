//! Resource-reuse primitives: a bounded LRU cache and a reusable object pool.

mod cache;
mod pool;

pub use cache::{BoundedCache, CacheConfig, CacheStats, EstimateSize};
pub use pool::{ObjectPool, ObjectPoolBuilder, ObjectPoolStats, Pooled};
