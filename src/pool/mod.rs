//! Auto-scaling worker pool.
//!
//! - [`WorkerPool`] the pool itself (submit, resize, shutdown, stats)
//! - [`PoolConfig`] sizing, scaling and backpressure settings
//! - [`TaskHandle`] awaitable result of a submitted job
//! - [`HostLoad`] host CPU/memory probe ([`SysinfoLoad`], [`FixedLoad`])
//! - [`ScaleDecision`] the pure scaling policy applied by the monitor

mod config;
mod generation;
mod handle;
mod load;
mod monitor;
mod worker_pool;

pub use config::PoolConfig;
pub use handle::TaskHandle;
pub use load::{FixedLoad, HostLoad, LoadSample, SysinfoLoad};
pub use monitor::{ScaleDecision, ScaleInputs};
pub use worker_pool::{PoolStats, WorkerPool};
