use std::sync::Arc;
use std::time::Duration;

use tunevisor::{FixedLoad, RuntimeConfig};

/// Installs a test log subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Fast-ticking config with auto-scaling off.
pub fn test_config() -> RuntimeConfig {
    let mut cfg = RuntimeConfig::default();
    cfg.grace = Duration::from_secs(2);
    cfg.scheduler.tick = Duration::from_millis(10);
    cfg.pool.min_workers = 2;
    cfg.pool.max_workers = 4;
    cfg.pool.check_interval = Duration::ZERO;
    cfg
}

pub fn quiet_host() -> Arc<FixedLoad> {
    Arc::new(FixedLoad::new(15.0, 40.0))
}

/// Polls `cond` every 5ms until it holds or `within` elapses.
pub async fn eventually<F: Fn() -> bool>(within: Duration, cond: F) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
