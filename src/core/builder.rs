use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::info;

use super::registry::ManagerRegistry;
use super::runtime::Runtime;
use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::events::{event_pool, EventBus};
use crate::pool::{HostLoad, WorkerPool};
use crate::scheduler::Scheduler;
use crate::store::EventStore;
use crate::subscribers::{LogWriter, Subscribe};

/// Builder for a [`Runtime`].
///
/// ```no_run
/// use tunevisor::{RuntimeBuilder, RuntimeConfig};
///
/// # async fn demo() -> Result<(), tunevisor::RuntimeError> {
/// let runtime = RuntimeBuilder::new(RuntimeConfig::default())
///     .with_log_writer()
///     .with_store("/var/lib/tuner/events.jsonl")
///     .build()
///     .await?;
/// runtime.run_until_signal().await
/// # }
/// ```
pub struct RuntimeBuilder {
    cfg: RuntimeConfig,
    load: Option<Arc<dyn HostLoad>>,
    store_path: Option<PathBuf>,
    subscribers: Vec<(Option<String>, Arc<dyn Subscribe>)>,
}

impl RuntimeBuilder {
    pub fn new(cfg: RuntimeConfig) -> Self {
        Self {
            cfg,
            load: None,
            store_path: None,
            subscribers: Vec::new(),
        }
    }

    /// Uses `load` instead of sampling the host with `sysinfo`.
    pub fn with_load(mut self, load: Arc<dyn HostLoad>) -> Self {
        self.load = Some(load);
        self
    }

    /// Opens (or creates) an append-only event store at `path`.
    pub fn with_store(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    /// Subscribes `handler` to events of `kind` once the bus exists.
    pub fn with_subscriber(mut self, kind: impl Into<String>, handler: Arc<dyn Subscribe>) -> Self {
        self.subscribers.push((Some(kind.into()), handler));
        self
    }

    /// Logs every published event through `tracing`.
    pub fn with_log_writer(mut self) -> Self {
        self.subscribers.push((None, Arc::new(LogWriter::new())));
        self
    }

    /// Constructs every component. Must be called inside a tokio runtime.
    pub async fn build(self) -> Result<Runtime, RuntimeError> {
        let store = match &self.store_path {
            Some(path) => Some(Arc::new(EventStore::open(path).await?)),
            None => None,
        };

        let pool = match self.load {
            Some(load) => WorkerPool::with_load(self.cfg.pool.clone(), load),
            None => WorkerPool::new(self.cfg.pool.clone()),
        };
        let bus = EventBus::new(pool.clone());
        for (kind, handler) in self.subscribers {
            match kind {
                Some(kind) => bus.subscribe(kind, handler),
                None => bus.subscribe_all(handler),
            };
        }

        let events = event_pool(
            self.cfg.bus.event_pool_max,
            self.cfg.bus.event_pool_prealloc,
        );
        let scheduler = Scheduler::new(self.cfg.scheduler.clone());

        info!(
            min_workers = self.cfg.pool.min_workers,
            max_workers = self.cfg.pool.max_workers,
            store = store.is_some(),
            "runtime built"
        );

        Ok(Runtime {
            cfg: self.cfg,
            pool,
            bus,
            scheduler,
            managers: ManagerRegistry::new(),
            events,
            store,
            stopped: AtomicBool::new(false),
        })
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}
