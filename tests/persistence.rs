mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{init_tracing, quiet_host, test_config};
use serde_json::json;
use tunevisor::{
    BatchConfig, BatchWriter, DomainEvent, EventStore, FlushSink, PoolConfig, TaskError,
    WorkerPool,
};

struct StoreSink(Arc<EventStore>);

#[async_trait]
impl FlushSink<DomainEvent> for StoreSink {
    async fn flush(&self, batch: Vec<DomainEvent>) -> Result<(), TaskError> {
        for ev in &batch {
            self.0
                .append(ev)
                .await
                .map_err(|e| TaskError::fail(e.to_string()))?;
        }
        Ok(())
    }
}

fn pool() -> WorkerPool {
    let cfg = PoolConfig {
        check_interval: Duration::ZERO,
        ..test_config().pool
    };
    WorkerPool::with_load(cfg, quiet_host())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn batched_events_survive_restart() {
    init_tracing();
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("audit/events.jsonl");

    let store = Arc::new(EventStore::open(&path).await.unwrap());
    let writer = BatchWriter::new(
        BatchConfig {
            batch_size: 4,
            flush_interval: Duration::ZERO,
            max_concurrent_flushes: 1,
        },
        pool(),
        Arc::new(StoreSink(Arc::clone(&store))),
    );

    for i in 0..10 {
        let agg = if i % 2 == 0 { "cpu" } else { "fan" };
        writer
            .write(DomainEvent::new("Adjusted", agg, json!({ "step": i })))
            .await
            .unwrap();
    }
    writer.close().await.unwrap();
    assert_eq!(writer.stats().items, 10);

    let before = store.get_events_for_aggregate("cpu").await.unwrap();
    assert_eq!(before.len(), 5);
    drop(store);

    let reopened = EventStore::open(&path).await.unwrap();
    assert_eq!(reopened.get_events_for_aggregate("cpu").await.unwrap(), before);
    assert_eq!(reopened.aggregate_ids().await, vec!["cpu", "fan"]);
    assert_eq!(reopened.replay().await.unwrap().len(), 10);
}
