//! # Example: Managers on the runtime
//!
//! Two toy managers share one runtime:
//! - `thermal` polls a fake sensor every 500ms and publishes `temp.high` above a threshold;
//! - `fan` reacts to `temp.high` by "raising" the fan speed through a circuit breaker
//!   and records each adjustment in the event store.
//!
//! Run with:
//! ```bash
//! RUST_LOG=info cargo run --example manager_demo
//! ```
//! Stop with Ctrl-C.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tunevisor::{
    CircuitBreaker, DomainEvent, Event, EventBus, EventStore, JobFn, Level, Manager,
    RuntimeBuilder, RuntimeConfig, Scheduler, SubscriberFn, TaskError,
};

struct Thermal {
    bus: EventBus,
    reading: Arc<AtomicU32>,
}

#[async_trait]
impl Manager for Thermal {
    fn name(&self) -> &str {
        "thermal"
    }

    fn register_tasks(&self, scheduler: &Scheduler) {
        let bus = self.bus.clone();
        let reading = Arc::clone(&self.reading);
        scheduler.every(
            Duration::from_millis(500),
            JobFn::arc("thermal.poll", move || {
                let bus = bus.clone();
                let reading = Arc::clone(&reading);
                async move {
                    // Fake sensor: climbs 3°C per poll, wraps at 95°C.
                    let t = reading.fetch_add(3, Ordering::Relaxed) % 60 + 35;
                    if t > 80 {
                        bus.publish(
                            Event::new("temp.high", format!("{t}°C"))
                                .with_level(Level::Warning)
                                .with_source("thermal")
                                .with_context("celsius", t),
                        );
                    }
                    Ok::<_, TaskError>(())
                }
            }),
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut cfg = RuntimeConfig::default();
    cfg.grace = Duration::from_secs(5);

    let dir = std::env::temp_dir().join("tunevisor-demo");
    let runtime = RuntimeBuilder::new(cfg)
        .with_log_writer()
        .with_store(dir.join("events.jsonl"))
        .build()
        .await?;

    let store: Arc<EventStore> = runtime
        .store()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("store not configured"))?;
    let breaker = Arc::new(runtime.breaker("fan.set"));
    runtime.bus().subscribe(
        "temp.high",
        SubscriberFn::arc("fan.raise", move |ev: Arc<Event>| {
            let store = Arc::clone(&store);
            let breaker = Arc::clone(&breaker);
            async move {
                let rpm = breaker
                    .call(|| async { Ok::<_, TaskError>(3200u32) })
                    .await
                    .map_err(|e| TaskError::fail(e.to_string()))?;
                let record = DomainEvent::new("FanRaised", "fan-0", json!({ "rpm": rpm }))
                    .with_metadata("trigger", ev.id.clone());
                store
                    .append(&record)
                    .await
                    .map_err(|e| TaskError::fail(e.to_string()))
            }
        }),
    );

    let thermal: Arc<dyn Manager> = Arc::new(Thermal {
        bus: runtime.bus().clone(),
        reading: Arc::new(AtomicU32::new(0)),
    });
    runtime.register_manager(&thermal);

    runtime.run_until_signal().await?;

    if let Some(store) = runtime.store() {
        let history = store.get_events_for_aggregate("fan-0").await?;
        println!("fan-0 adjusted {} time(s)", history.len());
    }
    for (k, v) in runtime.flat_stats().await {
        println!("{k} = {v}");
    }
    Ok(())
}
