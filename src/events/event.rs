//! # Domain events published by managers.
//!
//! An [`Event`] is a typed notification (`kind`, e.g. `"cpu.high"`) with a message,
//! a severity [`Level`], the publishing `source`, free-form JSON `context` and a
//! `priority`. Events are published on the [`EventBus`](crate::EventBus).
//!
//! ## Identity
//! `id` is a content hash: the first 12 hex characters of SHA-256 over
//! `timestamp (RFC 3339) + kind + message`. `seq` is a process-wide, monotonically
//! increasing sequence number for restoring publish order.
//!
//! ## Processing flag
//! `processed` is set by the bus once every handler of a publish has finished.
//! Only the bus pipeline mutates it.
//!
//! ## Example
//! ```rust
//! use tunevisor::{Event, Level};
//!
//! let ev = Event::new("cpu.high", "CPU above 90% for 30s")
//!     .with_level(Level::Warning)
//!     .with_source("cpu-manager")
//!     .with_context("cpu_percent", 93.5)
//!     .with_priority(8);
//!
//! assert_eq!(ev.kind, "cpu.high");
//! assert_eq!(ev.id.len(), 12);
//! assert!(!ev.is_processed());
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Default event priority (`0..=10`, higher is more urgent).
pub const DEFAULT_PRIORITY: i32 = 5;

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Error => "ERROR",
            Level::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain event.
#[derive(Debug, Serialize, Deserialize)]
pub struct Event {
    /// Content hash (12 hex chars).
    pub id: String,
    /// Process-wide publish-order sequence number.
    pub seq: u64,
    /// Event type; subscribers register per type.
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-readable message.
    pub message: String,
    /// Severity.
    pub level: Level,
    /// Publishing component (manager name).
    pub source: String,
    /// Free-form structured context.
    pub context: Map<String, Value>,
    /// Priority (informational; dispatch does not reorder by it).
    pub priority: i32,
    /// Creation time (UTC).
    pub timestamp: DateTime<Utc>,
    processed: AtomicBool,
}

impl Event {
    /// Creates an event stamped now, with `Level::Info` and the default priority.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        let mut ev = Self::blank();
        ev.kind = kind.into();
        ev.message = message.into();
        ev.stamp();
        ev
    }

    /// Sets the severity.
    #[inline]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Sets the publishing component.
    #[inline]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Adds one context entry.
    #[inline]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets the priority.
    #[inline]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// True once every handler of the publish carrying this event has finished.
    #[inline]
    pub fn is_processed(&self) -> bool {
        self.processed.load(AtomicOrdering::Acquire)
    }

    pub(crate) fn mark_processed(&self) {
        self.processed.store(true, AtomicOrdering::Release);
    }

    /// Computes the content hash for the given parts.
    pub fn content_id(timestamp: &DateTime<Utc>, kind: &str, message: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(timestamp.to_rfc3339().as_bytes());
        hasher.update(kind.as_bytes());
        hasher.update(message.as_bytes());
        let mut id = hex::encode(hasher.finalize());
        id.truncate(12);
        id
    }

    /// Re-initialises a recycled event in place (pool `reinit` hook).
    pub fn reinit(&mut self, init: EventInit) {
        self.kind = init.kind;
        self.message = init.message;
        self.level = init.level;
        self.source = init.source;
        self.context = init.context;
        self.priority = init.priority;
        self.processed.store(false, AtomicOrdering::Relaxed);
        self.stamp();
    }

    /// Clears per-use state before the event returns to a pool (pool `reset` hook).
    pub fn reset(&mut self) {
        self.context.clear();
        self.message.clear();
        self.processed.store(false, AtomicOrdering::Relaxed);
    }

    /// Empty event used as a pool factory output.
    pub(crate) fn blank() -> Self {
        Self {
            id: String::new(),
            seq: 0,
            kind: String::new(),
            message: String::new(),
            level: Level::default(),
            source: String::new(),
            context: Map::new(),
            priority: DEFAULT_PRIORITY,
            timestamp: Utc::now(),
            processed: AtomicBool::new(false),
        }
    }

    fn stamp(&mut self) {
        self.timestamp = Utc::now();
        self.seq = EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed);
        self.id = Self::content_id(&self.timestamp, &self.kind, &self.message);
    }
}

impl Clone for Event {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            seq: self.seq,
            kind: self.kind.clone(),
            message: self.message.clone(),
            level: self.level,
            source: self.source.clone(),
            context: self.context.clone(),
            priority: self.priority,
            timestamp: self.timestamp,
            processed: AtomicBool::new(self.is_processed()),
        }
    }
}

/// Arguments applied to a pooled [`Event`] on acquire.
///
/// ```rust
/// use tunevisor::{EventInit, Level};
///
/// let init = EventInit::new("disk.full", "/var at 98%").with_level(Level::Error);
/// assert_eq!(init.priority, 5);
/// ```
#[derive(Debug, Clone, Default)]
pub struct EventInit {
    pub kind: String,
    pub message: String,
    pub level: Level,
    pub source: String,
    pub context: Map<String, Value>,
    pub priority: i32,
}

impl EventInit {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            priority: DEFAULT_PRIORITY,
            ..Default::default()
        }
    }

    #[inline]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    #[inline]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    #[inline]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[inline]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_content_hash_of_timestamp_kind_message() {
        let ev = Event::new("mem.low", "free memory below 5%");
        assert_eq!(
            ev.id,
            Event::content_id(&ev.timestamp, "mem.low", "free memory below 5%")
        );
        assert!(ev.id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn sequence_increases() {
        let a = Event::new("a", "");
        let b = Event::new("b", "");
        assert!(b.seq > a.seq);
    }

    #[test]
    fn serializes_type_field_and_uppercase_level() {
        let ev = Event::new("net.down", "link lost").with_level(Level::Critical);
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "net.down");
        assert_eq!(json["level"], "CRITICAL");
        assert_eq!(json["processed"], false);
    }

    #[test]
    fn reinit_and_reset_cycle() {
        let mut ev = Event::blank();
        ev.reinit(EventInit::new("gpu.hot", "92C").with_context("temp", 92));
        assert_eq!(ev.kind, "gpu.hot");
        assert_eq!(ev.context["temp"], 92);
        ev.mark_processed();

        ev.reset();
        assert!(ev.context.is_empty());
        assert!(!ev.is_processed());
    }
}
