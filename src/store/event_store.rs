//! # Append-only JSON-lines event log with an in-memory aggregate index.
//!
//! ```text
//! events.jsonl                          index (rebuildable)
//! ┌──────────────────────────────┐      ┌──────────────┬──────────────┐
//! │ 0    {"aggregate_id":"cpu",…}│◄─────┤ "cpu"        │ [0, 212]     │
//! │ 118  {"aggregate_id":"gpu",…}│◄─────┤ "gpu"        │ [118]        │
//! │ 212  {"aggregate_id":"cpu",…}│      └──────────────┴──────────────┘
//! └──────────────────────────────┘
//! ```
//!
//! ## Rules
//! - One lock covers the file handle and the index: a recorded offset always points
//!   at the start of a complete line.
//! - [`EventStore::open`] rebuilds the index by a full linear scan; malformed lines are
//!   skipped and counted. A torn trailing line (no final newline) is sealed so later
//!   appends start on a fresh line.
//! - Aggregate reads are returned sorted by timestamp (stable for equal timestamps).

use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::domain_event::DomainEvent;
use crate::error::StoreError;

/// Snapshot of store counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub path: String,
    pub events: u64,
    pub aggregates: usize,
    pub skipped_lines: u64,
    pub bytes: u64,
}

struct Log {
    writer: File,
    len: u64,
    index: BTreeMap<String, Vec<u64>>,
    events: u64,
    skipped: u64,
}

/// Durable append-only store of [`DomainEvent`]s.
pub struct EventStore {
    path: PathBuf,
    log: Mutex<Log>,
}

impl EventStore {
    /// Opens (creating if needed) the log at `path` and rebuilds the index.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let mut writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let scan = scan(&path).await?;
        let mut len = scan.len;
        if scan.torn {
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            len += 1;
            warn!(path = %path.display(), "sealed torn trailing record");
        }

        info!(
            path = %path.display(),
            events = scan.events,
            aggregates = scan.index.len(),
            skipped = scan.skipped,
            "event store opened"
        );

        Ok(Self {
            path,
            log: Mutex::new(Log {
                writer,
                len,
                index: scan.index,
                events: scan.events,
                skipped: scan.skipped,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one event as a single line and indexes it.
    pub async fn append(&self, event: &DomainEvent) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let mut log = self.log.lock().await;
        let offset = log.len;
        if let Err(e) = write_line(&mut log.writer, &line).await {
            // A partial write leaves a torn line; realign so the next append starts clean.
            if let Ok(meta) = fs::metadata(&self.path).await {
                if meta.len() > offset && log.writer.write_all(b"\n").await.is_ok() {
                    log.len = meta.len() + 1;
                } else {
                    log.len = meta.len();
                }
            }
            return Err(e.into());
        }

        log.len += line.len() as u64;
        log.events += 1;
        log.index
            .entry(event.aggregate_id.clone())
            .or_default()
            .push(offset);
        debug!(aggregate = %event.aggregate_id, event_type = %event.event_type, offset, "event appended");
        Ok(())
    }

    /// Events of one aggregate, sorted by timestamp. Unknown aggregates yield an empty list.
    pub async fn get_events_for_aggregate(
        &self,
        aggregate_id: &str,
    ) -> Result<Vec<DomainEvent>, StoreError> {
        let log = self.log.lock().await;
        let Some(offsets) = log.index.get(aggregate_id) else {
            return Ok(Vec::new());
        };

        let mut reader = BufReader::new(File::open(&self.path).await?);
        let mut events = Vec::with_capacity(offsets.len());
        let mut buf = Vec::new();
        for &offset in offsets {
            reader.seek(SeekFrom::Start(offset)).await?;
            buf.clear();
            reader.read_until(b'\n', &mut buf).await?;
            match serde_json::from_slice::<DomainEvent>(&buf) {
                Ok(ev) => events.push(ev),
                Err(e) => warn!(aggregate = aggregate_id, offset, error = %e, "unreadable indexed record"),
            }
        }
        drop(log);

        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    /// Every valid event in log order.
    pub async fn replay(&self) -> Result<Vec<DomainEvent>, StoreError> {
        let _log = self.log.lock().await;
        let mut reader = BufReader::new(File::open(&self.path).await?);
        let mut events = Vec::new();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            if let Ok(ev) = serde_json::from_slice::<DomainEvent>(&buf) {
                events.push(ev);
            }
        }
        Ok(events)
    }

    /// Indexed aggregate ids, sorted.
    pub async fn aggregate_ids(&self) -> Vec<String> {
        self.log.lock().await.index.keys().cloned().collect()
    }

    pub async fn stats(&self) -> StoreStats {
        let log = self.log.lock().await;
        StoreStats {
            path: self.path.display().to_string(),
            events: log.events,
            aggregates: log.index.len(),
            skipped_lines: log.skipped,
            bytes: log.len,
        }
    }
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore").field("path", &self.path).finish()
    }
}

async fn write_line(writer: &mut File, line: &[u8]) -> std::io::Result<()> {
    writer.write_all(line).await?;
    writer.flush().await
}

struct Scan {
    index: BTreeMap<String, Vec<u64>>,
    len: u64,
    events: u64,
    skipped: u64,
    torn: bool,
}

async fn scan(path: &Path) -> Result<Scan, StoreError> {
    let mut reader = BufReader::new(File::open(path).await?);
    let mut scan = Scan {
        index: BTreeMap::new(),
        len: 0,
        events: 0,
        skipped: 0,
        torn: false,
    };

    let mut buf = Vec::new();
    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf).await?;
        if n == 0 {
            break;
        }
        let offset = scan.len;
        scan.len += n as u64;
        scan.torn = buf.last() != Some(&b'\n');

        if buf.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<DomainEvent>(&buf) {
            Ok(ev) => {
                scan.events += 1;
                scan.index.entry(ev.aggregate_id).or_default().push(offset);
            }
            Err(e) => {
                scan.skipped += 1;
                warn!(path = %path.display(), offset, error = %e, "skipping malformed record");
            }
        }
    }
    Ok(scan)
}
