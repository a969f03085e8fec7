use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

fn first_version() -> u32 {
    1
}

/// Parses an ISO-8601 timestamp; a value without an offset is read as UTC.
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    raw.parse::<NaiveDateTime>().ok().map(|naive| naive.and_utc())
}

mod iso_timestamp {
    use chrono::{DateTime, Utc};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_timestamp(&raw)
            .ok_or_else(|| D::Error::custom(format!("invalid timestamp {raw:?}")))
    }
}

/// Immutable fact about an aggregate, persisted as one JSON line.
///
/// ```rust
/// use serde_json::json;
/// use tunevisor::DomainEvent;
///
/// let ev = DomainEvent::new("ProfileApplied", "gpu-0", json!({"profile": "quiet"}))
///     .with_metadata("manager", "gpu");
/// assert_eq!(ev.version, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Opaque id; new events get a v4 UUID.
    pub event_id: String,
    pub event_type: String,
    pub aggregate_id: String,
    /// ISO-8601 on disk. Values without an offset are UTC.
    #[serde(with = "iso_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default = "first_version")]
    pub version: u32,
}

impl DomainEvent {
    /// New event with a random id, stamped now.
    pub fn new(
        event_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            aggregate_id: aggregate_id.into(),
            timestamp: Utc::now(),
            payload,
            metadata: Map::new(),
            version: first_version(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Overrides the timestamp (imports, backfills).
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_format_has_flat_fields() {
        let ev = DomainEvent::new("FanCurveSet", "fan-1", json!({"rpm": 1200}));
        let line = serde_json::to_value(&ev).unwrap();
        for key in [
            "event_id",
            "event_type",
            "aggregate_id",
            "timestamp",
            "payload",
            "metadata",
            "version",
        ] {
            assert!(line.get(key).is_some(), "missing {key}");
        }
    }

    #[test]
    fn missing_optional_fields_default() {
        let line = r#"{"event_id":"7f1c1a44-34a3-4c7e-9a55-0c1b2a3f9e10","event_type":"X","aggregate_id":"a","timestamp":"2024-05-01T10:00:00+00:00","payload":{}}"#;
        let ev: DomainEvent = serde_json::from_str(line).unwrap();
        assert_eq!(ev.version, 1);
        assert!(ev.metadata.is_empty());
    }

    #[test]
    fn naive_timestamps_and_free_form_ids_are_accepted() {
        let line = r#"{"event_id":"evt-1","event_type":"X","aggregate_id":"a","timestamp":"2024-05-01T12:00:00.123456","payload":{}}"#;
        let ev: DomainEvent = serde_json::from_str(line).unwrap();
        assert_eq!(ev.event_id, "evt-1");
        assert_eq!(
            ev.timestamp,
            DateTime::parse_from_rfc3339("2024-05-01T12:00:00.123456Z").unwrap()
        );
    }

    #[test]
    fn offsets_are_normalised_to_utc() {
        assert_eq!(
            parse_timestamp("2024-05-01T14:00:00+02:00"),
            parse_timestamp("2024-05-01T12:00:00")
        );
        assert_eq!(parse_timestamp("2024-05-01 noon"), None);
    }

    #[test]
    fn written_timestamps_read_back_exactly() {
        let ev = DomainEvent::new("X", "a", json!(null));
        let back: DomainEvent = serde_json::from_str(&serde_json::to_string(&ev).unwrap()).unwrap();
        assert_eq!(back, ev);
    }
}
