//! Dataset metadata
//!
//! Every successful download rewrites a JSON sidecar describing the dataset.
//! The sidecar is derived and disposable; the bulk orchestrator only reads it
//! back to find where the previous run stopped. Sidecars written by older
//! tooling come in several shapes, so reading is best-effort: anything
//! unrecognised logs one warning per file and reads as "no timestamp".

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::dataset::{parse_timestamp, write_atomic};
use crate::{DateRange, Interval, MergeMode};

/// Keys probed, in order, for the last stored timestamp
pub const DEFAULT_TIMESTAMP_KEYS: &[&str] = &[
    "end",
    "last",
    "end_date",
    "last_date",
    "endTime",
    "last_timestamp",
    "endTimestamp",
];

/// Epoch values above this are read as milliseconds
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Sidecar describing one dataset file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub symbol: String,
    pub interval: Interval,
    pub mode: MergeMode,
    pub requested_start: DateTime<Utc>,
    pub requested_end: DateTime<Utc>,
    /// First stored candle
    pub start: Option<DateTime<FixedOffset>>,
    /// Last stored candle
    pub end: Option<DateTime<FixedOffset>>,
    pub rows: usize,
    pub new_rows: usize,
    pub updated_rows: usize,
    pub skipped_batches: usize,
    pub generated_at: DateTime<Utc>,
}

impl MetadataRecord {
    pub fn new(symbol: impl Into<String>, interval: Interval, mode: MergeMode, requested: DateRange) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
            mode,
            requested_start: requested.start,
            requested_end: requested.end,
            start: None,
            end: None,
            rows: 0,
            new_rows: 0,
            updated_rows: 0,
            skipped_batches: 0,
            generated_at: Utc::now(),
        }
    }

    /// Write as pretty JSON, replacing the file atomically
    pub fn write(&self, path: &Path) -> io::Result<()> {
        let mut bytes = serde_json::to_vec_pretty(self)?;
        bytes.push(b'\n');
        write_atomic(path, &bytes)
    }
}

/// Best-effort reader of the last stored timestamp from metadata sidecars
#[derive(Debug)]
pub struct MetadataScanner {
    keys: Vec<String>,
    warned: Mutex<HashSet<PathBuf>>,
}

impl Default for MetadataScanner {
    fn default() -> Self {
        Self::new(DEFAULT_TIMESTAMP_KEYS.iter().map(|k| k.to_string()).collect())
    }
}

impl MetadataScanner {
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            keys,
            warned: Mutex::new(HashSet::new()),
        }
    }

    /// Last timestamp recorded in the sidecar at `path`.
    ///
    /// A missing file is silently `None`. An unreadable file, an unsupported
    /// payload shape, or a record without any recognised key warns once per
    /// path and is `None`.
    pub fn last_timestamp(&self, path: &Path) -> Option<DateTime<FixedOffset>> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No metadata at {}", path.display());
                return None;
            }
            Err(e) => {
                self.warn_once(path, &format!("unreadable metadata: {}", e));
                return None;
            }
        };

        let payload: Value = match serde_json::from_str(&contents) {
            Ok(payload) => payload,
            Err(e) => {
                self.warn_once(path, &format!("metadata is not valid JSON: {}", e));
                return None;
            }
        };

        let record = match &payload {
            Value::Object(map) => map,
            Value::Array(items) => match items.last() {
                Some(Value::Object(map)) => map,
                _ => {
                    self.warn_once(path, "metadata list has no trailing object");
                    return None;
                }
            },
            other => {
                self.warn_once(
                    path,
                    &format!("unsupported metadata payload type {}", json_type(other)),
                );
                return None;
            }
        };

        let found = self
            .keys
            .iter()
            .filter_map(|key| record.get(key))
            .find_map(coerce_timestamp);
        if found.is_none() {
            let mut keys: Vec<_> = record.keys().map(String::as_str).collect();
            keys.sort_unstable();
            self.warn_once(
                path,
                &format!("unable to locate timestamp, keys={:?}", keys),
            );
        }
        found
    }

    fn warn_once(&self, path: &Path, message: &str) {
        let first = match self.warned.lock() {
            Ok(mut warned) => warned.insert(path.to_path_buf()),
            Err(_) => true,
        };
        if first {
            warn!("{}: {}", path.display(), message);
        }
    }
}

fn coerce_timestamp(value: &Value) -> Option<DateTime<FixedOffset>> {
    match value {
        Value::String(raw) => parse_timestamp(raw),
        Value::Number(n) => {
            let raw = n.as_i64()?;
            let utc = if raw > EPOCH_MILLIS_THRESHOLD {
                Utc.timestamp_millis_opt(raw).single()?
            } else {
                Utc.timestamp_opt(raw, 0).single()?
            };
            Some(utc.fixed_offset())
        }
        _ => None,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_object_with_end_key() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "m.json", r#"{"symbol":"MASTEK.NS","end":"2024-03-01T15:15:00+05:30"}"#);
        let ts = MetadataScanner::default().last_timestamp(&path).unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-03-01T15:15:00+05:30");
    }

    #[test]
    fn test_list_uses_last_element_and_z_suffix() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "m.json",
            r#"[{"last":"2023-01-01T00:00:00Z"},{"last_timestamp":"2024-02-01T10:00:00Z"}]"#,
        );
        let ts = MetadataScanner::default().last_timestamp(&path).unwrap();
        assert_eq!(ts.with_timezone(&Utc), Utc.with_ymd_and_hms(2024, 2, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_key_order_and_fallthrough() {
        let dir = TempDir::new().unwrap();
        // "end" is unparseable, so the scan moves on to "end_date"
        let path = write(&dir, "m.json", r#"{"end":"soon","end_date":"2024-05-06"}"#);
        let ts = MetadataScanner::default().last_timestamp(&path).unwrap();
        assert_eq!(ts.date_naive().to_string(), "2024-05-06");
    }

    #[test]
    fn test_epoch_numbers() {
        let dir = TempDir::new().unwrap();
        let secs = write(&dir, "s.json", r#"{"endTimestamp":1704067200}"#);
        let millis = write(&dir, "ms.json", r#"{"endTime":1704067200000}"#);
        let scanner = MetadataScanner::default();
        assert_eq!(scanner.last_timestamp(&secs), scanner.last_timestamp(&millis));
        assert!(scanner.last_timestamp(&secs).is_some());
    }

    #[test]
    fn test_unrecognised_shapes_are_none() {
        let dir = TempDir::new().unwrap();
        let scanner = MetadataScanner::default();
        assert!(scanner.last_timestamp(&dir.path().join("absent.json")).is_none());
        assert!(scanner.last_timestamp(&write(&dir, "a.json", "42")).is_none());
        assert!(scanner.last_timestamp(&write(&dir, "b.json", "[]")).is_none());
        assert!(scanner.last_timestamp(&write(&dir, "c.json", "{not json")).is_none());
        assert!(scanner.last_timestamp(&write(&dir, "d.json", r#"{"rows":10}"#)).is_none());

        let warned = scanner.warned.lock().unwrap();
        assert_eq!(warned.len(), 4);
    }

    #[test]
    fn test_custom_keys() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "m.json", r#"{"finished_at":"2024-01-01T00:00:00Z"}"#);
        assert!(MetadataScanner::default().last_timestamp(&path).is_none());
        let scanner = MetadataScanner::new(vec!["finished_at".to_string()]);
        assert!(scanner.last_timestamp(&path).is_some());
    }

    #[test]
    fn test_record_round_trips_through_scanner() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meta.json");
        let requested = DateRange::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
        );
        let mut record = MetadataRecord::new("MASTEK.NS", Interval::OneHour, MergeMode::Incremental, requested);
        let ist = FixedOffset::east_opt(19800).unwrap();
        record.end = Some(ist.with_ymd_and_hms(2024, 1, 31, 15, 15, 0).unwrap());
        record.rows = 150;
        record.write(&path).unwrap();

        let json: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["interval"], "1h");
        assert_eq!(json["mode"], "incremental");
        assert_eq!(MetadataScanner::default().last_timestamp(&path), record.end);
    }
}
