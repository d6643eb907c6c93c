//! Dataset file store
//!
//! A dataset is one CSV file per symbol and interval, header
//! `timestamp,open,high,low,close,adj_close,volume,symbol`, rows strictly
//! ascending by timestamp. Timestamps are RFC 3339 with the exchange offset.
//! Files are replaced atomically: rendered in memory, written to a temp file
//! in the target directory, then renamed over the old file.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, SecondsFormat};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::debug;

use crate::error::DatasetError;
use crate::Candle;

/// Columns without which a dataset file cannot be read
const REQUIRED_COLUMNS: [&str; 6] = ["timestamp", "open", "high", "low", "close", "volume"];

#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    adj_close: Option<f64>,
    volume: f64,
    #[serde(default)]
    symbol: Option<String>,
}

/// Contents of a dataset file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    /// Symbol recorded in the file, if any row carries one
    pub symbol: Option<String>,
    pub candles: Vec<Candle>,
}

impl Dataset {
    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last_timestamp(&self) -> Option<DateTime<FixedOffset>> {
        self.candles.iter().max_by_key(|c| c.key()).map(|c| c.timestamp)
    }
}

/// Read a dataset file. A missing file reads as an empty dataset.
pub fn read_dataset(path: &Path) -> Result<Dataset, DatasetError> {
    if !path.exists() {
        return Ok(Dataset::default());
    }

    let mut reader = csv::Reader::from_path(path).map_err(|source| DatasetError::Csv {
        path: path.to_path_buf(),
        source,
    })?;

    let headers = reader
        .headers()
        .map_err(|source| DatasetError::Csv {
            path: path.to_path_buf(),
            source,
        })?
        .clone();
    // An empty file has no header at all and reads as empty
    if headers.is_empty() {
        return Ok(Dataset::default());
    }
    for column in REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h.trim() == column) {
            return Err(DatasetError::MissingColumn {
                path: path.to_path_buf(),
                column,
            });
        }
    }

    let mut dataset = Dataset::default();
    for result in reader.deserialize::<CsvRow>() {
        let line = dataset.candles.len() as u64 + 2;
        let row = result.map_err(|e| DatasetError::MalformedRow {
            path: path.to_path_buf(),
            line: e.position().map(|p| p.line()).unwrap_or(line),
            reason: e.to_string(),
        })?;

        let timestamp = parse_timestamp(&row.timestamp).ok_or_else(|| DatasetError::MalformedRow {
            path: path.to_path_buf(),
            line,
            reason: format!("unparseable timestamp '{}'", row.timestamp),
        })?;
        let candle = Candle::new(
            timestamp,
            row.open,
            row.high,
            row.low,
            row.close,
            row.adj_close,
            row.volume,
        )
        .map_err(|source| DatasetError::InvalidCandle {
            path: path.to_path_buf(),
            line,
            source,
        })?;

        if dataset.symbol.is_none() {
            dataset.symbol = row.symbol.filter(|s| !s.is_empty());
        }
        dataset.candles.push(candle);
    }

    debug!("Read {} rows from {}", dataset.candles.len(), path.display());
    Ok(dataset)
}

/// Render candles to the on-disk CSV bytes
pub fn render_dataset(symbol: &str, candles: &[Candle]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for candle in candles {
        writer.serialize(CsvRow {
            timestamp: candle.timestamp.to_rfc3339_opts(SecondsFormat::Secs, false),
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
            adj_close: candle.adj_close,
            volume: candle.volume,
            symbol: Some(symbol.to_string()),
        })?;
    }
    if candles.is_empty() {
        writer.write_record([
            "timestamp",
            "open",
            "high",
            "low",
            "close",
            "adj_close",
            "volume",
            "symbol",
        ])?;
    }
    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}

/// Write a dataset, replacing any existing file atomically
pub fn write_dataset(path: &Path, symbol: &str, candles: &[Candle]) -> Result<(), DatasetError> {
    let bytes = render_dataset(symbol, candles).map_err(|source| DatasetError::Csv {
        path: path.to_path_buf(),
        source,
    })?;
    write_atomic(path, &bytes).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Write `bytes` to a temp file next to `path`, then rename it into place
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".tmp-")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS±HH:MM`, and naive forms read as UTC
pub fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts);
    }
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%:z") {
        return Some(ts);
    }
    let utc = FixedOffset::east_opt(0)?;
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc().with_timezone(&utc));
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(chrono::NaiveTime::MIN).and_utc().with_timezone(&utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn candle(hour: u32, close: f64) -> Candle {
        let ist = FixedOffset::east_opt(19800).unwrap();
        Candle::new(
            ist.with_ymd_and_hms(2024, 1, 2, hour, 15, 0).unwrap(),
            close,
            close + 1.0,
            close - 1.0,
            close,
            None,
            100.0,
        )
        .unwrap()
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let dataset = read_dataset(&dir.path().join("absent.csv")).unwrap();
        assert!(dataset.is_empty());
        assert_eq!(dataset.last_timestamp(), None);
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("MASTEK_1h.csv");
        let candles = vec![candle(9, 100.0), candle(10, 101.5)];

        write_dataset(&path, "MASTEK.NS", &candles).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("timestamp,open,high,low,close,adj_close,volume,symbol\n"));
        assert!(text.contains("2024-01-02T09:15:00+05:30,100.0,101.0,99.0,100.0,,100.0,MASTEK.NS"));

        let dataset = read_dataset(&path).unwrap();
        assert_eq!(dataset.symbol.as_deref(), Some("MASTEK.NS"));
        assert_eq!(dataset.candles, candles);
        assert_eq!(dataset.last_timestamp(), Some(candles[1].timestamp));
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        write_dataset(&path, "TCS.NS", &[candle(9, 10.0)]).unwrap();
        write_dataset(&path, "TCS.NS", &[candle(9, 11.0)]).unwrap();

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("out.csv")]);
    }

    #[test]
    fn test_missing_column_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "timestamp,open,high,low,close\n2024-01-02,1,1,1,1\n").unwrap();
        assert!(matches!(
            read_dataset(&path),
            Err(DatasetError::MissingColumn { column: "volume", .. })
        ));
    }

    #[test]
    fn test_malformed_row_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(
            &path,
            "timestamp,open,high,low,close,adj_close,volume,symbol\n\
             2024-01-02T09:15:00+05:30,1,2,0.5,1,,10,X.NS\n\
             2024-01-02T10:15:00+05:30,abc,2,0.5,1,,10,X.NS\n",
        )
        .unwrap();
        match read_dataset(&path) {
            Err(DatasetError::MalformedRow { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected malformed row, got {:?}", other),
        }

        fs::write(
            &path,
            "timestamp,open,high,low,close,adj_close,volume,symbol\nyesterday,1,2,0.5,1,,10,X.NS\n",
        )
        .unwrap();
        assert!(matches!(
            read_dataset(&path),
            Err(DatasetError::MalformedRow { line: 2, .. })
        ));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert_eq!(
            parse_timestamp("2024-01-02 09:15:00+05:30").unwrap().to_rfc3339(),
            "2024-01-02T09:15:00+05:30"
        );
        assert_eq!(
            parse_timestamp("2024-01-02").unwrap().to_rfc3339(),
            "2024-01-02T00:00:00+00:00"
        );
        assert!(parse_timestamp("2024-13-02").is_none());
    }
}
