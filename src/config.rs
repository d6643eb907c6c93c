//! Configuration management
//!
//! Handles loading and parsing of an optional JSON configuration file with
//! environment variable overrides. Every field has a default, so running
//! without a config file is the normal case.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::metadata::DEFAULT_TIMESTAMP_KEYS;

/// Upper bound on the default worker count
pub const DEFAULT_MAX_WORKERS: usize = 8;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub bulk: BulkConfig,
    pub merge: MergeConfig,
    pub metadata: MetadataConfig,
}

impl AppConfig {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: AppConfig =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;
        Ok(config)
    }

    /// Load from `path` when given (defaults otherwise), then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from `NSE_OHLCV_*` environment variables
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("NSE_OHLCV_BASE_URL") {
            self.provider.base_url = url;
        }
        if let Ok(delay) = std::env::var("NSE_OHLCV_REQUEST_DELAY_MS") {
            self.provider.request_delay_ms = delay
                .parse()
                .context("NSE_OHLCV_REQUEST_DELAY_MS must be an integer")?;
        }
        if let Ok(workers) = std::env::var("NSE_OHLCV_WORKERS") {
            self.bulk.workers = Some(
                workers
                    .parse()
                    .context("NSE_OHLCV_WORKERS must be an integer")?,
            );
        }
        if let Ok(suffix) = std::env::var("NSE_OHLCV_SUFFIX") {
            self.bulk.suffix = suffix;
        }
        Ok(())
    }
}

/// Market data provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    /// Minimum spacing between two provider requests
    pub request_delay_ms: u64,
    /// Scale OHLC by `adj_close / close` (dividend and split adjusted prices)
    pub auto_adjust: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            base_url: "https://query2.finance.yahoo.com".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string(),
            timeout_secs: 30,
            request_delay_ms: 1000,
            auto_adjust: false,
        }
    }
}

/// Bulk orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    /// Concurrent jobs; `None` means `min(8, cpu count)`
    pub workers: Option<usize>,
    /// Days re-fetched before the last recorded timestamp
    pub lookback_days: i64,
    /// Rolling window of the hourly datasets
    pub hourly_days: i64,
    /// Exchange suffix appended to bare tickers
    pub suffix: String,
    pub job_timeout_secs: Option<u64>,
}

impl Default for BulkConfig {
    fn default() -> Self {
        BulkConfig {
            workers: None,
            lookback_days: 5,
            hourly_days: 730,
            suffix: ".NS".to_string(),
            job_timeout_secs: None,
        }
    }
}

impl BulkConfig {
    pub fn effective_workers(&self) -> usize {
        match self.workers {
            Some(n) if n > 0 => n,
            _ => default_workers(),
        }
    }
}

/// `min(8, available cores)`, at least 1
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .clamp(1, DEFAULT_MAX_WORKERS)
}

/// Incremental merge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Overlap re-fetched before the last stored candle, to pick up restated bars
    pub overlap_days: i64,
}

impl Default for MergeConfig {
    fn default() -> Self {
        MergeConfig { overlap_days: 5 }
    }
}

/// Metadata scanning settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Keys probed, in order, for the last stored timestamp
    pub timestamp_keys: Vec<String>,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        MetadataConfig {
            timestamp_keys: DEFAULT_TIMESTAMP_KEYS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.provider.request_delay_ms, 1000);
        assert_eq!(config.bulk.lookback_days, 5);
        assert_eq!(config.bulk.hourly_days, 730);
        assert_eq!(config.bulk.suffix, ".NS");
        assert_eq!(config.merge.overlap_days, 5);
        assert!(config.metadata.timestamp_keys.contains(&"end".to_string()));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{ "bulk": {{ "workers": 3 }}, "merge": {{ "overlap_days": 2 }} }}"#)
            .unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.bulk.effective_workers(), 3);
        assert_eq!(config.bulk.hourly_days, 730);
        assert_eq!(config.merge.overlap_days, 2);
        assert_eq!(config.provider.timeout_secs, 30);
    }

    #[test]
    fn test_default_workers_bounds() {
        let workers = default_workers();
        assert!((1..=DEFAULT_MAX_WORKERS).contains(&workers));

        let bulk = BulkConfig {
            workers: Some(0),
            ..BulkConfig::default()
        };
        assert_eq!(bulk.effective_workers(), default_workers());
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not json").unwrap();
        assert!(AppConfig::from_file(file.path()).is_err());
    }
}
