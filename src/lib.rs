//! NSE OHLCV Downloader
//!
//! Fetches OHLCV candles for NSE-listed equities from the Yahoo Finance chart
//! API and keeps one CSV dataset plus a JSON metadata sidecar per symbol and
//! interval up to date. Re-runs fetch only the tail past the last stored
//! candle and merge it in, so the tool is meant to be run on a schedule and
//! reports success purely through its exit status.
//!
//! The pieces, bottom up:
//! - [`planner`]: splits a date range into provider-compliant batches
//! - [`provider`]: the [`CandleProvider`](provider::CandleProvider) seam and the Yahoo adapter
//! - [`dataset`] and [`metadata`]: the on-disk files
//! - [`merger`]: the incremental fetch-and-merge of one symbol
//! - [`orchestrator`]: many symbols on a bounded pool of child processes
//!
//! ## Example
//! ```no_run
//! use nse_ohlcv::config::ProviderConfig;
//! use nse_ohlcv::merger::{IncrementalMerger, MergeRequest};
//! use nse_ohlcv::provider::YahooProvider;
//! use nse_ohlcv::{DateRange, Interval, MergeMode, Symbol};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let provider = YahooProvider::new(&ProviderConfig::default())?;
//!     let merger = IncrementalMerger::new(provider);
//!     let request = MergeRequest {
//!         symbol: Symbol::normalize("mastek", ".NS"),
//!         interval: Interval::OneHour,
//!         requested: DateRange::from_dates("2024-01-01".parse()?, "2024-06-30".parse()?),
//!         mode: MergeMode::Incremental,
//!         output: "data/MASTEK/MASTEK_1h.csv".into(),
//!     };
//!     let report = merger.run(&request).await?;
//!     println!("{} new rows", report.new_rows);
//!     Ok(())
//! }
//! ```

pub mod common;
pub mod config;
pub mod dataset;
pub mod error;
pub mod merger;
pub mod metadata;
pub mod nse;
pub mod orchestrator;
pub mod planner;
pub mod provider;
pub mod tickers;
pub mod types;

pub use config::AppConfig;
pub use error::{DatasetError, JobError, MergeError, ProviderError};
pub use types::*;
