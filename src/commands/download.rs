//! Download command - fetch or incrementally update one symbol's dataset

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use clap::Args;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use nse_ohlcv::merger::{IncrementalMerger, MergeReport, MergeRequest};
use nse_ohlcv::metadata::MetadataRecord;
use nse_ohlcv::provider::YahooProvider;
use nse_ohlcv::{AppConfig, DateRange, Interval, IntervalClass, MergeMode, Symbol};

/// Request spacing for `--slow-mode`
const SLOW_MODE_DELAY_SECS: f64 = 5.0;
/// Request spacing for `--ultra-slow`
const ULTRA_SLOW_DELAY_SECS: f64 = 10.0;

#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// Ticker, e.g. MASTEK or MASTEK.NS (the exchange suffix is added when missing)
    #[arg(short, long)]
    pub symbol: String,

    /// Candle interval (1m, 2m, 5m, 15m, 30m, 60m, 90m, 1h, 1d, 5d, 1wk, 1mo, 3mo)
    #[arg(short, long, default_value = "1h")]
    pub interval: Interval,

    /// Start date (YYYY-MM-DD). Defaults to the furthest the interval allows.
    #[arg(long)]
    pub start: Option<NaiveDate>,

    /// End date (YYYY-MM-DD), inclusive. Defaults to today.
    #[arg(long)]
    pub end: Option<NaiveDate>,

    /// Output CSV path (default: data/<TICKER>/<TICKER>_<interval>.csv)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Metadata JSON path (default: next to the CSV, suffixed _metadata.json)
    #[arg(short, long)]
    pub metadata: Option<PathBuf>,

    /// Merge new candles into the existing dataset instead of replacing it
    #[arg(long)]
    pub incremental: bool,

    /// Allow a full refresh to overwrite an existing dataset
    #[arg(long)]
    pub force: bool,

    /// Adjust open/high/low/close for dividends and splits
    #[arg(long)]
    pub auto_adjust: bool,

    /// Days per request (only lowers the interval's own limit)
    #[arg(long)]
    pub batch_days: Option<i64>,

    /// Seconds between provider requests
    #[arg(long, conflicts_with_all = ["slow_mode", "ultra_slow"])]
    pub delay: Option<f64>,

    /// Space requests 5 seconds apart
    #[arg(long, conflicts_with = "ultra_slow")]
    pub slow_mode: bool,

    /// Space requests 10 seconds apart
    #[arg(long)]
    pub ultra_slow: bool,
}

impl DownloadArgs {
    fn request_delay_ms(&self, configured_ms: u64) -> u64 {
        let secs = if self.ultra_slow {
            Some(ULTRA_SLOW_DELAY_SECS)
        } else if self.slow_mode {
            Some(SLOW_MODE_DELAY_SECS)
        } else {
            self.delay
        };
        match secs {
            Some(secs) => (secs.max(0.0) * 1000.0).round() as u64,
            None => configured_ms,
        }
    }

    fn mode(&self) -> MergeMode {
        if self.incremental {
            MergeMode::Incremental
        } else {
            MergeMode::FullRefresh
        }
    }
}

/// Earliest default start for daily-and-longer intervals
pub fn default_daily_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(1990, 1, 1).unwrap_or(NaiveDate::MIN)
}

/// Requested range for `start..=end`, defaulting per interval class
pub fn requested_range(
    class: IntervalClass,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    now: DateTime<Utc>,
) -> DateRange {
    let today = now.date_naive();
    let end = end.unwrap_or(today);
    let start = start.unwrap_or_else(|| match class.max_lookback() {
        Some(lookback) => today - lookback,
        None => default_daily_start(),
    });
    let range = DateRange::from_dates(start, end);

    // The provider counts its lookback from now; a day-aligned start sits just outside it
    match class.max_lookback() {
        Some(lookback) => {
            let earliest = now - lookback + Duration::hours(1);
            if range.start < earliest {
                info!(
                    "Start {} is beyond the {}-day limit for this interval, using {}",
                    start,
                    lookback.num_days(),
                    earliest.format("%Y-%m-%d %H:%M")
                );
                DateRange::new(earliest, range.end)
            } else {
                range
            }
        }
        None => range,
    }
}

/// `data/<BASE>/<BASE>_<interval>.csv`
pub fn default_output(symbol: &Symbol, interval: Interval) -> PathBuf {
    let base = symbol.base().to_uppercase();
    PathBuf::from("data")
        .join(&base)
        .join(format!("{}_{}.csv", base, interval))
}

/// `<stem>_metadata.json` next to the dataset
pub fn default_metadata_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dataset".to_string());
    output.with_file_name(format!("{}_metadata.json", stem))
}

pub fn run(args: DownloadArgs, config: &AppConfig) -> Result<()> {
    let symbol = Symbol::normalize(&args.symbol, &config.bulk.suffix);
    let interval = args.interval;
    let mode = args.mode();
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output(&symbol, interval));
    let metadata_path = args
        .metadata
        .clone()
        .unwrap_or_else(|| default_metadata_path(&output));

    if mode == MergeMode::FullRefresh && output.exists() && !args.force {
        bail!(
            "{} already exists; use --incremental to update it or --force to overwrite",
            output.display()
        );
    }

    let requested = requested_range(interval.class(), args.start, args.end, Utc::now());
    if requested.is_empty() {
        bail!("Start date must be before end date ({})", requested);
    }

    let mut provider_config = config.provider.clone();
    provider_config.request_delay_ms = args.request_delay_ms(provider_config.request_delay_ms);
    provider_config.auto_adjust |= args.auto_adjust;

    info!(
        "Downloading {} {} [{}] ({}) -> {}",
        symbol,
        interval,
        requested,
        mode,
        output.display()
    );

    let provider = YahooProvider::new(&provider_config).context("Failed to create provider")?;
    let merger = IncrementalMerger::new(provider)
        .with_overlap(Duration::days(config.merge.overlap_days))
        .with_batch_days(args.batch_days);
    let request = MergeRequest {
        symbol: symbol.clone(),
        interval,
        requested,
        mode,
        output: output.clone(),
    };

    // Create a tokio runtime for async operations
    let rt = tokio::runtime::Runtime::new()?;
    let report = rt
        .block_on(merger.run(&request))
        .with_context(|| format!("Download failed for {} {}", symbol, interval))?;

    if mode == MergeMode::FullRefresh && report.fetched_rows == 0 {
        warn!("{}: provider returned no rows, keeping existing files", symbol);
    } else {
        metadata_record(&request, &report)
            .write(&metadata_path)
            .with_context(|| format!("Failed to write {}", metadata_path.display()))?;
    }

    print_summary(&request, &report);
    Ok(())
}

fn metadata_record(request: &MergeRequest, report: &MergeReport) -> MetadataRecord {
    let mut record = MetadataRecord::new(
        request.symbol.as_str(),
        request.interval,
        request.mode,
        request.requested,
    );
    record.start = report.first;
    record.end = report.last;
    record.rows = report.total_rows;
    record.new_rows = report.new_rows;
    record.updated_rows = report.updated_rows;
    record.skipped_batches = report.skipped_batches;
    record
}

fn print_summary(request: &MergeRequest, report: &MergeReport) {
    let range = match (report.first, report.last) {
        (Some(first), Some(last)) => format!("{} -> {}", first, last),
        _ => "empty".to_string(),
    };
    info!(
        "{} {}: {} rows ({} new, {} updated, {}/{} batches skipped), range {}{}",
        request.symbol,
        request.interval,
        report.total_rows,
        report.new_rows,
        report.updated_rows,
        report.skipped_batches,
        report.batches,
        range,
        if report.written { "" } else { ", file unchanged" }
    );
}
