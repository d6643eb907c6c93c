//! Bulk command - refresh hourly and daily datasets for a ticker list

use anyhow::{bail, Result};
use chrono::{Local, NaiveDate};
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use nse_ohlcv::metadata::MetadataScanner;
use nse_ohlcv::orchestrator::{hourly_window, plan_jobs, Job, JobFamily, Orchestrator, SubprocessRunner};
use nse_ohlcv::tickers::load_tickers;
use nse_ohlcv::{AppConfig, MergeMode};

use crate::GlobalOptions;

#[derive(Args, Debug)]
pub struct BulkArgs {
    /// Ticker list, one per line (first CSV column, # comments allowed)
    #[arg(long, default_value = "Tickers/nse_symbols_all.csv")]
    pub symbols_file: PathBuf,

    /// Root directory; each ticker gets <root>/<TICKER>/
    #[arg(short, long, default_value = "data")]
    pub output_root: PathBuf,

    /// Concurrent jobs (default: up to 8, bounded by CPU cores)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Print the planned downloads without running them
    #[arg(long)]
    pub dry_run: bool,

    /// Re-download everything instead of merging into existing datasets
    #[arg(long)]
    pub full_refresh: bool,

    /// Days re-fetched before the last recorded hourly candle
    #[arg(long)]
    pub lookback_days: Option<i64>,

    /// Rolling window of the hourly datasets, in days
    #[arg(long)]
    pub hourly_days: Option<i64>,

    /// Only process the first N tickers
    #[arg(long)]
    pub limit: Option<usize>,

    /// Skip the hourly datasets
    #[arg(long)]
    pub skip_hourly: bool,

    /// Skip the daily datasets
    #[arg(long)]
    pub skip_daily: bool,

    /// Skip tickers whose dataset file already exists
    #[arg(long)]
    pub skip_existing: bool,

    /// Kill a download that runs longer than this many seconds
    #[arg(long)]
    pub job_timeout: Option<u64>,
}

pub fn run(args: BulkArgs, config: &AppConfig, options: &GlobalOptions) -> Result<()> {
    if args.skip_hourly && args.skip_daily {
        bail!("Nothing to do: both --skip-hourly and --skip-daily were given");
    }

    let mut symbols = load_tickers(&args.symbols_file, &config.bulk.suffix)?;
    if let Some(limit) = args.limit {
        symbols.truncate(limit);
    }
    if symbols.is_empty() {
        println!("No symbols to process.");
        return Ok(());
    }

    let jobs = build_jobs(&args, config, &symbols, Local::now().date_naive());
    if jobs.is_empty() {
        println!("No eligible symbols to process after skip filters.");
        return Ok(());
    }

    let orchestrator = Orchestrator::new(
        args.workers
            .filter(|w| *w > 0)
            .unwrap_or_else(|| config.bulk.effective_workers()),
    )
    .with_progress(!options.quiet && !args.dry_run);
    let timeout = args
        .job_timeout
        .or(config.bulk.job_timeout_secs)
        .map(Duration::from_secs);

    println!("\n{}", "=".repeat(60));
    println!("BULK REFRESH");
    println!("{}", "=".repeat(60));
    println!("  Tickers:     {}", symbols.len());
    println!("  Jobs:        {}", jobs.len());
    println!("  Workers:     {}", orchestrator.workers());
    println!("  Output root: {}", args.output_root.display());
    println!(
        "  Mode:        {}",
        if args.full_refresh { "full refresh" } else { "incremental" }
    );
    println!("{}\n", "=".repeat(60));

    let runner = SubprocessRunner::current_exe()?
        .with_extra_args(child_args(options))
        .with_timeout(timeout);
    let summary = orchestrator.run(&jobs, &runner, args.dry_run)?;

    println!("\n{}", "=".repeat(60));
    println!("BULK REFRESH COMPLETE");
    println!("{}", "=".repeat(60));
    println!("  Successful: {}/{}", summary.succeeded.len(), summary.total());
    for (label, error) in &summary.failed {
        println!("  ✗ {}: {}", label, error);
    }
    println!("{}", "=".repeat(60));

    if !summary.is_success() {
        bail!(
            "Completed with {} failures. See logs above for details.",
            summary.failed.len()
        );
    }
    info!("Refresh complete for all {} jobs", summary.total());
    Ok(())
}

fn build_jobs(
    args: &BulkArgs,
    config: &AppConfig,
    symbols: &[nse_ohlcv::Symbol],
    today: NaiveDate,
) -> Vec<Job> {
    let hourly_days = args.hourly_days.unwrap_or(config.bulk.hourly_days);
    let lookback_days = args.lookback_days.unwrap_or(config.bulk.lookback_days);
    let mode = if args.full_refresh {
        MergeMode::FullRefresh
    } else {
        MergeMode::Incremental
    };
    let scanner = MetadataScanner::new(config.metadata.timestamp_keys.clone());

    let mut jobs = Vec::new();
    if !args.skip_hourly {
        for job in plan_jobs(symbols, &args.output_root, JobFamily::Hourly, hourly_days) {
            let last = if args.full_refresh {
                None
            } else {
                scanner.last_timestamp(&job.metadata_path)
            };
            let (start, end) = hourly_window(last, lookback_days, hourly_days, today, args.full_refresh);
            jobs.push(job.with_window(Some(start), Some(end)).with_mode(mode));
        }
    }
    if !args.skip_daily {
        for job in plan_jobs(symbols, &args.output_root, JobFamily::Daily, hourly_days) {
            jobs.push(job.with_mode(mode));
        }
    }

    if args.skip_existing {
        let before = jobs.len();
        jobs.retain(|job| !job.csv_path.exists());
        if jobs.len() < before {
            warn!("Skipping {} jobs with existing datasets", before - jobs.len());
        }
    }
    jobs
}

/// Global flags forwarded to every download child
fn child_args(options: &GlobalOptions) -> Vec<String> {
    let mut args = vec!["--quiet".to_string()];
    if let Some(config) = &options.config {
        args.push("--config".to_string());
        args.push(config.display().to_string());
    }
    if options.no_log_file {
        args.push("--no-log-file".to_string());
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use nse_ohlcv::metadata::MetadataRecord;
    use nse_ohlcv::{DateRange, Interval, Symbol};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn parse_args(root: &Path, extra: &[&str]) -> BulkArgs {
        #[derive(clap::Parser)]
        struct Wrapper {
            #[command(flatten)]
            args: BulkArgs,
        }
        let root = root.display().to_string();
        let mut argv = vec!["bulk", "--output-root", root.as_str()];
        argv.extend_from_slice(extra);
        <Wrapper as clap::Parser>::parse_from(argv).args
    }

    fn day(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    /// MASTEK has an hourly sidecar ending 2024-06-25 and an existing daily CSV; TCS has nothing
    fn seeded_root() -> (TempDir, Vec<Symbol>) {
        let dir = TempDir::new().unwrap();
        let mastek = dir.path().join("MASTEK");
        fs::create_dir_all(&mastek).unwrap();

        let mut record = MetadataRecord::new(
            "MASTEK.NS",
            Interval::OneHour,
            MergeMode::Incremental,
            DateRange::from_dates(day("2024-01-01"), day("2024-06-25")),
        );
        record.end = Some("2024-06-25T15:15:00+05:30".parse().unwrap());
        record
            .write(&mastek.join("MASTEK_complete_historical_1h_metadata.json"))
            .unwrap();
        fs::write(mastek.join("MASTEK_complete_daily.csv"), "timestamp\n").unwrap();

        let symbols = vec![Symbol::new("MASTEK.NS"), Symbol::new("TCS.NS")];
        (dir, symbols)
    }

    fn labels(jobs: &[Job]) -> Vec<String> {
        jobs.iter().map(Job::label).collect()
    }

    #[test]
    fn test_hourly_windows_from_metadata_daily_unbounded() {
        let (dir, symbols) = seeded_root();
        let today = day("2024-06-30");
        let jobs = build_jobs(&parse_args(dir.path(), &[]), &AppConfig::default(), &symbols, today);

        assert_eq!(
            labels(&jobs),
            vec!["MASTEK.NS 1h", "TCS.NS 1h", "MASTEK.NS 1d", "TCS.NS 1d"]
        );
        // Resumes lookback_days before the recorded end
        assert_eq!(jobs[0].start, Some(day("2024-06-20")));
        assert_eq!(jobs[0].end, Some(today));
        // No sidecar: the full rolling window
        assert_eq!(jobs[1].start, Some(day("2022-07-01")));
        assert!(jobs[2..].iter().all(|job| job.start.is_none() && job.end.is_none()));
        assert!(jobs.iter().all(|job| job.mode == MergeMode::Incremental));
    }

    #[test]
    fn test_full_refresh_ignores_metadata() {
        let (dir, symbols) = seeded_root();
        let today = day("2024-06-30");
        let args = parse_args(dir.path(), &["--full-refresh", "--hourly-days", "100"]);
        let jobs = build_jobs(&args, &AppConfig::default(), &symbols, today);

        assert_eq!(jobs[0].start, Some(day("2024-03-22")));
        assert_eq!(jobs[0].start, jobs[1].start);
        assert!(jobs[0]
            .csv_path
            .ends_with("MASTEK/MASTEK_complete_historical_1h_100days.csv"));
        assert!(jobs.iter().all(|job| job.mode == MergeMode::FullRefresh));
    }

    #[test]
    fn test_lookback_override() {
        let (dir, symbols) = seeded_root();
        let args = parse_args(dir.path(), &["--lookback-days", "10", "--skip-daily"]);
        let jobs = build_jobs(&args, &AppConfig::default(), &symbols, day("2024-06-30"));
        assert_eq!(jobs[0].start, Some(day("2024-06-15")));
    }

    #[test]
    fn test_skip_families() {
        let (dir, symbols) = seeded_root();
        let config = AppConfig::default();
        let today = day("2024-06-30");

        let daily_only = build_jobs(&parse_args(dir.path(), &["--skip-hourly"]), &config, &symbols, today);
        assert_eq!(labels(&daily_only), vec!["MASTEK.NS 1d", "TCS.NS 1d"]);

        let hourly_only = build_jobs(&parse_args(dir.path(), &["--skip-daily"]), &config, &symbols, today);
        assert_eq!(labels(&hourly_only), vec!["MASTEK.NS 1h", "TCS.NS 1h"]);
    }

    #[test]
    fn test_skip_existing_filters_by_dataset_file() {
        let (dir, symbols) = seeded_root();
        let args = parse_args(dir.path(), &["--skip-existing"]);
        let jobs = build_jobs(&args, &AppConfig::default(), &symbols, day("2024-06-30"));

        // Only MASTEK's daily CSV exists; a metadata sidecar alone does not count
        assert_eq!(labels(&jobs), vec!["MASTEK.NS 1h", "TCS.NS 1h", "TCS.NS 1d"]);
    }

    #[test]
    fn test_child_args_forward_global_flags() {
        let options = GlobalOptions {
            verbose: false,
            quiet: false,
            config: Some("cfg.json".into()),
            no_log_file: true,
        };
        assert_eq!(
            child_args(&options),
            vec!["--quiet", "--config", "cfg.json", "--no-log-file"]
        );
    }
}
