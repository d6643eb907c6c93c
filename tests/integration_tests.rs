//! Integration tests for the NSE OHLCV downloader
//!
//! These tests drive the public API end to end against an in-memory provider
//! and a scripted job runner, with real files in temp directories.

use approx::assert_relative_eq;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, TimeZone, Utc};
use proptest::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration as StdDuration;
use tempfile::TempDir;

use nse_ohlcv::dataset::read_dataset;
use nse_ohlcv::merger::{merge_candles, IncrementalMerger, MergeRequest};
use nse_ohlcv::metadata::{MetadataRecord, MetadataScanner};
use nse_ohlcv::orchestrator::{hourly_window, plan_jobs, Job, JobFamily, JobRunner, Orchestrator};
use nse_ohlcv::planner::BatchPlanner;
use nse_ohlcv::provider::CandleProvider;
use nse_ohlcv::tickers::parse_tickers;
use nse_ohlcv::{
    Candle, DateRange, Interval, IntervalClass, JobError, MergeMode, ProviderError, Symbol,
};

// =============================================================================
// Test Utilities
// =============================================================================

fn ist() -> FixedOffset {
    FixedOffset::east_opt(5 * 3600 + 1800).unwrap()
}

fn hourly_candle(ts: DateTime<FixedOffset>, close: f64) -> Candle {
    Candle::new(ts, close - 0.5, close + 1.0, close - 1.0, close, Some(close), 1500.0).unwrap()
}

/// Hourly session bars (09:15..15:15 IST) for `days` consecutive days
fn generate_hourly_candles(first_day: NaiveDate, days: i64, base_price: f64) -> Vec<Candle> {
    let mut candles = Vec::new();
    for d in 0..days {
        let date = first_day + Duration::days(d);
        for h in 0..7u32 {
            let ts = ist()
                .from_local_datetime(&date.and_hms_opt(9 + h, 15, 0).unwrap())
                .unwrap();
            let price = base_price + d as f64 + h as f64 * 0.1;
            candles.push(hourly_candle(ts, price));
        }
    }
    candles
}

/// Upstream that serves whatever candles it currently holds
#[derive(Default)]
struct InMemoryProvider {
    upstream: Mutex<Vec<Candle>>,
    requests: Mutex<Vec<DateRange>>,
}

impl InMemoryProvider {
    fn with(candles: Vec<Candle>) -> Self {
        Self {
            upstream: Mutex::new(candles),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn replace(&self, candles: Vec<Candle>) {
        *self.upstream.lock().unwrap() = candles;
    }

    fn requests(&self) -> Vec<DateRange> {
        self.requests.lock().unwrap().clone()
    }
}

impl CandleProvider for InMemoryProvider {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn fetch(
        &self,
        _symbol: &str,
        _interval: Interval,
        range: DateRange,
    ) -> Result<Vec<Candle>, ProviderError> {
        self.requests.lock().unwrap().push(range);
        Ok(self
            .upstream
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.key() >= range.start && c.key() < range.end)
            .cloned()
            .collect())
    }
}

fn hourly_request(dir: &Path, requested: DateRange) -> MergeRequest {
    MergeRequest {
        symbol: Symbol::new("MASTEK.NS"),
        interval: Interval::OneHour,
        requested,
        mode: MergeMode::Incremental,
        output: dir.join("MASTEK").join("MASTEK_complete_historical_1h_730days.csv"),
    }
}

fn january() -> DateRange {
    DateRange::from_dates(
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
    )
}

// =============================================================================
// Incremental merge
// =============================================================================

#[tokio::test]
async fn test_rerun_without_new_data_is_byte_identical() {
    let dir = TempDir::new().unwrap();
    let candles = generate_hourly_candles(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(), 20, 2800.0);
    let merger = IncrementalMerger::new(InMemoryProvider::with(candles));
    let request = hourly_request(dir.path(), january());

    let first = merger.run(&request).await.unwrap();
    assert!(first.written);
    assert_eq!(first.new_rows, 140);
    let before = fs::read(&request.output).unwrap();

    let second = merger.run(&request).await.unwrap();
    assert!(!second.written);
    assert_eq!(second.new_rows, 0);
    assert_eq!(second.updated_rows, 0);
    assert_eq!(fs::read(&request.output).unwrap(), before);

    // Only the overlap tail was fetched the second time
    let requests = merger.provider().requests();
    assert_eq!(requests.len(), 2);
    let last = first.last.unwrap().with_timezone(&Utc);
    assert_eq!(requests[1].start, last - Duration::days(5));
}

#[tokio::test]
async fn test_overlapping_merge_keeps_each_timestamp_once_later_wins() {
    let dir = TempDir::new().unwrap();
    let first_batch = generate_hourly_candles(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(), 10, 100.0);
    let provider = InMemoryProvider::with(first_batch.clone());
    let merger = IncrementalMerger::new(provider);
    let request = hourly_request(dir.path(), january());
    merger.run(&request).await.unwrap();

    // Upstream restates the last three days and adds four more
    let mut restated = generate_hourly_candles(NaiveDate::from_ymd_opt(2024, 1, 9).unwrap(), 7, 500.0);
    let mut upstream = first_batch[..first_batch.len() - 21].to_vec();
    upstream.append(&mut restated);
    merger.provider().replace(upstream);

    let report = merger.run(&request).await.unwrap();
    assert_eq!(report.new_rows, 28);
    assert_eq!(report.updated_rows, 21);

    let stored = read_dataset(&request.output).unwrap().candles;
    assert_eq!(stored.len(), 70 + 28);
    let keys: HashSet<_> = stored.iter().map(Candle::key).collect();
    assert_eq!(keys.len(), stored.len());
    assert!(stored.windows(2).all(|w| w[0].key() < w[1].key()));

    let jan9 = stored
        .iter()
        .find(|c| c.timestamp == ist().with_ymd_and_hms(2024, 1, 9, 9, 15, 0).unwrap())
        .unwrap();
    assert_relative_eq!(jan9.close, 500.0);
}

#[tokio::test]
async fn test_tail_fetch_around_last_timestamp() {
    let dir = TempDir::new().unwrap();
    let t = ist().with_ymd_and_hms(2024, 1, 10, 12, 15, 0).unwrap();
    let existing = vec![
        hourly_candle(t - Duration::hours(2), 99.0),
        hourly_candle(t - Duration::hours(1), 100.0),
        hourly_candle(t, 101.0),
    ];
    let merger = IncrementalMerger::new(InMemoryProvider::with(existing));
    let request = hourly_request(dir.path(), january());
    merger.run(&request).await.unwrap();

    // Fetch returns [T-1h, T+5h], with T restated
    let fetched: Vec<_> = (-1..=5)
        .map(|h| hourly_candle(t + Duration::hours(h), 200.0 + h as f64))
        .collect();
    merger.provider().replace(fetched);
    let report = merger.run(&request).await.unwrap();

    let stored = read_dataset(&request.output).unwrap().candles;
    assert_eq!(stored.last().unwrap().timestamp, t + Duration::hours(5));
    assert_eq!(stored.iter().filter(|c| c.timestamp == t).count(), 1);
    assert_eq!(stored.len(), 2 + 6);
    assert_eq!(report.new_rows, 5);

    let at_t = stored.iter().find(|c| c.timestamp == t).unwrap();
    assert_relative_eq!(at_t.close, 200.0);
    // Rows before the fetched window are kept as stored
    assert_relative_eq!(stored[0].close, 99.0);
}

#[tokio::test]
async fn test_long_hourly_history_is_fetched_in_two_batches() {
    let dir = TempDir::new().unwrap();
    let start = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
    let requested = DateRange::new(start, start + Duration::days(1000));

    let plan: Vec<_> = BatchPlanner::new(IntervalClass::Hour).plan_range(requested).collect();
    assert_eq!(plan.len(), 2);
    assert_eq!(plan[0].end, plan[1].start);

    let merger = IncrementalMerger::new(InMemoryProvider::default());
    let report = merger.run(&hourly_request(dir.path(), requested)).await.unwrap();
    assert_eq!(report.batches, 2);
    assert_eq!(merger.provider().requests(), plan);
}

// =============================================================================
// Metadata and the bulk hourly window
// =============================================================================

#[test]
fn test_metadata_drives_hourly_window() {
    let dir = TempDir::new().unwrap();
    let symbols = parse_tickers("# watchlist\nmastek\ntcs\n".as_bytes(), ".NS").unwrap();
    let jobs = plan_jobs(&symbols, dir.path(), JobFamily::Hourly, 730);
    let today = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap();

    let mut record = MetadataRecord::new("MASTEK.NS", Interval::OneHour, MergeMode::Incremental, january());
    record.end = Some(ist().with_ymd_and_hms(2024, 6, 25, 15, 15, 0).unwrap());
    record.write(&jobs[0].metadata_path).unwrap();
    // A legacy list-shaped sidecar for the second ticker
    fs::create_dir_all(&jobs[1].dir).unwrap();
    fs::write(&jobs[1].metadata_path, r#"[{"rows": 3}, {"last_date": "2024-06-01"}]"#).unwrap();

    let scanner = MetadataScanner::default();
    let windows: Vec<_> = jobs
        .iter()
        .map(|job| hourly_window(scanner.last_timestamp(&job.metadata_path), 5, 730, today, false))
        .collect();

    assert_eq!(windows[0].0, NaiveDate::from_ymd_opt(2024, 6, 20).unwrap());
    assert_eq!(windows[1].0, NaiveDate::from_ymd_opt(2024, 5, 27).unwrap());
    assert!(windows.iter().all(|(_, end)| *end == today));
}

// =============================================================================
// Bulk orchestration
// =============================================================================

/// Fails chosen tickers and records peak concurrency
struct ScriptedRunner {
    failing: HashSet<String>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedRunner {
    fn failing(names: &[&str]) -> Self {
        Self {
            failing: names.iter().map(|s| s.to_string()).collect(),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

impl JobRunner for ScriptedRunner {
    fn run(&self, job: &Job) -> Result<(), JobError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        thread::sleep(StdDuration::from_millis(20));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(job.symbol.as_str()) {
            Err(JobError::ExitStatus(Some(1)))
        } else {
            Ok(())
        }
    }
}

#[test]
fn test_bulk_failures_are_aggregated_not_fatal() {
    let dir = TempDir::new().unwrap();
    let names: Vec<String> = (0..10).map(|i| format!("TICKER{}", i)).collect();
    let symbols: Vec<Symbol> = names.iter().map(|n| Symbol::normalize(n, ".NS")).collect();
    let jobs = plan_jobs(&symbols, dir.path(), JobFamily::Daily, 730);
    let runner = ScriptedRunner::failing(&["TICKER2.NS", "TICKER7.NS"]);

    let summary = Orchestrator::new(3).run(&jobs, &runner, false).unwrap();

    assert_eq!(runner.calls.load(Ordering::SeqCst), 10);
    assert!(runner.peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(summary.succeeded.len(), 8);
    assert_eq!(summary.failed.len(), 2);
    let failed: Vec<_> = summary.failed.iter().map(|(label, _)| label.as_str()).collect();
    assert_eq!(failed, vec!["TICKER2.NS 1d", "TICKER7.NS 1d"]);
    assert!(matches!(summary.failed[0].1, JobError::ExitStatus(Some(1))));
    assert_eq!(summary.exit_code(), 1);
}

#[test]
fn test_bulk_all_succeed_exit_zero() {
    let dir = TempDir::new().unwrap();
    let symbols = parse_tickers("A\nB\nC\nD\n".as_bytes(), ".NS").unwrap();
    let jobs = plan_jobs(&symbols, dir.path(), JobFamily::Hourly, 730);
    let runner = ScriptedRunner::failing(&[]);

    let summary = Orchestrator::new(8).run(&jobs, &runner, false).unwrap();
    assert!(summary.is_success());
    assert_eq!(summary.exit_code(), 0);
    assert_eq!(summary.total(), 4);
}

// =============================================================================
// Properties
// =============================================================================

fn arb_candles() -> impl Strategy<Value = Vec<Candle>> {
    prop::collection::vec((0i64..500, 5.0f64..1000.0), 0..60).prop_map(|rows| {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 3, 45, 0).unwrap();
        rows.into_iter()
            .map(|(hour, close)| hourly_candle((base + Duration::hours(hour)).with_timezone(&ist()), close))
            .collect()
    })
}

proptest! {
    #[test]
    fn prop_merge_is_sorted_unique_and_complete(existing in arb_candles(), fetched in arb_candles()) {
        let existing = merge_candles(&[], existing).candles;
        let merged = merge_candles(&existing, fetched.clone());

        prop_assert!(merged.candles.windows(2).all(|w| w[0].key() < w[1].key()));

        let keys: HashSet<_> = merged.candles.iter().map(Candle::key).collect();
        let expected: HashSet<_> = existing.iter().chain(fetched.iter()).map(Candle::key).collect();
        prop_assert_eq!(keys, expected);

        // The last fetched row for a key wins
        for candle in &fetched {
            let winner = fetched.iter().rev().find(|c| c.key() == candle.key()).unwrap();
            let stored = merged.candles.iter().find(|c| c.key() == candle.key()).unwrap();
            prop_assert_eq!(stored, winner);
        }
    }

    #[test]
    fn prop_merge_with_itself_changes_nothing(existing in arb_candles()) {
        let existing = merge_candles(&[], existing).candles;
        let again = merge_candles(&existing, existing.clone());
        prop_assert_eq!(again.new_rows, 0);
        prop_assert_eq!(again.updated_rows, 0);
        prop_assert_eq!(again.candles, existing);
    }
}
