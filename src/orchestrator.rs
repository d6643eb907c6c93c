//! Bulk orchestrator
//!
//! Runs one independent download job per ticker on a bounded worker pool.
//! Jobs share nothing but the pool: each owns its output directory, a failing
//! job is logged and counted and never stops its siblings, and nothing is
//! retried. The production runner starts the `download` subcommand of the
//! current executable as a child process per job.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration as StdDuration, Instant};
use tracing::{error, info};

use crate::error::JobError;
use crate::{Interval, MergeMode, Symbol};

/// Poll interval while waiting on a child with a timeout
const CHILD_POLL_INTERVAL: StdDuration = StdDuration::from_millis(100);

/// Dataset family refreshed by a bulk run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobFamily {
    /// Rolling window of hourly candles
    Hourly,
    /// Full daily history
    Daily,
}

impl JobFamily {
    pub fn interval(&self) -> Interval {
        match self {
            JobFamily::Hourly => Interval::OneHour,
            JobFamily::Daily => Interval::OneDay,
        }
    }

    fn csv_name(&self, base: &str, hourly_days: i64) -> String {
        match self {
            JobFamily::Hourly => format!("{}_complete_historical_1h_{}days.csv", base, hourly_days),
            JobFamily::Daily => format!("{}_complete_daily.csv", base),
        }
    }

    fn metadata_name(&self, base: &str) -> String {
        match self {
            JobFamily::Hourly => format!("{}_complete_historical_1h_metadata.json", base),
            JobFamily::Daily => format!("{}_complete_daily_metadata.json", base),
        }
    }
}

impl std::fmt::Display for JobFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobFamily::Hourly => write!(f, "hourly"),
            JobFamily::Daily => write!(f, "daily"),
        }
    }
}

/// One per-ticker download
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub symbol: Symbol,
    pub family: JobFamily,
    pub dir: PathBuf,
    pub csv_path: PathBuf,
    pub metadata_path: PathBuf,
    /// First calendar day to request; the downloader picks a default when `None`
    pub start: Option<NaiveDate>,
    /// Last calendar day to request, inclusive; today when `None`
    pub end: Option<NaiveDate>,
    pub mode: MergeMode,
}

impl Job {
    /// Ticker and interval, e.g. `MASTEK.NS 1h`
    pub fn label(&self) -> String {
        format!("{} {}", self.symbol, self.family.interval())
    }

    pub fn with_window(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn with_mode(mut self, mode: MergeMode) -> Self {
        self.mode = mode;
        self
    }

    /// Arguments of the `download` subcommand for this job
    pub fn download_args(&self) -> Vec<String> {
        let mut args = vec![
            "download".to_string(),
            "--symbol".to_string(),
            self.symbol.to_string(),
            "--interval".to_string(),
            self.family.interval().to_string(),
        ];
        if let Some(start) = self.start {
            args.extend(["--start".to_string(), start.to_string()]);
        }
        if let Some(end) = self.end {
            args.extend(["--end".to_string(), end.to_string()]);
        }
        args.extend([
            "--output".to_string(),
            self.csv_path.display().to_string(),
            "--metadata".to_string(),
            self.metadata_path.display().to_string(),
        ]);
        match self.mode {
            MergeMode::Incremental => args.push("--incremental".to_string()),
            MergeMode::FullRefresh => args.push("--force".to_string()),
        }
        args
    }
}

/// One job per ticker under `<output_root>/<BASE>/`, incremental by default
pub fn plan_jobs(symbols: &[Symbol], output_root: &Path, family: JobFamily, hourly_days: i64) -> Vec<Job> {
    symbols
        .iter()
        .map(|symbol| {
            let base = symbol.base().to_uppercase();
            let dir = output_root.join(&base);
            Job {
                symbol: symbol.clone(),
                family,
                csv_path: dir.join(family.csv_name(&base, hourly_days)),
                metadata_path: dir.join(family.metadata_name(&base)),
                dir,
                start: None,
                end: None,
                mode: MergeMode::Incremental,
            }
        })
        .collect()
}

/// Start and end day of an hourly refresh.
///
/// Resumes `lookback_days` before the last recorded candle, but never earlier
/// than `today - hourly_days`, which is also the start when nothing is
/// recorded or on a full refresh.
pub fn hourly_window(
    last: Option<DateTime<FixedOffset>>,
    lookback_days: i64,
    hourly_days: i64,
    today: NaiveDate,
    full_refresh: bool,
) -> (NaiveDate, NaiveDate) {
    let default_start = today - Duration::days(hourly_days);
    let start = match last {
        Some(last) if !full_refresh => {
            (last.date_naive() - Duration::days(lookback_days.max(0))).max(default_start)
        }
        _ => default_start,
    };
    (start, today)
}

/// Executes a single job
pub trait JobRunner: Sync {
    fn run(&self, job: &Job) -> Result<(), JobError>;

    /// Human-readable rendering of what `run` would do
    fn describe(&self, job: &Job) -> String {
        let window = match (job.start, job.end) {
            (Some(start), Some(end)) => format!(" [{} -> {}]", start, end),
            (Some(start), None) => format!(" [{} -> today]", start),
            _ => String::new(),
        };
        format!(
            "would refresh {} {}{} -> {}",
            job.symbol,
            job.family.interval(),
            window,
            job.csv_path.display()
        )
    }
}

/// Runs each job as a `download` child process of `program`
#[derive(Debug, Clone)]
pub struct SubprocessRunner {
    program: PathBuf,
    extra_args: Vec<String>,
    timeout: Option<StdDuration>,
}

impl SubprocessRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
            timeout: None,
        }
    }

    /// Runner that re-invokes the running executable
    pub fn current_exe() -> Result<Self> {
        let program = std::env::current_exe().context("Failed to locate the current executable")?;
        Ok(Self::new(program))
    }

    /// Arguments appended to every invocation (e.g. `--quiet`)
    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<StdDuration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, job: &Job) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(job.download_args())
            .args(&self.extra_args)
            .stdin(Stdio::null());
        command
    }
}

impl JobRunner for SubprocessRunner {
    fn run(&self, job: &Job) -> Result<(), JobError> {
        let mut child = self.command(job).spawn().map_err(JobError::Spawn)?;

        let status = wait_with_timeout(&mut child, self.timeout)?;
        if status.success() {
            Ok(())
        } else {
            Err(JobError::ExitStatus(status.code()))
        }
    }

    fn describe(&self, job: &Job) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(job.download_args());
        parts.extend(self.extra_args.iter().cloned());
        parts.join(" ")
    }
}

/// Wait for `child`, killing it once `timeout` has elapsed
fn wait_with_timeout(child: &mut Child, timeout: Option<StdDuration>) -> Result<ExitStatus, JobError> {
    let Some(timeout) = timeout else {
        return child.wait().map_err(JobError::Spawn);
    };

    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait().map_err(JobError::Spawn)? {
            return Ok(status);
        }
        if started.elapsed() >= timeout {
            // The child may have exited in between; either way reap it
            let _ = child.kill();
            let _ = child.wait();
            return Err(JobError::TimedOut(timeout.as_secs()));
        }
        std::thread::sleep(CHILD_POLL_INTERVAL);
    }
}

/// Run one job, turning a panic in the runner into a job failure
fn run_isolated<R: JobRunner>(runner: &R, job: &Job) -> Result<(), JobError> {
    panic::catch_unwind(AssertUnwindSafe(|| runner.run(job)))
        .unwrap_or_else(|payload| Err(JobError::Panicked(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Outcome of a bulk run
#[derive(Debug, Default)]
pub struct BulkSummary {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, JobError)>,
}

impl BulkSummary {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Process exit status for the run: 0 iff no job failed
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

/// Bounded worker pool over independent jobs
#[derive(Debug, Clone)]
pub struct Orchestrator {
    workers: usize,
    show_progress: bool,
}

impl Orchestrator {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run every job and aggregate the outcomes. With `dry_run`, only print
    /// what each job would do.
    pub fn run<R: JobRunner>(&self, jobs: &[Job], runner: &R, dry_run: bool) -> Result<BulkSummary> {
        if dry_run {
            for job in jobs {
                println!("DRY RUN :: {}", runner.describe(job));
            }
            return Ok(BulkSummary {
                succeeded: jobs.iter().map(Job::label).collect(),
                failed: Vec::new(),
            });
        }

        info!("Running {} jobs on {} workers", jobs.len(), self.workers);

        let pb = self.progress_bar(jobs.len());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .build()
            .context("Failed to build worker pool")?;

        let outcomes: Vec<(String, Result<(), JobError>)> = pool.install(|| {
            jobs.par_iter()
                .with_max_len(1)
                .map(|job| {
                    let label = job.label();
                    let outcome = run_isolated(runner, job);
                    match &outcome {
                        Ok(()) => info!("{}: done", label),
                        Err(e) => {
                            error!("{}: {}", label, e);
                            pb.println(format!("⚠️  {} failed: {}", label, e));
                        }
                    }
                    pb.inc(1);
                    (label, outcome)
                })
                .collect()
        });
        pb.finish_and_clear();

        let mut summary = BulkSummary::default();
        for (label, outcome) in outcomes {
            match outcome {
                Ok(()) => summary.succeeded.push(label),
                Err(e) => summary.failed.push((label, e)),
            }
        }
        Ok(summary)
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("⚡ {percent:>3}%|{bar:40}| {pos}/{len} [{elapsed}<{eta}] {msg}")
        {
            pb.set_style(style.progress_chars("█░ "));
        }
        pb.tick();
        pb
    }
}
