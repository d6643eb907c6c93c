//! Incremental merge of freshly fetched candles into a dataset file
//!
//! A run reads the existing dataset, works out the window still worth
//! fetching (the tail past the last stored candle, plus an overlap so restated
//! bars are picked up), fetches that window batch by batch, and writes the
//! union back. Rows are keyed by timestamp instant and a fetched row always
//! replaces a stored one.

use chrono::{DateTime, Duration, FixedOffset, Utc};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::dataset::{read_dataset, render_dataset, write_atomic, Dataset};
use crate::error::{DatasetError, MergeError, ProviderError};
use crate::planner::BatchPlanner;
use crate::provider::CandleProvider;
use crate::{Candle, DateRange, Interval, MergeMode, Symbol};

/// Overlap re-fetched before the last stored candle
pub const DEFAULT_OVERLAP_DAYS: i64 = 5;

/// Window to fetch for `requested`, given what is already stored.
///
/// Full refresh, or no stored rows, fetches the whole request. Otherwise the
/// window starts `overlap` before the last stored candle, never earlier than
/// the request. `None` means there is nothing left to fetch.
pub fn plan_fetch_window(
    existing: &Dataset,
    requested: DateRange,
    mode: MergeMode,
    overlap: Duration,
) -> Option<DateRange> {
    let window = match (mode, existing.last_timestamp()) {
        (MergeMode::FullRefresh, _) | (MergeMode::Incremental, None) => requested,
        (MergeMode::Incremental, Some(last)) => {
            let resume = last.with_timezone(&Utc) - overlap;
            DateRange::new(resume.max(requested.start), requested.end)
        }
    };
    (!window.is_empty()).then_some(window)
}

/// Result of [`merge_candles`]
#[derive(Debug, Clone, PartialEq)]
pub struct Merged {
    /// Strictly ascending by instant, no duplicates
    pub candles: Vec<Candle>,
    /// Keys not present before
    pub new_rows: usize,
    /// Keys present before whose values changed
    pub updated_rows: usize,
}

/// Union of `existing` and `fetched` keyed by instant; `fetched` wins on collision
pub fn merge_candles(existing: &[Candle], fetched: Vec<Candle>) -> Merged {
    let mut by_key: BTreeMap<DateTime<Utc>, Candle> =
        existing.iter().map(|c| (c.key(), c.clone())).collect();
    let mut added = HashSet::new();
    let mut changed = HashSet::new();

    for candle in fetched {
        let key = candle.key();
        match by_key.entry(key) {
            Entry::Vacant(slot) => {
                added.insert(key);
                slot.insert(candle);
            }
            Entry::Occupied(mut slot) => {
                if !added.contains(&key) && slot.get() != &candle {
                    changed.insert(key);
                }
                slot.insert(candle);
            }
        }
    }

    Merged {
        candles: by_key.into_values().collect(),
        new_rows: added.len(),
        updated_rows: changed.len(),
    }
}

/// One per-symbol merge run
#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub symbol: Symbol,
    pub interval: Interval,
    pub requested: DateRange,
    pub mode: MergeMode,
    pub output: PathBuf,
}

/// What a merge run did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    /// Window actually fetched, `None` when already up to date
    pub window: Option<DateRange>,
    pub batches: usize,
    pub skipped_batches: usize,
    pub fetched_rows: usize,
    pub new_rows: usize,
    pub updated_rows: usize,
    /// Rows in the dataset after the run
    pub total_rows: usize,
    pub first: Option<DateTime<FixedOffset>>,
    pub last: Option<DateTime<FixedOffset>>,
    /// Whether the dataset file was (re)written
    pub written: bool,
}

/// Fetches and merges candles through a [`CandleProvider`]
pub struct IncrementalMerger<P> {
    provider: P,
    overlap: Duration,
    batch_days: Option<i64>,
}

impl<P: CandleProvider> IncrementalMerger<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            overlap: Duration::days(DEFAULT_OVERLAP_DAYS),
            batch_days: None,
        }
    }

    pub fn with_overlap(mut self, overlap: Duration) -> Self {
        self.overlap = overlap.max(Duration::zero());
        self
    }

    /// Cap every batch at `days` (only ever lowers the interval's own cap)
    pub fn with_batch_days(mut self, days: Option<i64>) -> Self {
        self.batch_days = days;
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Run one merge. On error the dataset file is untouched.
    pub async fn run(&self, request: &MergeRequest) -> Result<MergeReport, MergeError> {
        let existing = match request.mode {
            MergeMode::Incremental => read_dataset(&request.output)?,
            MergeMode::FullRefresh => Dataset::default(),
        };

        let mut report = MergeReport {
            total_rows: existing.candles.len(),
            first: existing.candles.iter().min_by_key(|c| c.key()).map(|c| c.timestamp),
            last: existing.last_timestamp(),
            ..MergeReport::default()
        };

        let Some(window) = plan_fetch_window(&existing, request.requested, request.mode, self.overlap)
        else {
            info!("{} {}: already up to date", request.symbol, request.interval);
            return Ok(report);
        };
        report.window = Some(window);

        let fetched = self.fetch_window(request, window, &mut report).await?;
        report.fetched_rows = fetched.len();
        if fetched.is_empty() {
            info!("{} {}: no rows returned for {}", request.symbol, request.interval, window);
            return Ok(report);
        }

        let merged = merge_candles(&existing.candles, fetched);
        report.new_rows = merged.new_rows;
        report.updated_rows = merged.updated_rows;
        report.total_rows = merged.candles.len();
        report.first = merged.candles.first().map(|c| c.timestamp);
        report.last = merged.candles.last().map(|c| c.timestamp);

        let bytes = render_dataset(request.symbol.as_str(), &merged.candles).map_err(|source| {
            DatasetError::Csv {
                path: request.output.clone(),
                source,
            }
        })?;
        let unchanged = fs::read(&request.output).is_ok_and(|current| current == bytes);
        if unchanged {
            debug!("{}: contents unchanged, not rewriting", request.output.display());
        } else {
            write_atomic(&request.output, &bytes).map_err(|source| DatasetError::Io {
                path: request.output.clone(),
                source,
            })?;
            report.written = true;
        }

        info!(
            "{} {}: {} new, {} updated, {} total rows",
            request.symbol, request.interval, report.new_rows, report.updated_rows, report.total_rows
        );
        Ok(report)
    }

    async fn fetch_window(
        &self,
        request: &MergeRequest,
        window: DateRange,
        report: &mut MergeReport,
    ) -> Result<Vec<Candle>, MergeError> {
        let plan = BatchPlanner::new(request.interval.class())
            .with_span_override(self.batch_days)
            .plan_range(window);
        report.batches = plan.len();

        let mut fetched = Vec::new();
        let mut last_rejection: Option<ProviderError> = None;
        for (index, batch) in plan.enumerate() {
            debug!(
                "{} {}: batch {}/{} {}",
                request.symbol,
                request.interval,
                index + 1,
                report.batches,
                batch
            );
            match self
                .provider
                .fetch(request.symbol.as_str(), request.interval, batch)
                .await
            {
                Ok(candles) => fetched.extend(candles),
                Err(e) if e.is_batch_local() => {
                    warn!(
                        "{} {}: {} rejected batch {}, skipping: {}",
                        request.symbol,
                        request.interval,
                        self.provider.name(),
                        batch,
                        e
                    );
                    report.skipped_batches += 1;
                    last_rejection = Some(e);
                }
                Err(source) => return Err(MergeError::Provider { batch, source }),
            }
        }

        if let Some(last) = last_rejection {
            if report.skipped_batches == report.batches {
                return Err(MergeError::AllBatchesRejected {
                    batches: report.batches,
                    last,
                });
            }
        }
        Ok(fetched)
    }
}
