//! Batch planning
//!
//! The provider refuses requests whose span exceeds a per-interval-class cap,
//! so a long download is split into consecutive sub-ranges. Sub-ranges abut
//! exactly (`next.start == prev.end`) and the provider treats `end` as
//! exclusive, so batch boundaries neither gap nor double-fetch.

use chrono::{DateTime, Duration, Utc};

use crate::{DateRange, IntervalClass};

/// Splits a requested range into provider-compliant sub-ranges
#[derive(Debug, Clone, Copy)]
pub struct BatchPlanner {
    max_span: Option<Duration>,
}

impl BatchPlanner {
    /// Planner using the class cap
    pub fn new(class: IntervalClass) -> Self {
        Self {
            max_span: class.max_span(),
        }
    }

    /// Lower the span of each batch to `days`. Never raises it above the class cap.
    pub fn with_span_override(mut self, days: Option<i64>) -> Self {
        if let Some(days) = days.filter(|d| *d > 0) {
            let requested = Duration::days(days);
            self.max_span = Some(match self.max_span {
                Some(cap) => cap.min(requested),
                None => requested,
            });
        }
        self
    }

    pub fn max_span(&self) -> Option<Duration> {
        self.max_span
    }

    /// Lazily plan the batches covering `[start, end)`
    pub fn plan(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> BatchPlan {
        BatchPlan {
            cursor: start,
            end,
            max_span: self.max_span,
        }
    }

    pub fn plan_range(&self, range: DateRange) -> BatchPlan {
        self.plan(range.start, range.end)
    }
}

/// Ordered, finite sequence of sub-ranges produced by [`BatchPlanner::plan`]
#[derive(Debug, Clone)]
pub struct BatchPlan {
    cursor: DateTime<Utc>,
    end: DateTime<Utc>,
    max_span: Option<Duration>,
}

impl Iterator for BatchPlan {
    type Item = DateRange;

    fn next(&mut self) -> Option<DateRange> {
        if self.cursor >= self.end {
            return None;
        }

        let batch_end = match self.max_span {
            Some(span) => (self.cursor + span).min(self.end),
            None => self.end,
        };
        let batch = DateRange::new(self.cursor, batch_end);
        self.cursor = batch_end;
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for BatchPlan {}

impl BatchPlan {
    fn remaining(&self) -> usize {
        if self.cursor >= self.end {
            return 0;
        }
        let total = (self.end - self.cursor).num_seconds();
        match self.max_span {
            Some(span) => {
                let span = span.num_seconds().max(1);
                ((total + span - 1) / span) as usize
            }
            None => 1,
        }
    }
}
