//! Error types for provider calls, dataset files and bulk jobs

use std::path::PathBuf;
use thiserror::Error;

use crate::{CandleValidationError, DateRange};

/// Failure of a single provider request
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested window lies outside what the provider serves for the interval
    #[error("range not available: {0}")]
    RangeNotAvailable(String),

    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("response format changed: {0}")]
    ResponseFormat(String),
}

impl ProviderError {
    /// Errors that only disqualify one batch window; the run continues without it.
    ///
    /// Everything else is transient and fails the whole symbol so that no
    /// partial file with a hole behind its last timestamp gets written.
    pub fn is_batch_local(&self) -> bool {
        matches!(
            self,
            ProviderError::RangeNotAvailable(_) | ProviderError::SymbolNotFound(_)
        )
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::ResponseFormat(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Problems reading or writing a dataset file
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("{path}: missing required column '{column}'")]
    MissingColumn { path: PathBuf, column: &'static str },

    #[error("{path}: malformed row at line {line}: {reason}")]
    MalformedRow {
        path: PathBuf,
        line: u64,
        reason: String,
    },

    #[error("{path}: invalid candle at line {line}: {source}")]
    InvalidCandle {
        path: PathBuf,
        line: u64,
        #[source]
        source: CandleValidationError,
    },

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Failure of one per-symbol merge run. Nothing has been written when this is returned.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error("batch {batch} failed: {source}")]
    Provider {
        batch: DateRange,
        #[source]
        source: ProviderError,
    },

    #[error("all {batches} batches were rejected by the provider, last error: {last}")]
    AllBatchesRejected { batches: usize, last: ProviderError },
}

/// Failure of one bulk job
#[derive(Debug, Error)]
pub enum JobError {
    #[error("failed to start downloader: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("downloader exited with {}", describe_exit(.0))]
    ExitStatus(Option<i32>),

    #[error("downloader timed out after {0}s")]
    TimedOut(u64),

    #[error("job panicked: {0}")]
    Panicked(String),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}
