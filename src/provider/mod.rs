//! Market data provider seam
//!
//! The merger only talks to [`CandleProvider`], so the HTTP adapter can be
//! swapped for an in-memory one in tests.

pub mod yahoo;

use std::future::Future;

use crate::error::ProviderError;
use crate::{Candle, DateRange, Interval};

pub use yahoo::YahooProvider;

/// Source of OHLCV candles for one symbol and interval over a half-open range
pub trait CandleProvider: Send + Sync {
    /// Human-readable name of this provider
    fn name(&self) -> &str;

    /// Fetch candles with timestamps in `[range.start, range.end)`, ascending.
    ///
    /// An empty vector means the provider has no bars for the window
    /// (holidays, pre-listing dates) and is not an error.
    fn fetch(
        &self,
        symbol: &str,
        interval: Interval,
        range: DateRange,
    ) -> impl Future<Output = Result<Vec<Candle>, ProviderError>> + Send;
}
