//! Core data types used across the downloader

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for candle data
#[derive(Debug, Error, PartialEq)]
pub enum CandleValidationError {
    #[error("{field} ({value}) must be finite")]
    NotFinite { field: &'static str, value: f64 },

    #[error("{field} ({value}) must be >= 0")]
    Negative { field: &'static str, value: f64 },

    #[error("high ({high}) must be >= low ({low})")]
    HighLessThanLow { high: f64, low: f64 },
}

/// OHLCV candlestick data
///
/// The timestamp keeps the exchange offset reported by the provider
/// (`+05:30` for NSE). Equality and ordering of timestamps are by instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<FixedOffset>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adj_close: Option<f64>,
    pub volume: f64,
}

impl Candle {
    /// Create a new candle with validation
    pub fn new(
        timestamp: DateTime<FixedOffset>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        adj_close: Option<f64>,
        volume: f64,
    ) -> Result<Self, CandleValidationError> {
        let candle = Self {
            timestamp,
            open,
            high,
            low,
            close,
            adj_close,
            volume,
        };
        candle.validate()?;
        Ok(candle)
    }

    /// Validate the candle data
    pub fn validate(&self) -> Result<(), CandleValidationError> {
        let mut fields = vec![
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
            ("volume", self.volume),
        ];
        if let Some(adj) = self.adj_close {
            fields.push(("adj_close", adj));
        }

        for (field, value) in fields {
            if !value.is_finite() {
                return Err(CandleValidationError::NotFinite { field, value });
            }
            if value < 0.0 {
                return Err(CandleValidationError::Negative { field, value });
            }
        }

        if self.high < self.low {
            return Err(CandleValidationError::HighLessThanLow {
                high: self.high,
                low: self.low,
            });
        }

        Ok(())
    }

    /// Merge key: the timestamp as a UTC instant
    pub fn key(&self) -> DateTime<Utc> {
        self.timestamp.with_timezone(&Utc)
    }
}

/// Provider ticker symbol, e.g. `MASTEK.NS`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Symbol(s.into())
    }

    /// Normalise a raw ticker to the provider convention: trimmed, upper-cased,
    /// with `suffix` appended unless the ticker already carries an exchange suffix.
    ///
    /// ```
    /// use nse_ohlcv::Symbol;
    ///
    /// assert_eq!(Symbol::normalize(" mastek ", ".NS").as_str(), "MASTEK.NS");
    /// assert_eq!(Symbol::normalize("INFY.NS", ".NS").as_str(), "INFY.NS");
    /// assert_eq!(Symbol::normalize("MASTEK.BO", ".NS").as_str(), "MASTEK.BO");
    /// ```
    pub fn normalize(raw: &str, suffix: &str) -> Self {
        let upper = raw.trim().to_uppercase();
        if suffix.is_empty() || upper.contains('.') {
            Symbol(upper)
        } else {
            Symbol(format!("{}{}", upper, suffix.to_uppercase()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Ticker without the exchange suffix (`MASTEK.NS` -> `MASTEK`)
    pub fn base(&self) -> &str {
        self.0.split('.').next().unwrap_or(&self.0)
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Category of intervals sharing one maximum retrievable span per request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntervalClass {
    Minute,
    Hour,
    Day,
}

/// Largest span a single minute-scale request may cover
pub const MINUTE_MAX_SPAN_DAYS: i64 = 60;

/// Largest span a single hour-scale request may cover
pub const HOUR_MAX_SPAN_DAYS: i64 = 730;

impl IntervalClass {
    /// Maximum span of one provider request, `None` when unbounded
    pub fn max_span(&self) -> Option<Duration> {
        match self {
            IntervalClass::Minute => Some(Duration::days(MINUTE_MAX_SPAN_DAYS)),
            IntervalClass::Hour => Some(Duration::days(HOUR_MAX_SPAN_DAYS)),
            IntervalClass::Day => None,
        }
    }

    /// How far back the provider serves this class, `None` when unlimited
    pub fn max_lookback(&self) -> Option<Duration> {
        self.max_span()
    }
}

/// Candle intervals accepted by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "2m")]
    TwoMinutes,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    ThirtyMinutes,
    #[serde(rename = "60m")]
    SixtyMinutes,
    #[serde(rename = "90m")]
    NinetyMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "1d")]
    OneDay,
    #[serde(rename = "5d")]
    FiveDays,
    #[serde(rename = "1wk")]
    OneWeek,
    #[serde(rename = "1mo")]
    OneMonth,
    #[serde(rename = "3mo")]
    ThreeMonths,
}

impl Interval {
    pub const ALL: [Interval; 13] = [
        Interval::OneMinute,
        Interval::TwoMinutes,
        Interval::FiveMinutes,
        Interval::FifteenMinutes,
        Interval::ThirtyMinutes,
        Interval::SixtyMinutes,
        Interval::NinetyMinutes,
        Interval::OneHour,
        Interval::OneDay,
        Interval::FiveDays,
        Interval::OneWeek,
        Interval::OneMonth,
        Interval::ThreeMonths,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::OneMinute => "1m",
            Interval::TwoMinutes => "2m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::ThirtyMinutes => "30m",
            Interval::SixtyMinutes => "60m",
            Interval::NinetyMinutes => "90m",
            Interval::OneHour => "1h",
            Interval::OneDay => "1d",
            Interval::FiveDays => "5d",
            Interval::OneWeek => "1wk",
            Interval::OneMonth => "1mo",
            Interval::ThreeMonths => "3mo",
        }
    }

    pub fn class(&self) -> IntervalClass {
        match self {
            Interval::OneMinute
            | Interval::TwoMinutes
            | Interval::FiveMinutes
            | Interval::FifteenMinutes
            | Interval::ThirtyMinutes => IntervalClass::Minute,
            Interval::SixtyMinutes | Interval::NinetyMinutes | Interval::OneHour => {
                IntervalClass::Hour
            }
            Interval::OneDay
            | Interval::FiveDays
            | Interval::OneWeek
            | Interval::OneMonth
            | Interval::ThreeMonths => IntervalClass::Day,
        }
    }
}

impl std::str::FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Interval::ALL
            .iter()
            .copied()
            .find(|i| i.as_str() == wanted)
            .ok_or_else(|| {
                format!(
                    "Unknown interval: {}. Use one of: {}",
                    s,
                    Interval::ALL.map(|i| i.as_str()).join(", ")
                )
            })
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Half-open range of instants `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Calendar-date range covering `start` through `end` inclusive, in UTC.
    pub fn from_dates(start: NaiveDate, end: NaiveDate) -> Self {
        let start = start.and_time(chrono::NaiveTime::MIN).and_utc();
        let end = (end + Duration::days(1))
            .and_time(chrono::NaiveTime::MIN)
            .and_utc();
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn span(&self) -> Duration {
        if self.is_empty() {
            Duration::zero()
        } else {
            self.end - self.start
        }
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} -> {}",
            self.start.format("%Y-%m-%d %H:%M"),
            self.end.format("%Y-%m-%d %H:%M")
        )
    }
}

/// How the merger treats an existing dataset file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// Fetch only the delta past the last stored candle and merge it in
    Incremental,
    /// Discard the stored candles and replace them with a fresh download
    FullRefresh,
}

impl std::fmt::Display for MergeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeMode::Incremental => write!(f, "incremental"),
            MergeMode::FullRefresh => write!(f, "full_refresh"),
        }
    }
}
