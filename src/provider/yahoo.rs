//! Yahoo Finance chart API adapter
//!
//! Fetches OHLCV candles from the unofficial v8 chart endpoint. Yahoo has no
//! published contract for this API, so every unexpected shape is reported as
//! [`ProviderError::ResponseFormat`] rather than guessed around.

use chrono::{DateTime, FixedOffset};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::CandleProvider;
use crate::common::{RateLimiter, RateLimiterConfig};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::{Candle, DateRange, Interval};

/// Body excerpt kept in HTTP errors
const MAX_ERROR_BODY: usize = 300;

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: Option<ChartMeta>,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    gmtoffset: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QuoteData {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    adjclose: Vec<Option<f64>>,
}

/// Yahoo Finance candle provider
#[derive(Debug, Clone)]
pub struct YahooProvider {
    client: Client,
    base_url: String,
    rate_limiter: RateLimiter,
    auto_adjust: bool,
}

impl YahooProvider {
    /// Build a provider from config; requests are spaced by `request_delay_ms`
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            rate_limiter: RateLimiter::new(RateLimiterConfig::spaced(Duration::from_millis(
                config.request_delay_ms,
            ))),
            auto_adjust: config.auto_adjust,
        })
    }

    fn chart_url(&self, symbol: &str, interval: Interval, range: DateRange) -> String {
        format!(
            "{}/v8/finance/chart/{}?period1={}&period2={}&interval={}&includeAdjustedClose=true",
            self.base_url,
            symbol,
            range.start.timestamp(),
            range.end.timestamp(),
            interval.as_str()
        )
    }
}

impl CandleProvider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo"
    }

    async fn fetch(
        &self,
        symbol: &str,
        interval: Interval,
        range: DateRange,
    ) -> Result<Vec<Candle>, ProviderError> {
        self.rate_limiter.acquire().await;

        let url = self.chart_url(symbol, interval, range);
        debug!("GET {}", url);

        let response = self.client.get(&url).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(symbol, status, &body));
        }

        let chart: ChartResponse = response.json().await?;
        parse_chart(symbol, range, chart, self.auto_adjust)
    }
}

/// Map a non-2xx response to an error, using Yahoo's error object when present
fn classify_failure(symbol: &str, status: StatusCode, body: &str) -> ProviderError {
    if let Ok(ChartResponse {
        chart: ChartResult {
            error: Some(err), ..
        },
    }) = serde_json::from_str::<ChartResponse>(body)
    {
        return classify_chart_error(symbol, err);
    }

    if status == StatusCode::NOT_FOUND {
        return ProviderError::SymbolNotFound(symbol.to_string());
    }

    ProviderError::Http {
        status: status.as_u16(),
        body: body.chars().take(MAX_ERROR_BODY).collect(),
    }
}

fn classify_chart_error(symbol: &str, err: ChartError) -> ProviderError {
    let description = err.description.to_lowercase();
    if err.code == "Not Found" || description.contains("no data found, symbol may be delisted") {
        ProviderError::SymbolNotFound(symbol.to_string())
    } else if description.contains("data not available")
        || description.contains("must be within the last")
        || description.contains("data doesn't exist")
    {
        ProviderError::RangeNotAvailable(err.description)
    } else {
        ProviderError::ResponseFormat(format!("{}: {}", err.code, err.description))
    }
}

/// Convert a chart payload into validated candles inside `range`.
///
/// With `auto_adjust`, open/high/low/close are scaled by `adjclose / close`
/// so the series is continuous across dividends and splits. Bars without an
/// adjusted close are kept as reported.
fn parse_chart(
    symbol: &str,
    range: DateRange,
    chart: ChartResponse,
    auto_adjust: bool,
) -> Result<Vec<Candle>, ProviderError> {
    let ChartResult { result, error } = chart.chart;
    let data = match (result, error) {
        (_, Some(err)) => return Err(classify_chart_error(symbol, err)),
        (Some(result), None) => result
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ResponseFormat("result array is empty".into()))?,
        (None, None) => {
            return Err(ProviderError::ResponseFormat(
                "empty result with no error".into(),
            ))
        }
    };

    // No timestamps: the window holds no trading sessions
    let Some(timestamps) = data.timestamp else {
        return Ok(Vec::new());
    };

    let offset_secs = data.meta.and_then(|m| m.gmtoffset).unwrap_or(0);
    let offset = FixedOffset::east_opt(offset_secs)
        .ok_or_else(|| ProviderError::ResponseFormat(format!("invalid gmtoffset {offset_secs}")))?;

    let quote = data
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::ResponseFormat("no quote data".into()))?;
    let adj_closes = data
        .indicators
        .adjclose
        .and_then(|v| v.into_iter().next())
        .map(|a| a.adjclose);

    let mut candles = Vec::with_capacity(timestamps.len());
    for (i, &ts) in timestamps.iter().enumerate() {
        let timestamp = DateTime::from_timestamp(ts, 0)
            .ok_or_else(|| ProviderError::ResponseFormat(format!("invalid timestamp: {ts}")))?
            .with_timezone(&offset);
        let key = timestamp.with_timezone(&chrono::Utc);
        if key < range.start || key >= range.end {
            continue;
        }

        let field = |v: &Vec<Option<f64>>| v.get(i).copied().flatten();
        let (Some(open), Some(high), Some(low), Some(close)) = (
            field(&quote.open),
            field(&quote.high),
            field(&quote.low),
            field(&quote.close),
        ) else {
            // Halted or holiday bar
            continue;
        };
        let volume = field(&quote.volume).unwrap_or(0.0);
        let adj_close = adj_closes.as_ref().and_then(|v| v.get(i).copied().flatten());

        let (open, high, low, close) = match adj_close {
            Some(adj) if auto_adjust && close > 0.0 => {
                let factor = adj / close;
                (open * factor, high * factor, low * factor, adj)
            }
            _ => (open, high, low, close),
        };

        match Candle::new(timestamp, open, high, low, close, adj_close, volume) {
            Ok(candle) => candles.push(candle),
            Err(e) => warn!("{} {}: dropping invalid bar: {}", symbol, timestamp, e),
        }
    }

    candles.sort_by_key(|c| c.key());
    Ok(candles)
}
