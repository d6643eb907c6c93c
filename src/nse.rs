//! NSE equity list
//!
//! Downloads the exchange's `EQUITY_L.csv`, keeps the wanted series (`EQ` by
//! default) and turns the rows into provider tickers. The archive host moves
//! around, so several mirrors are tried in order.

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::Symbol;

/// Mirrors of the equity list, tried in order
pub const NSE_EQUITY_URLS: [&str; 3] = [
    "https://nsearchives.nseindia.com/content/equities/EQUITY_L.csv",
    "https://archives.nseindia.com/content/equities/EQUITY_L.csv",
    "https://www1.nseindia.com/content/equities/EQUITY_L.csv",
];

pub const DEFAULT_SERIES: &str = "EQ";

/// Small embedded excerpt of `EQUITY_L.csv`, for running without network access
pub const OFFLINE_SAMPLE: &str = "\
SYMBOL,NAME OF COMPANY, SERIES, DATE OF LISTING, PAID UP VALUE, MARKET LOT, ISIN NUMBER, FACE VALUE
MASTEK,Mastek Limited,EQ,23-APR-1993,5,1,INE759A01021,5
RELIANCE,Reliance Industries Limited,EQ,29-NOV-1995,10,1,INE002A01018,10
INFY,Infosys Limited,EQ,08-FEB-1995,5,1,INE009A01021,5
TCS,Tata Consultancy Services Limited,EQ,25-AUG-2004,1,1,INE467B01029,1
HDFCBANK,HDFC Bank Limited,EQ,08-NOV-1995,1,1,INE040A01034,1
";

/// One row of the equity list
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EquityEntry {
    #[serde(rename = "SYMBOL")]
    pub symbol: String,
    #[serde(rename = "SERIES", default)]
    pub series: String,
}

/// Parse the CSV payload. Header names are trimmed, since NSE publishes them with leading spaces.
pub fn parse_equity_list(payload: &str) -> Result<Vec<EquityEntry>> {
    let payload = payload.trim_start_matches('\u{feff}');
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(payload.as_bytes());

    let mut entries = Vec::new();
    for (idx, row) in reader.deserialize::<EquityEntry>().enumerate() {
        let entry = row.with_context(|| format!("Failed to parse equity list row {}", idx + 2))?;
        if entry.symbol.is_empty() {
            continue;
        }
        entries.push(entry);
    }
    Ok(entries)
}

/// Parse a comma-separated series filter such as `"EQ,BE"`
pub fn parse_series(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Keep entries of the allowed series and convert them to tickers
pub fn filter_series(entries: &[EquityEntry], allowed: &HashSet<String>, suffix: &str) -> Vec<Symbol> {
    entries
        .iter()
        .filter(|e| allowed.contains(&e.series.to_uppercase()))
        .map(|e| Symbol::normalize(&e.symbol, suffix))
        .collect()
}

/// HTTP client for the NSE archives
#[derive(Debug, Clone)]
pub struct NseClient {
    client: Client,
    urls: Vec<String>,
}

impl NseClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_urls(timeout, NSE_EQUITY_URLS.iter().map(|u| u.to_string()).collect())
    }

    pub fn with_urls(timeout: Duration, urls: Vec<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0")
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client, urls })
    }

    /// Download the equity list from the first mirror that answers
    pub async fn fetch_equity_list(&self) -> Result<String> {
        let mut last_error = anyhow!("no NSE endpoints configured");
        for url in &self.urls {
            debug!("Fetching {}", url);
            match self.fetch_one(url).await {
                Ok(body) => {
                    info!("Downloaded equity list from {}", url);
                    return Ok(body);
                }
                Err(e) => {
                    warn!("{} failed: {:#}", url, e);
                    last_error = e;
                }
            }
        }
        Err(last_error.context("All NSE endpoints failed"))
    }

    async fn fetch_one(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request to NSE")?;

        if !response.status().is_success() {
            anyhow::bail!("NSE returned HTTP {}", response.status());
        }
        response.text().await.context("Failed to read NSE response")
    }
}
