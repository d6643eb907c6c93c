//! Symbols command - download the NSE equity list as a ticker file

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use nse_ohlcv::nse::{filter_series, parse_equity_list, parse_series, NseClient, DEFAULT_SERIES, OFFLINE_SAMPLE};
use nse_ohlcv::tickers::write_tickers;
use nse_ohlcv::AppConfig;

/// Tickers shown by `--dry-run`
const PREVIEW_COUNT: usize = 10;

#[derive(Args, Debug)]
pub struct SymbolsArgs {
    /// Destination of the ticker list
    #[arg(short, long, default_value = "Tickers/nse_symbols_all.csv")]
    pub output: PathBuf,

    /// Comma-separated series codes to keep
    #[arg(long, default_value = DEFAULT_SERIES)]
    pub series: String,

    /// Do not append the exchange suffix
    #[arg(long)]
    pub no_suffix: bool,

    /// Only keep the first N tickers
    #[arg(long)]
    pub limit: Option<usize>,

    /// Parse and preview the tickers without writing the file
    #[arg(long)]
    pub dry_run: bool,

    /// Use a small embedded sample instead of downloading the live list
    #[arg(long)]
    pub offline_sample: bool,

    /// Print how many tickers passed the filter
    #[arg(long)]
    pub show_count: bool,
}

pub fn run(args: SymbolsArgs, config: &AppConfig) -> Result<()> {
    let payload = if args.offline_sample {
        info!("Using the embedded offline sample");
        OFFLINE_SAMPLE.to_string()
    } else {
        let client = NseClient::new(Duration::from_secs(config.provider.timeout_secs))?;
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(client.fetch_equity_list()).context(
            "Unable to download the NSE ticker file; retry with --offline-sample to check the pipeline without network access",
        )?
    };

    let allowed = parse_series(&args.series);
    let suffix = if args.no_suffix { "" } else { config.bulk.suffix.as_str() };
    let entries = parse_equity_list(&payload)?;
    let mut symbols = filter_series(&entries, &allowed, suffix);
    if let Some(limit) = args.limit {
        symbols.truncate(limit);
    }

    if args.show_count {
        let mut series: Vec<_> = allowed.iter().cloned().collect();
        series.sort();
        println!("Discovered {} tickers (series filter: {:?})", symbols.len(), series);
    }

    if args.dry_run {
        let shown = symbols.len().min(PREVIEW_COUNT);
        println!("Previewing tickers:");
        for symbol in &symbols[..shown] {
            println!(" - {}", symbol);
        }
        if args.limit.is_none() && symbols.len() > shown {
            println!("… and {} more", symbols.len() - shown);
        }
        return Ok(());
    }

    write_tickers(&args.output, &symbols)?;
    println!("Saved {} tickers to {}", symbols.len(), args.output.display());
    Ok(())
}
