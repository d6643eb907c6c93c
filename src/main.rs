//! NSE OHLCV downloader - main entry point
//!
//! This binary provides three subcommands:
//! - download: Fetch (or incrementally update) one symbol's dataset
//! - bulk: Refresh hourly and daily datasets for a whole ticker list
//! - symbols: Download the NSE equity list as a ticker file

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use nse_ohlcv::AppConfig;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "nse-ohlcv")]
#[command(about = "Incremental OHLCV downloader for NSE equities", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only print errors to the console
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Path to a JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Do not write a log file under logs/
    #[arg(long, global = true)]
    no_log_file: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Download or incrementally update OHLCV data for one symbol
    Download(commands::download::DownloadArgs),

    /// Refresh datasets for every ticker in a list, in parallel
    Bulk(commands::bulk::BulkArgs),

    /// Download the NSE equity list and write a ticker file
    Symbols(commands::symbols::SymbolsArgs),
}

/// Flags every subcommand shares
#[derive(Debug, Clone)]
pub struct GlobalOptions {
    pub verbose: bool,
    pub quiet: bool,
    pub config: Option<PathBuf>,
    pub no_log_file: bool,
}

fn setup_logging(options: &GlobalOptions, log_name: &str) -> Result<()> {
    // Set log level - filter out noisy external crates
    let level = if options.verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let console_level = if options.quiet {
        LevelFilter::ERROR
    } else {
        LevelFilter::TRACE
    };
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(console_level);

    // File layer - same format but without ANSI colors
    let log_path = if options.no_log_file {
        None
    } else {
        std::fs::create_dir_all("logs")?;
        Some(PathBuf::from("logs").join(format!(
            "{}_{}.log",
            log_name,
            chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
        )))
    };
    let file_layer = log_path.as_ref().and_then(|path| {
        let file_name = path.file_name()?;
        let file_appender = tracing_appender::rolling::never("logs", file_name);
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(file_appender)
                .with_target(true)
                .with_line_number(true)
                .with_file(true)
                .with_ansi(false),
        )
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    debug!("Logging initialized");
    if let Some(path) = log_path {
        info!("Log file: {}", path.display());
    }

    Ok(())
}

/// One log file per invocation; download children are named after symbol and interval
fn log_name(command: &Commands) -> String {
    match command {
        Commands::Download(args) => format!(
            "download_{}_{}",
            args.symbol.to_uppercase().replace('.', "_"),
            args.interval
        ),
        Commands::Bulk(_) => "bulk".to_string(),
        Commands::Symbols(_) => "symbols".to_string(),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenv::dotenv().ok();

    let options = GlobalOptions {
        verbose: cli.verbose,
        quiet: cli.quiet,
        config: cli.config,
        no_log_file: cli.no_log_file,
    };

    let log_file_name = log_name(&cli.command);
    setup_logging(&options, &log_file_name)?;

    let config = AppConfig::load(options.config.as_deref())?;

    match cli.command {
        Commands::Download(args) => commands::download::run(args, &config),
        Commands::Bulk(args) => commands::bulk::run(args, &config, &options),
        Commands::Symbols(args) => commands::symbols::run(args, &config),
    }
}
