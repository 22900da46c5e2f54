//! MDP Ingest - Market data ETL tool

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mdp_common::logging::{init_logging, LogConfig};
use mdp_ingest::config::{parse_symbols, PipelineConfig};
use mdp_ingest::fetch::{HttpSource, RateLimitedFetcher, RateLimiter};
use mdp_ingest::load::{PgInsiderLoader, PgMoversLoader, PgTarget};
use mdp_ingest::pipeline::{Dataset, InsiderDataset, MoversDataset, Pipeline};
use mdp_ingest::snapshot::SnapshotWriter;
use mdp_ingest::RunReport;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

#[derive(Parser, Debug)]
#[command(name = "mdp-ingest")]
#[command(author, version, about = "Market data ETL tool")]
struct Cli {
    /// Dataset to run
    #[command(subcommand)]
    dataset: DatasetCommand,

    /// Minimum seconds between API calls (overrides RATE_LIMIT_DELAY_SECS)
    #[arg(long, global = true)]
    delay_secs: Option<u64>,

    /// Directory for CSV backups (overrides SNAPSHOT_DIR)
    #[arg(long, global = true)]
    snapshot_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum DatasetCommand {
    /// Insider transactions for a list of symbols
    Insider {
        /// Comma separated symbols (overrides SYMBOLS)
        #[arg(long)]
        symbols: Option<String>,

        /// Keep only transactions from the last N days (overrides CUTOFF_DAYS)
        #[arg(long, conflicts_with = "no_window")]
        window_days: Option<u32>,

        /// Keep transactions of any age
        #[arg(long)]
        no_window: bool,
    },

    /// Top gainers, losers and most actively traded tickers
    Movers,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let log_config = match LogConfig::default()
        .with_level(log_level)
        .with_file_prefix("mdp-ingest")
        .merge_env()
    {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid logging configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(cli).await {
        Ok(report) => finish(&report, &mut std::io::stdout().lock()),
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Pipeline could not start");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<RunReport> {
    let mut config = PipelineConfig::from_env().context("Failed to load configuration")?;
    apply_overrides(&mut config, &cli);
    info!(
        database = ?config.database.target,
        delay_secs = config.rate_limit_delay().as_secs(),
        snapshot_dir = %config.snapshot_dir.display(),
        "Configuration loaded"
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            on_signal.cancel();
        }
    });

    let limiter = RateLimiter::new(config.rate_limit_delay());
    let target = PgTarget::from_config(&config.database)?;
    let writer = SnapshotWriter::new(&config.snapshot_dir);

    let report = match cli.dataset {
        DatasetCommand::Insider { .. } => {
            let source = http_source(&config, config.api.insider_key()?)?;
            let dataset = InsiderDataset::new(config.symbols.clone(), config.window_days);
            log_start(&dataset);
            Pipeline::new(
                RateLimitedFetcher::new(source, limiter),
                dataset,
                Box::new(PgInsiderLoader::new(target)),
                writer,
            )
            .run(&cancel)
            .await
        }
        DatasetCommand::Movers => {
            let source = http_source(&config, config.api.movers_key()?)?;
            log_start(&MoversDataset);
            Pipeline::new(
                RateLimitedFetcher::new(source, limiter),
                MoversDataset,
                Box::new(PgMoversLoader::new(target)),
                writer,
            )
            .run(&cancel)
            .await
        }
    };

    Ok(report)
}

/// Print the phase report regardless of log level or log output, and map
/// the run outcome to the exit code
fn finish(report: &RunReport, out: &mut impl Write) -> ExitCode {
    if let Err(e) = writeln!(out, "{report}").and_then(|()| out.flush()) {
        warn!(error = %e, "Failed to print run report");
    }
    info!(
        dataset = report.dataset,
        state = %report.state,
        processed = report.processed,
        "Run finished"
    );

    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn apply_overrides(config: &mut PipelineConfig, cli: &Cli) {
    if let Some(secs) = cli.delay_secs {
        config.api.rate_limit_delay = Duration::from_secs(secs);
    }
    if let Some(dir) = &cli.snapshot_dir {
        config.snapshot_dir = dir.clone();
    }
    if let DatasetCommand::Insider {
        symbols,
        window_days,
        no_window,
    } = &cli.dataset
    {
        if let Some(list) = symbols {
            config.symbols = parse_symbols(list);
        }
        if *no_window {
            config.window_days = None;
        } else if let Some(days) = window_days {
            config.window_days = Some(*days);
        }
    }
}

fn http_source(config: &PipelineConfig, api_key: &str) -> Result<HttpSource> {
    HttpSource::new(&config.api.base_url, api_key, config.api.timeout)
        .context("Failed to build HTTP client")
}

fn log_start<D: Dataset>(dataset: &D) {
    let units: Vec<String> = dataset.work_units().iter().map(ToString::to_string).collect();
    info!(dataset = dataset.name(), units = ?units, "Starting pipeline");
}
