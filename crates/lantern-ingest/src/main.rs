//! Lantern ingestion - Main entry point

use std::io::Read;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lantern_common::cancel::CancellationToken;
use lantern_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use tokio::signal;
use tracing::{error, info, warn};

use lantern_ingest::capability::{CapabilityReceiver, EndpointPersister};
use lantern_ingest::chpl::{ChplClient, ProductIngestor, ProductPersister};
use lantern_ingest::store::{EndpointStore, MemoryStore, PgStore, ProductStore};
use lantern_ingest::{
    db, ingest_batch, BatchCanceled, BatchOptions, BatchReport, CancellableEndpointStore,
    CancellableProductStore, Config, IngestError,
};

#[derive(Parser, Debug)]
#[command(name = "lantern-ingest", version, about)]
struct Cli {
    /// Debug logging on the console
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use an in-memory store instead of Postgres
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch the CHPL product list and reconcile it into the store
    Products,

    /// Persist a stream of capability messages
    Capability {
        /// JSON file holding concatenated messages, or `-` for stdin
        #[arg(short, long, default_value = "-")]
        input: String,
    },

    /// Apply database migrations
    Migrate,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::builder()
            .level(LogLevel::Debug)
            .output(LogOutput::Console)
            .log_file_prefix("lantern-ingest")
            .filter_directives("lantern_ingest=debug,lantern_common=debug,sqlx=warn")
            .build()
    } else {
        // Environment variables take precedence over the quiet defaults
        LogConfig::from_env().unwrap_or_else(|_| {
            LogConfig::builder()
                .level(LogLevel::Info)
                .output(LogOutput::Console)
                .log_file_prefix("lantern-ingest")
                .build()
        })
    };
    let _guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {e:#}");
            None
        },
    };

    if let Err(e) = run(&cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let config = Config::load()?;
    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    match &cli.command {
        Commands::Migrate => {
            let pool = db::create_pool(&config.database).await?;
            db::run_migrations(&pool).await?;
            Ok(())
        },
        Commands::Products => {
            let store: Arc<dyn ProductStore> = if cli.dry_run {
                Arc::new(MemoryStore::new())
            } else {
                Arc::new(connect(&config).await?)
            };
            let ingestor = ProductIngestor::new(
                ChplClient::new(&config.registry)?,
                ProductPersister::new(CancellableProductStore::new(store)),
                BatchOptions::from(&config.ingest),
            );
            match ingestor.run(&cancel).await {
                Ok(report) => finish("products", Ok(report)),
                Err(IngestError::Canceled(canceled)) => finish("products", Err(*canceled)),
                Err(e) => Err(e.into()),
            }
        },
        Commands::Capability { input } => {
            let store: Arc<dyn EndpointStore> = if cli.dry_run {
                Arc::new(MemoryStore::new())
            } else {
                Arc::new(connect(&config).await?)
            };
            let payloads = read_payloads(input)?;
            info!(count = payloads.len(), "Read capability messages");

            let persister = EndpointPersister::new(CapabilityReceiver::new(
                CancellableEndpointStore::new(store),
            ));
            let outcome = ingest_batch(
                &persister,
                &payloads,
                &cancel,
                &BatchOptions::from(&config.ingest),
            )
            .await;
            finish("capability", outcome)
        },
    }
}

async fn connect(config: &Config) -> Result<PgStore> {
    let pool = db::create_pool(&config.database).await?;
    db::health_check(&pool).await?;
    Ok(PgStore::new(pool))
}

/// Split the input into one raw payload per top-level JSON value. A value
/// that is not valid JSON ends the stream.
fn read_payloads(input: &str) -> Result<Vec<Vec<u8>>> {
    let mut bytes = Vec::new();
    if input == "-" {
        std::io::stdin().read_to_end(&mut bytes).context("reading stdin")?;
    } else {
        let path = PathBuf::from(input);
        bytes = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
    }

    let mut payloads = Vec::new();
    for value in serde_json::Deserializer::from_slice(&bytes).into_iter::<serde_json::Value>() {
        match value {
            Ok(value) => payloads.push(serde_json::to_vec(&value)?),
            Err(e) => {
                warn!(error = %e, parsed = payloads.len(), "Stopped reading malformed input");
                break;
            },
        }
    }
    Ok(payloads)
}

/// Log the report of a finished or cut-short batch
fn finish(feed: &str, outcome: std::result::Result<BatchReport, BatchCanceled>) -> Result<()> {
    match outcome {
        Ok(report) => {
            log_report(feed, &report);
            Ok(())
        },
        Err(canceled) => {
            log_report(feed, &canceled.report);
            if let Some(record) = canceled.interrupted.as_ref().filter(|r| r.may_be_written) {
                warn!(
                    feed,
                    index = record.index,
                    record = %record.record,
                    "Write completed after cancellation and is not counted in the report"
                );
            }
            Err(IngestError::from(canceled).into())
        },
    }
}

fn log_report(feed: &str, report: &BatchReport) {
    info!(
        feed,
        total = report.total,
        inserted = report.inserted,
        updated = report.updated,
        unchanged = report.unchanged,
        refreshed = report.refreshed,
        skipped = report.skipped.len(),
        "Ingestion finished"
    );
}

async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    warn!("Shutdown signal received, cancelling in-flight ingestion");
    cancel.cancel();
}
