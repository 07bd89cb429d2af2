use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use history_rust::{Config, HistoryService, StorageBackend};
use history_storage::Database;
use history_types::{Timestamp, Url};

#[derive(Parser)]
#[command(name = "history-rust")]
#[command(about = "Browsing history expiration and archival", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory, overrides the configuration file
    #[arg(short, long, global = true)]
    datadir: Option<PathBuf>,

    /// Log level or filter directive, overrides the configuration file
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    InitConfig {
        path: PathBuf,
    },

    #[command(flatten)]
    Store(StoreCommand),
}

/// Commands that open the history stores
#[derive(Subcommand)]
enum StoreCommand {
    /// Run background archiving until interrupted
    Run,

    /// Archive or delete everything older than the given age
    ArchiveBefore {
        /// Age in days
        #[arg(long)]
        days: u64,
    },

    /// Delete URLs and all of their visits
    DeleteUrl {
        #[arg(required = true)]
        urls: Vec<Url>,
    },

    /// Delete the visits in a time range
    ExpireRange {
        /// Start of the range, RFC 3339 or microseconds
        #[arg(long)]
        begin: Timestamp,

        /// End of the range (exclusive); unbounded when omitted
        #[arg(long)]
        end: Option<Timestamp>,

        /// Only touch these URLs
        #[arg(long = "url")]
        urls: Vec<Url>,
    },

    /// Show store sizes and expiry counters
    Inspect {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(datadir) = cli.datadir.clone() {
        config.storage.datadir = datadir;
    }
    if let Some(level) = cli.log_level.clone() {
        config.log.level = level;
    }

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level));
    if config.log.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let command = match cli.command {
        Commands::InitConfig { path } => {
            config.to_file(&path)?;
            info!("Wrote configuration to {}", path.display());
            return Ok(());
        }
        Commands::Store(command) => command,
    };

    match config.storage.backend {
        StorageBackend::Memory => {
            info!("Using in-memory stores; changes are discarded on exit");
            execute(HistoryService::in_memory(config)?, command).await
        }
        StorageBackend::Rocksdb => run_rocksdb(config, command).await,
    }
}

#[cfg(feature = "rocksdb")]
async fn run_rocksdb(config: Config, command: StoreCommand) -> Result<()> {
    execute(HistoryService::open(config)?, command).await
}

#[cfg(not(feature = "rocksdb"))]
async fn run_rocksdb(_config: Config, _command: StoreCommand) -> Result<()> {
    anyhow::bail!("this build has no rocksdb support; set storage.backend = \"memory\"")
}

async fn execute<D: Database + 'static>(service: HistoryService<D>, command: StoreCommand) -> Result<()> {
    match command {
        StoreCommand::Run => {
            info!(
                "history-rust v{} archiving history older than {} days",
                history_rust::VERSION,
                service.config().expiry.threshold_days
            );
            service.start();

            // Wait for shutdown signal
            tokio::signal::ctrl_c().await?;
            info!("Shutting down...");
            service.stop();
        }

        StoreCommand::ArchiveBefore { days } => {
            let end_time = service.archive_older_than(days)?;
            info!("Archived history up to {}", end_time);
        }

        StoreCommand::DeleteUrl { urls } => {
            service
                .manager()
                .delete_urls(&urls)
                .context("Failed to delete URLs")?;
            info!("Deleted {} URL(s)", urls.len());
        }

        StoreCommand::ExpireRange { begin, end, urls } => {
            let restrict: BTreeSet<Url> = urls.into_iter().collect();
            service
                .manager()
                .expire_history_between(&restrict, begin, end.unwrap_or_default())
                .context("Failed to expire history")?;
            info!("Expired visits from {}", begin);
        }

        StoreCommand::Inspect { json } => {
            let report = service.inspect()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("urls:                       {}", report.urls);
                println!("visits:                     {}", report.visits);
                if let (Some(urls), Some(visits)) = (report.archived_urls, report.archived_visits) {
                    println!("archived urls:              {}", urls);
                    println!("archived visits:            {}", visits);
                }
                if let Some(favicons) = report.favicons {
                    println!("favicons:                   {}", favicons);
                }
                println!("early expiration threshold: {}", report.early_expiration_threshold);
                print!("{}", service.metrics_text()?);
            }
        }
    }

    Ok(())
}
