//! Pollen Service - command-line entry point
//!
//! Usage:
//!   pollen_service fetch --region tokyo --region osaka --date 2024-03-01
//!   pollen_service prefetch --days 7
//!   pollen_service prefetch-range --start 2024-02-01 --end 2024-02-29
//!   pollen_service refresh
//!   pollen_service daemon
//!
//! Environment:
//!   POLLEN_CONFIG - path to pollen.toml (overridden by --config)
//!   RUST_LOG      - log filter (default: info)

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pollen_service::config::ServiceConfig;
use pollen_service::daemon::{Daemon, DaemonConfig};
use pollen_service::model::DateKey;
use pollen_service::service::PollenService;

#[derive(Parser)]
#[command(name = "pollen_service")]
#[command(version, about = "Pollen and weather cache for Japanese regions", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print region records as JSON
    Fetch {
        /// Region ids (all regions when omitted)
        #[arg(long = "region")]
        regions: Vec<String>,

        /// Restrict output to this region id
        #[arg(long)]
        filter: Option<String>,

        /// Target date, YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Bypass memory and disk caches
        #[arg(long)]
        force: bool,
    },

    /// Warm today and the preceding days
    Prefetch {
        #[arg(long, default_value_t = 1)]
        days: u32,

        #[arg(long)]
        force: bool,
    },

    /// Persist every date in a range to disk
    #[command(name = "prefetch-range")]
    PrefetchRange {
        #[arg(long)]
        start: NaiveDate,

        #[arg(long)]
        end: NaiveDate,

        /// Dates to keep in memory afterwards
        #[arg(long)]
        keep: Vec<NaiveDate>,

        #[arg(long)]
        force: bool,
    },

    /// Re-fetch today and apply disk retention
    Refresh,

    /// Run the warm-up and periodic refresh loop
    Daemon,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = ServiceConfig::load(cli.config.as_deref());

    let service = match PollenService::from_config(config).await {
        Ok(service) => Arc::new(service),
        Err(e) => {
            error!("Initialization failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Fetch {
            regions,
            filter,
            date,
            force,
        } => {
            let records = if regions.is_empty() {
                service.fetch_all(filter.as_deref(), date, force).await
            } else {
                service.fetch_regions(&regions, filter.as_deref(), date, force).await
            };
            match serde_json::to_string_pretty(&records) {
                Ok(json) => println!("{}", json),
                Err(e) => {
                    error!("Failed to serialize region records: {}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
        Commands::Prefetch { days, force } => {
            service.prefetch_history(days, force).await;
        }
        Commands::PrefetchRange {
            start,
            end,
            keep,
            force,
        } => {
            let keep: Vec<DateKey> = keep.into_iter().map(DateKey::new).collect();
            service
                .prefetch_range(DateKey::new(start), DateKey::new(end), &keep, force)
                .await;
        }
        Commands::Refresh => {
            let report = service.refresh_cache(DateKey::today()).await;
            info!(
                "Pruned {} cache files and {} raw directories",
                report.files_removed, report.raw_dirs_removed
            );
        }
        Commands::Daemon => {
            let config = DaemonConfig::from(service.config());
            Daemon::with_config(service, config).run().await;
        }
    }

    ExitCode::SUCCESS
}
