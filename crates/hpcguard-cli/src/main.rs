//! hpcguard — GPU fleet health checks with automatic reboot recovery.
//!
//! # Usage
//!
//! ```text
//! hpcguard run --config hpcguard.toml
//! hpcguard escalate --config hpcguard.toml --results-dir health_results/20250601-0900
//! hpcguard report --results-dir health_results/20250601-0900
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "hpcguard",
    about = "hpcguard: GPU fleet health checks with reboot recovery and incident escalation",
    version,
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check every node, reboot failing ones, report and escalate.
    Run {
        /// Path to the TOML config (defaults apply when omitted).
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Check-run timestamp; also names the result directory.
        /// Defaults to the current UTC time as YYYYMMDD-HHMM.
        #[arg(long)]
        timestamp: Option<String>,
        /// Override coordinator.max_parallel.
        #[arg(long)]
        max_parallel: Option<usize>,
        /// Skip incident escalation for this run.
        #[arg(long)]
        no_escalate: bool,
    },
    /// Re-run escalation over stored result artifacts.
    Escalate {
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Directory holding hpc_check_result_<node>.json files.
        #[arg(long)]
        results_dir: PathBuf,
    },
    /// Re-render the CSV/HTML summaries from stored result artifacts.
    Report {
        #[arg(long)]
        results_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(
                    "info,hpcguard=debug,hpcguard_health=debug,hpcguard_fleet=debug,hpcguard_escalation=debug",
                )),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            timestamp,
            max_parallel,
            no_escalate,
        } => {
            let options = commands::run::RunOptions {
                timestamp,
                max_parallel,
                escalate: !no_escalate,
            };
            commands::run::run(config.as_deref(), options).await
        }
        Commands::Escalate {
            config,
            results_dir,
        } => commands::escalate::escalate(config.as_deref(), &results_dir).await,
        Commands::Report { results_dir } => commands::report::report(&results_dir),
    }
}
