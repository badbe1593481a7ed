use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};

use cmd::commands;
use cmd::config::{CONFIG_ENV, load_config};

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Relocate, merge and repartition archived objects",
    long_about = None
)]
struct Cli {
    /// Configuration file (defaults to $REORG_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a source prefix and run the resulting tasks locally
    Scan {
        /// JSON trigger file
        trigger: PathBuf,
        /// Concurrent workers (overrides the config)
        #[arg(short, long)]
        workers: Option<usize>,
    },
    /// Process one migration message
    Migrate {
        /// JSON message file
        message: PathBuf,
    },
    /// Show the ledger rows of a batch
    Status {
        execution_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    diagnostics::init();

    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .ok_or_else(|| anyhow!("No configuration: pass --config or set {}", CONFIG_ENV))?,
    };
    let config = load_config(&config_path)?;

    match &cli.command {
        Commands::Scan { trigger, workers } => {
            commands::scan_command(&config, trigger, *workers).await
        }
        Commands::Migrate { message } => commands::migrate_command(&config, message).await,
        Commands::Status { execution_id } => {
            commands::status_command(&config, execution_id).await
        }
    }
}
