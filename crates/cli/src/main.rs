use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tradeloop_core::config_loader::DEFAULT_CONFIG_PATH;
use tradeloop_core::ConfigLoader;

mod commands;
mod wiring;

use commands::{DecisionsArgs, RunArgs, TickArgs};

#[derive(Parser)]
#[command(name = "tradeloop")]
#[command(about = "Signal-driven decision loop with risk gate and trailing stops", long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Optional log file path (logs to file instead of stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the decision loop, the trailing loop and the web API until Ctrl+C
    Run(RunArgs),
    /// Run one decision cycle and print its report
    Cycle,
    /// Run one trailing stop tick and print the result
    Tick(TickArgs),
    /// Print the most recent ledger entries
    Decisions(DecisionsArgs),
    /// Load config, build the venue adapter and print component health
    Check,
}

/// `RUST_LOG` first, then `LOG_LEVEL`, then `info`.
fn env_filter() -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    std::env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn init_logging(log_file: Option<&PathBuf>) -> anyhow::Result<()> {
    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.as_ref())?;

    let config = ConfigLoader::load_from(&cli.config)?;
    tracing::debug!(config = %cli.config.display(), "Configuration loaded");

    match cli.command {
        Commands::Run(args) => commands::run_loop(&config, args).await?,
        Commands::Cycle => commands::run_cycle(&config).await?,
        Commands::Tick(args) => commands::run_tick(&config, args).await?,
        Commands::Decisions(args) => commands::run_decisions(&config, args).await?,
        Commands::Check => commands::run_check(&config).await?,
    }

    Ok(())
}
