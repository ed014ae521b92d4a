//! One trailing stop tick, then exit.

use crate::wiring::build_engine;
use anyhow::Result;
use clap::Args;
use tradeloop_core::{AppConfig, Symbol};

#[derive(Args, Debug, Clone)]
pub struct TickArgs {
    /// Tick only this symbol (e.g., "BTC"). Ticks every armed symbol if omitted.
    #[arg(long)]
    pub symbol: Option<String>,
}

/// Runs one tick and prints the resulting statuses as JSON.
///
/// # Errors
/// Returns an error if the engine cannot be built.
pub async fn run_tick(config: &AppConfig, args: TickArgs) -> Result<()> {
    let engine = build_engine(config).await?;
    let statuses = match args.symbol {
        Some(symbol) => vec![engine.trailing().tick(&Symbol::new(symbol)).await],
        None => engine.trailing().tick_all().await,
    };

    println!("{}", serde_json::to_string_pretty(&statuses)?);
    Ok(())
}
