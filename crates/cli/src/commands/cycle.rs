//! One decision cycle, then exit.

use super::ctrl_c_token;
use crate::wiring::build_engine;
use anyhow::Result;
use tradeloop_core::AppConfig;

/// Runs a single cycle and prints its report as JSON.
///
/// # Errors
/// Returns an error if the engine cannot be built or the report cannot be printed.
pub async fn run_cycle(config: &AppConfig) -> Result<()> {
    let engine = build_engine(config).await?;
    let report = engine.run_cycle(&ctrl_c_token()).await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
