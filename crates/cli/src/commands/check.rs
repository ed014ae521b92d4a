//! Loads the configuration, builds every component and reports its health.

use crate::wiring::build_engine;
use anyhow::{bail, Result};
use tradeloop_core::AppConfig;

/// # Errors
/// Returns an error if the engine cannot be built or a core component is unhealthy.
pub async fn run_check(config: &AppConfig) -> Result<()> {
    let engine = build_engine(config).await?;

    println!("Exchange:       {:?}", config.exchange);
    let symbols: Vec<String> = config.symbols.iter().map(ToString::to_string).collect();
    println!("Symbols:        {}", symbols.join(", "));
    println!("Max positions:  {}", config.max_positions);
    println!("Initial stop:   {}%", config.initial_sl_pct * 100.0);
    println!("Trailing mode:  {:?}", config.trailing_mode);
    println!();

    for (name, status) in engine.component_health().await {
        let mark = if status.ok { "OK  " } else { "FAIL" };
        match status.error {
            Some(error) => println!("[{mark}] {name:<24} {error}"),
            None => println!("[{mark}] {name}"),
        }
    }

    let health = engine.health().await;
    if let Some(error) = health.error {
        bail!("Health check failed: {error}");
    }
    println!("\nAll core components healthy");
    Ok(())
}
