//! Prints the tail of the decision ledger.

use anyhow::Result;
use clap::Args;
use tradeloop_core::AppConfig;
use tradeloop_data::DecisionLedger;

#[derive(Args, Debug, Clone)]
pub struct DecisionsArgs {
    /// Number of records to show, newest first
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Print full records as JSON
    #[arg(long)]
    pub json: bool,
}

/// # Errors
/// Returns an error if JSON output cannot be produced.
pub async fn run_decisions(config: &AppConfig, args: DecisionsArgs) -> Result<()> {
    let ledger = DecisionLedger::with_file(&config.ledger_path, config.ledger_capacity);
    let records = ledger.recent(args.limit).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No decisions in {}", config.ledger_path.display());
        return Ok(());
    }

    println!(
        "{:<12} {:<8} {:<6} {:<6} {:>6}  REASON",
        "TS", "SYMBOL", "ACTION", "SIDE", "SIZE%"
    );
    for record in &records {
        let side = record
            .decision
            .side()
            .map_or_else(|| "-".to_string(), |side| side.to_string());
        println!(
            "{:<12} {:<8} {:<6} {:<6} {:>6.1}  {}",
            record.ts,
            record.symbol,
            record.decision.action(),
            side,
            record.decision.size_pct_balance(),
            record.decision.reason()
        );
    }
    Ok(())
}
