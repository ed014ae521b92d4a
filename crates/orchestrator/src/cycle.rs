//! Per-cycle status published after every decision cycle.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tradeloop_core::{Action, Symbol};
use tradeloop_risk::TrailingStatus;
use uuid::Uuid;

/// What happened to one symbol during a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SymbolOutcome {
    /// A decision was committed to the ledger and handed to the risk gate.
    Decided {
        action: Action,
        executed: bool,
        reason: String,
    },
    /// The symbol was dropped for this cycle before a decision was committed.
    Skipped { reason: String },
    /// Cancellation arrived before the decision was committed.
    Cancelled,
}

impl SymbolOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn is_decided(&self) -> bool {
        matches!(self, Self::Decided { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolReport {
    pub symbol: Symbol,
    #[serde(flatten)]
    pub outcome: SymbolOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// `None` when the equity read failed and 0 was used.
    pub equity: Option<Decimal>,
    /// `None` when the position snapshot could not be read.
    pub open_positions: Option<usize>,
    pub symbols: Vec<SymbolReport>,
    /// Pull-mode trailing tick results; empty when the cycle does not tick.
    pub trailing: Vec<TrailingStatus>,
    pub cancelled: bool,
}

impl CycleReport {
    #[must_use]
    pub fn outcome_for(&self, symbol: &Symbol) -> Option<&SymbolOutcome> {
        self.symbols
            .iter()
            .find(|report| &report.symbol == symbol)
            .map(|report| &report.outcome)
    }

    /// Number of symbols whose decision reached the adapter and was executed.
    #[must_use]
    pub fn executed_count(&self) -> usize {
        self.symbols
            .iter()
            .filter(|report| matches!(report.outcome, SymbolOutcome::Decided { executed: true, .. }))
            .count()
    }

    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}
