//! Policy checks between a sanitised decision and the execution adapter.
//!
//! The gate never retries trading operations. Checks for an OPEN run in a
//! fixed order: position cap, side, equity. The cap is evaluated against the
//! cycle's snapshot, which is not refreshed between symbols; strict mode also
//! counts opens already executed in the same cycle.

use crate::trailing::TrailingStopEngine;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tradeloop_core::{
    decimal_from_f64, Action, CycleSnapshot, Decision, EventKind, EventLevel, EventLog,
    ExecutionAdapter, ExecutionReport, OpenRequest, Symbol,
};

pub const REASON_HOLD: &str = "hold";
pub const REASON_MAX_POSITIONS: &str = "max positions reached";
pub const REASON_NO_SIDE: &str = "no valid side";
pub const REASON_NO_EQUITY: &str = "no equity";
pub const REASON_OPENED: &str = "opened";
pub const REASON_CLOSED: &str = "closed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskConfig {
    pub max_positions: usize,
    /// Positive fraction forwarded with every open.
    pub initial_sl_pct: Decimal,
    pub strict_position_cap: bool,
}

/// What the gate did with a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateOutcome {
    pub symbol: Symbol,
    pub action: Action,
    pub executed: bool,
    pub reason: String,
    pub size_usd: Option<Decimal>,
    pub report: Option<ExecutionReport>,
}

impl GateOutcome {
    fn skipped(symbol: &Symbol, action: Action, reason: impl Into<String>) -> Self {
        Self {
            symbol: symbol.clone(),
            action,
            executed: false,
            reason: reason.into(),
            size_usd: None,
            report: None,
        }
    }
}

pub struct RiskGate {
    adapter: Arc<dyn ExecutionAdapter>,
    trailing: Arc<TrailingStopEngine>,
    events: Arc<EventLog>,
    config: RiskConfig,
}

impl std::fmt::Debug for RiskGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskGate")
            .field("venue", &self.adapter.venue())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RiskGate {
    #[must_use]
    pub fn new(
        adapter: Arc<dyn ExecutionAdapter>,
        trailing: Arc<TrailingStopEngine>,
        events: Arc<EventLog>,
        config: RiskConfig,
    ) -> Self {
        Self {
            adapter,
            trailing,
            events,
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Applies `decision` for `symbol` against the cycle snapshot.
    pub async fn apply(
        &self,
        symbol: &Symbol,
        decision: &Decision,
        snapshot: &CycleSnapshot,
    ) -> GateOutcome {
        match decision.action() {
            Action::Hold => {
                tracing::info!(symbol = %symbol, reason = %decision.reason(), "HOLD");
                GateOutcome::skipped(symbol, Action::Hold, REASON_HOLD)
            }
            Action::Close => self.close(symbol).await,
            Action::Open => self.open(symbol, decision, snapshot).await,
        }
    }

    async fn open(&self, symbol: &Symbol, decision: &Decision, snapshot: &CycleSnapshot) -> GateOutcome {
        let max = self.config.max_positions;
        let reserved = if self.config.strict_position_cap {
            if !snapshot.try_reserve_open(max) {
                return self.skip_open(symbol, REASON_MAX_POSITIONS);
            }
            true
        } else {
            if snapshot.open_count() >= max {
                return self.skip_open(symbol, REASON_MAX_POSITIONS);
            }
            false
        };
        let release = || {
            if reserved {
                snapshot.release_open();
            }
        };

        let Some(side) = decision.side() else {
            release();
            return self.skip_open(symbol, REASON_NO_SIDE);
        };

        if snapshot.equity <= Decimal::ZERO {
            release();
            return self.skip_open(symbol, REASON_NO_EQUITY);
        }

        let size_usd = match decimal_from_f64(decision.size_pct_balance()) {
            Ok(pct) => snapshot.equity * pct / Decimal::ONE_HUNDRED,
            Err(e) => {
                release();
                return self.skip_open(symbol, format!("invalid size: {e}"));
            }
        };

        let request = OpenRequest {
            symbol: symbol.clone(),
            side,
            size_usd,
            sl_pct: self.config.initial_sl_pct.abs(),
        };

        tracing::info!(
            symbol = %symbol,
            side = %side,
            size_usd = %size_usd.round_dp(2),
            size_pct = decision.size_pct_balance(),
            "OPEN"
        );

        match self.adapter.open_position(&request).await {
            Ok(report) => {
                let armed = if snapshot.positions_for(symbol).is_empty() {
                    self.trailing.rearm(symbol).await
                } else {
                    self.trailing.arm(symbol).await
                };
                if let Err(e) = armed {
                    tracing::error!(symbol = %symbol, error = %e, "Position opened but trailing stop not armed");
                }
                self.events.record(
                    EventKind::PositionOpened,
                    EventLevel::Success,
                    symbol.as_str(),
                    format!("{side} ${} ({}%)", size_usd.round_dp(2), decision.size_pct_balance()),
                );
                GateOutcome {
                    symbol: symbol.clone(),
                    action: Action::Open,
                    executed: true,
                    reason: REASON_OPENED.to_string(),
                    size_usd: Some(size_usd),
                    report: Some(report),
                }
            }
            Err(e) => {
                release();
                tracing::error!(symbol = %symbol, error = %e, "OPEN failed");
                self.events.record(
                    EventKind::Failure,
                    EventLevel::Error,
                    symbol.as_str(),
                    format!("open failed: {e}"),
                );
                let mut outcome =
                    GateOutcome::skipped(symbol, Action::Open, format!("execution failed: {e}"));
                outcome.size_usd = Some(size_usd);
                outcome
            }
        }
    }

    fn skip_open(&self, symbol: &Symbol, reason: impl Into<String>) -> GateOutcome {
        let reason = reason.into();
        tracing::info!(symbol = %symbol, reason = %reason, "Skipping OPEN");
        self.events.record(
            EventKind::Skipped,
            EventLevel::Info,
            symbol.as_str(),
            format!("OPEN skipped: {reason}"),
        );
        GateOutcome::skipped(symbol, Action::Open, reason)
    }

    async fn close(&self, symbol: &Symbol) -> GateOutcome {
        tracing::info!(symbol = %symbol, "CLOSE");
        match self.adapter.close_position(symbol).await {
            Ok(report) => {
                if let Err(e) = self.trailing.disarm(symbol).await {
                    tracing::error!(symbol = %symbol, error = %e, "Closed but trailing state not removed");
                }
                self.events.record(
                    EventKind::PositionClosed,
                    EventLevel::Success,
                    symbol.as_str(),
                    "closed on decision",
                );
                GateOutcome {
                    symbol: symbol.clone(),
                    action: Action::Close,
                    executed: true,
                    reason: REASON_CLOSED.to_string(),
                    size_usd: None,
                    report: Some(report),
                }
            }
            Err(e) => {
                tracing::error!(symbol = %symbol, error = %e, "CLOSE failed");
                self.events.record(
                    EventKind::Failure,
                    EventLevel::Error,
                    symbol.as_str(),
                    format!("close failed: {e}"),
                );
                GateOutcome::skipped(symbol, Action::Close, format!("execution failed: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedAdapter;
    use crate::trailing::{TickOutcome, TrailingConfig};
    use rust_decimal_macros::dec;
    use serde_json::json;
    use tradeloop_core::{DecisionGateway, Position, Side, TrailingStore};
    use tradeloop_data::MemoryTrailingStore;

    struct Fixture {
        adapter: Arc<ScriptedAdapter>,
        store: Arc<MemoryTrailingStore>,
        trailing: Arc<TrailingStopEngine>,
        gate: RiskGate,
    }

    fn fixture(equity: Decimal, strict: bool) -> Fixture {
        let adapter = Arc::new(ScriptedAdapter::new(equity));
        let store = Arc::new(MemoryTrailingStore::new());
        let events = Arc::new(EventLog::default());
        let trailing = Arc::new(TrailingStopEngine::new(
            adapter.clone(),
            store.clone(),
            events.clone(),
            TrailingConfig {
                initial_sl_pct: dec!(0.02),
                adopt_untracked: false,
            },
        ));
        let gate = RiskGate::new(
            adapter.clone(),
            trailing.clone(),
            events,
            RiskConfig {
                max_positions: 3,
                initial_sl_pct: dec!(0.02),
                strict_position_cap: strict,
            },
        );
        Fixture {
            adapter,
            store,
            trailing,
            gate,
        }
    }

    fn decision(value: serde_json::Value) -> Decision {
        DecisionGateway::sanitize_value(&value).unwrap()
    }

    fn held(symbol: &str) -> Position {
        Position {
            symbol: Symbol::from(symbol),
            side: Side::Long,
            size_usd: dec!(10),
            entry_price: dec!(1),
            pnl: Decimal::ZERO,
            leverage: 1.0,
            ts_open: 0,
        }
    }

    #[tokio::test]
    async fn test_open_sizes_from_equity_and_arms_stop() {
        let f = fixture(dec!(1000), false);
        let snapshot = CycleSnapshot::new(dec!(1000), vec![]);
        let btc = Symbol::from("BTC");

        let outcome = f
            .gate
            .apply(&btc, &decision(json!({"action": "OPEN", "side": "long", "size_pct_balance": 5})), &snapshot)
            .await;

        assert!(outcome.executed);
        assert_eq!(outcome.reason, REASON_OPENED);
        let opens = f.adapter.opens();
        assert_eq!(opens.len(), 1);
        assert_eq!(opens[0].size_usd, dec!(50));
        assert_eq!(opens[0].sl_pct, dec!(0.02));
        assert_eq!(opens[0].side, Side::Long);
        assert_eq!(f.store.get(&btc).await.unwrap().unwrap().sl_pct, dec!(-0.02));
    }

    #[tokio::test]
    async fn test_open_replaces_leftover_stop_from_earlier_position() {
        let f = fixture(dec!(1000), false);
        let btc = Symbol::from("BTC");
        // Ratcheted stop from a position closed on the venue before the next tick
        f.store
            .put(
                &btc,
                tradeloop_core::TrailingState {
                    sl_pct: dec!(0.03),
                    armed_at: chrono::Utc::now(),
                },
            )
            .await
            .unwrap();
        f.adapter.set_price(&btc, dec!(100));
        let snapshot = CycleSnapshot::new(dec!(1000), vec![]);

        let outcome = f
            .gate
            .apply(&btc, &decision(json!({"action": "OPEN", "side": "long"})), &snapshot)
            .await;
        assert!(outcome.executed);
        assert_eq!(f.store.get(&btc).await.unwrap().unwrap().sl_pct, dec!(-0.02));

        f.adapter.set_price(&btc, dec!(100.4));
        let status = f.trailing.tick(&btc).await;
        assert_eq!(status.outcome, TickOutcome::Held);
        assert_eq!(f.adapter.close_calls(), 0);
    }

    #[tokio::test]
    async fn test_adding_to_held_position_keeps_stop() {
        let f = fixture(dec!(1000), false);
        let btc = Symbol::from("BTC");
        let raised = tradeloop_core::TrailingState {
            sl_pct: dec!(0.01),
            armed_at: chrono::Utc::now(),
        };
        f.store.put(&btc, raised).await.unwrap();
        let snapshot = CycleSnapshot::new(dec!(1000), vec![held("BTC")]);

        let outcome = f
            .gate
            .apply(&btc, &decision(json!({"action": "OPEN", "side": "long"})), &snapshot)
            .await;

        assert!(outcome.executed);
        assert_eq!(f.store.get(&btc).await.unwrap(), Some(raised));
    }

    #[tokio::test]
    async fn test_clamped_size_reaches_adapter() {
        let f = fixture(dec!(2000), false);
        let snapshot = CycleSnapshot::new(dec!(2000), vec![]);
        f.gate
            .apply(
                &Symbol::from("ETH"),
                &decision(json!({"action": "OPEN", "side": "short", "size_pct_balance": 50})),
                &snapshot,
            )
            .await;
        assert_eq!(f.adapter.opens()[0].size_usd, dec!(200));
    }

    #[tokio::test]
    async fn test_max_positions_blocks_without_adapter_call() {
        let f = fixture(dec!(1000), false);
        let snapshot = CycleSnapshot::new(dec!(1000), vec![held("BTC"), held("ETH"), held("SOL")]);

        let outcome = f
            .gate
            .apply(&Symbol::from("ADA"), &decision(json!({"action": "OPEN", "side": "long"})), &snapshot)
            .await;

        assert!(!outcome.executed);
        assert_eq!(outcome.reason, REASON_MAX_POSITIONS);
        assert!(f.adapter.opens().is_empty());
    }

    #[tokio::test]
    async fn test_cap_checked_before_side() {
        let f = fixture(dec!(1000), false);
        let snapshot = CycleSnapshot::new(dec!(1000), vec![held("BTC"), held("ETH"), held("SOL")]);
        let outcome = f
            .gate
            .apply(&Symbol::from("ADA"), &decision(json!({"action": "OPEN"})), &snapshot)
            .await;
        assert_eq!(outcome.reason, REASON_MAX_POSITIONS);
    }

    #[tokio::test]
    async fn test_open_without_side_skipped() {
        let f = fixture(dec!(1000), false);
        let snapshot = CycleSnapshot::new(dec!(1000), vec![]);
        let outcome = f
            .gate
            .apply(&Symbol::from("SUI"), &decision(json!({"action": "OPEN", "side": "up"})), &snapshot)
            .await;
        assert_eq!(outcome.reason, REASON_NO_SIDE);
        assert!(f.adapter.opens().is_empty());
    }

    #[tokio::test]
    async fn test_open_without_equity_skipped() {
        let f = fixture(Decimal::ZERO, false);
        let snapshot = CycleSnapshot::new(Decimal::ZERO, vec![]);
        let outcome = f
            .gate
            .apply(&Symbol::from("SUI"), &decision(json!({"action": "OPEN", "side": "long"})), &snapshot)
            .await;
        assert_eq!(outcome.reason, REASON_NO_EQUITY);
        assert!(f.adapter.opens().is_empty());
    }

    #[tokio::test]
    async fn test_hold_does_nothing() {
        let f = fixture(dec!(1000), false);
        let snapshot = CycleSnapshot::new(dec!(1000), vec![]);
        let outcome = f
            .gate
            .apply(&Symbol::from("BTC"), &decision(json!({"action": "HOLD"})), &snapshot)
            .await;
        assert_eq!(outcome.reason, REASON_HOLD);
        assert!(!outcome.executed);
        assert!(f.adapter.opens().is_empty());
        assert_eq!(f.adapter.close_calls(), 0);
    }

    #[tokio::test]
    async fn test_close_forwarded_even_at_cap_and_disarms() {
        let f = fixture(dec!(1000), false);
        let btc = Symbol::from("BTC");
        f.store
            .put(&btc, tradeloop_core::TrailingState::armed(dec!(0.02)))
            .await
            .unwrap();
        let snapshot = CycleSnapshot::new(dec!(1000), vec![held("BTC"), held("ETH"), held("SOL")]);

        let outcome = f
            .gate
            .apply(&btc, &decision(json!({"action": "CLOSE"})), &snapshot)
            .await;

        assert!(outcome.executed);
        assert_eq!(f.adapter.close_calls(), 1);
        assert_eq!(f.store.get(&btc).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failed_open_leaves_no_state() {
        let f = fixture(dec!(1000), false);
        f.adapter.fail_opens(true);
        let snapshot = CycleSnapshot::new(dec!(1000), vec![]);
        let btc = Symbol::from("BTC");

        let outcome = f
            .gate
            .apply(&btc, &decision(json!({"action": "OPEN", "side": "long"})), &snapshot)
            .await;

        assert!(!outcome.executed);
        assert!(outcome.reason.starts_with("execution failed"));
        assert_eq!(f.store.get(&btc).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_failed_close_keeps_state() {
        let f = fixture(dec!(1000), false);
        f.adapter.fail_closes(true);
        let btc = Symbol::from("BTC");
        f.store
            .put(&btc, tradeloop_core::TrailingState::armed(dec!(0.02)))
            .await
            .unwrap();
        let snapshot = CycleSnapshot::new(dec!(1000), vec![held("BTC")]);

        let outcome = f
            .gate
            .apply(&btc, &decision(json!({"action": "CLOSE"})), &snapshot)
            .await;

        assert!(!outcome.executed);
        assert!(f.store.get(&btc).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_literal_snapshot_allows_concurrent_opens_past_cap() {
        let f = fixture(dec!(1000), false);
        let snapshot = CycleSnapshot::new(dec!(1000), vec![held("BTC"), held("ETH")]);
        let open = decision(json!({"action": "OPEN", "side": "long"}));

        for symbol in ["SOL", "ADA", "SUI"] {
            f.gate.apply(&Symbol::from(symbol), &open, &snapshot).await;
        }
        assert_eq!(f.adapter.opens().len(), 3);
    }

    #[tokio::test]
    async fn test_strict_cap_counts_opens_in_cycle() {
        let f = fixture(dec!(1000), true);
        let snapshot = CycleSnapshot::new(dec!(1000), vec![held("BTC"), held("ETH")]);
        let open = decision(json!({"action": "OPEN", "side": "long"}));

        let mut reasons = Vec::new();
        for symbol in ["SOL", "ADA", "SUI"] {
            reasons.push(f.gate.apply(&Symbol::from(symbol), &open, &snapshot).await.reason);
        }
        assert_eq!(f.adapter.opens().len(), 1);
        assert_eq!(reasons, vec![REASON_OPENED, REASON_MAX_POSITIONS, REASON_MAX_POSITIONS]);
    }

    #[tokio::test]
    async fn test_strict_cap_releases_slot_on_failure() {
        let f = fixture(dec!(1000), true);
        let snapshot = CycleSnapshot::new(dec!(1000), vec![held("BTC"), held("ETH")]);
        let open = decision(json!({"action": "OPEN", "side": "long"}));

        f.adapter.fail_opens(true);
        f.gate.apply(&Symbol::from("SOL"), &open, &snapshot).await;
        f.adapter.fail_opens(false);
        let outcome = f.gate.apply(&Symbol::from("ADA"), &open, &snapshot).await;
        assert!(outcome.executed);
    }
}
