//! One decision cycle: snapshot, per-symbol fan-out, commit, pull-mode tick.
//!
//! The engine owns every component the scheduler drives. A cycle never fails
//! as a whole: read failures degrade the cycle (equity 0, no decision phase)
//! and per-symbol failures only skip that symbol.

use crate::cycle::{CycleReport, SymbolOutcome, SymbolReport};
use anyhow::{Context, Result};
use chrono::Utc;
use futures_util::future::join_all;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tradeloop_core::events::DEFAULT_EQUITY_CAPACITY;
use tradeloop_core::{
    decimal_from_f64, retry, AppConfig, BoundedLog, CycleSnapshot, DecisionContext,
    DecisionGateway, DecisionProvider, DecisionRecord, EquityPoint, EventKind, EventLevel,
    EventLog, ExecutionAdapter, HealthStatus, RetryPolicy, Symbol, TrailingMode, TrailingStore,
};
use tradeloop_data::DecisionLedger;
use tradeloop_risk::{RiskConfig, RiskGate, TrailingConfig, TrailingStopEngine};
use tradeloop_signals::SignalRegistry;
use uuid::Uuid;

/// Engine knobs derived from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub symbols: Vec<Symbol>,
    pub max_positions: usize,
    /// Positive fraction, e.g. 0.02.
    pub initial_sl_pct: Decimal,
    pub strict_position_cap: bool,
    pub adopt_untracked: bool,
    pub trailing_mode: TrailingMode,
    pub analysis_interval: Duration,
    pub fast_tick: Duration,
    pub retry: RetryPolicy,
}

impl EngineSettings {
    /// # Errors
    /// Returns an error if `initial_sl_pct` is not a finite number.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            symbols: config.symbols.clone(),
            max_positions: config.max_positions,
            initial_sl_pct: decimal_from_f64(config.initial_sl_pct)
                .context("initial_sl_pct is not a valid decimal")?,
            strict_position_cap: config.strict_position_cap,
            adopt_untracked: config.adopt_untracked,
            trailing_mode: config.trailing_mode,
            analysis_interval: Duration::from_secs(config.analysis_interval_seconds),
            fast_tick: Duration::from_secs(config.fast_tick_seconds),
            retry: RetryPolicy::default()
                .with_call_timeout(Duration::from_secs(config.call_timeout_seconds)),
        })
    }
}

/// Collaborators injected into the engine.
pub struct EngineComponents {
    pub adapter: Arc<dyn ExecutionAdapter>,
    pub signals: SignalRegistry,
    pub oracle: Arc<dyn DecisionProvider>,
    pub ledger: Arc<DecisionLedger>,
    pub trailing_store: Arc<dyn TrailingStore>,
    pub events: Arc<EventLog>,
}

pub struct Engine {
    settings: EngineSettings,
    adapter: Arc<dyn ExecutionAdapter>,
    signals: SignalRegistry,
    oracle: Arc<dyn DecisionProvider>,
    ledger: Arc<DecisionLedger>,
    events: Arc<EventLog>,
    trailing: Arc<TrailingStopEngine>,
    gate: RiskGate,
    equity_history: BoundedLog<EquityPoint>,
    report_tx: watch::Sender<Option<CycleReport>>,
    running: AtomicBool,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("venue", &self.adapter.venue())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Engine {
    #[must_use]
    pub fn new(components: EngineComponents, settings: EngineSettings) -> Self {
        let EngineComponents {
            adapter,
            signals,
            oracle,
            ledger,
            trailing_store,
            events,
        } = components;

        let trailing = Arc::new(TrailingStopEngine::new(
            Arc::clone(&adapter),
            trailing_store,
            Arc::clone(&events),
            TrailingConfig {
                initial_sl_pct: settings.initial_sl_pct,
                adopt_untracked: settings.adopt_untracked,
            },
        ));
        let gate = RiskGate::new(
            Arc::clone(&adapter),
            Arc::clone(&trailing),
            Arc::clone(&events),
            RiskConfig {
                max_positions: settings.max_positions,
                initial_sl_pct: settings.initial_sl_pct,
                strict_position_cap: settings.strict_position_cap,
            },
        );
        let (report_tx, _) = watch::channel(None);

        Self {
            settings,
            adapter,
            signals,
            oracle,
            ledger,
            events,
            trailing,
            gate,
            equity_history: BoundedLog::new(DEFAULT_EQUITY_CAPACITY),
            report_tx,
            running: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    #[must_use]
    pub fn adapter(&self) -> &Arc<dyn ExecutionAdapter> {
        &self.adapter
    }

    #[must_use]
    pub fn trailing(&self) -> &Arc<TrailingStopEngine> {
        &self.trailing
    }

    #[must_use]
    pub fn ledger(&self) -> &Arc<DecisionLedger> {
        &self.ledger
    }

    #[must_use]
    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    #[must_use]
    pub const fn signals(&self) -> &SignalRegistry {
        &self.signals
    }

    /// Equity history, oldest first.
    #[must_use]
    pub fn equity_history(&self) -> Vec<EquityPoint> {
        self.equity_history.snapshot()
    }

    #[must_use]
    pub fn last_cycle(&self) -> Option<CycleReport> {
        self.report_tx.borrow().clone()
    }

    /// Receives every published [`CycleReport`].
    #[must_use]
    pub fn subscribe_cycles(&self) -> watch::Receiver<Option<CycleReport>> {
        self.report_tx.subscribe()
    }

    /// Whether the decision loop is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// Runs one full decision cycle and publishes its report.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> CycleReport {
        let id = Uuid::new_v4();
        let started_at = Utc::now();
        tracing::info!(cycle = %id, symbols = self.settings.symbols.len(), "Cycle started");
        self.events.record(
            EventKind::CycleStarted,
            EventLevel::Info,
            "scheduler",
            format!("cycle {id} started for {} symbols", self.settings.symbols.len()),
        );

        let equity = self.read_equity().await;
        let positions = self.read_positions().await;
        if let Some(equity) = equity {
            self.equity_history.push(EquityPoint {
                at: Utc::now(),
                equity,
            });
        }

        let open_positions = positions.as_ref().map(Vec::len);
        let symbols = match positions {
            Some(positions) => {
                let snapshot = CycleSnapshot::new(equity.unwrap_or(Decimal::ZERO), positions);
                self.decide_all(&snapshot, cancel).await
            }
            None => {
                tracing::warn!(cycle = %id, "Position snapshot unavailable, skipping decision phase");
                Vec::new()
            }
        };

        let trailing = if self.settings.trailing_mode.pulls() && !cancel.is_cancelled() {
            self.trailing.tick_all().await
        } else {
            Vec::new()
        };

        let report = CycleReport {
            id,
            started_at,
            finished_at: Utc::now(),
            equity,
            open_positions,
            symbols,
            trailing,
            cancelled: cancel.is_cancelled(),
        };

        let decided = report.symbols.iter().filter(|s| s.outcome.is_decided()).count();
        tracing::info!(
            cycle = %id,
            decided,
            executed = report.executed_count(),
            duration_ms = report.duration_ms(),
            cancelled = report.cancelled,
            "Cycle finished"
        );
        self.events.record(
            EventKind::CycleFinished,
            if report.cancelled {
                EventLevel::Warning
            } else {
                EventLevel::Success
            },
            "scheduler",
            format!(
                "cycle {id}: {decided}/{} decided, {} executed",
                self.settings.symbols.len(),
                report.executed_count()
            ),
        );

        self.report_tx.send_replace(Some(report.clone()));
        report
    }

    async fn read_equity(&self) -> Option<Decimal> {
        let adapter = &self.adapter;
        match retry(&self.settings.retry, "account_equity", move || adapter.account_equity()).await
        {
            Ok(equity) => Some(equity),
            Err(e) => {
                tracing::warn!(error = %e, "Equity unavailable, using 0 for this cycle");
                self.events.record(
                    EventKind::Failure,
                    EventLevel::Warning,
                    self.adapter.venue(),
                    format!("equity unavailable: {}", e.error),
                );
                None
            }
        }
    }

    async fn read_positions(&self) -> Option<Vec<tradeloop_core::Position>> {
        let adapter = &self.adapter;
        match retry(&self.settings.retry, "open_positions", move || adapter.open_positions()).await
        {
            Ok(positions) => Some(positions),
            Err(e) => {
                self.events.record(
                    EventKind::Failure,
                    EventLevel::Error,
                    self.adapter.venue(),
                    format!("positions unavailable, decisions skipped: {}", e.error),
                );
                None
            }
        }
    }

    async fn decide_all(
        &self,
        snapshot: &CycleSnapshot,
        cancel: &CancellationToken,
    ) -> Vec<SymbolReport> {
        let branches = self.settings.symbols.iter().map(|symbol| async move {
            let outcome = self.process_symbol(symbol, snapshot, cancel).await;
            SymbolReport {
                symbol: symbol.clone(),
                outcome,
            }
        });
        join_all(branches).await
    }

    /// Signals, decision, commit and apply for one symbol.
    ///
    /// Cancellation is honoured until the decision is committed. From the
    /// ledger append on, the branch runs to completion.
    async fn process_symbol(
        &self,
        symbol: &Symbol,
        snapshot: &CycleSnapshot,
        cancel: &CancellationToken,
    ) -> SymbolOutcome {
        let bundle = tokio::select! {
            biased;
            () = cancel.cancelled() => return SymbolOutcome::Cancelled,
            bundle = self.signals.gather(symbol) => bundle,
        };

        if let Some(name) = self.signals.missing_required(&bundle) {
            let reason = format!("required signal {name} unavailable");
            tracing::warn!(symbol = %symbol, signal = %name, "Required signal unavailable, skipping symbol");
            self.events
                .record(EventKind::Skipped, EventLevel::Warning, symbol.as_str(), &reason);
            return SymbolOutcome::skipped(reason);
        }

        let context = DecisionContext {
            symbol: symbol.clone(),
            signals: bundle,
            current_positions: snapshot.positions_for(symbol),
            equity: snapshot.equity,
            max_positions: self.settings.max_positions,
        };

        let label = format!("decide:{symbol}");
        let oracle = &self.oracle;
        let wire = &context;
        let raw = tokio::select! {
            biased;
            () = cancel.cancelled() => return SymbolOutcome::Cancelled,
            raw = retry(&self.settings.retry, &label, move || oracle.decide(wire)) => raw,
        };
        let raw = match raw {
            Ok(raw) => raw,
            Err(e) => {
                let reason = format!("decision unavailable: {}", e.error);
                tracing::warn!(symbol = %symbol, error = %e, "Decision provider failed, skipping symbol");
                self.events
                    .record(EventKind::Failure, EventLevel::Warning, symbol.as_str(), &reason);
                return SymbolOutcome::skipped(reason);
            }
        };

        let decision = match DecisionGateway::sanitize(&raw) {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, excerpt = %e.excerpt, "Unusable decision payload");
                self.events.record(
                    EventKind::Failure,
                    EventLevel::Warning,
                    symbol.as_str(),
                    e.to_string(),
                );
                return SymbolOutcome::skipped(e.to_string());
            }
        };

        if cancel.is_cancelled() {
            tracing::info!(symbol = %symbol, "Cancelled before commit, decision dropped");
            return SymbolOutcome::Cancelled;
        }

        tracing::info!(
            symbol = %symbol,
            action = %decision.action(),
            side = ?decision.side(),
            size_pct = decision.size_pct_balance(),
            reason = %decision.reason(),
            "Decision"
        );
        if let Err(e) = self
            .ledger
            .append(DecisionRecord::new(context, decision.clone()))
            .await
        {
            tracing::warn!(symbol = %symbol, error = %e, "Failed to append decision to ledger");
        }
        self.events.record(
            EventKind::Decision,
            EventLevel::Info,
            symbol.as_str(),
            format!("{}: {}", decision.action(), decision.reason()),
        );

        let outcome = self.gate.apply(symbol, &decision, snapshot).await;
        SymbolOutcome::Decided {
            action: outcome.action,
            executed: outcome.executed,
            reason: outcome.reason,
        }
    }

    /// Health of every component, keyed by component name.
    pub async fn component_health(&self) -> Vec<(String, HealthStatus)> {
        let mut components = vec![
            (
                format!("venue:{}", self.adapter.venue()),
                self.adapter.health().await,
            ),
            ("ledger".to_string(), self.ledger.health().await),
            ("trailing".to_string(), self.trailing.health().await),
            ("oracle".to_string(), self.oracle.health().await),
        ];
        components.extend(
            self.signals
                .health()
                .await
                .into_iter()
                .map(|(name, status)| (format!("signal:{name}"), status)),
        );
        components
    }

    /// Aggregated health: ok while the venue, ledger and trailing store are healthy.
    /// Signal and oracle health is reported in the details only.
    pub async fn health(&self) -> HealthStatus {
        let components = self.component_health().await;
        let failing: Vec<&str> = components
            .iter()
            .filter(|(name, status)| {
                !status.ok && !name.starts_with("signal:") && name != "oracle"
            })
            .map(|(name, _)| name.as_str())
            .collect();

        let mut status = if failing.is_empty() {
            HealthStatus::healthy()
        } else {
            HealthStatus::unhealthy(format!("unhealthy: {}", failing.join(", ")))
        };

        let armed = self.trailing.armed().await.map(|armed| armed.len()).unwrap_or(0);
        let last_cycle = self.last_cycle().map_or(Value::Null, |report| {
            json!({
                "id": report.id,
                "finished_at": report.finished_at,
                "cancelled": report.cancelled,
            })
        });
        let component_map: serde_json::Map<String, Value> = components
            .into_iter()
            .map(|(name, health)| (name, serde_json::to_value(health).unwrap_or(Value::Null)))
            .collect();

        status = status
            .with_detail("venue", self.adapter.venue())
            .with_detail("scheduler_running", self.is_running())
            .with_detail("ledger_size", self.ledger.len().await)
            .with_detail("armed", armed)
            .with_detail("last_cycle", last_cycle)
            .with_detail("components", Value::Object(component_map));
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_settings_from_default_config() {
        let config = AppConfig::default();
        let settings = EngineSettings::from_config(&config).unwrap();

        assert_eq!(settings.initial_sl_pct, dec!(0.02));
        assert_eq!(settings.max_positions, 3);
        assert_eq!(settings.analysis_interval, Duration::from_secs(900));
        assert_eq!(settings.fast_tick, Duration::from_secs(30));
        assert_eq!(settings.retry.call_timeout, Duration::from_secs(40));
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(settings.trailing_mode, TrailingMode::Both);
        assert_eq!(settings.symbols.len(), 8);
    }

    #[test]
    fn test_settings_reject_nan_stop() {
        let config = AppConfig {
            initial_sl_pct: f64::NAN,
            ..AppConfig::default()
        };
        assert!(EngineSettings::from_config(&config).is_err());
    }
}
