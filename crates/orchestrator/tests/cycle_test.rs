//! End-to-end decision cycles against the paper venue and in-memory providers.

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tradeloop_core::{
    Action, AnalysisRequest, CallError, CallResult, DecisionContext, DecisionProvider, EventKind,
    EventLog, ExecutionAdapter, ExecutionReport, OpenRequest, Position, RetryPolicy, Side,
    SignalProvider, Symbol, TrailingMode, TrailingState, TrailingStore,
};
use tradeloop_data::{DecisionLedger, MemoryLedgerStore, MemoryTrailingStore};
use tradeloop_hyperliquid::PaperExecutionAdapter;
use tradeloop_orchestrator::{Engine, EngineComponents, EngineSettings, Scheduler, SymbolOutcome};
use tradeloop_risk::risk_gate::REASON_MAX_POSITIONS;
use tradeloop_risk::TickOutcome;
use tradeloop_signals::SignalRegistry;

// ============================================================================
// Test doubles
// ============================================================================

struct StaticSignal {
    name: String,
    payload: Option<Value>,
    calls: AtomicU32,
}

impl StaticSignal {
    fn ok(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            payload: Some(json!({"ok": true, "trend": "up"})),
            calls: AtomicU32::new(0),
        })
    }

    fn down(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            payload: None,
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl SignalProvider for StaticSignal {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(&self, _request: &AnalysisRequest) -> CallResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.payload
            .clone()
            .ok_or_else(|| CallError::Transport("connection refused".to_string()))
    }
}

/// Answers per symbol with a fixed raw payload; symbols without an answer fail.
#[derive(Default)]
struct ScriptedOracle {
    answers: Mutex<HashMap<Symbol, String>>,
    calls: AtomicU32,
    contexts: Mutex<Vec<DecisionContext>>,
}

impl ScriptedOracle {
    fn answer(&self, symbol: &str, raw: &str) {
        self.answers.lock().insert(Symbol::from(symbol), raw.to_string());
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DecisionProvider for ScriptedOracle {
    async fn decide(&self, context: &DecisionContext) -> CallResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.contexts.lock().push(context.clone());
        self.answers
            .lock()
            .get(&context.symbol)
            .cloned()
            .ok_or_else(|| CallError::Transport("oracle unreachable".to_string()))
    }
}

/// Venue that is down for everything.
struct DownVenue;

#[async_trait]
impl ExecutionAdapter for DownVenue {
    fn venue(&self) -> &str {
        "down"
    }

    async fn account_equity(&self) -> CallResult<Decimal> {
        Err(CallError::Transport("venue down".to_string()))
    }

    async fn open_positions(&self) -> CallResult<Vec<Position>> {
        Err(CallError::Transport("venue down".to_string()))
    }

    async fn open_position(&self, _request: &OpenRequest) -> CallResult<ExecutionReport> {
        Err(CallError::Transport("venue down".to_string()))
    }

    async fn close_position(&self, _symbol: &Symbol) -> CallResult<ExecutionReport> {
        Err(CallError::Transport("venue down".to_string()))
    }

    async fn last_price(&self, _symbol: &Symbol) -> CallResult<Option<Decimal>> {
        Err(CallError::Transport("venue down".to_string()))
    }
}

const OPEN_LONG: &str =
    r#"{"action": "OPEN", "side": "long", "size_pct_balance": 5, "reason": "breakout"}"#;

struct Harness {
    engine: Arc<Engine>,
    paper: Arc<PaperExecutionAdapter>,
    oracle: Arc<ScriptedOracle>,
    store: Arc<MemoryTrailingStore>,
}

fn settings(symbols: &[&str], max_positions: usize) -> EngineSettings {
    EngineSettings {
        symbols: symbols.iter().map(|s| Symbol::from(*s)).collect(),
        max_positions,
        initial_sl_pct: dec!(0.02),
        strict_position_cap: false,
        adopt_untracked: true,
        trailing_mode: TrailingMode::Pull,
        analysis_interval: Duration::from_secs(60),
        fast_tick: Duration::from_secs(5),
        retry: RetryPolicy::default(),
    }
}

fn registry(providers: Vec<(Arc<StaticSignal>, bool)>) -> SignalRegistry {
    let mut registry = SignalRegistry::new(RetryPolicy::default());
    for (provider, required) in providers {
        registry.register(provider, required);
    }
    registry
}

fn build_with(
    settings: EngineSettings,
    signals: SignalRegistry,
    adapter: Option<Arc<dyn ExecutionAdapter>>,
) -> Harness {
    let paper = Arc::new(PaperExecutionAdapter::new(dec!(1000), dec!(0), dec!(0)));
    paper.set_price(&Symbol::from("BTC"), dec!(100));
    paper.set_price(&Symbol::from("ETH"), dec!(50));
    let oracle = Arc::new(ScriptedOracle::default());
    let store = Arc::new(MemoryTrailingStore::new());

    let adapter = adapter.unwrap_or_else(|| Arc::clone(&paper) as Arc<dyn ExecutionAdapter>);
    let engine = Engine::new(
        EngineComponents {
            adapter,
            signals,
            oracle: Arc::clone(&oracle) as Arc<dyn DecisionProvider>,
            ledger: Arc::new(DecisionLedger::new(Arc::new(MemoryLedgerStore::new()), 500)),
            trailing_store: Arc::clone(&store) as Arc<dyn TrailingStore>,
            events: Arc::new(EventLog::default()),
        },
        settings,
    );

    Harness {
        engine: Arc::new(engine),
        paper,
        oracle,
        store,
    }
}

fn build(symbols: &[&str], max_positions: usize) -> Harness {
    build_with(
        settings(symbols, max_positions),
        registry(vec![(StaticSignal::ok("technical"), true)]),
        None,
    )
}

// ============================================================================
// Decision cycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_open_decision_executes_and_arms_stop() {
    let h = build(&["BTC"], 3);
    h.oracle.answer("BTC", OPEN_LONG);

    let report = h.engine.run_cycle(&CancellationToken::new()).await;

    let btc = Symbol::from("BTC");
    assert_eq!(
        report.outcome_for(&btc),
        Some(&SymbolOutcome::Decided {
            action: Action::Open,
            executed: true,
            reason: "opened".to_string(),
        })
    );
    assert_eq!(report.equity, Some(dec!(1000)));
    assert_eq!(report.open_positions, Some(0));

    let positions = h.paper.open_positions().await.unwrap();
    assert_eq!(positions.len(), 1);
    assert_eq!(positions[0].side, Side::Long);
    assert_eq!(positions[0].size_usd, dec!(50));

    let state = h.store.get(&btc).await.unwrap().unwrap();
    assert_eq!(state.sl_pct, dec!(-0.02));

    // Pull-mode tick at the end of the cycle sees the fresh position
    assert_eq!(report.trailing.len(), 1);
    assert_eq!(report.trailing[0].outcome, TickOutcome::Held);

    assert_eq!(h.engine.ledger().len().await, 1);
    assert_eq!(h.engine.equity_history().len(), 1);
    assert!(h.engine.last_cycle().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_context_carries_snapshot_and_signals() {
    let h = build_with(
        settings(&["BTC"], 3),
        registry(vec![
            (StaticSignal::ok("technical"), true),
            (StaticSignal::down("sentiment"), false),
        ]),
        None,
    );
    h.oracle.answer("BTC", r#"{"action": "HOLD", "reason": "chop"}"#);

    let report = h.engine.run_cycle(&CancellationToken::new()).await;

    assert!(report.outcome_for(&Symbol::from("BTC")).unwrap().is_decided());
    let contexts = h.oracle.contexts.lock().clone();
    assert_eq!(contexts.len(), 1);
    assert_eq!(contexts[0].equity, dec!(1000));
    assert_eq!(contexts[0].max_positions, 3);
    assert!(contexts[0].signals.is_ok("technical"));
    assert!(!contexts[0].signals.is_ok("sentiment"));

    let history = h.engine.ledger().history().await;
    assert_eq!(history[0].decision.action(), Action::Hold);
    assert_eq!(history[0].decision.reason(), "chop");
}

#[tokio::test(start_paused = true)]
async fn test_required_signal_failure_skips_symbol() {
    let technical = StaticSignal::down("technical");
    let h = build_with(
        settings(&["BTC"], 3),
        registry(vec![(Arc::clone(&technical), true)]),
        None,
    );
    h.oracle.answer("BTC", OPEN_LONG);

    let report = h.engine.run_cycle(&CancellationToken::new()).await;

    assert!(matches!(
        report.outcome_for(&Symbol::from("BTC")),
        Some(SymbolOutcome::Skipped { reason }) if reason.contains("technical")
    ));
    assert_eq!(technical.calls.load(Ordering::SeqCst), 3);
    assert_eq!(h.oracle.calls(), 0);
    assert!(h.engine.ledger().is_empty().await);
    assert!(h.paper.open_positions().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_oracle_failure_skips_after_retries() {
    let h = build(&["BTC", "ETH"], 3);
    h.oracle.answer("ETH", r#"{"action": "HOLD"}"#);

    let report = h.engine.run_cycle(&CancellationToken::new()).await;

    assert!(matches!(
        report.outcome_for(&Symbol::from("BTC")),
        Some(SymbolOutcome::Skipped { .. })
    ));
    assert!(report.outcome_for(&Symbol::from("ETH")).unwrap().is_decided());
    // Three attempts for BTC, one for ETH
    assert_eq!(h.oracle.calls(), 4);
    assert_eq!(h.engine.ledger().len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_unparseable_decision_skips_symbol() {
    let h = build(&["BTC"], 3);
    h.oracle.answer("BTC", "I think you should buy");

    let report = h.engine.run_cycle(&CancellationToken::new()).await;

    assert!(matches!(
        report.outcome_for(&Symbol::from("BTC")),
        Some(SymbolOutcome::Skipped { .. })
    ));
    assert!(h.engine.ledger().is_empty().await);
    assert!(h
        .engine
        .events()
        .recent(10)
        .iter()
        .any(|e| e.kind == EventKind::Failure && e.subject == "BTC"));
}

#[tokio::test(start_paused = true)]
async fn test_max_positions_blocks_open() {
    let h = build(&["BTC"], 1);
    h.paper
        .open_position(&OpenRequest {
            symbol: Symbol::from("ETH"),
            side: Side::Short,
            size_usd: dec!(20),
            sl_pct: dec!(0.02),
        })
        .await
        .unwrap();
    h.oracle.answer("BTC", OPEN_LONG);

    let report = h.engine.run_cycle(&CancellationToken::new()).await;

    assert_eq!(
        report.outcome_for(&Symbol::from("BTC")),
        Some(&SymbolOutcome::Decided {
            action: Action::Open,
            executed: false,
            reason: REASON_MAX_POSITIONS.to_string(),
        })
    );
    assert_eq!(h.paper.open_positions().await.unwrap().len(), 1);
    // The decision is still recorded
    assert_eq!(h.engine.ledger().len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_cap_is_literal_by_default() {
    let h = build(&["BTC", "ETH"], 1);
    h.oracle.answer("BTC", OPEN_LONG);
    h.oracle.answer("ETH", OPEN_LONG);

    let report = h.engine.run_cycle(&CancellationToken::new()).await;

    // Both branches see zero open positions in the snapshot
    assert_eq!(report.executed_count(), 2);
    assert_eq!(h.paper.open_positions().await.unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_strict_cap_counts_opens_within_cycle() {
    let mut strict = settings(&["BTC", "ETH"], 1);
    strict.strict_position_cap = true;
    let h = build_with(
        strict,
        registry(vec![(StaticSignal::ok("technical"), true)]),
        None,
    );
    h.oracle.answer("BTC", OPEN_LONG);
    h.oracle.answer("ETH", OPEN_LONG);

    let report = h.engine.run_cycle(&CancellationToken::new()).await;

    assert_eq!(report.executed_count(), 1);
    assert_eq!(h.paper.open_positions().await.unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_close_decision_closes_and_disarms() {
    let h = build(&["BTC"], 3);
    h.oracle.answer("BTC", OPEN_LONG);
    h.engine.run_cycle(&CancellationToken::new()).await;
    assert_eq!(h.paper.open_positions().await.unwrap().len(), 1);

    h.oracle
        .answer("BTC", r#"{"action": "CLOSE", "side": "long", "reason": "target hit"}"#);
    let report = h.engine.run_cycle(&CancellationToken::new()).await;

    assert!(matches!(
        report.outcome_for(&Symbol::from("BTC")),
        Some(SymbolOutcome::Decided { action: Action::Close, executed: true, .. })
    ));
    assert!(h.paper.open_positions().await.unwrap().is_empty());
    assert!(h.store.get(&Symbol::from("BTC")).await.unwrap().is_none());
    assert_eq!(h.engine.ledger().len().await, 2);
}

#[tokio::test(start_paused = true)]
async fn test_position_read_failure_skips_decision_phase() {
    let h = build_with(
        settings(&["BTC"], 3),
        registry(vec![(StaticSignal::ok("technical"), true)]),
        Some(Arc::new(DownVenue)),
    );
    h.oracle.answer("BTC", OPEN_LONG);
    h.store
        .put(&Symbol::from("BTC"), TrailingState::armed(dec!(0.02)))
        .await
        .unwrap();

    let report = h.engine.run_cycle(&CancellationToken::new()).await;

    assert_eq!(report.equity, None);
    assert_eq!(report.open_positions, None);
    assert!(report.symbols.is_empty());
    assert_eq!(h.oracle.calls(), 0);
    assert!(h.engine.equity_history().is_empty());
    // Tick ran but could not read positions; the state is untouched
    assert!(report.trailing.is_empty());
    assert!(h.store.get(&Symbol::from("BTC")).await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_cycle_commits_nothing() {
    let h = build(&["BTC", "ETH"], 3);
    h.oracle.answer("BTC", OPEN_LONG);
    h.oracle.answer("ETH", OPEN_LONG);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = h.engine.run_cycle(&cancel).await;

    assert!(report.cancelled);
    assert!(report
        .symbols
        .iter()
        .all(|s| s.outcome == SymbolOutcome::Cancelled));
    assert!(report.trailing.is_empty());
    assert!(h.engine.ledger().is_empty().await);
    assert!(h.paper.open_positions().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_health_reports_components() {
    let h = build(&["BTC"], 3);
    h.oracle.answer("BTC", OPEN_LONG);
    h.engine.run_cycle(&CancellationToken::new()).await;

    let health = h.engine.health().await;

    assert!(health.ok);
    assert_eq!(health.details["venue"], "paper");
    assert_eq!(health.details["ledger_size"], 1);
    assert_eq!(health.details["armed"], 1);
    assert_eq!(health.details["scheduler_running"], false);
    assert!(health.details["last_cycle"]["id"].is_string());
    assert!(health.details["components"]["signal:technical"]["ok"]
        .as_bool()
        .unwrap());
}

// ============================================================================
// Scheduler
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_scheduler_runs_first_cycle_at_startup_and_repeats() {
    let h = build(&["BTC"], 3);
    h.oracle.answer("BTC", r#"{"action": "HOLD"}"#);
    let mut cycles = h.engine.subscribe_cycles();
    let cancel = CancellationToken::new();

    let handle = Scheduler::new(Arc::clone(&h.engine), cancel.clone()).spawn();

    cycles.changed().await.unwrap();
    assert!(h.engine.is_running());
    let first = cycles.borrow_and_update().clone().unwrap();
    cycles.changed().await.unwrap();
    let second = cycles.borrow_and_update().clone().unwrap();
    assert_ne!(first.id, second.id);
    assert!(second.started_at >= first.finished_at);

    cancel.cancel();
    handle.await.unwrap();
    assert!(!h.engine.is_running());
    assert!(h.oracle.calls() >= 2);
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_push_mode_ticks_between_cycles() {
    let mut push = settings(&["BTC"], 3);
    push.trailing_mode = TrailingMode::Push;
    push.analysis_interval = Duration::from_secs(3600);
    let h = build_with(
        push,
        registry(vec![(StaticSignal::ok("technical"), true)]),
        None,
    );
    h.oracle.answer("BTC", OPEN_LONG);
    let mut cycles = h.engine.subscribe_cycles();
    let cancel = CancellationToken::new();

    let handle = Scheduler::new(Arc::clone(&h.engine), cancel.clone()).spawn();
    cycles.changed().await.unwrap();
    let first = cycles.borrow_and_update().clone().unwrap();
    // Push mode leaves the end-of-cycle tick to the fast loop
    assert!(first.trailing.is_empty());

    // Price runs up 1.2%: the fast loop locks in profit well before the next cycle
    h.paper.set_price(&Symbol::from("BTC"), dec!(101.2));
    tokio::time::sleep(Duration::from_secs(6)).await;

    let state = h.store.get(&Symbol::from("BTC")).await.unwrap().unwrap();
    assert_eq!(state.sl_pct, dec!(0.002));

    cancel.cancel();
    handle.await.unwrap();
}
