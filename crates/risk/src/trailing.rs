//! Trailing stop ratchet.
//!
//! Per symbol the engine moves through `NONE → ARMED → CLOSED`. Arming stores
//! a stop at `-|initial_sl_pct|` of entry. Each tick recomputes a target stop
//! from the unrealised profit and keeps the higher of the current and target
//! values, so the stop never loosens while the position is open. When price
//! crosses the stop the position is closed and the state removed.
//!
//! Every read-modify-write of a symbol's state runs under that symbol's lock,
//! so the pull tick at the end of a decision cycle and the push loop can run
//! side by side.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tradeloop_core::{
    EventKind, EventLevel, EventLog, ExecutionAdapter, HealthStatus, PersistenceError, Position,
    Side, Symbol, TrailingState, TrailingStore,
};

/// Profit (in percent) below which the stop stays at its initial distance.
pub const ACTIVATION_PROFIT_PCT: Decimal = Decimal::from_parts(5, 0, 0, false, 1);
/// Once active, the stop trails this many percentage points behind profit.
pub const TRAIL_GAP_PCT: Decimal = Decimal::ONE;

/// One evaluation of the ratchet rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatchetStep {
    pub profit_pct: Decimal,
    pub target_sl_pct: Decimal,
    pub new_sl_pct: Decimal,
    pub stop_price: Decimal,
    pub stop_hit: bool,
}

/// Applies the ratchet rule. Returns `None` when the entry price is not positive.
#[must_use]
pub fn ratchet(
    side: Side,
    entry: Decimal,
    last: Decimal,
    current_sl_pct: Decimal,
    initial_sl_pct: Decimal,
) -> Option<RatchetStep> {
    if entry <= Decimal::ZERO {
        return None;
    }

    let profit_pct = match side {
        Side::Long => (last - entry) / entry,
        Side::Short => (entry - last) / entry,
    };

    let profit_points = profit_pct * Decimal::ONE_HUNDRED;
    let target_sl_pct = if profit_points < ACTIVATION_PROFIT_PCT {
        -initial_sl_pct.abs()
    } else {
        (profit_points - TRAIL_GAP_PCT) / Decimal::ONE_HUNDRED
    };

    let new_sl_pct = current_sl_pct.max(target_sl_pct);

    let stop_price = match side {
        Side::Long => entry * (Decimal::ONE + new_sl_pct),
        Side::Short => entry * (Decimal::ONE - new_sl_pct),
    };

    let stop_hit = match side {
        Side::Long => last <= stop_price,
        Side::Short => last >= stop_price,
    };

    Some(RatchetStep {
        profit_pct,
        target_sl_pct,
        new_sl_pct,
        stop_price,
        stop_hit,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    /// No trailing state for the symbol.
    NotArmed,
    /// Inputs unavailable, nothing changed.
    Skipped { reason: String },
    /// Stop evaluated and kept.
    Held,
    /// Stop moved up.
    Raised,
    /// Stop hit, position closed and state removed.
    Closed,
    /// Stop hit but the close failed; state kept for the next tick.
    CloseFailed { error: String },
    /// Position no longer open on the venue; state removed.
    Disarmed,
}

/// Per-symbol result of a tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrailingStatus {
    pub symbol: Symbol,
    #[serde(flatten)]
    pub outcome: TickOutcome,
    pub side: Option<Side>,
    pub entry_price: Option<Decimal>,
    pub last_price: Option<Decimal>,
    pub sl_pct: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub profit_pct: Option<Decimal>,
}

impl TrailingStatus {
    fn bare(symbol: &Symbol, outcome: TickOutcome) -> Self {
        Self {
            symbol: symbol.clone(),
            outcome,
            side: None,
            entry_price: None,
            last_price: None,
            sl_pct: None,
            stop_price: None,
            profit_pct: None,
        }
    }

    fn skipped(symbol: &Symbol, reason: impl Into<String>) -> Self {
        Self::bare(
            symbol,
            TickOutcome::Skipped {
                reason: reason.into(),
            },
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrailingConfig {
    /// Positive fraction, e.g. 0.02.
    pub initial_sl_pct: Decimal,
    /// Arm positions found on the venue without state.
    pub adopt_untracked: bool,
}

/// Positions as read from the venue, with the time of the read.
struct PositionRead {
    positions: Vec<Position>,
    read_at: DateTime<Utc>,
}

pub struct TrailingStopEngine {
    adapter: Arc<dyn ExecutionAdapter>,
    store: Arc<dyn TrailingStore>,
    events: Arc<EventLog>,
    config: TrailingConfig,
    locks: Mutex<HashMap<Symbol, Arc<tokio::sync::Mutex<()>>>>,
    disarmed_at: Mutex<HashMap<Symbol, DateTime<Utc>>>,
}

impl std::fmt::Debug for TrailingStopEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrailingStopEngine")
            .field("venue", &self.adapter.venue())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TrailingStopEngine {
    #[must_use]
    pub fn new(
        adapter: Arc<dyn ExecutionAdapter>,
        store: Arc<dyn TrailingStore>,
        events: Arc<EventLog>,
        config: TrailingConfig,
    ) -> Self {
        Self {
            adapter,
            store,
            events,
            config,
            locks: Mutex::new(HashMap::new()),
            disarmed_at: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &TrailingConfig {
        &self.config
    }

    fn lock_for(&self, symbol: &Symbol) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.lock().entry(symbol.clone()).or_default().clone()
    }

    /// Arms the stop unless the symbol is already armed, in which case the
    /// current stop is kept. Used when adding to a held position.
    ///
    /// # Errors
    /// Returns an error if the state cannot be stored.
    pub async fn arm(&self, symbol: &Symbol) -> Result<TrailingState, PersistenceError> {
        let lock = self.lock_for(symbol);
        let _guard = lock.lock().await;
        self.arm_locked(symbol).await
    }

    async fn arm_locked(&self, symbol: &Symbol) -> Result<TrailingState, PersistenceError> {
        if let Some(existing) = self.store.get(symbol).await? {
            tracing::debug!(symbol = %symbol, sl_pct = %existing.sl_pct, "Already armed, keeping stop");
            return Ok(existing);
        }
        let state = TrailingState::armed(self.config.initial_sl_pct);
        self.store.put(symbol, state).await?;
        tracing::info!(symbol = %symbol, sl_pct = %state.sl_pct, "Trailing stop armed");
        Ok(state)
    }

    /// Arms a fresh stop for a new position, replacing any state left over
    /// from an earlier position on the same symbol.
    ///
    /// # Errors
    /// Returns an error if the state cannot be stored.
    pub async fn rearm(&self, symbol: &Symbol) -> Result<TrailingState, PersistenceError> {
        let lock = self.lock_for(symbol);
        let _guard = lock.lock().await;
        if let Some(stale) = self.store.get(symbol).await? {
            tracing::warn!(symbol = %symbol, sl_pct = %stale.sl_pct, "Dropping stale trailing state");
        }
        let state = TrailingState::armed(self.config.initial_sl_pct);
        self.store.put(symbol, state).await?;
        tracing::info!(symbol = %symbol, sl_pct = %state.sl_pct, "Trailing stop armed");
        Ok(state)
    }

    /// Drops the state after a close made outside the engine.
    ///
    /// # Errors
    /// Returns an error if the state cannot be removed.
    pub async fn disarm(&self, symbol: &Symbol) -> Result<(), PersistenceError> {
        let lock = self.lock_for(symbol);
        let _guard = lock.lock().await;
        self.store.remove(symbol).await?;
        self.disarmed_at.lock().insert(symbol.clone(), Utc::now());
        tracing::info!(symbol = %symbol, "Trailing stop disarmed");
        Ok(())
    }

    /// Current state of `symbol`, if armed.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    pub async fn state(&self, symbol: &Symbol) -> Result<Option<TrailingState>, PersistenceError> {
        self.store.get(symbol).await
    }

    /// All armed symbols with their state.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    pub async fn armed(&self) -> Result<Vec<(Symbol, TrailingState)>, PersistenceError> {
        let mut armed = Vec::new();
        for symbol in self.store.symbols().await? {
            if let Some(state) = self.store.get(&symbol).await? {
                armed.push((symbol, state));
            }
        }
        Ok(armed)
    }

    /// Ticks a single symbol.
    pub async fn tick(&self, symbol: &Symbol) -> TrailingStatus {
        match self.read_positions().await {
            Ok(read) => self.evaluate(symbol, &read).await,
            Err(reason) => TrailingStatus::skipped(symbol, reason),
        }
    }

    /// Ticks every armed symbol against one position read.
    ///
    /// Armed symbols without a venue position are disarmed. Venue positions
    /// without state are armed first when adoption is enabled.
    pub async fn tick_all(&self) -> Vec<TrailingStatus> {
        match self.read_positions().await {
            Ok(read) => self.tick_read(&read).await,
            Err(reason) => {
                tracing::warn!(reason = %reason, "Trailing tick skipped");
                Vec::new()
            }
        }
    }

    async fn tick_read(&self, read: &PositionRead) -> Vec<TrailingStatus> {
        let mut symbols = match self.store.symbols().await {
            Ok(symbols) => symbols,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read trailing state");
                return Vec::new();
            }
        };

        if self.config.adopt_untracked {
            for position in &read.positions {
                if symbols.contains(&position.symbol) {
                    continue;
                }
                match self.adopt(&position.symbol, read).await {
                    Ok(None) => {}
                    Ok(Some(state)) => {
                        self.events.record(
                            EventKind::StopMoved,
                            EventLevel::Info,
                            position.symbol.as_str(),
                            format!("adopted untracked {} position, stop {}", position.side, state.sl_pct),
                        );
                        symbols.push(position.symbol.clone());
                    }
                    Err(e) => {
                        tracing::error!(symbol = %position.symbol, error = %e, "Failed to adopt position");
                    }
                }
            }
        }

        let mut statuses = Vec::with_capacity(symbols.len());
        for symbol in &symbols {
            statuses.push(self.evaluate(symbol, read).await);
        }

        let closed = statuses
            .iter()
            .filter(|s| s.outcome == TickOutcome::Closed)
            .count();
        tracing::info!(symbols = statuses.len(), closed, "Trailing tick complete");
        statuses
    }

    /// Arms a venue position found without state. Returns `None` when the
    /// symbol was armed or disarmed since `read` was taken.
    async fn adopt(
        &self,
        symbol: &Symbol,
        read: &PositionRead,
    ) -> Result<Option<TrailingState>, PersistenceError> {
        let lock = self.lock_for(symbol);
        let _guard = lock.lock().await;
        if self.store.get(symbol).await?.is_some() {
            return Ok(None);
        }
        if let Some(at) = self.disarmed_at.lock().get(symbol).copied() {
            if at >= read.read_at {
                tracing::debug!(symbol = %symbol, "Disarmed after position read, not adopting");
                return Ok(None);
            }
        }
        self.arm_locked(symbol).await.map(Some)
    }

    async fn read_positions(&self) -> Result<PositionRead, String> {
        let read_at = Utc::now();
        self.adapter
            .open_positions()
            .await
            .map(|positions| PositionRead { positions, read_at })
            .map_err(|e| format!("positions unavailable: {e}"))
    }

    async fn evaluate(&self, symbol: &Symbol, read: &PositionRead) -> TrailingStatus {
        let lock = self.lock_for(symbol);
        let _guard = lock.lock().await;

        let state = match self.store.get(symbol).await {
            Ok(Some(state)) => state,
            Ok(None) => return TrailingStatus::bare(symbol, TickOutcome::NotArmed),
            Err(e) => return TrailingStatus::skipped(symbol, format!("state unavailable: {e}")),
        };

        let Some(position) = read.positions.iter().find(|p| &p.symbol == symbol) else {
            if state.armed_at >= read.read_at {
                // Armed after the read; the position may not be visible yet
                return TrailingStatus::skipped(symbol, "armed after position read");
            }
            return self.disarm_closed(symbol, state).await;
        };

        let last = match self.adapter.last_price(symbol).await {
            Ok(Some(price)) if price > Decimal::ZERO => price,
            Ok(_) => return TrailingStatus::skipped(symbol, "no price"),
            Err(e) => return TrailingStatus::skipped(symbol, format!("price unavailable: {e}")),
        };

        let Some(step) = ratchet(
            position.side,
            position.entry_price,
            last,
            state.sl_pct,
            self.config.initial_sl_pct,
        ) else {
            return TrailingStatus::skipped(symbol, "no entry price");
        };

        let mut status = TrailingStatus {
            symbol: symbol.clone(),
            outcome: TickOutcome::Held,
            side: Some(position.side),
            entry_price: Some(position.entry_price),
            last_price: Some(last),
            sl_pct: Some(step.new_sl_pct),
            stop_price: Some(step.stop_price),
            profit_pct: Some(step.profit_pct),
        };

        let next = TrailingState {
            sl_pct: step.new_sl_pct,
            armed_at: state.armed_at,
        };
        if let Err(e) = self.store.put(symbol, next).await {
            tracing::error!(symbol = %symbol, error = %e, "Failed to persist trailing stop");
            status.outcome = TickOutcome::Skipped {
                reason: format!("state not persisted: {e}"),
            };
            return status;
        }

        let raised = step.new_sl_pct > state.sl_pct;
        if raised {
            status.outcome = TickOutcome::Raised;
            tracing::info!(
                symbol = %symbol,
                from = %state.sl_pct,
                to = %step.new_sl_pct,
                stop_price = %step.stop_price,
                "Trailing stop raised"
            );
            self.events.record(
                EventKind::StopMoved,
                EventLevel::Info,
                symbol.as_str(),
                format!("stop {} -> {} ({})", state.sl_pct, step.new_sl_pct, step.stop_price),
            );
            if !step.stop_hit {
                if let Err(e) = self.adapter.sync_stop(symbol, step.stop_price).await {
                    tracing::warn!(symbol = %symbol, error = %e, "Failed to move venue stop");
                }
            }
        }

        if step.stop_hit {
            status.outcome = self.close_on_stop(symbol, last, &step).await;
        }

        status
    }

    async fn close_on_stop(&self, symbol: &Symbol, last: Decimal, step: &RatchetStep) -> TickOutcome {
        tracing::warn!(
            symbol = %symbol,
            last = %last,
            stop_price = %step.stop_price,
            "Stop hit, closing position"
        );

        if let Err(e) = self.adapter.close_position(symbol).await {
            tracing::error!(symbol = %symbol, error = %e, "Stop close failed, will retry next tick");
            self.events.record(
                EventKind::Failure,
                EventLevel::Error,
                symbol.as_str(),
                format!("stop close failed: {e}"),
            );
            return TickOutcome::CloseFailed {
                error: e.to_string(),
            };
        }

        if let Err(e) = self.store.remove(symbol).await {
            tracing::error!(symbol = %symbol, error = %e, "Failed to remove trailing state after close");
        }
        self.events.record(
            EventKind::StopHit,
            EventLevel::Warning,
            symbol.as_str(),
            format!("closed at {last}, stop {} ({})", step.stop_price, step.new_sl_pct),
        );
        TickOutcome::Closed
    }

    async fn disarm_closed(&self, symbol: &Symbol, state: TrailingState) -> TrailingStatus {
        if let Err(e) = self.store.remove(symbol).await {
            return TrailingStatus::skipped(symbol, format!("state not removed: {e}"));
        }
        self.disarmed_at.lock().insert(symbol.clone(), Utc::now());
        tracing::info!(symbol = %symbol, "Position gone from venue, trailing state removed");
        self.events.record(
            EventKind::PositionClosed,
            EventLevel::Info,
            symbol.as_str(),
            "position closed outside the engine",
        );
        let mut status = TrailingStatus::bare(symbol, TickOutcome::Disarmed);
        status.sl_pct = Some(state.sl_pct);
        status
    }

    /// Push mode: ticks every `interval` until `cancel` fires.
    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        tracing::info!(interval_s = interval.as_secs(), "Trailing loop started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Trailing loop shutting down");
                    break;
                }
                () = tokio::time::sleep(interval) => {
                    self.tick_all().await;
                }
            }
        }
    }

    pub async fn health(&self) -> HealthStatus {
        match self.store.symbols().await {
            Ok(symbols) => HealthStatus::healthy()
                .with_detail("armed", symbols.len())
                .with_detail("initial_sl_pct", self.config.initial_sl_pct.to_string()),
            Err(e) => HealthStatus::unhealthy(e.to_string()),
        }
    }
}
