//! Scripted execution adapter for unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tradeloop_core::{
    CallError, CallResult, ExecutionAdapter, ExecutionReport, OpenRequest, Position, Side, Symbol,
};

#[derive(Default)]
struct State {
    equity: Decimal,
    positions: Vec<Position>,
    prices: HashMap<Symbol, Decimal>,
    opens: Vec<OpenRequest>,
    close_calls: usize,
    position_reads: usize,
    synced: Vec<(Symbol, Decimal)>,
    fail_opens: bool,
    fail_closes: bool,
}

pub struct ScriptedAdapter {
    state: Mutex<State>,
}

impl ScriptedAdapter {
    pub fn new(equity: Decimal) -> Self {
        Self {
            state: Mutex::new(State {
                equity,
                ..State::default()
            }),
        }
    }

    pub fn add_position(&self, symbol: &Symbol, side: Side, entry: Decimal) {
        self.state.lock().positions.push(Position {
            symbol: symbol.clone(),
            side,
            size_usd: Decimal::ONE_HUNDRED,
            entry_price: entry,
            pnl: Decimal::ZERO,
            leverage: 1.0,
            ts_open: 0,
        });
    }

    pub fn set_price(&self, symbol: &Symbol, price: Decimal) {
        self.state.lock().prices.insert(symbol.clone(), price);
    }

    pub fn fail_opens(&self, fail: bool) {
        self.state.lock().fail_opens = fail;
    }

    pub fn fail_closes(&self, fail: bool) {
        self.state.lock().fail_closes = fail;
    }

    pub fn opens(&self) -> Vec<OpenRequest> {
        self.state.lock().opens.clone()
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().close_calls
    }

    pub fn position_reads(&self) -> usize {
        self.state.lock().position_reads
    }

    pub fn synced_stops(&self) -> Vec<(Symbol, Decimal)> {
        self.state.lock().synced.clone()
    }
}

#[async_trait]
impl ExecutionAdapter for ScriptedAdapter {
    fn venue(&self) -> &str {
        "scripted"
    }

    async fn account_equity(&self) -> CallResult<Decimal> {
        Ok(self.state.lock().equity)
    }

    async fn open_positions(&self) -> CallResult<Vec<Position>> {
        let mut state = self.state.lock();
        state.position_reads += 1;
        Ok(state.positions.clone())
    }

    async fn open_position(&self, request: &OpenRequest) -> CallResult<ExecutionReport> {
        let mut state = self.state.lock();
        state.opens.push(request.clone());
        if state.fail_opens {
            return Err(CallError::rejected("scripted open failure"));
        }
        let entry = state
            .prices
            .get(&request.symbol)
            .copied()
            .unwrap_or(Decimal::ONE_HUNDRED);
        state.positions.push(Position {
            symbol: request.symbol.clone(),
            side: request.side,
            size_usd: request.size_usd,
            entry_price: entry,
            pnl: Decimal::ZERO,
            leverage: 1.0,
            ts_open: 0,
        });
        Ok(ExecutionReport {
            symbol: request.symbol.clone(),
            order_id: Some(format!("open-{}", state.opens.len())),
            filled_size: request.size_usd / entry,
            avg_price: Some(entry),
            detail: serde_json::Value::Null,
        })
    }

    async fn close_position(&self, symbol: &Symbol) -> CallResult<ExecutionReport> {
        let mut state = self.state.lock();
        state.close_calls += 1;
        if state.fail_closes {
            return Err(CallError::Transport("scripted close failure".to_string()));
        }
        state.positions.retain(|p| &p.symbol != symbol);
        Ok(ExecutionReport::flat(symbol.clone()))
    }

    async fn last_price(&self, symbol: &Symbol) -> CallResult<Option<Decimal>> {
        Ok(self.state.lock().prices.get(symbol).copied())
    }

    async fn sync_stop(&self, symbol: &Symbol, stop_price: Decimal) -> CallResult<()> {
        self.state.lock().synced.push((symbol.clone(), stop_price));
        Ok(())
    }
}
