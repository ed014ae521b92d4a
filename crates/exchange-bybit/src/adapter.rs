//! Execution on Bybit USDT linear perpetuals.
//!
//! Engine symbols are bare coins (`BTC`); the venue symbol appends the quote
//! coin (`BTCUSDT`). Opens are market orders with a native stop-loss
//! triggered by mark price, and trailing moves are pushed to the venue with
//! `sync_stop`.

use crate::client::BybitClient;
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use tradeloop_core::{
    CallError, CallResult, ExecutionAdapter, ExecutionReport, OpenRequest, Position, Side, Symbol,
};

pub const DEFAULT_QUOTE: &str = "USDT";
const CATEGORY: &str = "linear";
/// `retCode` for a stop that already has the requested value.
const NOT_MODIFIED: &str = "retCode 34040";

/// Lot and tick sizes of one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instrument {
    pub qty_step: Decimal,
    pub min_qty: Decimal,
    pub tick_size: Decimal,
}

fn decimal_at(value: &Value, key: &str) -> CallResult<Decimal> {
    let text = value
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| CallError::Decode(format!("missing field {key}")))?;
    Decimal::from_str(text).map_err(|e| CallError::Decode(format!("field {key}: {e}")))
}

/// Optional numeric string; Bybit sends `""` for unset values.
fn optional_decimal(value: &Value, key: &str) -> Option<Decimal> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .and_then(|s| Decimal::from_str(s).ok())
}

fn first_in_list(result: &Value) -> Option<&Value> {
    result.get("list").and_then(Value::as_array).and_then(|l| l.first())
}

/// Largest multiple of `step` not above `value`.
#[must_use]
pub fn floor_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    ((value / step).floor() * step).normalize()
}

/// Nearest multiple of `tick`.
#[must_use]
pub fn round_to_tick(value: Decimal, tick: Decimal) -> Decimal {
    if tick <= Decimal::ZERO {
        return value;
    }
    ((value / tick).round() * tick).normalize()
}

/// Stop price `sl_pct` away from `price` on the losing side.
#[must_use]
pub fn initial_stop(price: Decimal, side: Side, sl_pct: Decimal) -> Decimal {
    match side {
        Side::Long => price * (Decimal::ONE - sl_pct),
        Side::Short => price * (Decimal::ONE + sl_pct),
    }
}

pub(crate) fn parse_instrument(result: &Value) -> CallResult<Instrument> {
    let info = first_in_list(result)
        .ok_or_else(|| CallError::config("instrument not listed"))?;
    let lot = info
        .get("lotSizeFilter")
        .ok_or_else(|| CallError::Decode("missing lotSizeFilter".to_string()))?;
    let price = info
        .get("priceFilter")
        .ok_or_else(|| CallError::Decode("missing priceFilter".to_string()))?;
    Ok(Instrument {
        qty_step: decimal_at(lot, "qtyStep")?,
        min_qty: decimal_at(lot, "minOrderQty")?,
        tick_size: decimal_at(price, "tickSize")?,
    })
}

pub(crate) fn parse_equity(result: &Value) -> CallResult<Decimal> {
    let account = first_in_list(result)
        .ok_or_else(|| CallError::Decode("empty wallet list".to_string()))?;
    let coin = account
        .get("coin")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
        .ok_or_else(|| CallError::Decode("wallet has no coin entry".to_string()))?;
    optional_decimal(coin, "equity")
        .map_or_else(|| decimal_at(coin, "walletBalance"), Ok)
}

pub struct BybitAdapter {
    client: BybitClient,
    quote: String,
    instruments: Mutex<HashMap<String, Instrument>>,
}

impl std::fmt::Debug for BybitAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BybitAdapter")
            .field("client", &self.client)
            .field("quote", &self.quote)
            .finish_non_exhaustive()
    }
}

impl BybitAdapter {
    #[must_use]
    pub fn new(client: BybitClient) -> Self {
        Self {
            client,
            quote: DEFAULT_QUOTE.to_string(),
            instruments: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_quote(mut self, quote: impl Into<String>) -> Self {
        self.quote = quote.into();
        self
    }

    #[must_use]
    pub fn venue_symbol(&self, symbol: &Symbol) -> String {
        format!("{}{}", symbol.as_str(), self.quote)
    }

    #[must_use]
    pub fn engine_symbol(&self, venue_symbol: &str) -> Symbol {
        Symbol::from(venue_symbol.strip_suffix(&self.quote).unwrap_or(venue_symbol))
    }

    async fn instrument(&self, venue_symbol: &str) -> CallResult<Instrument> {
        let cached = self.instruments.lock().get(venue_symbol).copied();
        if let Some(instrument) = cached {
            return Ok(instrument);
        }
        let result = self
            .client
            .get(
                "/v5/market/instruments-info",
                &[("category", CATEGORY), ("symbol", venue_symbol)],
            )
            .await?;
        let instrument = parse_instrument(&result)?;
        self.instruments
            .lock()
            .insert(venue_symbol.to_string(), instrument);
        Ok(instrument)
    }

    async fn mark_price(&self, venue_symbol: &str) -> CallResult<Option<Decimal>> {
        let result = self
            .client
            .get(
                "/v5/market/tickers",
                &[("category", CATEGORY), ("symbol", venue_symbol)],
            )
            .await?;
        Ok(first_in_list(&result).and_then(|t| optional_decimal(t, "markPrice")))
    }

    /// Venue position rows with a non-zero size, with their coin size.
    async fn position_rows(&self) -> CallResult<Vec<(Position, Decimal)>> {
        let result = self
            .client
            .get(
                "/v5/position/list",
                &[("category", CATEGORY), ("settleCoin", self.quote.as_str())],
            )
            .await?;
        let Some(rows) = result.get("list").and_then(Value::as_array) else {
            return Ok(Vec::new());
        };

        let mut positions = Vec::new();
        for row in rows {
            let size = optional_decimal(row, "size").unwrap_or(Decimal::ZERO);
            if size <= Decimal::ZERO {
                continue;
            }
            let venue_symbol = row
                .get("symbol")
                .and_then(Value::as_str)
                .ok_or_else(|| CallError::Decode("position without symbol".to_string()))?;
            let side = match row.get("side").and_then(Value::as_str) {
                Some("Buy") => Side::Long,
                Some("Sell") => Side::Short,
                _ => continue,
            };
            let entry_price = decimal_at(row, "avgPrice")?;
            positions.push((
                Position {
                    symbol: self.engine_symbol(venue_symbol),
                    side,
                    size_usd: optional_decimal(row, "positionValue").unwrap_or(size * entry_price),
                    entry_price,
                    pnl: optional_decimal(row, "unrealisedPnl").unwrap_or(Decimal::ZERO),
                    leverage: row
                        .get("leverage")
                        .and_then(Value::as_str)
                        .and_then(|l| l.parse().ok())
                        .unwrap_or(1.0),
                    ts_open: row
                        .get("createdTime")
                        .and_then(Value::as_str)
                        .and_then(|t| t.parse::<i64>().ok())
                        .map_or(0, |ms| ms / 1000),
                },
                size,
            ));
        }
        Ok(positions)
    }

    fn report(symbol: &Symbol, result: Value, qty: Decimal) -> ExecutionReport {
        ExecutionReport {
            symbol: symbol.clone(),
            order_id: result
                .get("orderId")
                .and_then(Value::as_str)
                .map(str::to_string),
            filled_size: qty,
            // Market order acknowledgements carry no fill price
            avg_price: None,
            detail: result,
        }
    }
}

#[async_trait]
impl ExecutionAdapter for BybitAdapter {
    fn venue(&self) -> &str {
        "bybit"
    }

    async fn account_equity(&self) -> CallResult<Decimal> {
        let result = self
            .client
            .get(
                "/v5/account/wallet-balance",
                &[("accountType", "UNIFIED"), ("coin", self.quote.as_str())],
            )
            .await?;
        parse_equity(&result)
    }

    async fn open_positions(&self) -> CallResult<Vec<Position>> {
        Ok(self
            .position_rows()
            .await?
            .into_iter()
            .map(|(position, _)| position)
            .collect())
    }

    async fn open_position(&self, request: &OpenRequest) -> CallResult<ExecutionReport> {
        request.validate()?;
        let venue_symbol = self.venue_symbol(&request.symbol);
        let instrument = self.instrument(&venue_symbol).await?;
        let price = self
            .mark_price(&venue_symbol)
            .await?
            .ok_or_else(|| CallError::rejected(format!("no mark price for {venue_symbol}")))?;

        let qty = floor_to_step(request.size_usd / price, instrument.qty_step);
        if qty < instrument.min_qty || qty <= Decimal::ZERO {
            return Err(CallError::rejected(format!(
                "qty {qty} below minimum {} for {venue_symbol}",
                instrument.min_qty
            )));
        }
        let stop = round_to_tick(
            initial_stop(price, request.side, request.sl_pct),
            instrument.tick_size,
        );

        tracing::info!(
            symbol = %venue_symbol,
            side = %request.side,
            qty = %qty,
            stop_loss = %stop,
            "Placing market order"
        );

        let body = json!({
            "category": CATEGORY,
            "symbol": venue_symbol,
            "side": if request.side.is_buy() { "Buy" } else { "Sell" },
            "orderType": "Market",
            "qty": qty.to_string(),
            "stopLoss": stop.to_string(),
            "slTriggerBy": "MarkPrice",
            "positionIdx": 0,
        });
        let result = self.client.post("/v5/order/create", &body).await?;
        Ok(Self::report(&request.symbol, result, qty))
    }

    async fn close_position(&self, symbol: &Symbol) -> CallResult<ExecutionReport> {
        let rows = self.position_rows().await?;
        let Some((position, size)) = rows.into_iter().find(|(p, _)| &p.symbol == symbol) else {
            return Ok(ExecutionReport::flat(symbol.clone()));
        };

        let body = json!({
            "category": CATEGORY,
            "symbol": self.venue_symbol(symbol),
            "side": if position.side.is_buy() { "Sell" } else { "Buy" },
            "orderType": "Market",
            "qty": size.to_string(),
            "reduceOnly": true,
            "positionIdx": 0,
        });
        tracing::info!(symbol = %symbol, qty = %size, "Placing reduce-only close");
        let result = self.client.post("/v5/order/create", &body).await?;
        Ok(Self::report(symbol, result, size))
    }

    async fn last_price(&self, symbol: &Symbol) -> CallResult<Option<Decimal>> {
        self.mark_price(&self.venue_symbol(symbol)).await
    }

    async fn sync_stop(&self, symbol: &Symbol, stop_price: Decimal) -> CallResult<()> {
        let venue_symbol = self.venue_symbol(symbol);
        let instrument = self.instrument(&venue_symbol).await?;
        let stop = round_to_tick(stop_price, instrument.tick_size);

        let body = json!({
            "category": CATEGORY,
            "symbol": venue_symbol,
            "stopLoss": stop.to_string(),
            "slTriggerBy": "MarkPrice",
            "tpslMode": "Full",
            "positionIdx": 0,
        });
        match self.client.post("/v5/position/trading-stop", &body).await {
            Ok(_) => {
                tracing::info!(symbol = %venue_symbol, stop_loss = %stop, "Venue stop moved");
                Ok(())
            }
            Err(CallError::Rejected(message)) if message.starts_with(NOT_MODIFIED) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
