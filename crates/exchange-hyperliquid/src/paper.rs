use crate::adapter::parse_mid;
use crate::client::HyperliquidClient;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::json;
use std::collections::HashMap;
use tradeloop_core::{
    CallError, CallResult, ExecutionAdapter, ExecutionReport, OpenRequest, Position, Side, Symbol,
};

const BPS: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);

#[derive(Debug, Clone)]
struct PaperPosition {
    side: Side,
    quantity: Decimal,
    entry_price: Decimal,
    opened_at: i64,
}

impl PaperPosition {
    fn unrealised(&self, price: Decimal) -> Decimal {
        let diff = price - self.entry_price;
        match self.side {
            Side::Long => diff * self.quantity,
            Side::Short => -diff * self.quantity,
        }
    }
}

#[derive(Debug, Default)]
struct Book {
    cash: Decimal,
    positions: HashMap<Symbol, PaperPosition>,
    prices: HashMap<Symbol, Decimal>,
    next_order: u64,
}

/// Paper trading adapter with simulated fills.
///
/// This adapter makes **zero order API calls**. Fills happen locally at the
/// last known price moved against the trader by `slippage_bps`, and a
/// commission of `commission_rate` times notional is charged on both legs.
/// Realised PnL is folded into the cash balance.
///
/// Prices come from [`Self::set_price`], or from Hyperliquid mids when a
/// price feed is attached.
///
/// # Recommended Values
///
/// - Hyperliquid commission: 0.00025 (0.025% taker fee)
/// - Conservative slippage: 10 bps (0.1%)
pub struct PaperExecutionAdapter {
    book: Mutex<Book>,
    commission_rate: Decimal,
    slippage_bps: Decimal,
    price_feed: Option<HyperliquidClient>,
}

impl std::fmt::Debug for PaperExecutionAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaperExecutionAdapter")
            .field("commission_rate", &self.commission_rate)
            .field("slippage_bps", &self.slippage_bps)
            .field("price_feed", &self.price_feed.as_ref().map(HyperliquidClient::base_url))
            .finish_non_exhaustive()
    }
}

impl PaperExecutionAdapter {
    #[must_use]
    pub fn new(starting_equity: Decimal, commission_rate: Decimal, slippage_bps: Decimal) -> Self {
        Self {
            book: Mutex::new(Book {
                cash: starting_equity,
                ..Book::default()
            }),
            commission_rate,
            slippage_bps,
            price_feed: None,
        }
    }

    /// Reads prices from live Hyperliquid mids.
    #[must_use]
    pub fn with_price_feed(mut self, client: HyperliquidClient) -> Self {
        self.price_feed = Some(client);
        self
    }

    pub fn set_price(&self, symbol: &Symbol, price: Decimal) {
        self.book.lock().prices.insert(symbol.clone(), price);
    }

    /// Cash balance without unrealised PnL.
    #[must_use]
    pub fn cash(&self) -> Decimal {
        self.book.lock().cash
    }

    fn fill_price(&self, price: Decimal, is_buy: bool) -> Decimal {
        let slip = price * self.slippage_bps / BPS;
        if is_buy {
            price + slip
        } else {
            price - slip
        }
    }

    async fn price(&self, symbol: &Symbol) -> CallResult<Option<Decimal>> {
        if let Some(client) = &self.price_feed {
            match client.all_mids().await.and_then(|mids| parse_mid(&mids, symbol)) {
                Ok(Some(mid)) => {
                    self.book.lock().prices.insert(symbol.clone(), mid);
                    return Ok(Some(mid));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(symbol = %symbol, error = %e, "Paper price feed failed, using cached price");
                }
            }
        }
        Ok(self.book.lock().prices.get(symbol).copied())
    }

    fn report(book: &mut Book, symbol: &Symbol, quantity: Decimal, price: Decimal, fee: Decimal) -> ExecutionReport {
        book.next_order += 1;
        ExecutionReport {
            symbol: symbol.clone(),
            order_id: Some(format!("paper-{}", book.next_order)),
            filled_size: quantity,
            avg_price: Some(price),
            detail: json!({ "paper": true, "commission": fee.to_string() }),
        }
    }
}

#[async_trait]
impl ExecutionAdapter for PaperExecutionAdapter {
    fn venue(&self) -> &str {
        "paper"
    }

    async fn account_equity(&self) -> CallResult<Decimal> {
        let book = self.book.lock();
        let unrealised: Decimal = book
            .positions
            .iter()
            .map(|(symbol, p)| {
                let price = book.prices.get(symbol).copied().unwrap_or(p.entry_price);
                p.unrealised(price)
            })
            .sum();
        Ok(book.cash + unrealised)
    }

    async fn open_positions(&self) -> CallResult<Vec<Position>> {
        let book = self.book.lock();
        let mut positions: Vec<Position> = book
            .positions
            .iter()
            .map(|(symbol, p)| {
                let price = book.prices.get(symbol).copied().unwrap_or(p.entry_price);
                Position {
                    symbol: symbol.clone(),
                    side: p.side,
                    size_usd: p.quantity * price,
                    entry_price: p.entry_price,
                    pnl: p.unrealised(price),
                    leverage: 1.0,
                    ts_open: p.opened_at,
                }
            })
            .collect();
        positions.sort_by(|a, b| a.symbol.as_str().cmp(b.symbol.as_str()));
        Ok(positions)
    }

    async fn open_position(&self, request: &OpenRequest) -> CallResult<ExecutionReport> {
        request.validate()?;
        let price = self
            .price(&request.symbol)
            .await?
            .ok_or_else(|| CallError::rejected(format!("no price for {}", request.symbol)))?;

        let fill = self.fill_price(price, request.side.is_buy());
        let quantity = request.size_usd / fill;
        let fee = request.size_usd * self.commission_rate;

        let mut book = self.book.lock();
        if book.cash < fee {
            return Err(CallError::rejected("insufficient paper balance"));
        }
        match book.positions.get_mut(&request.symbol) {
            Some(existing) if existing.side != request.side => {
                return Err(CallError::rejected(format!(
                    "opposite {} position already open on {}",
                    existing.side, request.symbol
                )));
            }
            Some(existing) => {
                let total = existing.quantity + quantity;
                existing.entry_price =
                    (existing.entry_price * existing.quantity + fill * quantity) / total;
                existing.quantity = total;
            }
            None => {
                book.positions.insert(
                    request.symbol.clone(),
                    PaperPosition {
                        side: request.side,
                        quantity,
                        entry_price: fill,
                        opened_at: Utc::now().timestamp(),
                    },
                );
            }
        }
        book.cash -= fee;

        tracing::info!(
            symbol = %request.symbol,
            side = %request.side,
            price = %fill,
            quantity = %quantity.round_dp(6),
            "Paper fill"
        );
        Ok(Self::report(&mut book, &request.symbol, quantity, fill, fee))
    }

    async fn close_position(&self, symbol: &Symbol) -> CallResult<ExecutionReport> {
        let Some(side) = self.book.lock().positions.get(symbol).map(|p| p.side) else {
            return Ok(ExecutionReport::flat(symbol.clone()));
        };
        let price = self
            .price(symbol)
            .await?
            .ok_or_else(|| CallError::rejected(format!("no price for {symbol}")))?;
        let fill = self.fill_price(price, !side.is_buy());

        let mut book = self.book.lock();
        let Some(position) = book.positions.remove(symbol) else {
            return Ok(ExecutionReport::flat(symbol.clone()));
        };
        let pnl = position.unrealised(fill);
        let fee = position.quantity * fill * self.commission_rate;
        book.cash += pnl - fee;

        tracing::info!(symbol = %symbol, price = %fill, pnl = %pnl.round_dp(2), "Paper close");
        Ok(Self::report(&mut book, symbol, position.quantity, fill, fee))
    }

    async fn last_price(&self, symbol: &Symbol) -> CallResult<Option<Decimal>> {
        self.price(symbol).await
    }
}
