//! Live execution on Hyperliquid perpetuals.
//!
//! Orders are immediate-or-cancel limits priced 5% through the mid, which
//! behaves like a market order with price protection. Closes send the
//! opposite side with `reduceOnly` set for the full position size.

use crate::client::HyperliquidClient;
use crate::signing::signed_request;
use crate::wallet::WalletConfig;
use async_trait::async_trait;
use ethers::signers::LocalWallet;
use parking_lot::Mutex;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use tradeloop_core::{
    CallError, CallResult, ExecutionAdapter, ExecutionReport, OpenRequest, Position, Side, Symbol,
};

/// Price protection applied to IOC orders (5%).
pub const SLIPPAGE: Decimal = Decimal::from_parts(5, 0, 0, false, 2);
const PRICE_SIG_FIGS: u32 = 5;
const MAX_PRICE_DECIMALS: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetMeta {
    pub index: u32,
    pub sz_decimals: u32,
}

/// Reads a decimal that the API may send as a string or a number.
pub(crate) fn decimal_at(value: &Value, key: &str) -> CallResult<Decimal> {
    let field = value
        .get(key)
        .ok_or_else(|| CallError::Decode(format!("missing field {key}")))?;
    let text = match field {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => return Err(CallError::Decode(format!("field {key} is not numeric: {other}"))),
    };
    Decimal::from_str(&text).map_err(|e| CallError::Decode(format!("field {key}: {e}")))
}

/// Protected limit price: mid moved by [`SLIPPAGE`] against us, five
/// significant figures, at most `6 - szDecimals` decimals.
#[must_use]
pub fn protected_price(mid: Decimal, is_buy: bool, sz_decimals: u32) -> Decimal {
    let raw = if is_buy {
        mid * (Decimal::ONE + SLIPPAGE)
    } else {
        mid * (Decimal::ONE - SLIPPAGE)
    };
    let sig = raw.round_sf(PRICE_SIG_FIGS).unwrap_or(raw);
    sig.round_dp(MAX_PRICE_DECIMALS.saturating_sub(sz_decimals))
        .normalize()
}

/// Order size in coins, truncated to the asset's lot precision.
#[must_use]
pub fn order_size(size_usd: Decimal, price: Decimal, sz_decimals: u32) -> Decimal {
    if price <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (size_usd / price)
        .round_dp_with_strategy(sz_decimals, RoundingStrategy::ToZero)
        .normalize()
}

pub(crate) fn parse_meta(meta: &Value) -> CallResult<HashMap<String, AssetMeta>> {
    let universe = meta
        .get("universe")
        .and_then(Value::as_array)
        .ok_or_else(|| CallError::Decode("meta has no universe".to_string()))?;

    let mut assets = HashMap::with_capacity(universe.len());
    for (index, asset) in universe.iter().enumerate() {
        let Some(name) = asset.get("name").and_then(Value::as_str) else {
            continue;
        };
        let sz_decimals = asset
            .get("szDecimals")
            .and_then(Value::as_u64)
            .and_then(|d| u32::try_from(d).ok())
            .unwrap_or(0);
        let index = u32::try_from(index)
            .map_err(|_| CallError::Decode("asset index overflow".to_string()))?;
        assets.insert(name.to_string(), AssetMeta { index, sz_decimals });
    }
    Ok(assets)
}

pub(crate) fn parse_mid(mids: &Value, symbol: &Symbol) -> CallResult<Option<Decimal>> {
    if mids.get(symbol.as_str()).is_none() {
        return Ok(None);
    }
    decimal_at(mids, symbol.as_str()).map(Some)
}

pub(crate) fn parse_equity(state: &Value) -> CallResult<Decimal> {
    let summary = state
        .get("marginSummary")
        .ok_or_else(|| CallError::Decode("missing marginSummary".to_string()))?;
    decimal_at(summary, "accountValue")
}

/// Signed coin size and position list from `clearinghouseState`.
pub(crate) fn parse_positions(state: &Value) -> CallResult<Vec<(Position, Decimal)>> {
    let Some(entries) = state.get("assetPositions").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };

    let mut positions = Vec::new();
    for entry in entries {
        let Some(p) = entry.get("position") else {
            continue;
        };
        let szi = decimal_at(p, "szi")?;
        if szi.is_zero() {
            continue;
        }
        let coin = p
            .get("coin")
            .and_then(Value::as_str)
            .ok_or_else(|| CallError::Decode("position without coin".to_string()))?;
        let entry_price = decimal_at(p, "entryPx")?;
        let size_usd = decimal_at(p, "positionValue").unwrap_or(szi.abs() * entry_price);
        let pnl = decimal_at(p, "unrealizedPnl").unwrap_or(Decimal::ZERO);
        let leverage = p
            .get("leverage")
            .and_then(|l| l.get("value"))
            .and_then(Value::as_f64)
            .unwrap_or(1.0);

        positions.push((
            Position {
                symbol: Symbol::from(coin),
                side: if szi.is_sign_positive() { Side::Long } else { Side::Short },
                size_usd: size_usd.abs(),
                entry_price,
                pnl,
                leverage,
                ts_open: 0,
            },
            szi,
        ));
    }
    Ok(positions)
}

/// Turns an `/exchange` order response into a report.
pub(crate) fn parse_order_response(symbol: &Symbol, response: &Value) -> CallResult<ExecutionReport> {
    let status = response
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| CallError::Decode("missing status in order response".to_string()))?;

    if status != "ok" {
        let error = response
            .get("response")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(CallError::rejected(format!("order failed: {error}")));
    }

    let first_status = response
        .get("response")
        .and_then(|r| r.get("data"))
        .and_then(|d| d.get("statuses"))
        .and_then(Value::as_array)
        .and_then(|s| s.first())
        .ok_or_else(|| CallError::Decode("no order status in response".to_string()))?;

    if let Some(error) = first_status.get("error").and_then(Value::as_str) {
        return Err(CallError::rejected(error));
    }

    let filled = first_status
        .get("filled")
        .ok_or_else(|| CallError::rejected("order not filled"))?;

    Ok(ExecutionReport {
        symbol: symbol.clone(),
        order_id: filled
            .get("oid")
            .and_then(Value::as_u64)
            .map(|o| o.to_string()),
        filled_size: decimal_at(filled, "totalSz").unwrap_or(Decimal::ZERO),
        avg_price: decimal_at(filled, "avgPx").ok(),
        detail: response.clone(),
    })
}

pub struct HyperliquidAdapter {
    client: HyperliquidClient,
    wallet_config: WalletConfig,
    wallet: LocalWallet,
    assets: Mutex<Option<HashMap<String, AssetMeta>>>,
}

impl std::fmt::Debug for HyperliquidAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HyperliquidAdapter")
            .field("client", &self.client)
            .field("account", &self.wallet_config.account_address)
            .finish_non_exhaustive()
    }
}

impl HyperliquidAdapter {
    /// # Errors
    /// Returns an error if the signing key cannot be parsed.
    pub fn new(client: HyperliquidClient, wallet_config: WalletConfig) -> anyhow::Result<Self> {
        let wallet = wallet_config.wallet()?;
        Ok(Self {
            client,
            wallet_config,
            wallet,
            assets: Mutex::new(None),
        })
    }

    async fn asset(&self, symbol: &Symbol) -> CallResult<AssetMeta> {
        let cached = self.assets.lock().as_ref().and_then(|a| a.get(symbol.as_str()).copied());
        if let Some(meta) = cached {
            return Ok(meta);
        }

        let assets = parse_meta(&self.client.meta().await?)?;
        let meta = assets.get(symbol.as_str()).copied();
        *self.assets.lock() = Some(assets);
        meta.ok_or_else(|| CallError::config(format!("unknown asset {symbol}")))
    }

    async fn mid(&self, symbol: &Symbol) -> CallResult<Decimal> {
        parse_mid(&self.client.all_mids().await?, symbol)?
            .ok_or_else(|| CallError::rejected(format!("no mid price for {symbol}")))
    }

    async fn state(&self) -> CallResult<Value> {
        self.client
            .clearinghouse_state(&self.wallet_config.account_address)
            .await
    }

    async fn submit(
        &self,
        symbol: &Symbol,
        asset: AssetMeta,
        is_buy: bool,
        size: Decimal,
        price: Decimal,
        reduce_only: bool,
    ) -> CallResult<ExecutionReport> {
        let action = json!({
            "type": "order",
            "orders": [{
                "a": asset.index,
                "b": is_buy,
                "p": price.to_string(),
                "s": size.to_string(),
                "r": reduce_only,
                "t": { "limit": { "tif": "Ioc" } },
            }],
            "grouping": "na",
        });

        let nonce = self.wallet_config.next_nonce();
        let body = signed_request(&self.wallet, action, nonce)
            .await
            .map_err(|e| CallError::config(format!("signing failed: {e}")))?;
        let response = self.client.post("/exchange", &body).await?;
        parse_order_response(symbol, &response)
    }
}

#[async_trait]
impl ExecutionAdapter for HyperliquidAdapter {
    fn venue(&self) -> &str {
        "hyperliquid"
    }

    async fn account_equity(&self) -> CallResult<Decimal> {
        parse_equity(&self.state().await?)
    }

    async fn open_positions(&self) -> CallResult<Vec<Position>> {
        Ok(parse_positions(&self.state().await?)?
            .into_iter()
            .map(|(position, _)| position)
            .collect())
    }

    async fn open_position(&self, request: &OpenRequest) -> CallResult<ExecutionReport> {
        request.validate()?;
        let asset = self.asset(&request.symbol).await?;
        let mid = self.mid(&request.symbol).await?;
        let is_buy = request.side.is_buy();

        let size = order_size(request.size_usd, mid, asset.sz_decimals);
        if size <= Decimal::ZERO {
            return Err(CallError::rejected(format!(
                "${} is below the lot size of {}",
                request.size_usd, request.symbol
            )));
        }
        let price = protected_price(mid, is_buy, asset.sz_decimals);

        tracing::info!(
            symbol = %request.symbol,
            side = %request.side,
            size = %size,
            limit = %price,
            "Submitting IOC order"
        );
        self.submit(&request.symbol, asset, is_buy, size, price, false).await
    }

    async fn close_position(&self, symbol: &Symbol) -> CallResult<ExecutionReport> {
        let positions = parse_positions(&self.state().await?)?;
        let Some((position, szi)) = positions.into_iter().find(|(p, _)| &p.symbol == symbol) else {
            return Ok(ExecutionReport::flat(symbol.clone()));
        };

        let asset = self.asset(symbol).await?;
        let mid = self.mid(symbol).await?;
        let is_buy = !position.side.is_buy();
        let price = protected_price(mid, is_buy, asset.sz_decimals);

        tracing::info!(symbol = %symbol, size = %szi.abs(), limit = %price, "Submitting reduce-only close");
        self.submit(symbol, asset, is_buy, szi.abs(), price, true).await
    }

    async fn last_price(&self, symbol: &Symbol) -> CallResult<Option<Decimal>> {
        parse_mid(&self.client.all_mids().await?, symbol)
    }
}
