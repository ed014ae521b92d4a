use crate::error::CallError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Market identifier, e.g. `BTC`. Venue-specific spelling is the adapter's concern.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    #[must_use]
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Symbol {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Short => "short",
        }
    }

    /// True when opening this side means buying.
    #[must_use]
    pub const fn is_buy(self) -> bool {
        matches!(self, Self::Long)
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "long" => Ok(Self::Long),
            "short" => Ok(Self::Short),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Open,
    Close,
    Hold,
}

impl Action {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Close => "CLOSE",
            Self::Hold => "HOLD",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Open position as reported by the venue. Re-read every cycle, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub side: Side,
    pub size_usd: Decimal,
    pub entry_price: Decimal,
    pub pnl: Decimal,
    #[serde(default = "default_leverage")]
    pub leverage: f64,
    /// Epoch seconds, 0 when the venue does not report it.
    #[serde(default)]
    pub ts_open: i64,
}

const fn default_leverage() -> f64 {
    1.0
}

/// Request forwarded to [`crate::ExecutionAdapter::open_position`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenRequest {
    pub symbol: Symbol,
    pub side: Side,
    pub size_usd: Decimal,
    /// Initial stop distance as a positive fraction (0.02 = 2%).
    pub sl_pct: Decimal,
}

impl OpenRequest {
    /// Rejects requests no venue should ever see.
    ///
    /// # Errors
    /// Returns [`CallError::Rejected`] when the notional is not positive or the
    /// stop distance is outside `(0, 1)`.
    pub fn validate(&self) -> Result<(), CallError> {
        if self.size_usd <= Decimal::ZERO {
            return Err(CallError::rejected(format!(
                "invalid size_usd {} for {}",
                self.size_usd, self.symbol
            )));
        }
        if self.sl_pct <= Decimal::ZERO || self.sl_pct >= Decimal::ONE {
            return Err(CallError::rejected(format!(
                "invalid sl_pct {} for {}",
                self.sl_pct, self.symbol
            )));
        }
        Ok(())
    }
}

/// Result of a confirmed open or close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub symbol: Symbol,
    pub order_id: Option<String>,
    pub filled_size: Decimal,
    pub avg_price: Option<Decimal>,
    /// Venue response kept for the log.
    #[serde(default)]
    pub detail: serde_json::Value,
}

impl ExecutionReport {
    /// Report for a close that found nothing to close.
    #[must_use]
    pub fn flat(symbol: Symbol) -> Self {
        Self {
            symbol,
            order_id: None,
            filled_size: Decimal::ZERO,
            avg_price: None,
            detail: serde_json::json!({ "note": "no open position" }),
        }
    }
}

/// Per-symbol stop ratchet value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrailingState {
    /// Signed fraction of entry: negative is a loss-limiting stop, positive locks profit.
    pub sl_pct: Decimal,
    pub armed_at: DateTime<Utc>,
}

impl TrailingState {
    #[must_use]
    pub fn armed(initial_sl_pct: Decimal) -> Self {
        Self {
            sl_pct: -initial_sl_pct.abs(),
            armed_at: Utc::now(),
        }
    }
}

/// Equity and positions captured once at the start of a decision cycle.
#[derive(Debug, Serialize)]
pub struct CycleSnapshot {
    pub equity: Decimal,
    pub positions: Vec<Position>,
    pub taken_at: DateTime<Utc>,
    #[serde(skip)]
    opened: AtomicUsize,
}

impl CycleSnapshot {
    #[must_use]
    pub fn new(equity: Decimal, positions: Vec<Position>) -> Self {
        Self {
            equity,
            positions,
            taken_at: Utc::now(),
            opened: AtomicUsize::new(0),
        }
    }

    /// Number of positions open when the snapshot was taken.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.positions.len()
    }

    /// Atomically reserves an open slot against `max_positions`.
    ///
    /// Returns false if the cap is already reached.
    pub fn try_reserve_open(&self, max_positions: usize) -> bool {
        let base = self.positions.len();
        self.opened
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |opened| {
                (base + opened < max_positions).then_some(opened + 1)
            })
            .is_ok()
    }

    /// Releases a slot reserved by [`Self::try_reserve_open`] after a failed open.
    pub fn release_open(&self) {
        let _ = self
            .opened
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |opened| {
                opened.checked_sub(1)
            });
    }

    /// Positions held on `symbol`.
    #[must_use]
    pub fn positions_for(&self, symbol: &Symbol) -> Vec<Position> {
        self.positions
            .iter()
            .filter(|p| &p.symbol == symbol)
            .cloned()
            .collect()
    }
}

/// Converts an `f64` to `Decimal` through its shortest decimal representation,
/// so `0.02` becomes exactly `0.02`.
///
/// # Errors
/// Returns an error for NaN or infinite input.
pub fn decimal_from_f64(value: f64) -> anyhow::Result<Decimal> {
    if !value.is_finite() {
        anyhow::bail!("cannot convert non-finite value {value} to decimal");
    }
    Ok(Decimal::from_str(&value.to_string())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(symbol: &str) -> Position {
        Position {
            symbol: Symbol::from(symbol),
            side: Side::Long,
            size_usd: dec!(100),
            entry_price: dec!(10),
            pnl: Decimal::ZERO,
            leverage: 1.0,
            ts_open: 0,
        }
    }

    #[test]
    fn test_side_parsing_is_case_insensitive() {
        assert_eq!("LONG".parse::<Side>(), Ok(Side::Long));
        assert_eq!(" short ".parse::<Side>(), Ok(Side::Short));
        assert!("buy".parse::<Side>().is_err());
    }

    #[test]
    fn test_wire_spelling() {
        assert_eq!(serde_json::to_string(&Side::Short).unwrap(), "\"short\"");
        assert_eq!(serde_json::to_string(&Action::Close).unwrap(), "\"CLOSE\"");
        assert_eq!(serde_json::to_string(&Symbol::from("BTC")).unwrap(), "\"BTC\"");
    }

    #[test]
    fn test_position_defaults_on_deserialize() {
        let p: Position = serde_json::from_str(
            r#"{"symbol":"ETH","side":"short","size_usd":"50","entry_price":"3000","pnl":"0"}"#,
        )
        .unwrap();
        assert_eq!(p.leverage, 1.0);
        assert_eq!(p.ts_open, 0);
        assert_eq!(p.side, Side::Short);
    }

    #[test]
    fn test_open_request_validation() {
        let mut req = OpenRequest {
            symbol: Symbol::from("BTC"),
            side: Side::Long,
            size_usd: dec!(50),
            sl_pct: dec!(0.02),
        };
        assert!(req.validate().is_ok());

        req.size_usd = Decimal::ZERO;
        assert!(matches!(req.validate(), Err(CallError::Rejected(_))));

        req.size_usd = dec!(50);
        req.sl_pct = dec!(1.5);
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_trailing_state_arms_negative() {
        assert_eq!(TrailingState::armed(dec!(0.02)).sl_pct, dec!(-0.02));
        assert_eq!(TrailingState::armed(dec!(-0.03)).sl_pct, dec!(-0.03));
    }

    #[test]
    fn test_snapshot_reservation_respects_cap() {
        let snapshot = CycleSnapshot::new(dec!(1000), vec![position("BTC"), position("ETH")]);
        assert_eq!(snapshot.open_count(), 2);

        assert!(snapshot.try_reserve_open(3));
        assert!(!snapshot.try_reserve_open(3));
        // Literal count is unaffected by reservations
        assert_eq!(snapshot.open_count(), 2);

        snapshot.release_open();
        assert!(snapshot.try_reserve_open(3));
    }

    #[test]
    fn test_positions_for_filters_symbol() {
        let snapshot = CycleSnapshot::new(dec!(1000), vec![position("BTC"), position("ETH")]);
        let btc = snapshot.positions_for(&Symbol::from("BTC"));
        assert_eq!(btc.len(), 1);
        assert_eq!(btc[0].symbol.as_str(), "BTC");
    }

    #[test]
    fn test_decimal_from_f64_is_exact() {
        assert_eq!(decimal_from_f64(0.02).unwrap(), dec!(0.02));
        assert_eq!(decimal_from_f64(2.5).unwrap(), dec!(2.5));
        assert!(decimal_from_f64(f64::NAN).is_err());
    }
}
