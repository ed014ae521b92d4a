//! Signal bundle and decision context types.
//!
//! A [`SignalBundle`] collects the outcome of every signal provider for one
//! symbol in one cycle. It is built once, never mutated, and feeds exactly one
//! decision call through a [`DecisionContext`].

use crate::types::{Position, Symbol};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Request sent to every signal provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub symbol: Symbol,
    pub interval: String,
    pub limit: u32,
}

/// Result of one provider call. A failed call keeps its error in the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalOutcome {
    pub ok: bool,
    pub payload: Value,
}

impl SignalOutcome {
    /// Wraps a provider response. `ok` is true only when the response carries
    /// `"ok": true`; a missing field or a non-object answer counts as failed.
    #[must_use]
    pub fn from_response(payload: Value) -> Self {
        let ok = payload.get("ok").and_then(Value::as_bool).unwrap_or(false);
        Self { ok, payload }
    }

    /// Soft failure in the `{ok: false, error}` shape.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            payload: json!({ "ok": false, "error": error.into() }),
        }
    }

    /// Error text of a failed outcome.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.payload.get("error").and_then(Value::as_str)
    }
}

/// Immutable per-symbol collection of provider outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalBundle {
    symbol: Symbol,
    captured_at: DateTime<Utc>,
    outcomes: BTreeMap<String, SignalOutcome>,
}

impl SignalBundle {
    #[must_use]
    pub fn new(symbol: Symbol, outcomes: BTreeMap<String, SignalOutcome>) -> Self {
        Self {
            symbol,
            captured_at: Utc::now(),
            outcomes,
        }
    }

    #[must_use]
    pub const fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    #[must_use]
    pub const fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    #[must_use]
    pub fn get(&self, provider: &str) -> Option<&SignalOutcome> {
        self.outcomes.get(provider)
    }

    /// True if `provider` answered and reported success.
    #[must_use]
    pub fn is_ok(&self, provider: &str) -> bool {
        self.outcomes.get(provider).is_some_and(|o| o.ok)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SignalOutcome)> {
        self.outcomes.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Everything the decision provider sees for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionContext {
    pub symbol: Symbol,
    pub signals: SignalBundle,
    /// Positions already held on this symbol.
    pub current_positions: Vec<Position>,
    pub equity: Decimal,
    pub max_positions: usize,
}

impl DecisionContext {
    /// Flat JSON form expected by the HTTP decision service: each provider's
    /// payload sits under its own name next to the account fields.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        let mut body = Map::new();
        body.insert("symbol".to_string(), json!(self.symbol));
        for (name, outcome) in self.signals.iter() {
            body.insert(name.to_string(), outcome.payload.clone());
        }
        body.insert(
            "current_positions".to_string(),
            json!(self.current_positions),
        );
        body.insert("equity".to_string(), json!(self.equity));
        body.insert("max_positions".to_string(), json!(self.max_positions));
        Value::Object(body)
    }
}
