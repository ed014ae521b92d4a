//! Decisions and the gateway that produces them.
//!
//! The decision provider answers with free-form text that is supposed to hold
//! a JSON object. [`DecisionGateway`] is the only way to obtain a [`Decision`]:
//! it parses the payload and coerces every field into range, so nothing
//! downstream ever sees an unchecked value.

use crate::signal::DecisionContext;
use crate::types::{Action, Side, Symbol};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const MIN_SIZE_PCT: f64 = 1.0;
pub const MAX_SIZE_PCT: f64 = 10.0;
pub const DEFAULT_SIZE_PCT: f64 = 1.0;
pub const MAX_REASON_CHARS: usize = 300;
pub const TARGET_LEVERAGE: f64 = 1.0;

/// The decision payload could not be read as a JSON object.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unparseable decision payload: {message}")]
pub struct ProtocolError {
    pub message: String,
    /// Start of the offending payload, for the log.
    pub excerpt: String,
}

impl ProtocolError {
    fn new(message: impl Into<String>, raw: &str) -> Self {
        Self {
            message: message.into(),
            excerpt: raw.chars().take(200).collect(),
        }
    }
}

/// A sanitised trading decision.
///
/// `side` is only ever present for [`Action::Open`]. An OPEN whose side could
/// not be recognised keeps `side = None`; the risk gate refuses it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    action: Action,
    side: Option<Side>,
    size_pct_balance: f64,
    target_leverage: f64,
    reason: String,
}

impl Decision {
    #[must_use]
    pub const fn action(&self) -> Action {
        self.action
    }

    #[must_use]
    pub const fn side(&self) -> Option<Side> {
        self.side
    }

    /// Percentage of equity to commit, always within `[1, 10]`.
    #[must_use]
    pub const fn size_pct_balance(&self) -> f64 {
        self.size_pct_balance
    }

    #[must_use]
    pub const fn target_leverage(&self) -> f64 {
        self.target_leverage
    }

    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Decision used when nothing should happen.
    #[must_use]
    pub fn hold(reason: impl Into<String>) -> Self {
        Self {
            action: Action::Hold,
            side: None,
            size_pct_balance: DEFAULT_SIZE_PCT,
            target_leverage: TARGET_LEVERAGE,
            reason: truncate_chars(reason.into().trim(), MAX_REASON_CHARS),
        }
    }
}

/// One ledger entry: what was asked and what was decided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    /// Epoch seconds.
    pub ts: i64,
    pub symbol: Symbol,
    pub context: DecisionContext,
    pub decision: Decision,
}

impl DecisionRecord {
    #[must_use]
    pub fn new(context: DecisionContext, decision: Decision) -> Self {
        Self {
            ts: chrono::Utc::now().timestamp(),
            symbol: context.symbol.clone(),
            context,
            decision,
        }
    }
}

/// Turns untrusted decision payloads into [`Decision`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecisionGateway;

impl DecisionGateway {
    /// Parses and sanitises a raw payload.
    ///
    /// Markdown code fences around the JSON are tolerated.
    ///
    /// # Errors
    /// Returns [`ProtocolError`] if the payload is not a JSON object.
    pub fn sanitize(raw: &str) -> Result<Decision, ProtocolError> {
        let body = strip_code_fence(raw);
        let value: Value =
            serde_json::from_str(body).map_err(|e| ProtocolError::new(e.to_string(), raw))?;
        Self::sanitize_value(&value).map_err(|e| ProtocolError::new(e.message, raw))
    }

    /// Sanitises an already-parsed payload.
    ///
    /// # Errors
    /// Returns [`ProtocolError`] if the value is not a JSON object.
    pub fn sanitize_value(value: &Value) -> Result<Decision, ProtocolError> {
        let Some(fields) = value.as_object() else {
            return Err(ProtocolError::new(
                "decision is not a JSON object",
                &value.to_string(),
            ));
        };

        let action = match fields.get("action").and_then(Value::as_str) {
            Some(raw) => match raw.trim().to_uppercase().as_str() {
                "OPEN" => Action::Open,
                "CLOSE" => Action::Close,
                _ => Action::Hold,
            },
            None => Action::Hold,
        };

        let side = if action == Action::Open {
            fields
                .get("side")
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<Side>().ok())
        } else {
            None
        };

        let size_pct_balance = fields
            .get("size_pct_balance")
            .and_then(number_like)
            .unwrap_or(DEFAULT_SIZE_PCT)
            .clamp(MIN_SIZE_PCT, MAX_SIZE_PCT);

        let reason = fields
            .get("reason")
            .and_then(Value::as_str)
            .map(|r| truncate_chars(r.trim(), MAX_REASON_CHARS))
            .unwrap_or_default();

        Ok(Decision {
            action,
            side,
            size_pct_balance,
            target_leverage: TARGET_LEVERAGE,
            reason,
        })
    }
}

/// Reads a finite number from a JSON number or numeric string.
fn number_like(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence line
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}
