pub mod risk_gate;
pub mod trailing;

#[cfg(test)]
mod test_support;

pub use risk_gate::{GateOutcome, RiskConfig, RiskGate};
pub use trailing::{
    ratchet, RatchetStep, TickOutcome, TrailingConfig, TrailingStatus, TrailingStopEngine,
};
