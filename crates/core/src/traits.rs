use crate::decision::DecisionRecord;
use crate::error::CallResult;
use crate::health::HealthStatus;
use crate::persistence::PersistenceError;
use crate::signal::{AnalysisRequest, DecisionContext};
use crate::types::{ExecutionReport, OpenRequest, Position, Symbol, TrailingState};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;

/// Produces one named market signal for a symbol.
#[async_trait]
pub trait SignalProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn analyze(&self, request: &AnalysisRequest) -> CallResult<Value>;

    async fn health(&self) -> HealthStatus {
        HealthStatus::healthy().with_detail("provider", self.name())
    }
}

/// Turns a decision context into an unstructured recommendation.
///
/// The returned text is untrusted; it goes through
/// [`crate::DecisionGateway::sanitize`] before anything acts on it.
#[async_trait]
pub trait DecisionProvider: Send + Sync {
    async fn decide(&self, context: &DecisionContext) -> CallResult<String>;

    async fn health(&self) -> HealthStatus {
        HealthStatus::healthy()
    }
}

/// Execution boundary to a trading venue.
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    /// Short venue name used in logs and health output.
    fn venue(&self) -> &str;

    async fn account_equity(&self) -> CallResult<Decimal>;

    async fn open_positions(&self) -> CallResult<Vec<Position>>;

    async fn open_position(&self, request: &OpenRequest) -> CallResult<ExecutionReport>;

    async fn close_position(&self, symbol: &Symbol) -> CallResult<ExecutionReport>;

    /// Last traded or mark price, `None` if the venue has no quote.
    async fn last_price(&self, symbol: &Symbol) -> CallResult<Option<Decimal>>;

    /// Moves the venue-side stop order, for venues that keep one.
    async fn sync_stop(&self, _symbol: &Symbol, _stop_price: Decimal) -> CallResult<()> {
        Ok(())
    }

    async fn health(&self) -> HealthStatus {
        match self.account_equity().await {
            Ok(equity) => HealthStatus::healthy()
                .with_detail("venue", self.venue())
                .with_detail("equity", equity.to_string()),
            Err(e) => HealthStatus::unhealthy(e.to_string()).with_detail("venue", self.venue()),
        }
    }
}

/// Storage for per-symbol trailing stop state.
#[async_trait]
pub trait TrailingStore: Send + Sync {
    async fn get(&self, symbol: &Symbol) -> Result<Option<TrailingState>, PersistenceError>;

    async fn put(&self, symbol: &Symbol, state: TrailingState) -> Result<(), PersistenceError>;

    async fn remove(&self, symbol: &Symbol) -> Result<(), PersistenceError>;

    async fn symbols(&self) -> Result<Vec<Symbol>, PersistenceError>;
}

/// Whole-collection storage behind the decision ledger.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn load(&self) -> Result<Vec<DecisionRecord>, PersistenceError>;

    async fn save(&self, records: &[DecisionRecord]) -> Result<(), PersistenceError>;
}
