pub mod config;
pub mod config_loader;
pub mod decision;
pub mod error;
pub mod events;
pub mod health;
pub mod persistence;
pub mod retry;
pub mod signal;
pub mod traits;
pub mod types;

pub use config::{AppConfig, ExchangeKind, SignalEndpoint, TrailingMode};
pub use config_loader::ConfigLoader;
pub use decision::{Decision, DecisionGateway, DecisionRecord, ProtocolError};
pub use error::{CallError, CallResult};
pub use events::{BoundedLog, EquityPoint, EventKind, EventLevel, EventLog, ManagementEvent};
pub use health::HealthStatus;
pub use persistence::PersistenceError;
pub use retry::{retry, RetryExhausted, RetryPolicy};
pub use signal::{AnalysisRequest, DecisionContext, SignalBundle, SignalOutcome};
pub use traits::{DecisionProvider, ExecutionAdapter, LedgerStore, SignalProvider, TrailingStore};
pub use types::{
    decimal_from_f64, Action, CycleSnapshot, ExecutionReport, OpenRequest, Position, Side, Symbol,
    TrailingState,
};
