use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tradeloop_core::{DecisionRecord, EquityPoint, HealthStatus, ManagementEvent, Position, Symbol};
use tradeloop_orchestrator::{CycleReport, Engine};

pub const DEFAULT_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

impl LimitQuery {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT)
    }
}

/// One armed trailing stop.
#[derive(Debug, Serialize)]
pub struct TrailingEntry {
    pub symbol: Symbol,
    pub sl_pct: Decimal,
    pub armed_at: DateTime<Utc>,
}

/// Liveness: ok while the decision loop is running.
///
/// Answers 503 with the same body when the scheduler is not running.
pub async fn health(State(engine): State<Arc<Engine>>) -> (StatusCode, Json<HealthStatus>) {
    let mut status = engine.health().await;
    let running = engine.is_running();
    if let Some(error) = status.error.take() {
        status.details.insert("components_error".to_string(), error.into());
    }
    status.ok = running;
    if !running {
        status.error = Some("scheduler not running".to_string());
    }

    let code = if running {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

/// Open positions as reported by the venue right now.
///
/// # Errors
/// Returns `StatusCode::BAD_GATEWAY` if the venue cannot be read.
pub async fn positions(
    State(engine): State<Arc<Engine>>,
) -> Result<Json<Vec<Position>>, StatusCode> {
    let positions = engine.adapter().open_positions().await.map_err(|e| {
        tracing::warn!(error = %e, "Failed to read positions for API");
        StatusCode::BAD_GATEWAY
    })?;
    Ok(Json(positions))
}

/// Armed trailing stops.
///
/// # Errors
/// Returns `StatusCode::INTERNAL_SERVER_ERROR` if the trailing store cannot be read.
pub async fn trailing(
    State(engine): State<Arc<Engine>>,
) -> Result<Json<Vec<TrailingEntry>>, StatusCode> {
    let armed = engine.trailing().armed().await.map_err(|e| {
        tracing::error!(error = %e, "Failed to read trailing state for API");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(
        armed
            .into_iter()
            .map(|(symbol, state)| TrailingEntry {
                symbol,
                sl_pct: state.sl_pct,
                armed_at: state.armed_at,
            })
            .collect(),
    ))
}

/// Most recent ledger entries, newest first.
pub async fn decisions(
    State(engine): State<Arc<Engine>>,
    Query(query): Query<LimitQuery>,
) -> Json<Vec<DecisionRecord>> {
    Json(engine.ledger().recent(query.limit()).await)
}

/// Most recent management events, newest first.
pub async fn events(
    State(engine): State<Arc<Engine>>,
    Query(query): Query<LimitQuery>,
) -> Json<Vec<ManagementEvent>> {
    Json(engine.events().recent(query.limit()))
}

/// Equity history, oldest first.
pub async fn equity(State(engine): State<Arc<Engine>>) -> Json<Vec<EquityPoint>> {
    Json(engine.equity_history())
}

/// Report of the last finished cycle.
///
/// # Errors
/// Returns `StatusCode::NOT_FOUND` until the first cycle has finished.
pub async fn last_cycle(
    State(engine): State<Arc<Engine>>,
) -> Result<Json<CycleReport>, StatusCode> {
    engine.last_cycle().map(Json).ok_or(StatusCode::NOT_FOUND)
}
