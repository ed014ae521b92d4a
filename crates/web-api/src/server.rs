use crate::handlers;
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tradeloop_orchestrator::Engine;

pub struct ApiServer {
    engine: Arc<Engine>,
}

impl ApiServer {
    #[must_use]
    pub const fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/health", get(handlers::health))
            .route("/api/positions", get(handlers::positions))
            .route("/api/trailing", get(handlers::trailing))
            .route("/api/decisions", get(handlers::decisions))
            .route("/api/events", get(handlers::events))
            .route("/api/equity", get(handlers::equity))
            .route("/api/cycle", get(handlers::last_cycle))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(Arc::clone(&self.engine))
    }

    /// Serves the API on `addr` until `cancel` fires.
    ///
    /// # Errors
    /// Returns an error if the server fails to bind to the address or serve requests.
    pub async fn serve(self, addr: &str, cancel: CancellationToken) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Web API listening on {}", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;

        tracing::info!("Web API stopped");
        Ok(())
    }
}
