//! Long-running mode: decision loop, trailing loop and web API until Ctrl+C.

use super::ctrl_c_token;
use crate::wiring::build_engine;
use anyhow::{Context, Result};
use clap::Args;
use std::sync::Arc;
use tradeloop_core::AppConfig;
use tradeloop_orchestrator::Scheduler;
use tradeloop_web_api::ApiServer;

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Override the API listen address from the config
    #[arg(long)]
    pub api_addr: Option<String>,

    /// Do not start the web API
    #[arg(long)]
    pub no_api: bool,
}

/// Runs the scheduler (and the API) until Ctrl+C or an API failure.
///
/// # Errors
/// Returns an error if the engine cannot be built or the API fails.
pub async fn run_loop(config: &AppConfig, args: RunArgs) -> Result<()> {
    let engine = build_engine(config).await?;
    let cancel = ctrl_c_token();

    tracing::info!(
        venue = engine.adapter().venue(),
        max_positions = config.max_positions,
        interval_s = config.analysis_interval_seconds,
        trailing_mode = ?config.trailing_mode,
        "Starting decision loop"
    );
    let scheduler = Scheduler::new(Arc::clone(&engine), cancel.clone()).spawn();

    let api = if args.no_api {
        None
    } else {
        let addr = args.api_addr.unwrap_or_else(|| config.api_addr.clone());
        let server = ApiServer::new(Arc::clone(&engine));
        let token = cancel.clone();
        Some(tokio::spawn(async move {
            let result = server.serve(&addr, token.clone()).await;
            if result.is_err() {
                // Without the API the process is not observable; stop everything
                token.cancel();
            }
            result
        }))
    };

    cancel.cancelled().await;

    scheduler.await.context("Scheduler task panicked")?;
    if let Some(api) = api {
        api.await
            .context("Web API task panicked")?
            .context("Web API failed")?;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
