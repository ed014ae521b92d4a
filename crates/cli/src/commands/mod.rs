//! CLI commands for the tradeloop engine.

pub mod check;
pub mod cycle;
pub mod decisions;
pub mod run;
pub mod tick;

pub use check::run_check;
pub use cycle::run_cycle;
pub use decisions::{run_decisions, DecisionsArgs};
pub use run::{run_loop, RunArgs};
pub use tick::{run_tick, TickArgs};

use tokio_util::sync::CancellationToken;

/// Token cancelled on the first Ctrl+C.
pub(crate) fn ctrl_c_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received Ctrl+C, shutting down");
                token.cancel();
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C"),
        }
    });
    cancel
}
