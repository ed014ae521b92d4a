//! The two long-running loops: the single-flight decision loop and the
//! optional push-mode trailing loop.
//!
//! Both share one [`CancellationToken`]. The trailing loop runs on a child
//! token, so cancelling the scheduler stops both.

use crate::engine::Engine;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct Scheduler {
    engine: Arc<Engine>,
    cancel: CancellationToken,
}

impl Scheduler {
    #[must_use]
    pub const fn new(engine: Arc<Engine>, cancel: CancellationToken) -> Self {
        Self { engine, cancel }
    }

    /// Runs until the token is cancelled.
    ///
    /// The first cycle starts immediately. The next one starts
    /// `analysis_interval` after the previous one finished, so cycles never
    /// overlap.
    pub async fn run(self) {
        let settings = self.engine.settings().clone();
        let trailing_task = settings.trailing_mode.pushes().then(|| {
            let trailing = Arc::clone(self.engine.trailing());
            tokio::spawn(trailing.run(settings.fast_tick, self.cancel.child_token()))
        });

        tracing::info!(
            interval_s = settings.analysis_interval.as_secs(),
            fast_tick_s = settings.fast_tick.as_secs(),
            trailing_mode = ?settings.trailing_mode,
            "Scheduler started"
        );
        self.engine.set_running(true);

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            self.engine.run_cycle(&self.cancel).await;

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(settings.analysis_interval) => {}
            }
        }

        self.engine.set_running(false);
        if let Some(task) = trailing_task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Trailing loop task failed");
            }
        }
        tracing::info!("Scheduler stopped");
    }

    /// Spawns [`Self::run`] on the runtime.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
