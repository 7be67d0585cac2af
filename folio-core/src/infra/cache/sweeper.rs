use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::artifact_store::ArtifactStore;
use super::eviction::CacheBudget;

/// Background eviction task: one sweep at start, then one per interval.
#[derive(Debug)]
pub struct ArtifactSweeper {
    store: Arc<ArtifactStore>,
    budget: CacheBudget,
    interval: Duration,
}

impl ArtifactSweeper {
    pub fn new(
        store: Arc<ArtifactStore>,
        budget: CacheBudget,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            budget,
            interval: interval.max(Duration::from_secs(1)),
        }
    }

    /// Spawn the sweep loop on the current tokio runtime.
    pub fn start(self) -> SweeperHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                interval = %humantime::format_duration(self.interval),
                "artifact sweeper started"
            );

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    // The first tick completes immediately: that is the startup sweep.
                    _ = ticker.tick() => {
                        if let Err(e) = self.store.sweep(&self.budget).await {
                            warn!("artifact sweep failed: {e}");
                        }
                    }
                }
            }

            info!("artifact sweeper stopped");
        });

        SweeperHandle { cancel, join }
    }
}

/// Stop hook for a running [`ArtifactSweeper`].
#[derive(Debug)]
pub struct SweeperHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl SweeperHandle {
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancel the loop and wait for an in-flight sweep to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            warn!("artifact sweeper task ended abnormally: {e}");
        }
    }
}
