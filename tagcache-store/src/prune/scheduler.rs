//! Periodic pruning.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::store::RedisStore;

/// Runs [`RedisStore::prune`] on a fixed interval in a background task.
///
/// The first run happens one full interval after spawning. A failed run is
/// logged and the schedule continues. Dropping the scheduler stops it.
///
/// ```rust,ignore
/// let store = Arc::new(RedisStore::connect(config).await?);
/// let scheduler = PruneScheduler::spawn(store, Duration::from_secs(300));
/// ```
#[derive(Debug)]
pub struct PruneScheduler {
    handle: JoinHandle<()>,
    runs: Arc<AtomicU64>,
}

impl PruneScheduler {
    /// Start pruning `store` every `every`.
    pub fn spawn(store: Arc<RedisStore>, every: Duration) -> Self {
        let every = every.max(Duration::from_millis(1));
        let runs = Arc::new(AtomicU64::new(0));
        let counter = runs.clone();

        info!(interval = ?every, mode = %store.tag_mode(), "Starting prune scheduler");

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match store.prune().await {
                    Ok(report) => {
                        info!(
                            mode = %report.mode(),
                            removed = report.removed(),
                            failed = report.failed_tags(),
                            "Scheduled prune finished"
                        );
                    }
                    Err(err) => warn!(error = %err, "Scheduled prune failed"),
                }
                counter.fetch_add(1, Ordering::Relaxed);
            }
        });

        Self { handle, runs }
    }

    /// Completed runs, successful or not.
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stop the schedule. A run in progress is cancelled at its next await.
    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for PruneScheduler {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
