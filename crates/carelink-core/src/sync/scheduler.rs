//! Periodic background reconcile task

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::coordinator::{ReconcileReport, SyncCoordinator};

/// Run one reconcile pass over every coordinator.
///
/// A coordinator whose local cache fails is logged and skipped.
pub async fn reconcile_all(coordinators: &[Arc<SyncCoordinator>]) -> ReconcileReport {
    let mut total = ReconcileReport::default();
    for coordinator in coordinators {
        match coordinator.background_reconcile().await {
            Ok(report) => total.merge(report),
            Err(error) => tracing::warn!(
                "Reconcile of {} failed: {error}",
                coordinator.feature().name
            ),
        }
    }
    total
}

/// Handle to the spawned reconcile loop
#[derive(Debug)]
pub struct ReconcileScheduler {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ReconcileScheduler {
    /// Spawn a task reconciling every `interval` until shut down.
    ///
    /// The first pass runs one full interval after spawning.
    pub fn spawn(coordinators: Vec<Arc<SyncCoordinator>>, interval: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let period = interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!("Background reconcile every {period:?}");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = reconcile_all(&coordinators).await;
                        if report.attempted > 0 {
                            tracing::debug!("Reconcile pass finished: {report:?}");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Background reconcile stopped");
        });

        Self { shutdown, handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Signal the loop to stop and wait for it.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(error) = self.handle.await {
            tracing::warn!("Reconcile task ended abnormally: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryBackup;
    use crate::config::FeatureConfig;
    use crate::db::LibSqlLocalCache;
    use serde_json::json;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reconcile_all_sums_reports() {
        let cache = Arc::new(LibSqlLocalCache::open_in_memory().await.unwrap());
        let memory = Arc::new(MemoryBackup::new());
        let notes = Arc::new(SyncCoordinator::new(
            FeatureConfig::notes(),
            "d",
            None,
            cache.clone(),
            memory.clone(),
        ));
        let settings = Arc::new(SyncCoordinator::new(
            FeatureConfig::settings(),
            "d",
            None,
            cache,
            memory,
        ));
        notes.write("a", json!(1)).await.unwrap();
        settings.write("theme", json!("dark")).await.unwrap();

        let report = reconcile_all(&[notes, settings]).await;
        assert_eq!(report.still_pending, 2);
        assert_eq!(report.attempted, 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_stops_task() {
        let scheduler = ReconcileScheduler::spawn(Vec::new(), Duration::from_secs(3600));
        assert!(scheduler.is_running());
        tokio::time::timeout(Duration::from_secs(5), scheduler.shutdown())
            .await
            .unwrap();
    }
}
