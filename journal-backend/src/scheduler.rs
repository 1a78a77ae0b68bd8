use crate::session::SessionStore;
use crate::sync::SyncOrchestrator;
use crate::tracker::{MessageDeleter, MessageTracker};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Intervals for the background loops, overridable in tests.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// How often the retention sweep runs.
    pub retention_interval: Duration,
    /// Backoff after a failed timer-mode sync.
    pub sync_backoff: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            retention_interval: Duration::from_secs(600),
            sync_backoff: Duration::from_secs(60),
        }
    }
}

/// Owns the two long-lived background loops: the retention sweep over
/// tracked messages and sessions, and the optional fixed-interval repo
/// sync. Both loops log failures and keep going; only the shutdown signal
/// stops them.
pub struct Scheduler {
    tracker: Arc<MessageTracker>,
    sessions: Arc<SessionStore>,
    sync: Arc<SyncOrchestrator>,
    deleter: Arc<dyn MessageDeleter>,
    sync_interval: Option<Duration>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(
        tracker: Arc<MessageTracker>,
        sessions: Arc<SessionStore>,
        sync: Arc<SyncOrchestrator>,
        deleter: Arc<dyn MessageDeleter>,
        sync_interval: Option<Duration>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            tracker,
            sessions,
            sync,
            deleter,
            sync_interval,
            config,
        }
    }

    /// Run until the shutdown signal fires.
    pub async fn start(self: Arc<Self>, shutdown_rx: oneshot::Receiver<()>) {
        let retention = {
            let scheduler = Arc::clone(&self);
            tokio::spawn(async move { scheduler.run_retention_loop().await })
        };

        let timer_sync = self.sync_interval.map(|interval| {
            let scheduler = Arc::clone(&self);
            tokio::spawn(async move { scheduler.run_sync_loop(interval).await })
        });

        let _ = shutdown_rx.await;
        log::info!("Scheduler shutting down");
        retention.abort();
        if let Some(task) = timer_sync {
            task.abort();
        }
    }

    async fn run_retention_loop(&self) {
        log::info!(
            "Message auto-deletion loop started: sweep every {:?}",
            self.config.retention_interval
        );
        loop {
            let removed = self.tracker.sweep_expired(self.deleter.as_ref()).await;
            if removed > 0 {
                log::info!("Retention sweep removed {} tracked messages", removed);
            }
            let expired = self.sessions.sweep_expired();
            if expired > 0 {
                log::info!("Retention sweep removed {} expired sessions", expired);
            }
            tokio::time::sleep(self.config.retention_interval).await;
        }
    }

    async fn run_sync_loop(&self, interval: Duration) {
        log::info!("Background sync started: every {:?}", interval);
        loop {
            tokio::time::sleep(interval).await;
            log::info!("Background sync triggered...");
            if !self.sync.sync(None).await {
                log::error!("Background sync failed, retrying after backoff");
                tokio::time::sleep(self.config.sync_backoff).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDeleter {
        deleted: AtomicUsize,
    }

    #[async_trait]
    impl MessageDeleter for CountingDeleter {
        async fn delete(&self, _chat_id: i64, _message_id: i32) -> Result<(), String> {
            self.deleted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_retention_loop_sweeps_and_survives() {
        // Retention of 0 hours makes every tracked message expire at once
        let tracker = Arc::new(MessageTracker::new(0));
        tracker.track(100, 1);
        tracker.track(100, 2);

        let deleter = Arc::new(CountingDeleter {
            deleted: AtomicUsize::new(0),
        });
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Arc::new(Scheduler::new(
            tracker.clone(),
            Arc::new(SessionStore::new(false, 1.0)),
            Arc::new(SyncOrchestrator::new(
                dir.path().to_path_buf(),
                dir.path().join("missing.sh"),
            )),
            deleter.clone(),
            None,
            SchedulerConfig {
                retention_interval: Duration::from_millis(20),
                sync_backoff: Duration::from_millis(20),
            },
        ));

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(scheduler.start(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(deleter.deleted.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.len(), 0);

        let _ = shutdown_tx.send(());
        let _ = handle.await;
    }
}
