use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// Capability to delete a chat message. Implemented against the Telegram
/// API in the transport layer and faked in tests.
#[async_trait]
pub trait MessageDeleter: Send + Sync {
    async fn delete(&self, chat_id: i64, message_id: i32) -> Result<(), String>;
}

/// Tracks every message the bot sends or receives so the retention loop can
/// delete them after the retention window. Keyed by (chat_id, message_id);
/// re-tracking the same pair just refreshes the timestamp.
pub struct MessageTracker {
    retention: Duration,
    messages: DashMap<(i64, i32), DateTime<Utc>>,
}

impl MessageTracker {
    pub fn new(retention_hours: u64) -> Self {
        Self {
            retention: Duration::hours(retention_hours as i64),
            messages: DashMap::new(),
        }
    }

    pub fn track(&self, chat_id: i64, message_id: i32) {
        self.track_at(chat_id, message_id, Utc::now());
        log::debug!("Tracking message {} in chat {}", message_id, chat_id);
    }

    fn track_at(&self, chat_id: i64, message_id: i32, now: DateTime<Utc>) {
        self.messages.insert((chat_id, message_id), now);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Delete every message older than the retention window. Deletion is
    /// best-effort and at-most-once: the entry is dropped from tracking
    /// whether or not the remote deletion succeeds. Concurrent `track`
    /// calls during the sweep are fine; the expired set is snapshotted
    /// before any removal.
    pub async fn sweep_expired(&self, deleter: &dyn MessageDeleter) -> usize {
        self.sweep_expired_at(deleter, Utc::now()).await
    }

    async fn sweep_expired_at(&self, deleter: &dyn MessageDeleter, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.retention;
        let expired: Vec<(i64, i32)> = self
            .messages
            .iter()
            .filter(|entry| *entry.value() < cutoff)
            .map(|entry| *entry.key())
            .collect();

        for &(chat_id, message_id) in &expired {
            match deleter.delete(chat_id, message_id).await {
                Ok(()) => {
                    log::info!("Deleted old message {} from chat {}", message_id, chat_id);
                }
                Err(e) => {
                    // Message may already be gone or permissions revoked
                    log::debug!("Could not delete message {}: {}", message_id, e);
                }
            }
            self.messages.remove(&(chat_id, message_id));
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingDeleter {
        calls: Mutex<Vec<(i64, i32)>>,
        fail: bool,
    }

    impl RecordingDeleter {
        fn new(fail: bool) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail,
            }
        }
    }

    #[async_trait]
    impl MessageDeleter for RecordingDeleter {
        async fn delete(&self, chat_id: i64, message_id: i32) -> Result<(), String> {
            self.calls.lock().unwrap().push((chat_id, message_id));
            if self.fail {
                Err("message not found".to_string())
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_sweep_deletes_expired_once() {
        let tracker = MessageTracker::new(24);
        let now = Utc::now();
        tracker.track_at(100, 1, now - Duration::hours(25));
        tracker.track_at(100, 2, now - Duration::hours(1));

        let deleter = RecordingDeleter::new(false);
        assert_eq!(tracker.sweep_expired_at(&deleter, now).await, 1);
        assert_eq!(*deleter.calls.lock().unwrap(), vec![(100, 1)]);
        assert_eq!(tracker.len(), 1);

        // A second sweep must not retry the already-handled entry
        assert_eq!(tracker.sweep_expired_at(&deleter, now).await, 0);
        assert_eq!(deleter.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_deletion_still_drops_entry() {
        let tracker = MessageTracker::new(24);
        let now = Utc::now();
        tracker.track_at(100, 1, now - Duration::hours(30));

        let deleter = RecordingDeleter::new(true);
        assert_eq!(tracker.sweep_expired_at(&deleter, now).await, 1);
        assert_eq!(tracker.len(), 0);

        // Entry is gone for good; no retry on the next pass
        assert_eq!(tracker.sweep_expired_at(&deleter, now).await, 0);
        assert_eq!(deleter.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retrack_refreshes_timestamp() {
        let tracker = MessageTracker::new(24);
        let now = Utc::now();
        tracker.track_at(100, 1, now - Duration::hours(30));
        tracker.track_at(100, 1, now);
        assert_eq!(tracker.len(), 1);

        let deleter = RecordingDeleter::new(false);
        assert_eq!(tracker.sweep_expired_at(&deleter, now).await, 0);
        assert_eq!(tracker.len(), 1);
    }
}
