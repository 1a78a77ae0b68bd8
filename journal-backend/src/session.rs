use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// A user's live conversation with the Claude CLI. The token is opaque;
/// it only has meaning as a `--resume` argument.
#[derive(Debug, Clone)]
struct Session {
    token: String,
    last_active: DateTime<Utc>,
}

/// Per-user continuation tokens with lazy expiry on read. At most one
/// session per user; updates overwrite, last writer wins.
pub struct SessionStore {
    enabled: bool,
    expiry: Duration,
    sessions: DashMap<u64, Session>,
}

impl SessionStore {
    pub fn new(enabled: bool, expiry_hours: f64) -> Self {
        Self {
            enabled,
            expiry: Duration::milliseconds((expiry_hours * 3_600_000.0) as i64),
            sessions: DashMap::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    /// Get the active continuation token for a user, if any. An expired
    /// session is deleted as a side effect of the read.
    pub fn get_active(&self, user_id: u64) -> Option<String> {
        self.get_active_at(user_id, Utc::now())
    }

    fn get_active_at(&self, user_id: u64, now: DateTime<Utc>) -> Option<String> {
        if !self.enabled {
            return None;
        }

        let expired = match self.sessions.get(&user_id) {
            Some(session) => {
                if now > session.last_active + self.expiry {
                    true
                } else {
                    return Some(session.token.clone());
                }
            }
            None => return None,
        };

        if expired {
            self.sessions.remove(&user_id);
            log::info!("Session expired for user {}", user_id);
        }
        None
    }

    /// Store or overwrite the session for a user with a fresh timestamp.
    pub fn update(&self, user_id: u64, token: &str) {
        self.update_at(user_id, token, Utc::now());
        log::info!("Session stored for user {}", user_id);
    }

    fn update_at(&self, user_id: u64, token: &str, now: DateTime<Utc>) {
        self.sessions.insert(
            user_id,
            Session {
                token: token.to_string(),
                last_active: now,
            },
        );
    }

    /// Explicit expiry pass run by the retention loop, so sessions are
    /// bounded even if the user never queries again. Returns the number of
    /// sessions removed.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Utc::now())
    }

    fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        if !self.enabled {
            return 0;
        }
        let cutoff = now - self.expiry;
        let expired: Vec<u64> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().last_active < cutoff)
            .map(|entry| *entry.key())
            .collect();
        for user_id in &expired {
            self.sessions.remove(user_id);
            log::info!("Cleaned up expired session for user {}", user_id);
        }
        expired.len()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.sessions.len()
    }
}
