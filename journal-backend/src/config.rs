use std::env;
use std::path::PathBuf;

/// Repository synchronization policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Sync before and after every query.
    Auto,
    /// Sync every N minutes from a background loop.
    Timer(u64),
}

#[derive(Clone)]
pub struct Config {
    pub telegram_token: String,
    pub allowed_user_id: u64,
    pub journal_path: PathBuf,
    pub sync_script: PathBuf,
    pub audit_log_path: PathBuf,
    pub sync_mode: SyncMode,
    pub sessions_enabled: bool,
    pub session_expiry_hours: f64,
    pub message_retention_hours: u64,
    pub claude_bin: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            telegram_token: env::var("TELEGRAM_TOKEN").expect("TELEGRAM_TOKEN must be set"),
            allowed_user_id: env::var("ALLOWED_USER_ID")
                .expect("ALLOWED_USER_ID must be set")
                .parse()
                .expect("ALLOWED_USER_ID must be a numeric Telegram user id"),
            journal_path: env::var("JOURNAL_PATH")
                .unwrap_or_else(|_| "/Journal".to_string())
                .into(),
            sync_script: env::var("JOURNAL_SYNC_SCRIPT")
                .unwrap_or_else(|_| "/Journal/_/scripts/commit-and-sync.sh".to_string())
                .into(),
            audit_log_path: env::var("AUDIT_LOG_PATH")
                .unwrap_or_else(|_| "/app/data/audit.log".to_string())
                .into(),
            sync_mode: parse_sync_mode(
                &env::var("JOURNAL_SYNC_MODE").unwrap_or_else(|_| "auto".to_string()),
            ),
            sessions_enabled: env::var("MESSAGE_SESSION")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(false),
            session_expiry_hours: env::var("MESSAGE_SESSION_EXPIRY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1.0),
            message_retention_hours: 24,
            claude_bin: env::var("CLAUDE_BIN").unwrap_or_else(|_| "claude".to_string()),
        }
    }
}

/// Parse the sync mode selector: "auto" means eager pre/post-query sync,
/// a number means sync every N minutes, invalid input falls back to auto.
fn parse_sync_mode(raw: &str) -> SyncMode {
    if raw.to_lowercase() == "auto" {
        return SyncMode::Auto;
    }
    match raw.parse::<u64>() {
        Ok(minutes) => SyncMode::Timer(minutes),
        Err(_) => SyncMode::Auto,
    }
}
