use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

/// Kinds of events recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEvent {
    #[serde(rename = "QUERY")]
    Query,
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "COMMAND")]
    Command,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "STARTUP")]
    Startup,
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEvent::Query => "QUERY",
            AuditEvent::Unauthorized => "UNAUTHORIZED",
            AuditEvent::Command => "COMMAND",
            AuditEvent::Error => "ERROR",
            AuditEvent::Startup => "STARTUP",
        }
    }
}

/// One line of the audit log. Immutable once written; the optional fields
/// are event-specific and omitted from the JSON when unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
    pub user_id: u64,
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_sec: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AuditEntry {
    fn new(event: AuditEvent, user_id: u64, username: Option<&str>) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
            user_id,
            username: username.map(|s| s.to_string()),
            command: None,
            action: None,
            query: None,
            query_preview: None,
            query_length: None,
            response_length: None,
            execution_time_sec: None,
            status: None,
            exit_code: None,
            error: None,
            message: None,
        }
    }

    /// A command invocation (/start, /health, /audit).
    pub fn command(user_id: u64, username: Option<&str>, command: &str) -> Self {
        let mut entry = Self::new(AuditEvent::Command, user_id, username);
        entry.command = Some(command.to_string());
        entry
    }

    /// An unauthorized command attempt.
    pub fn unauthorized_command(user_id: u64, username: Option<&str>, command: &str) -> Self {
        let mut entry = Self::new(AuditEvent::Unauthorized, user_id, username);
        entry.command = Some(command.to_string());
        entry
    }

    /// An unauthorized free-text message.
    pub fn unauthorized_message(
        user_id: u64,
        username: Option<&str>,
        query_preview: Option<&str>,
    ) -> Self {
        let mut entry = Self::new(AuditEvent::Unauthorized, user_id, username);
        entry.action = Some("message".to_string());
        entry.query_preview = query_preview.map(|s| s.chars().take(100).collect());
        entry
    }

    /// A successfully answered query.
    pub fn query(
        user_id: u64,
        username: Option<&str>,
        query: &str,
        response_length: usize,
        execution_time_sec: f64,
        exit_code: Option<i32>,
    ) -> Self {
        let mut entry = Self::new(AuditEvent::Query, user_id, username);
        entry.query = Some(query.to_string());
        entry.query_length = Some(query.chars().count());
        entry.response_length = Some(response_length);
        entry.execution_time_sec = Some((execution_time_sec * 100.0).round() / 100.0);
        entry.status = Some("success".to_string());
        entry.exit_code = exit_code;
        entry
    }

    /// A query that failed mid-pipeline.
    pub fn error(
        user_id: u64,
        username: Option<&str>,
        query: &str,
        execution_time_sec: f64,
        error: &str,
    ) -> Self {
        let mut entry = Self::new(AuditEvent::Error, user_id, username);
        entry.query = Some(query.to_string());
        entry.query_length = Some(query.chars().count());
        entry.execution_time_sec = Some((execution_time_sec * 100.0).round() / 100.0);
        entry.status = Some("error".to_string());
        entry.error = Some(error.to_string());
        entry
    }

    /// Process startup marker (user id 0).
    pub fn startup() -> Self {
        let mut entry = Self::new(AuditEvent::Startup, 0, None);
        entry.message = Some("Bot started".to_string());
        entry
    }
}

/// Append-only audit trail, one JSON object per line. Appends are mirrored
/// to the operational log so container logs show the same stream.
pub struct AuditLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    /// Append an entry. Write failures are logged and swallowed; an
    /// unwritable audit sink must never break query handling.
    pub fn append(&self, entry: &AuditEntry) {
        let line = match serde_json::to_string(entry) {
            Ok(line) => line,
            Err(e) => {
                log::error!("Failed to serialize audit entry: {}", e);
                return;
            }
        };

        {
            let _guard = self.write_lock.lock();
            let result = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .and_then(|mut f| writeln!(f, "{}", line));
            if let Err(e) = result {
                log::error!("Failed to write audit log: {}", e);
            }
        }

        log::info!(
            "AUDIT: {} | user={} | {}",
            entry.event.as_str(),
            entry.user_id,
            line
        );
    }

    /// Read the last `count` entries, oldest first. Malformed lines are
    /// skipped so a truncated tail write cannot hide the rest of the log.
    pub fn read_recent(&self, count: usize) -> Vec<AuditEntry> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                log::error!("Failed to read audit log: {}", e);
                return Vec::new();
            }
        };

        let lines: Vec<&str> = contents.lines().filter(|l| !l.trim().is_empty()).collect();
        let start = lines.len().saturating_sub(count);
        lines[start..]
            .iter()
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    log::warn!("Skipping malformed audit line: {}", e);
                    None
                }
            })
            .collect()
    }
}

/// Render entries for the /audit command view, one block per entry.
pub fn format_entries(entries: &[AuditEntry]) -> String {
    if entries.is_empty() {
        return "No audit entries found.".to_string();
    }

    let mut lines = vec!["Recent Audit Log".to_string()];
    for entry in entries {
        let ts = entry.timestamp.format("%Y-%m-%dT%H:%M:%S");
        let uname = entry.username.as_deref().unwrap_or("unknown");
        match entry.event {
            AuditEvent::Query => {
                let preview: String = entry
                    .query
                    .as_deref()
                    .unwrap_or("")
                    .chars()
                    .take(40)
                    .collect();
                let exec = entry
                    .execution_time_sec
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "?".to_string());
                lines.push(format!(
                    "{} QUERY @{}\n  \"{}...\" ({}s)",
                    ts, uname, preview, exec
                ));
            }
            AuditEvent::Unauthorized => {
                let attempted = entry
                    .command
                    .as_deref()
                    .or(entry.action.as_deref())
                    .unwrap_or("?");
                lines.push(format!(
                    "{} UNAUTHORIZED id={} @{}\n  Attempted: {}",
                    ts, entry.user_id, uname, attempted
                ));
            }
            AuditEvent::Command => {
                let cmd = entry.command.as_deref().unwrap_or("?");
                lines.push(format!("{} CMD @{} {}", ts, uname, cmd));
            }
            AuditEvent::Error => {
                let err: String = entry
                    .error
                    .as_deref()
                    .unwrap_or("?")
                    .chars()
                    .take(50)
                    .collect();
                lines.push(format!("{} ERROR @{}\n  {}", ts, uname, err));
            }
            AuditEvent::Startup => {
                lines.push(format!("{} STARTUP | {}", ts, entry.user_id));
            }
        }
    }
    lines.join("\n")
}
