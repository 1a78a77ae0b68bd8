use crate::config::{Config, SyncMode};
use crate::process::run_external_process;
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;

const CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Health report shown at startup and by /start and /health.
pub async fn run_diagnostic(config: &Config) -> String {
    let mut results = Vec::new();

    // Journal mount
    if std::fs::read_dir(&config.journal_path).is_ok() {
        results.push("✅ Journal mounted and readable".to_string());
    } else {
        results.push("❌ Journal NOT accessible".to_string());
    }

    // Claude CLI
    let claude_ok = match which::which(&config.claude_bin) {
        Ok(_) => run_external_process(
            &[config.claude_bin.clone(), "--version".to_string()],
            &config.journal_path,
            Some(CHECK_TIMEOUT),
        )
        .await
        .map(|out| out.success())
        .unwrap_or(false),
        Err(_) => false,
    };
    if claude_ok {
        results.push("✅ Claude CLI installed".to_string());
    } else {
        results.push("❌ Claude CLI missing or failing".to_string());
    }

    // Git repo
    let git_ok = run_external_process(
        &["git".to_string(), "status".to_string()],
        &config.journal_path,
        Some(CHECK_TIMEOUT),
    )
    .await
    .map(|out| out.success())
    .unwrap_or(false);
    if git_ok {
        results.push("✅ Git repo active".to_string());
    } else {
        results.push("❌ Not a valid git repo".to_string());
    }

    // Sync script
    let script_ok = std::fs::metadata(&config.sync_script)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false);
    if script_ok {
        results.push("✅ Sync script available".to_string());
    } else {
        results.push("⚠️ Sync script not found (using git pull fallback)".to_string());
    }

    // Sync mode
    match config.sync_mode {
        SyncMode::Auto => results.push("🔄 Sync: before/after each query".to_string()),
        SyncMode::Timer(minutes) => {
            results.push(format!("🔄 Sync: every {} minutes", minutes));
        }
    }

    results.join("\n")
}

/// One-line session-mode summary for the welcome message.
pub fn session_status(config: &Config) -> String {
    if config.sessions_enabled {
        format!(
            "💬 Conversations: Enabled ({}h context)",
            config.session_expiry_hours
        )
    } else {
        "💬 Conversations: Single-shot mode".to_string()
    }
}
