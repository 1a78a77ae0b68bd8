use crate::process::{run_external_process, ProcessError};
use async_trait::async_trait;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

/// Script may take a while when it generates a commit message via Claude.
const SCRIPT_TIMEOUT: Duration = Duration::from_secs(120);
const PULL_TIMEOUT: Duration = Duration::from_secs(30);

/// Capability to surface a sync warning to the user's chat.
#[async_trait]
pub trait WarningSink: Send + Sync {
    async fn warn(&self, text: &str);
}

/// Synchronizes the journal repository: a commit-and-sync script when one is
/// installed, plain `git pull` as the fallback. Sync is best-effort and must
/// never block answering a query, so most fallback failures still report
/// success to the caller.
pub struct SyncOrchestrator {
    journal_path: PathBuf,
    script_path: PathBuf,
    pull_command: Vec<String>,
}

impl SyncOrchestrator {
    pub fn new(journal_path: PathBuf, script_path: PathBuf) -> Self {
        Self {
            journal_path,
            script_path,
            pull_command: vec!["git".to_string(), "pull".to_string()],
        }
    }

    /// Override the fallback pull command (used by tests).
    pub fn with_pull_command(mut self, command: Vec<String>) -> Self {
        self.pull_command = command;
        self
    }

    pub fn script_available(&self) -> bool {
        match std::fs::metadata(&self.script_path) {
            Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
            Err(_) => false,
        }
    }

    /// Run a sync attempt. Warnings go to `notify` when provided; pass None
    /// for silent mode. Returns whether the caller may treat the repository
    /// as synced; see the fallback policy below for what "true" promises.
    pub async fn sync(&self, notify: Option<&dyn WarningSink>) -> bool {
        if self.script_available() {
            let script = self.script_path.to_string_lossy().to_string();
            log::info!("Running journal sync script...");
            match run_external_process(
                &["bash".to_string(), script],
                &self.journal_path,
                Some(SCRIPT_TIMEOUT),
            )
            .await
            {
                Ok(out) => {
                    log::info!(
                        "Sync script: exit_code={:?}, stdout={}",
                        out.exit_code,
                        out.stdout.chars().take(200).collect::<String>()
                    );
                    if out.success() {
                        return true;
                    }
                    log::warn!("Sync script failed: {}", out.stderr);
                    let preview: String = out.stderr.chars().take(200).collect();
                    self.send_warning(notify, &format!("Sync script warning: {}", preview))
                        .await;
                    // Fall through to git pull fallback
                }
                Err(ProcessError::Timeout(secs)) => {
                    log::error!("Sync script timed out after {}s", secs);
                    self.send_warning(notify, "Sync script timed out, falling back to git pull")
                        .await;
                }
                Err(e) => {
                    log::error!("Sync script failed: {}", e);
                    self.send_warning(
                        notify,
                        &format!("Sync script error: {}, falling back to git pull", e),
                    )
                    .await;
                }
            }
        } else {
            log::info!("Sync script not found or not executable, using git pull fallback");
        }

        // Fallback: a plain pull. Non-zero exit without an "Already up to
        // date" stdout gets a warning but still counts as success; the
        // caller proceeds on possibly stale data rather than blocking the
        // query. Only a failure to run the command at all returns false.
        match run_external_process(&self.pull_command, &self.journal_path, Some(PULL_TIMEOUT)).await
        {
            Ok(out) => {
                log::info!(
                    "Git pull fallback: exit_code={:?}, stdout={}",
                    out.exit_code,
                    out.stdout
                );
                if !out.success() && !out.stdout.contains("Already up to date") {
                    self.send_warning(notify, &format!("Git Pull Warning:\n{}", out.stderr))
                        .await;
                }
                true
            }
            Err(e) => {
                log::error!("Git pull fallback failed: {}", e);
                self.send_warning(notify, &format!("Git Error: {}", e)).await;
                false
            }
        }
    }

    async fn send_warning(&self, notify: Option<&dyn WarningSink>, text: &str) {
        if let Some(sink) = notify {
            sink.warn(text).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;

    struct RecordingSink {
        warnings: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                warnings: Mutex::new(Vec::new()),
            }
        }

        fn warnings(&self) -> Vec<String> {
            self.warnings.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WarningSink for RecordingSink {
        async fn warn(&self, text: &str) {
            self.warnings.lock().unwrap().push(text.to_string());
        }
    }

    fn write_script(path: &Path, body: &str) {
        fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        let mut perms = fs::metadata(path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(path, perms).unwrap();
    }

    fn shell(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_script_success_skips_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("sync.sh");
        write_script(&script, "exit 0");

        // Fallback would drop a marker file; it must never run
        let marker = dir.path().join("fallback-ran");
        let orch = SyncOrchestrator::new(dir.path().to_path_buf(), script)
            .with_pull_command(shell(&["touch", marker.to_str().unwrap()]));

        let sink = RecordingSink::new();
        assert!(orch.sync(Some(&sink)).await);
        assert!(!marker.exists());
        assert!(sink.warnings().is_empty());
    }

    #[tokio::test]
    async fn test_missing_script_uses_fallback_result() {
        let dir = tempfile::tempdir().unwrap();
        let orch = SyncOrchestrator::new(
            dir.path().to_path_buf(),
            dir.path().join("no-such-script.sh"),
        )
        .with_pull_command(shell(&["sh", "-c", "exit 0"]));

        let sink = RecordingSink::new();
        assert!(orch.sync(Some(&sink)).await);
        assert!(sink.warnings().is_empty());
    }

    #[tokio::test]
    async fn test_failing_script_falls_through_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("sync.sh");
        write_script(&script, "echo push rejected >&2; exit 1");

        let orch = SyncOrchestrator::new(dir.path().to_path_buf(), script)
            .with_pull_command(shell(&["sh", "-c", "exit 0"]));

        let sink = RecordingSink::new();
        assert!(orch.sync(Some(&sink)).await);
        let warnings = sink.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("push rejected"));
    }

    #[tokio::test]
    async fn test_nothing_to_update_is_silent_success() {
        let dir = tempfile::tempdir().unwrap();
        let orch = SyncOrchestrator::new(dir.path().to_path_buf(), dir.path().join("missing.sh"))
            .with_pull_command(shell(&["sh", "-c", "echo Already up to date.; exit 1"]));

        let sink = RecordingSink::new();
        assert!(orch.sync(Some(&sink)).await);
        assert!(sink.warnings().is_empty());
    }

    #[tokio::test]
    async fn test_pull_failure_still_reports_success() {
        // Deliberate policy: a failed pull warns but does not block the query.
        let dir = tempfile::tempdir().unwrap();
        let orch = SyncOrchestrator::new(dir.path().to_path_buf(), dir.path().join("missing.sh"))
            .with_pull_command(shell(&["sh", "-c", "echo merge conflict >&2; exit 1"]));

        let sink = RecordingSink::new();
        assert!(orch.sync(Some(&sink)).await);
        let warnings = sink.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("merge conflict"));
    }

    #[tokio::test]
    async fn test_unrunnable_pull_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let orch = SyncOrchestrator::new(dir.path().to_path_buf(), dir.path().join("missing.sh"))
            .with_pull_command(shell(&["/no/such/git"]));

        let sink = RecordingSink::new();
        assert!(!orch.sync(Some(&sink)).await);
        assert_eq!(sink.warnings().len(), 1);
    }

    #[tokio::test]
    async fn test_silent_mode_sends_no_warnings() {
        let dir = tempfile::tempdir().unwrap();
        let orch = SyncOrchestrator::new(dir.path().to_path_buf(), dir.path().join("missing.sh"))
            .with_pull_command(shell(&["sh", "-c", "echo bad >&2; exit 1"]));

        assert!(orch.sync(None).await);
    }
}
