use crate::audit::{AuditEntry, AuditLog};
use crate::process::{run_external_process, ProcessError, ProcessOutput};
use crate::session::SessionStore;
use crate::sync::{SyncOrchestrator, WarningSink};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Telegram rejects messages over 4096 chars; leave headroom for the marker.
const MAX_REPLY_CHARS: usize = 3900;
const TRUNCATION_MARKER: &str = "\n...(truncated)";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Claude CLI failed: {0}")]
    Tool(#[from] ProcessError),
}

/// Structured output of the Claude CLI when invoked with
/// `--output-format json`.
#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    session_id: Option<String>,
    result: Option<String>,
}

/// Answers one user query: optional pre-sync, session resolve, Claude CLI
/// invocation, response parse, session update, audit entry, optional silent
/// post-sync.
pub struct QueryPipeline {
    claude_bin: String,
    journal_path: PathBuf,
    eager_sync: bool,
    sessions: Arc<SessionStore>,
    sync: Arc<SyncOrchestrator>,
    audit: Arc<AuditLog>,
}

impl QueryPipeline {
    pub fn new(
        claude_bin: String,
        journal_path: PathBuf,
        eager_sync: bool,
        sessions: Arc<SessionStore>,
        sync: Arc<SyncOrchestrator>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            claude_bin,
            journal_path,
            eager_sync,
            sessions,
            sync,
            audit,
        }
    }

    /// Handle one query end to end. Sync failures never abort the query; a
    /// Claude CLI failure does, with an ERROR audit entry and no retry.
    pub async fn handle(
        &self,
        user_id: u64,
        username: Option<&str>,
        query: &str,
        notify: Option<&dyn WarningSink>,
    ) -> Result<String, PipelineError> {
        if self.eager_sync {
            self.sync.sync(notify).await;
        }

        let start = Instant::now();
        match self.run_query(user_id, query).await {
            Ok((output, exit_code)) => {
                let elapsed = start.elapsed().as_secs_f64();
                log::info!(
                    "Claude completed: {:.2}s, output_size={} chars, exit_code={:?}",
                    elapsed,
                    output.chars().count(),
                    exit_code
                );
                self.audit.append(&AuditEntry::query(
                    user_id,
                    username,
                    query,
                    output.chars().count(),
                    elapsed,
                    exit_code,
                ));

                // Commit and push anything Claude may have written, quietly
                if self.eager_sync {
                    self.sync.sync(None).await;
                }
                Ok(output)
            }
            Err(e) => {
                let elapsed = start.elapsed().as_secs_f64();
                log::error!("Claude failed after {:.2}s: {}", elapsed, e);
                self.audit.append(&AuditEntry::error(
                    user_id,
                    username,
                    query,
                    elapsed,
                    &e.to_string(),
                ));
                Err(e)
            }
        }
    }

    async fn run_query(
        &self,
        user_id: u64,
        query: &str,
    ) -> Result<(String, Option<i32>), PipelineError> {
        let resume = self.sessions.get_active(user_id);
        if self.sessions.enabled() {
            match &resume {
                Some(token) => log::info!(
                    "Resuming session {}... for user {}",
                    token.chars().take(8).collect::<String>(),
                    user_id
                ),
                None => log::info!("Starting new session for user {}", user_id),
            }
        }

        let command = self.build_command(query, resume.as_deref());
        log::info!("Starting Claude query: length={} chars", query.chars().count());

        let ProcessOutput {
            exit_code,
            stdout: raw,
            stderr,
        } = run_external_process(&command, &self.journal_path, None).await?;

        if !stderr.is_empty() {
            log::info!(
                "Claude debug info: {}...",
                stderr.chars().take(500).collect::<String>()
            );
        }

        let mut output = raw.clone();
        if self.sessions.enabled() {
            match serde_json::from_str::<ClaudeResponse>(&raw) {
                Ok(parsed) => {
                    if let Some(result) = parsed.result {
                        output = result;
                    }
                    match parsed.session_id {
                        Some(token) => self.sessions.update(user_id, &token),
                        None => log::warn!("No session_id in Claude JSON response"),
                    }
                }
                Err(e) => {
                    // Non-fatal: reply with the raw text instead
                    log::warn!("Failed to parse Claude JSON output: {}", e);
                }
            }
        }

        if output.is_empty() {
            output = if stderr.is_empty() {
                "Empty response from Claude.".to_string()
            } else {
                stderr
            };
        }

        Ok((truncate_for_transport(&output), exit_code))
    }

    fn build_command(&self, query: &str, resume_token: Option<&str>) -> Vec<String> {
        let mut command = vec![self.claude_bin.clone()];
        if self.sessions.enabled() {
            match resume_token {
                Some(token) => {
                    command.extend([
                        "--resume".to_string(),
                        token.to_string(),
                        query.to_string(),
                    ]);
                }
                None => {
                    command.extend(["-p".to_string(), query.to_string()]);
                }
            }
            command.extend(["--output-format".to_string(), "json".to_string()]);
        } else {
            command.extend(["-p".to_string(), query.to_string()]);
        }
        command.push("--dangerously-skip-permissions".to_string());
        command
    }
}

/// Trim a reply to the transport size limit, marking the cut.
pub(crate) fn truncate_for_transport(text: &str) -> String {
    if text.chars().count() <= MAX_REPLY_CHARS {
        return text.to_string();
    }
    let mut trimmed: String = text.chars().take(MAX_REPLY_CHARS).collect();
    trimmed.push_str(TRUNCATION_MARKER);
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditEvent;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    /// Write a fake `claude` executable that records its arguments and
    /// prints a canned response.
    fn fake_claude(dir: &Path, body: &str) -> String {
        let path = dir.join("claude");
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).unwrap();
        path.to_string_lossy().to_string()
    }

    fn pipeline(
        dir: &Path,
        claude_bin: String,
        sessions_enabled: bool,
    ) -> (QueryPipeline, Arc<SessionStore>, Arc<AuditLog>) {
        let sessions = Arc::new(SessionStore::new(sessions_enabled, 1.0));
        let sync = Arc::new(SyncOrchestrator::new(
            dir.to_path_buf(),
            dir.join("no-script.sh"),
        ));
        let audit = Arc::new(AuditLog::new(dir.join("audit.log")));
        let pipeline = QueryPipeline::new(
            claude_bin,
            dir.to_path_buf(),
            false,
            sessions.clone(),
            sync,
            audit.clone(),
        );
        (pipeline, sessions, audit)
    }

    #[tokio::test]
    async fn test_sessions_off_returns_raw_text() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_claude(dir.path(), "echo 'You wrote about the hike.'");
        let (pipeline, sessions, audit) = pipeline(dir.path(), bin, false);

        let query = "What did I write last Tuesday?";
        let reply = pipeline.handle(7, Some("aj"), query, None).await.unwrap();
        assert_eq!(reply, "You wrote about the hike.");

        let entries = audit.read_recent(10);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event, AuditEvent::Query);
        assert_eq!(entries[0].query_length, Some(query.chars().count()));
        assert_eq!(entries[0].response_length, Some(reply.chars().count()));
        assert_eq!(entries[0].exit_code, Some(0));

        // Session store must be untouched in single-shot mode
        assert_eq!(sessions.get_active(7), None);
    }

    #[tokio::test]
    async fn test_sessions_on_stores_token_and_resumes() {
        let dir = tempfile::tempdir().unwrap();
        let args_file = dir.path().join("args.txt");
        let bin = fake_claude(
            dir.path(),
            &format!(
                "printf '%s\\n' \"$@\" > {}\necho '{{\"session_id\":\"abc123\",\"result\":\"Done.\"}}'",
                args_file.display()
            ),
        );
        let (pipeline, sessions, _audit) = pipeline(dir.path(), bin, true);

        let reply = pipeline.handle(7, Some("aj"), "first question", None).await.unwrap();
        assert_eq!(reply, "Done.");
        assert_eq!(sessions.get_active(7), Some("abc123".into()));

        let args = fs::read_to_string(&args_file).unwrap();
        assert!(args.contains("-p\nfirst question"));
        assert!(args.contains("--output-format\njson"));

        // A follow-up within the expiry window resumes the session
        pipeline.handle(7, Some("aj"), "second question", None).await.unwrap();
        let args = fs::read_to_string(&args_file).unwrap();
        assert!(args.contains("--resume\nabc123\nsecond question"));
    }

    #[tokio::test]
    async fn test_unparseable_json_falls_back_to_raw() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_claude(dir.path(), "echo 'plain text, not json'");
        let (pipeline, sessions, audit) = pipeline(dir.path(), bin, true);

        let reply = pipeline.handle(7, None, "hello", None).await.unwrap();
        assert_eq!(reply, "plain text, not json");
        assert_eq!(sessions.get_active(7), None);
        assert_eq!(audit.read_recent(10)[0].event, AuditEvent::Query);
    }

    #[tokio::test]
    async fn test_empty_output_substitutes_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_claude(dir.path(), "echo 'rate limited' >&2");
        let (pipeline, _sessions, _audit) = pipeline(dir.path(), bin, false);

        let reply = pipeline.handle(7, None, "hello", None).await.unwrap();
        assert_eq!(reply, "rate limited");
    }

    #[tokio::test]
    async fn test_empty_output_and_stderr_uses_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_claude(dir.path(), "true");
        let (pipeline, _sessions, _audit) = pipeline(dir.path(), bin, false);

        let reply = pipeline.handle(7, None, "hello", None).await.unwrap();
        assert_eq!(reply, "Empty response from Claude.");
    }

    #[tokio::test]
    async fn test_long_output_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_claude(dir.path(), "head -c 5000 /dev/zero | tr '\\0' 'a'");
        let (pipeline, _sessions, _audit) = pipeline(dir.path(), bin, false);

        let reply = pipeline.handle(7, None, "hello", None).await.unwrap();
        assert!(reply.ends_with(TRUNCATION_MARKER));
        assert_eq!(
            reply.chars().count(),
            MAX_REPLY_CHARS + TRUNCATION_MARKER.chars().count()
        );
    }

    #[tokio::test]
    async fn test_unstartable_tool_audits_error() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, _sessions, audit) =
            pipeline(dir.path(), "/no/such/claude".to_string(), false);

        let err = pipeline.handle(7, Some("aj"), "hello", None).await.unwrap_err();
        assert!(matches!(err, PipelineError::Tool(_)));

        let entries = audit.read_recent(10);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event, AuditEvent::Error);
        assert_eq!(entries[0].status.as_deref(), Some("error"));
        assert!(entries[0].error.is_some());
    }

    #[test]
    fn test_truncate_noop_under_limit() {
        assert_eq!(truncate_for_transport("short"), "short");
    }
}
