use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

/// Captured output of a finished subprocess.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("process timed out after {0}s")]
    Timeout(u64),
    #[error("failed to start process: {0}")]
    Spawn(String),
    #[error("process I/O error: {0}")]
    Io(String),
}

/// Run an external command to completion, capturing stdout/stderr. The one
/// subprocess entry point for the sync orchestrator, the Claude CLI and the
/// diagnostics, so timeout and kill semantics stay uniform. `kill_on_drop`
/// terminates a child whose wait future is dropped on timeout.
pub async fn run_external_process(
    command: &[String],
    working_dir: &Path,
    timeout: Option<Duration>,
) -> Result<ProcessOutput, ProcessError> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| ProcessError::Spawn("empty command".to_string()))?;

    let child = Command::new(program)
        .args(args)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ProcessError::Spawn(format!("{}: {}", program, e)))?;

    let output = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| ProcessError::Io(e.to_string()))?,
            Err(_) => return Err(ProcessError::Timeout(limit.as_secs())),
        },
        None => child
            .wait_with_output()
            .await
            .map_err(|e| ProcessError::Io(e.to_string()))?,
    };

    Ok(ProcessOutput {
        exit_code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}
