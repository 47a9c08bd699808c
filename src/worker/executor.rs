use std::process::Stdio;

use tokio::process::Command;

/// Exit code reported when the shell itself could not be started.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

/// Exit code reported when the process was terminated by a signal.
pub const SIGNALLED_EXIT_CODE: i32 = -1;

/// Result of job execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub job_id: String,
    pub success: bool,
    pub exit_code: i32,
    /// Why the command could not even be started, if it could not.
    pub error: Option<String>,
}

impl ExecutionResult {
    /// Short reason recorded on the job when this execution failed.
    pub fn failure_reason(&self) -> Option<String> {
        if self.success {
            return None;
        }
        Some(match &self.error {
            Some(error) => format!("exit code {}: {}", self.exit_code, error),
            None => format!("exit code {}", self.exit_code),
        })
    }
}

/// Runs one job's command through the shell and waits for it.
///
/// The command runs inside the calling task; nothing is spawned in the
/// background. Output is discarded and no timeout is applied, so a command
/// that never exits holds its worker forever.
#[derive(Debug, Clone)]
pub struct JobExecutor {
    shell: String,
}

impl Default for JobExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl JobExecutor {
    pub fn new() -> Self {
        Self::with_shell("sh")
    }

    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    /// Execute `command` as `<shell> -c <command>`. Success iff exit status 0;
    /// a command that cannot be started counts as an ordinary failure.
    pub async fn execute(&self, job_id: &str, command: &str) -> ExecutionResult {
        tracing::info!(job_id, command, "Executing job");

        let status = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) => {
                let exit_code = status.code().unwrap_or(SIGNALLED_EXIT_CODE);
                tracing::debug!(job_id, exit_code, "Command exited");
                ExecutionResult {
                    job_id: job_id.to_string(),
                    success: status.success(),
                    exit_code,
                    error: None,
                }
            }
            Err(e) => {
                tracing::error!(job_id, error = %e, "Failed to start command");
                ExecutionResult {
                    job_id: job_id.to_string(),
                    success: false,
                    exit_code: SPAWN_FAILURE_EXIT_CODE,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
