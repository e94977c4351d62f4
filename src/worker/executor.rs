use std::process::Stdio;

use tokio::process::Command;
use tokio::time::timeout;

use crate::config::ExecutorConfig;

/// Outcome of one execution attempt.
///
/// Spawn failures, non-zero exits and timeouts all surface as
/// `success: false` with a descriptive error; they drive the retry policy
/// rather than propagating as hard errors.
#[derive(Debug)]
pub struct ExecutionResult {
    pub success: bool,
    /// Combined stdout and stderr, truncated to the configured cap.
    /// `None` when the command produced nothing.
    pub output: Option<String>,
    pub error: Option<String>,
}

impl ExecutionResult {
    fn failure(error: impl Into<String>, output: Option<String>) -> Self {
        Self {
            success: false,
            output,
            error: Some(error.into()),
        }
    }
}

/// Runs job commands through a shell with a hard timeout.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    config: ExecutorConfig,
}

impl CommandExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    fn shell(&self) -> String {
        self.config
            .shell
            .clone()
            .or_else(|| std::env::var("SHELL").ok())
            .unwrap_or_else(|| "/bin/sh".to_string())
    }

    /// Execute a job command, capturing combined stdout/stderr.
    pub async fn execute(&self, job_id: &str, command: &str) -> ExecutionResult {
        let shell = self.shell();
        tracing::info!(job_id, command, shell = %shell, "executing job");

        let child = Command::new(&shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(job_id, error = %e, "failed to spawn command");
                return ExecutionResult::failure(format!("spawn failed: {e}"), None);
            }
        };

        let output = match timeout(self.config.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::error!(job_id, error = %e, "failed waiting for command");
                return ExecutionResult::failure(format!("wait failed: {e}"), None);
            }
            // Dropping the timed-out future drops the child handle, which
            // kills the process (kill_on_drop).
            Err(_) => {
                tracing::warn!(job_id, timeout = ?self.config.timeout, "command timed out");
                return ExecutionResult::failure(
                    format!("timed out after {}s", self.config.timeout.as_secs()),
                    None,
                );
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&stderr);
        let combined = truncate_output(combined, self.config.max_output_bytes);
        let captured = (!combined.is_empty()).then_some(combined);

        if output.status.success() {
            tracing::info!(job_id, "command succeeded");
            ExecutionResult {
                success: true,
                output: captured,
                error: None,
            }
        } else {
            let error = if stderr.trim().is_empty() {
                match output.status.code() {
                    Some(code) => format!("exit code {code}"),
                    None => "killed by signal".to_string(),
                }
            } else {
                truncate_output(stderr.trim().to_string(), self.config.max_output_bytes)
            };
            tracing::warn!(job_id, exit_code = ?output.status.code(), "command failed");
            ExecutionResult::failure(error, captured)
        }
    }
}

fn truncate_output(mut text: String, cap: usize) -> String {
    if text.len() <= cap {
        return text;
    }
    let mut end = cap;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    text.push_str("\n[output truncated]");
    text
}
