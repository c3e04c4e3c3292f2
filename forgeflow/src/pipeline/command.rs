//! Command execution boundary.
//!
//! The engine never interprets a step's command. It hands the string to a
//! [`CommandExecutor`] together with a time budget and gets back captured
//! text or an error.

use crate::errors::CommandError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Everything an executor needs to run one attempt of a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    /// Job the step belongs to.
    pub job_id: String,
    /// Target being run.
    pub target_id: String,
    /// Step id.
    pub step_id: String,
    /// Opaque command string.
    pub command: String,
    /// Time budget for this attempt.
    pub timeout: Duration,
    /// Working directory, when the target's output dir exists.
    pub working_dir: Option<PathBuf>,
    /// Extra environment (`FORGEFLOW_JOB_ID`, `FORGEFLOW_VERSION`, ...).
    pub env: HashMap<String, String>,
}

/// Text captured from a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Exit code.
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    /// Output with only stdout set.
    #[must_use]
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            stdout: text.into(),
            stderr: String::new(),
            exit_code: Some(0),
        }
    }

    /// Combined text recorded on the step run.
    #[must_use]
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// Strategy for running step commands.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Runs a command, honouring `request.timeout`.
    async fn execute(&self, request: &CommandRequest) -> Result<CommandOutput, CommandError>;
}

const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// Runs commands through `sh -c` as child processes.
///
/// The child is killed if the attempt is dropped (timeout or cancellation).
#[derive(Debug, Clone)]
pub struct ShellCommandExecutor {
    shell: String,
    max_output_bytes: usize,
}

impl Default for ShellCommandExecutor {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }
}

impl ShellCommandExecutor {
    /// Creates an executor using `sh`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a different shell binary.
    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Caps how much of each stream is kept.
    #[must_use]
    pub fn with_max_output_bytes(mut self, max: usize) -> Self {
        self.max_output_bytes = max;
        self
    }

    fn capture(&self, bytes: &[u8]) -> String {
        let text = String::from_utf8_lossy(bytes);
        if text.len() <= self.max_output_bytes {
            return text.into_owned();
        }
        let mut cut = self.max_output_bytes;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}... [truncated]", &text[..cut])
    }
}

#[async_trait]
impl CommandExecutor for ShellCommandExecutor {
    async fn execute(&self, request: &CommandRequest) -> Result<CommandOutput, CommandError> {
        let mut command = Command::new(&self.shell);
        command
            .arg("-c")
            .arg(&request.command)
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &request.working_dir {
            command.current_dir(dir);
        }

        debug!(
            job_id = %request.job_id,
            step_id = %request.step_id,
            command = %request.command,
            "Spawning step command"
        );

        let child = command
            .spawn()
            .map_err(|e| CommandError::Spawn(e.to_string()))?;

        let timeout_ms = u64::try_from(request.timeout.as_millis()).unwrap_or(u64::MAX);
        let output = match tokio::time::timeout(request.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| CommandError::Spawn(e.to_string()))?,
            Err(_) => {
                warn!(
                    job_id = %request.job_id,
                    step_id = %request.step_id,
                    timeout_ms,
                    "Step command timed out; child killed"
                );
                return Err(CommandError::Timeout { timeout_ms });
            }
        };

        let stdout = self.capture(&output.stdout);
        let stderr = self.capture(&output.stderr);

        if output.status.success() {
            Ok(CommandOutput {
                stdout,
                stderr,
                exit_code: output.status.code(),
            })
        } else {
            let message = if stderr.trim().is_empty() { stdout } else { stderr };
            Err(CommandError::Failed {
                exit_code: output.status.code(),
                stderr: message,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(command: &str, timeout_ms: u64) -> CommandRequest {
        CommandRequest {
            job_id: "job-1".to_string(),
            target_id: "web".to_string(),
            step_id: "step".to_string(),
            command: command.to_string(),
            timeout: Duration::from_millis(timeout_ms),
            working_dir: None,
            env: HashMap::from([("FORGEFLOW_VERSION".to_string(), "1.2.3".to_string())]),
        }
    }

    #[test]
    fn test_combined_output() {
        assert_eq!(CommandOutput::stdout("ok").combined(), "ok");
        let both = CommandOutput {
            stdout: "out".into(),
            stderr: "err".into(),
            exit_code: Some(0),
        };
        assert_eq!(both.combined(), "out\nerr");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_success_captures_output() {
        let executor = ShellCommandExecutor::new();
        let out = executor
            .execute(&request("echo built $FORGEFLOW_VERSION", 5_000))
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "built 1.2.3");
        assert_eq!(out.exit_code, Some(0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_failure() {
        let executor = ShellCommandExecutor::new();
        let err = executor
            .execute(&request("echo broken >&2; exit 3", 5_000))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CommandError::Failed {
                exit_code: Some(3),
                stderr: "broken\n".to_string()
            }
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_timeout() {
        let executor = ShellCommandExecutor::new();
        let err = executor.execute(&request("sleep 5", 50)).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_capture_truncates() {
        let executor = ShellCommandExecutor::new().with_max_output_bytes(4);
        assert_eq!(executor.capture(b"abcdefgh"), "abcd... [truncated]");
        assert_eq!(executor.capture(b"abc"), "abc");
    }
}
