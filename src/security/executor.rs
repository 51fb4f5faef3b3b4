use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::ExecutionError;

/// Captured outcome of a shell command. A non-zero exit is a normal result,
/// not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub succeeded: bool,
}

impl ExecutionResult {
    pub fn from_output(output: &std::process::Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            succeeded: output.status.success(),
        }
    }

    pub fn check(&self, command: &str) -> Result<(), ExecutionError> {
        if self.succeeded {
            Ok(())
        } else {
            Err(ExecutionError::NonZeroExit {
                command: command.to_string(),
                code: self.exit_code,
                stderr: self.stderr.clone(),
            })
        }
    }

    /// Stdout, with stderr appended under a label when present.
    pub fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => format!("[stderr]\n{}", self.stderr),
            (false, false) => format!("{}\n[stderr]\n{}", self.stdout, self.stderr),
        }
    }

    /// Summary recorded in the conversation history.
    pub fn to_context_entry(&self, command: &str) -> String {
        format!(
            "Command: {}\nExit code: {}\nStdout:\n{}\nStderr:\n{}",
            command, self.exit_code, self.stdout, self.stderr
        )
    }
}

/// Runs a command through the host shell.
#[async_trait]
pub trait ShellRunner: Send + Sync {
    async fn run(&self, command: &str) -> Result<ExecutionResult, ExecutionError>;
}

/// `sh -c` (or `cmd /C` on Windows) with stdout and stderr captured
/// separately. The child is killed if the returned future is dropped, which
/// is how an interrupted turn cancels it.
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor;

impl ShellExecutor {
    pub fn new() -> Self {
        Self
    }

    fn shell_command(command: &str) -> Command {
        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.arg("/C");
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c");
            c
        };
        cmd.arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl ShellRunner for ShellExecutor {
    async fn run(&self, command: &str) -> Result<ExecutionResult, ExecutionError> {
        info!(command, "executing");
        let output = Self::shell_command(command)
            .output()
            .await
            .map_err(|source| ExecutionError::Launch {
                command: command.to_string(),
                source,
            })?;

        let result = ExecutionResult::from_output(&output);
        debug!(command, exit_code = result.exit_code, "finished");
        Ok(result)
    }
}
