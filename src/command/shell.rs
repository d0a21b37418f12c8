//! Process-backed command runner

use super::{CommandResult, CommandRunner, Invocation, RunnerError};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Runs invocations with `<shell> -c <line>`
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self::with_shell("sh")
    }

    /// Use a different shell binary
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    fn command(&self, invocation: &Invocation) -> Command {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(&invocation.line)
            .envs(&invocation.env)
            .stdin(Stdio::null());
        if let Some(dir) = &invocation.work_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    fn spawn_error(&self, err: &std::io::Error) -> RunnerError {
        if err.kind() == ErrorKind::NotFound {
            RunnerError::CommandNotFound(self.shell.clone())
        } else {
            RunnerError::ExecutionFailed(err.to_string())
        }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandResult, RunnerError> {
        let mut cmd = self.command(invocation);

        if invocation.background {
            let mut child = cmd
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
                .map_err(|e| self.spawn_error(&e))?;
            debug!(command = %invocation.line, pid = ?child.id(), "Started background command");
            tokio::spawn(async move {
                let _ = child.wait().await;
            });
            return Ok(CommandResult::default());
        }

        let child = cmd
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(&e))?;

        let output = if invocation.timeout.is_zero() {
            child.wait_with_output().await
        } else {
            tokio::time::timeout(invocation.timeout, child.wait_with_output())
                .await
                .map_err(|_| RunnerError::Timeout {
                    command: invocation.line.clone(),
                    timeout: invocation.timeout,
                })?
        }
        .map_err(|e| RunnerError::ExecutionFailed(e.to_string()))?;

        Ok(CommandResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
