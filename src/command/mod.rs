//! Commands run by test steps
//!
//! A [`Command`] is declared in a `TestStep` (setup) or a `TestAssert`
//! (assertion) document. Execution goes through the [`CommandRunner`]
//! collaborator; [`ShellRunner`] is the process-backed implementation.

#![allow(clippy::missing_errors_doc)]

use crate::wildcard;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

mod shell;

pub use shell::ShellRunner;

/// Errors from the process primitive
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunnerError {
    #[error("Command not found: {0}")]
    CommandNotFound(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("command {command:?} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("invalid command: {0}")]
    InvalidCommand(String),
}

/// Output expectations that did not hold
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("validation errors: {}", .failures.join("; "))]
pub struct OutputError {
    pub failures: Vec<String>,
}

/// A declared command that did not succeed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error("command {command:?} failed with exit code {exit_code}: {stderr}")]
    Failed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("command {command:?} output mismatch: {source}")]
    Output {
        command: String,
        #[source]
        source: OutputError,
    },
}

impl CommandError {
    /// Whether the command ran out of time
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Runner(RunnerError::Timeout { .. }))
    }
}

/// How a stream is compared with the expected value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MatchType {
    /// Byte-for-byte equality
    #[default]
    Equals,
    /// Substring
    Contains,
    /// `*` / `?` pattern over the whole stream
    Wildcard,
}

impl From<String> for MatchType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Contains" => Self::Contains,
            "Wildcard" => Self::Wildcard,
            _ => Self::Equals,
        }
    }
}

impl From<MatchType> for String {
    fn from(value: MatchType) -> Self {
        value.to_string()
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals => write!(f, "Equals"),
            Self::Contains => write!(f, "Contains"),
            Self::Wildcard => write!(f, "Wildcard"),
        }
    }
}

/// Expected content of one output stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedOutput {
    #[serde(rename = "match", default)]
    pub match_type: MatchType,
    #[serde(rename = "expected", default)]
    pub expected_value: String,
}

impl ExpectedOutput {
    pub fn new(match_type: MatchType, expected_value: impl Into<String>) -> Self {
        Self {
            match_type,
            expected_value: expected_value.into(),
        }
    }

    fn check(&self, stream: &str, actual: &str) -> Result<(), String> {
        let expected = &self.expected_value;
        match self.match_type {
            MatchType::Contains if !actual.contains(expected.as_str()) => Err(format!(
                "expected {stream} to contain: {expected}, but it did not"
            )),
            MatchType::Wildcard if !wildcard::is_match(expected, actual) => Err(format!(
                "{stream} did not match wildcard pattern: {expected}"
            )),
            MatchType::Equals if actual != expected => Err(format!(
                "expected exact {stream}: {expected}, got: {actual}"
            )),
            _ => Ok(()),
        }
    }
}

/// Expectations for a command's stdout and stderr
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<ExpectedOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<ExpectedOutput>,
}

impl CommandOutput {
    /// Check both streams, reporting every failed expectation
    pub fn validate(&self, stdout: &str, stderr: &str) -> Result<(), OutputError> {
        let failures: Vec<String> = [
            self.stdout.as_ref().map(|e| e.check("stdout", stdout)),
            self.stderr.as_ref().map(|e| e.check("stderr", stderr)),
        ]
        .into_iter()
        .flatten()
        .filter_map(Result::err)
        .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(OutputError { failures })
        }
    }
}

/// A command declared by a step
///
/// Exactly one of `command` (a command line) or `script` (an inline shell
/// script) must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Command {
    /// Command line, e.g. "kubectl get pods"
    pub command: String,
    /// Inline shell script; `namespaced` does not apply
    pub script: String,
    /// Append `--namespace <ns>` to the command line
    pub namespaced: bool,
    /// Ignore a non-zero exit code
    pub ignore_failure: bool,
    /// Start the command and do not wait for it
    pub background: bool,
    /// Timeout in seconds, 0 for the step default
    pub timeout: u64,
    /// Do not log the command's output
    pub skip_log_output: bool,
    /// Expected stdout / stderr
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<CommandOutput>,
}

impl Command {
    /// Command line to run
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Default::default()
        }
    }

    /// Inline script to run
    pub fn inline_script(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn namespaced(mut self) -> Self {
        self.namespaced = true;
        self
    }

    #[must_use]
    pub fn ignore_failure(mut self) -> Self {
        self.ignore_failure = true;
        self
    }

    #[must_use]
    pub fn background(mut self) -> Self {
        self.background = true;
        self
    }

    #[must_use]
    pub fn timeout(mut self, seconds: u64) -> Self {
        self.timeout = seconds;
        self
    }

    #[must_use]
    pub fn skip_log_output(mut self) -> Self {
        self.skip_log_output = true;
        self
    }

    /// Expect stdout to satisfy `expected`
    #[must_use]
    pub fn expect_stdout(mut self, expected: ExpectedOutput) -> Self {
        self.output.get_or_insert_with(CommandOutput::default).stdout = Some(expected);
        self
    }

    /// Expect stderr to satisfy `expected`
    #[must_use]
    pub fn expect_stderr(mut self, expected: ExpectedOutput) -> Self {
        self.output.get_or_insert_with(CommandOutput::default).stderr = Some(expected);
        self
    }

    /// The shell line this command runs, before namespacing
    pub fn line(&self) -> &str {
        if self.script.is_empty() {
            &self.command
        } else {
            &self.script
        }
    }

    /// Resolve the command against an environment
    pub fn invocation(&self, env: &CommandEnv) -> Result<Invocation, RunnerError> {
        let line = match (self.command.trim(), self.script.trim()) {
            ("", "") => {
                return Err(RunnerError::InvalidCommand(
                    "either command or script must be set".to_string(),
                ))
            }
            (command, script) if !command.is_empty() && !script.is_empty() => {
                return Err(RunnerError::InvalidCommand(format!(
                    "command and script can not be set in the same configuration: {command:?}"
                )))
            }
            ("", _) => self.script.clone(),
            (command, _) if self.namespaced && !env.namespace.is_empty() => {
                format!("{command} --namespace {}", env.namespace)
            }
            (command, _) => command.to_string(),
        };

        let mut vars = BTreeMap::new();
        vars.insert("NAMESPACE".to_string(), env.namespace.clone());
        if let Some(kubeconfig) = &env.kubeconfig {
            vars.insert(
                "KUBECONFIG".to_string(),
                kubeconfig.to_string_lossy().into_owned(),
            );
        }

        Ok(Invocation {
            line,
            work_dir: env.work_dir.clone(),
            env: vars,
            timeout: if self.timeout > 0 {
                Duration::from_secs(self.timeout)
            } else {
                env.timeout
            },
            background: self.background,
        })
    }
}

/// A command declared by a `TestAssert`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssertCommand {
    pub command: String,
    pub namespaced: bool,
    pub script: String,
    pub skip_log_output: bool,
}

impl From<AssertCommand> for Command {
    fn from(value: AssertCommand) -> Self {
        Self {
            command: value.command,
            namespaced: value.namespaced,
            script: value.script,
            skip_log_output: value.skip_log_output,
            ..Default::default()
        }
    }
}

/// Where and how commands of a step run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandEnv {
    pub namespace: String,
    pub work_dir: Option<PathBuf>,
    pub kubeconfig: Option<PathBuf>,
    /// Timeout for commands without their own; zero waits forever
    pub timeout: Duration,
}

/// A fully resolved command, ready for the runner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Shell line, namespace flag included
    pub line: String,
    pub work_dir: Option<PathBuf>,
    /// Extra environment (NAMESPACE, KUBECONFIG)
    pub env: BTreeMap<String, String>,
    /// Zero waits forever
    pub timeout: Duration,
    /// Fire and forget
    pub background: bool,
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    /// Check if the command passed (exit code 0)
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes resolved commands
///
/// Background invocations must return as soon as the process is started,
/// with an empty passing result.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> Result<CommandResult, RunnerError>;
}

fn log_output(command: &str, result: &CommandResult) {
    for line in result.stdout.lines() {
        info!(command, stream = "stdout", "{line}");
    }
    for line in result.stderr.lines() {
        info!(command, stream = "stderr", "{line}");
    }
}

/// Run one command and check its exit code and output
///
/// Returns `None` for commands started in the background. When
/// `allow_background` is false they are run in the foreground instead.
pub async fn run_command(
    runner: &dyn CommandRunner,
    command: &Command,
    env: &CommandEnv,
    allow_background: bool,
) -> Result<Option<CommandResult>, CommandError> {
    let mut invocation = command.invocation(env)?;
    if invocation.background && !allow_background {
        warn!(
            command = %invocation.line,
            "Background commands are not allowed here, running in the foreground"
        );
        invocation.background = false;
    }

    info!(command = %invocation.line, background = invocation.background, "Running command");
    let result = runner.run(&invocation).await?;
    if invocation.background {
        return Ok(None);
    }

    if !command.skip_log_output {
        log_output(&invocation.line, &result);
    }

    if !result.passed() {
        if !command.ignore_failure {
            return Err(CommandError::Failed {
                command: invocation.line,
                exit_code: result.exit_code,
                stderr: result.stderr,
            });
        }
        warn!(
            command = %invocation.line,
            exit_code = result.exit_code,
            "Ignoring failed command"
        );
    }

    if let Some(expected) = &command.output {
        expected
            .validate(&result.stdout, &result.stderr)
            .map_err(|source| CommandError::Output {
                command: invocation.line.clone(),
                source,
            })?;
    }

    Ok(Some(result))
}

/// Run commands in order, stopping at the first failure
pub async fn run_commands(
    runner: &dyn CommandRunner,
    commands: &[Command],
    env: &CommandEnv,
    allow_background: bool,
) -> Result<Vec<CommandResult>, CommandError> {
    let mut results = Vec::with_capacity(commands.len());
    for command in commands {
        if let Some(result) = run_command(runner, command, env, allow_background).await? {
            results.push(result);
        }
    }
    Ok(results)
}
