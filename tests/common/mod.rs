//! Shared fixtures for integration tests
#![allow(dead_code, clippy::unwrap_used)]

use async_trait::async_trait;
use seppo_harness::command::{CommandResult, Invocation, RunnerError};
use seppo_harness::{CommandRunner, Context, MemoryClient, Node};
use serde_json::json;
use std::sync::{Arc, Mutex};

pub const NAMESPACE: &str = "world";

pub fn pod(name: &str) -> Node {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": { "name": name },
        "spec": { "containers": [{ "name": "nginx", "image": "nginx:1.27" }] }
    })
}

pub fn pod_with_phase(name: &str, phase: &str) -> Node {
    let mut pod = pod(name);
    pod["metadata"]["namespace"] = json!(NAMESPACE);
    pod["status"] = json!({ "phase": phase });
    pod
}

pub fn ready_assert(name: &str) -> Node {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": { "name": name },
        "status": { "phase": "Ready" }
    })
}

/// Runner that answers from a script and records every line it was given
///
/// The first rule whose pattern is contained in the command line wins;
/// unmatched commands succeed with no output.
#[derive(Clone, Default)]
pub struct RecordingRunner {
    rules: Arc<Vec<(String, CommandResult)>>,
    lines: Arc<Mutex<Vec<String>>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, pattern: &str, exit_code: i32, stdout: &str) -> Self {
        Arc::make_mut(&mut self.rules).push((
            pattern.to_string(),
            CommandResult {
                exit_code,
                stdout: stdout.to_string(),
                stderr: String::new(),
            },
        ));
        self
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandResult, RunnerError> {
        self.lines.lock().unwrap().push(invocation.line.clone());
        Ok(self
            .rules
            .iter()
            .find(|(pattern, _)| invocation.line.contains(pattern.as_str()))
            .map(|(_, result)| result.clone())
            .unwrap_or_default())
    }
}

pub fn context(client: &MemoryClient, runner: &RecordingRunner) -> Context {
    Context::new(Arc::new(client.clone()), Arc::new(runner.clone()), NAMESPACE)
}
