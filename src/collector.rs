//! Diagnostics gathered after a failed step
//!
//! Collectors are declared in a `TestAssert` and only run when the step's
//! assertions fail. Each one turns into a [`Command`]; a collector that cannot
//! (missing pod and selector, unknown type) is skipped.

use crate::command::Command;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Write as _;

/// A best-effort diagnostic action
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Collector {
    /// "pod" (default), "command" or "events"
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub collector_type: String,
    /// Pod to read logs from; for events, the involved object name
    #[serde(skip_serializing_if = "String::is_empty")]
    pub pod: String,
    /// Namespace override, the test namespace by default
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// Container to read, all containers by default
    #[serde(skip_serializing_if = "String::is_empty")]
    pub container: String,
    /// Label selector for pods
    #[serde(skip_serializing_if = "String::is_empty")]
    pub selector: String,
    /// Number of trailing log lines, 0 for the kubectl default
    #[serde(skip_serializing_if = "is_zero")]
    pub tail: i64,
    /// Command to run for type "command"
    #[serde(skip_serializing_if = "String::is_empty")]
    pub command: String,
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

impl Collector {
    /// Logs of one pod
    pub fn pod(name: impl Into<String>) -> Self {
        Self {
            pod: name.into(),
            ..Default::default()
        }
    }

    /// Logs of every pod matching a label selector
    pub fn selector(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            ..Default::default()
        }
    }

    /// An arbitrary command
    pub fn run(command: impl Into<String>) -> Self {
        Self {
            collector_type: "command".to_string(),
            command: command.into(),
            ..Default::default()
        }
    }

    /// Events of the namespace
    pub fn events() -> Self {
        Self {
            collector_type: "events".to_string(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    #[must_use]
    pub fn container(mut self, container: impl Into<String>) -> Self {
        self.container = container.into();
        self
    }

    #[must_use]
    pub fn tail(mut self, lines: i64) -> Self {
        self.tail = lines;
        self
    }

    /// Effective type; a bare command implies "command"
    fn kind(&self) -> &str {
        if self.collector_type.is_empty() {
            if self.command.is_empty() {
                "pod"
            } else {
                "command"
            }
        } else {
            &self.collector_type
        }
    }

    /// The command this collector runs, or `None` when misconfigured
    pub fn command(&self) -> Option<Command> {
        match self.kind() {
            "pod" => self.pod_command(),
            "command" if !self.command.is_empty() => Some(Command::new(&self.command)),
            "events" => Some(self.events_command()),
            _ => None,
        }
    }

    fn pod_command(&self) -> Option<Command> {
        if self.pod.is_empty() && self.selector.is_empty() {
            return None;
        }

        let mut line = String::from("kubectl logs --prefix");
        if !self.pod.is_empty() {
            let _ = write!(line, " {}", self.pod);
        }
        if !self.selector.is_empty() {
            let _ = write!(line, " -l {}", self.selector);
        }
        if self.container.is_empty() {
            line.push_str(" --all-containers");
        } else {
            let _ = write!(line, " -c {}", self.container);
        }
        if self.tail != 0 {
            let _ = write!(line, " --tail={}", self.tail);
        }
        Some(self.scoped(line))
    }

    fn events_command(&self) -> Command {
        let mut line = String::from("kubectl get events --sort-by=.metadata.creationTimestamp");
        if !self.pod.is_empty() {
            let _ = write!(line, " --field-selector involvedObject.name={}", self.pod);
        }
        self.scoped(line)
    }

    /// Pin the namespace, or let the step fill it in
    fn scoped(&self, mut line: String) -> Command {
        if self.namespace.is_empty() {
            Command::new(line).namespaced()
        } else {
            let _ = write!(line, " --namespace {}", self.namespace);
            Command::new(line)
        }
    }
}

impl fmt::Display for Collector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            "pod" if !self.selector.is_empty() => write!(f, "pod logs for selector {}", self.selector),
            "pod" => write!(f, "pod logs for {}", self.pod),
            "command" => write!(f, "command {:?}", self.command),
            "events" if !self.pod.is_empty() => write!(f, "events for {}", self.pod),
            "events" => write!(f, "events"),
            other => write!(f, "unknown collector type {other:?}"),
        }
    }
}
