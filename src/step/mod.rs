//! Test steps
//!
//! A [`Step`] is the unit the orchestrator runs: objects to delete, commands to
//! run, objects to apply, and the state the cluster must converge to.
//!
//! # Example
//!
//! ```
//! use seppo_harness::step::Step;
//! use serde_json::json;
//! use std::time::Duration;
//!
//! let step = Step::new(0, "create-pod")
//!     .apply(json!({
//!         "apiVersion": "v1",
//!         "kind": "Pod",
//!         "metadata": { "name": "hello" },
//!         "spec": { "containers": [{ "name": "nginx", "image": "nginx" }] }
//!     }))
//!     .assert(json!({
//!         "apiVersion": "v1",
//!         "kind": "Pod",
//!         "metadata": { "name": "hello" },
//!         "status": { "phase": "Running" }
//!     }))
//!     .with_timeout(Duration::from_secs(60));
//!
//! assert_eq!(step.to_string(), "0-create-pod");
//! ```

use crate::client::ApplyAction;
use crate::collector::Collector;
use crate::command::Command;
use crate::resource::{Node, ResourceRef};
use crate::strategy::AssertOptions;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

mod config;
mod load;

pub use config::{ApplyFile, AssertFile, TestAssertConfig, TestStepConfig};
pub use load::{Bucket, Document, LoadError, ObjectLoader, YamlLoader};

/// An object to create or update
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyItem {
    pub object: Node,
    /// The apply is expected to be rejected
    pub should_fail: bool,
    /// What the last run did with it
    pub action: Option<ApplyAction>,
}

/// State a live object must converge to
#[derive(Debug, Clone, PartialEq)]
pub struct AssertItem {
    pub object: Node,
    pub options: AssertOptions,
}

/// A pattern no live object may match
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorItem {
    pub object: Node,
}

/// One step of a test
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Step {
    /// Position in the test; unique and increasing
    pub index: i64,
    pub name: String,
    /// Directory the step was loaded from; commands run here
    pub dir: Option<PathBuf>,
    /// Zero means the harness default
    pub timeout: Duration,
    /// Overrides `timeout` when set by a `TestAssert`
    pub assert_timeout: Option<Duration>,
    /// Do not register created objects for cleanup
    pub skip_delete: bool,
    /// Kubeconfig for this step's commands and collectors
    pub kubeconfig: Option<PathBuf>,
    pub apply: Vec<ApplyItem>,
    pub asserts: Vec<AssertItem>,
    pub errors: Vec<ErrorItem>,
    /// Objects removed before the step starts
    pub delete: Vec<ResourceRef>,
    /// Setup commands, run before apply
    pub commands: Vec<Command>,
    /// Commands that must succeed for the step to pass
    pub assert_commands: Vec<Command>,
    /// Diagnostics run when the step fails
    pub collectors: Vec<Collector>,
}

impl Step {
    pub fn new(index: i64, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add an object to apply
    #[must_use]
    pub fn apply(mut self, object: Node) -> Self {
        self.apply.push(ApplyItem {
            object,
            should_fail: false,
            action: None,
        });
        self
    }

    /// Add an object whose apply must be rejected
    #[must_use]
    pub fn apply_should_fail(mut self, object: Node) -> Self {
        self.apply.push(ApplyItem {
            object,
            should_fail: true,
            action: None,
        });
        self
    }

    /// Add an assertion compared with exact arrays
    #[must_use]
    pub fn assert(self, object: Node) -> Self {
        self.assert_with(object, AssertOptions::default())
    }

    /// Add an assertion with array rules
    #[must_use]
    pub fn assert_with(mut self, object: Node, options: AssertOptions) -> Self {
        self.asserts.push(AssertItem { object, options });
        self
    }

    /// Add an error assertion
    #[must_use]
    pub fn error(mut self, object: Node) -> Self {
        self.errors.push(ErrorItem { object });
        self
    }

    /// Delete objects before the step starts
    #[must_use]
    pub fn delete(mut self, target: ResourceRef) -> Self {
        self.delete.push(target);
        self
    }

    #[must_use]
    pub fn command(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    #[must_use]
    pub fn assert_command(mut self, command: Command) -> Self {
        self.assert_commands.push(command);
        self
    }

    #[must_use]
    pub fn collector(mut self, collector: Collector) -> Self {
        self.collectors.push(collector);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_kubeconfig(mut self, kubeconfig: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(kubeconfig.into());
        self
    }

    #[must_use]
    pub fn skip_delete(mut self) -> Self {
        self.skip_delete = true;
        self
    }

    /// Effective timeout: the `TestAssert` override, else the step's own
    pub fn timeout(&self) -> Duration {
        match self.assert_timeout {
            Some(timeout) if !timeout.is_zero() => timeout,
            _ => self.timeout,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.index, self.name)
    }
}
