//! Step orchestration
//!
//! A [`Context`] binds the injected collaborators (resource client and
//! command runner) to a namespace and a set of run-wide limits, and drives a
//! [`Step`] through its phases:
//!
//! ```text
//! delete existing -> setup commands -> apply -> poll assertions -> collectors (on failure)
//! ```
//!
//! Phases run strictly in order. Deletion, setup and apply abort the step on
//! the first failure; the assertion loop reports every failure of its last
//! round.
//!
//! # Example
//!
//! ```no_run
//! use seppo_harness::client::MemoryClient;
//! use seppo_harness::cleanup::Cleanups;
//! use seppo_harness::command::ShellRunner;
//! use seppo_harness::context::Context;
//! use seppo_harness::step::Step;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let ctx = Context::new(Arc::new(MemoryClient::new()), Arc::new(ShellRunner::new()), "world");
//! let mut step = Step::new(0, "hello").apply(json!({
//!     "apiVersion": "v1",
//!     "kind": "ConfigMap",
//!     "metadata": { "name": "hello" },
//!     "data": { "greeting": "hi" }
//! }));
//!
//! let mut cleanups = Cleanups::new();
//! let errors = ctx.run_step(&mut step, &mut cleanups).await;
//! assert!(errors.is_empty());
//! cleanups.run(ctx.client()).await;
//! # }
//! ```

use crate::client::ResourceClient;
use crate::cleanup::Cleanups;
use crate::command::{run_commands, CommandEnv, CommandRunner};
use crate::error::StepError;
use crate::poll::CancelSignal;
use crate::step::Step;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

mod apply;
mod check;
mod delete;

/// Step timeout used when neither the step nor the harness sets one
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything a step needs to run
///
/// Cheap to clone; parallel test cases each get their own copy with their own
/// namespace (see [`Context::with_namespace`]).
#[derive(Clone)]
pub struct Context {
    client: Arc<dyn ResourceClient>,
    runner: Arc<dyn CommandRunner>,
    /// Ambient namespace for objects and commands that do not name one
    pub namespace: String,
    skip_delete: bool,
    kubeconfig: Option<PathBuf>,
    default_timeout: Duration,
    cancel: CancelSignal,
    deadline: Option<Instant>,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("namespace", &self.namespace)
            .field("skip_delete", &self.skip_delete)
            .field("kubeconfig", &self.kubeconfig)
            .field("default_timeout", &self.default_timeout)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl Context {
    pub fn new(
        client: Arc<dyn ResourceClient>,
        runner: Arc<dyn CommandRunner>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            client,
            runner,
            namespace: namespace.into(),
            skip_delete: false,
            kubeconfig: None,
            default_timeout: DEFAULT_STEP_TIMEOUT,
            cancel: CancelSignal::never(),
            deadline: None,
        }
    }

    /// Leave created objects in place after the test
    #[must_use]
    pub fn skip_delete(mut self, skip: bool) -> Self {
        self.skip_delete = skip;
        self
    }

    /// Kubeconfig handed to commands of steps that do not set their own
    #[must_use]
    pub fn kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    /// Timeout for steps without one; zero keeps the built-in default
    #[must_use]
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.default_timeout = timeout;
        }
        self
    }

    /// Abort waits when `signal` fires
    #[must_use]
    pub fn cancel_on(mut self, signal: CancelSignal) -> Self {
        self.cancel = signal;
        self
    }

    /// Run-wide deadline; every wait ends by then at the latest
    #[must_use]
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(self.deadline.map_or(deadline, |d| d.min(deadline)));
        self
    }

    /// Same collaborators and limits, different namespace
    #[must_use]
    pub fn with_namespace(&self, namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..self.clone()
        }
    }

    pub fn client(&self) -> &dyn ResourceClient {
        self.client.as_ref()
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Timeout that applies to `step`
    pub fn step_timeout(&self, step: &Step) -> Duration {
        let timeout = step.timeout();
        if timeout.is_zero() {
            self.default_timeout
        } else {
            timeout
        }
    }

    /// `budget` from now, cut short by the run-wide deadline
    fn bounded(&self, budget: Duration) -> Duration {
        match self.deadline {
            Some(deadline) => budget.min(deadline.saturating_duration_since(Instant::now())),
            None => budget,
        }
    }

    fn command_env(&self, step: &Step, timeout: Duration) -> CommandEnv {
        CommandEnv {
            namespace: self.namespace.clone(),
            work_dir: step.dir.clone(),
            kubeconfig: step.kubeconfig.clone().or_else(|| self.kubeconfig.clone()),
            timeout,
        }
    }

    /// Run the setup commands of `step`; background commands run in the foreground
    pub async fn run_setup_commands(&self, step: &Step) -> Result<(), StepError> {
        let env = self.command_env(step, self.step_timeout(step));
        run_commands(self.runner(), &step.commands, &env, false).await?;
        Ok(())
    }

    /// Run every collector of `step`; failures are logged and dropped
    pub async fn run_collectors(&self, step: &Step) {
        let env = self.command_env(step, self.step_timeout(step));
        for collector in &step.collectors {
            let Some(command) = collector.command() else {
                warn!(collector = %collector, "Skipping invalid collector");
                continue;
            };
            info!(collector = %collector, "Running collector");
            if let Err(e) = crate::command::run_command(self.runner(), &command, &env, false).await
            {
                warn!(collector = %collector, error = %e, "Collector failed");
            }
        }
    }

    /// Run one step from start to finish
    ///
    /// Objects the step creates are registered in `cleanups`; the caller owns
    /// running them once the whole test is over. The returned errors are
    /// empty when the step passed.
    #[instrument(skip_all, fields(step = %step, namespace = %self.namespace))]
    pub async fn run_step(&self, step: &mut Step, cleanups: &mut Cleanups) -> Vec<StepError> {
        info!(timeout = ?self.step_timeout(step), "Starting step");
        let start = Instant::now();

        if let Err(e) = self.delete_existing(step).await {
            return vec![e];
        }

        if let Err(e) = self.run_setup_commands(step).await {
            return vec![e];
        }

        let errors = self.apply_resources(step, cleanups).await;
        if !errors.is_empty() {
            warn!(failures = errors.len(), "Apply failed");
            return errors;
        }

        let errors = self.poll_assert(step).await;
        if errors.is_empty() {
            info!(elapsed = ?start.elapsed(), "Step passed");
        } else {
            warn!(failures = errors.len(), elapsed = ?start.elapsed(), "Step failed");
            self.run_collectors(step).await;
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MemoryClient;
    use crate::command::ShellRunner;

    fn context() -> Context {
        Context::new(
            Arc::new(MemoryClient::new()),
            Arc::new(ShellRunner::new()),
            "world",
        )
    }

    #[test]
    fn test_step_timeout_falls_back() {
        let ctx = context().default_timeout(Duration::from_secs(12));
        assert_eq!(ctx.step_timeout(&Step::new(0, "a")), Duration::from_secs(12));

        let step = Step::new(0, "a").with_timeout(Duration::from_secs(3));
        assert_eq!(ctx.step_timeout(&step), Duration::from_secs(3));

        let ctx = context().default_timeout(Duration::ZERO);
        assert_eq!(ctx.step_timeout(&Step::new(0, "a")), DEFAULT_STEP_TIMEOUT);
    }

    #[test]
    fn test_command_env_prefers_step_kubeconfig() {
        let ctx = context().kubeconfig("/etc/kube/harness");
        let step = Step::new(0, "a").in_dir("/tests/a");
        let env = ctx.command_env(&step, Duration::from_secs(5));
        assert_eq!(env.namespace, "world");
        assert_eq!(env.kubeconfig, Some(PathBuf::from("/etc/kube/harness")));
        assert_eq!(env.work_dir, Some(PathBuf::from("/tests/a")));

        let step = step.with_kubeconfig("/tests/a/kubeconfig");
        let env = ctx.command_env(&step, Duration::from_secs(5));
        assert_eq!(env.kubeconfig, Some(PathBuf::from("/tests/a/kubeconfig")));
    }

    #[tokio::test]
    async fn test_deadline_bounds_budget() {
        let ctx = context().deadline(Instant::now() + Duration::from_secs(2));
        assert!(ctx.bounded(Duration::from_secs(60)) <= Duration::from_secs(2));
        assert_eq!(
            context().bounded(Duration::from_secs(60)),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_with_namespace_keeps_limits() {
        let ctx = context()
            .skip_delete(true)
            .default_timeout(Duration::from_secs(9));
        let other = ctx.with_namespace("other");
        assert_eq!(other.namespace, "other");
        assert!(other.skip_delete);
        assert_eq!(other.default_timeout, Duration::from_secs(9));
    }
}
