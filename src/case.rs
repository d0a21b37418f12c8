//! Test cases: ordered steps sharing one cleanup list

use crate::cleanup::Cleanups;
use crate::context::Context;
use crate::error::StepError;
use crate::step::Step;
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, instrument, warn};

/// A named sequence of steps
#[derive(Debug, Clone, Default)]
pub struct TestCase {
    pub name: String,
    pub steps: Vec<Step>,
    /// Namespace for this case; the context's namespace when unset
    pub namespace: Option<String>,
}

/// Result of running a [`TestCase`]
#[derive(Debug, Clone)]
pub struct TestOutcome {
    pub name: String,
    /// The step that failed, as "index-name"
    pub failed_step: Option<String>,
    /// Failures of the failing step, followed by cleanup failures
    pub errors: Vec<StepError>,
    pub duration: Duration,
}

impl TestOutcome {
    pub fn passed(&self) -> bool {
        self.errors.is_empty()
    }
}

impl TestCase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    #[must_use]
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Sort steps by index; indices must be unique
    pub fn validate(&mut self) -> Result<(), StepError> {
        self.steps.sort_by_key(|step| step.index);
        let mut seen = BTreeSet::new();
        for step in &self.steps {
            if !seen.insert(step.index) {
                return Err(StepError::Validation(format!(
                    "test {} has more than one step with index {}",
                    self.name, step.index
                )));
            }
        }
        Ok(())
    }

    /// Run every step in order, stopping at the first failure
    ///
    /// Objects created along the way are deleted afterwards, newest first,
    /// whatever the outcome. Cleanup failures are reported with the step
    /// failures.
    #[instrument(skip_all, fields(test = %self.name))]
    pub async fn run(&mut self, ctx: &Context) -> TestOutcome {
        let start = Instant::now();
        let ctx = match &self.namespace {
            Some(namespace) => ctx.with_namespace(namespace.clone()),
            None => ctx.clone(),
        };

        let mut outcome = TestOutcome {
            name: self.name.clone(),
            failed_step: None,
            errors: Vec::new(),
            duration: Duration::ZERO,
        };

        if let Err(e) = self.validate() {
            outcome.errors.push(e);
            return outcome;
        }

        info!(steps = self.steps.len(), namespace = %ctx.namespace, "Starting test");
        let mut cleanups = Cleanups::new();
        for step in &mut self.steps {
            let errors = ctx.run_step(step, &mut cleanups).await;
            if !errors.is_empty() {
                outcome.failed_step = Some(step.to_string());
                outcome.errors = errors;
                break;
            }
        }

        if !cleanups.is_empty() {
            info!(objects = cleanups.len(), "Cleaning up");
        }
        let cleanup_errors = cleanups.run(ctx.client()).await;
        if !cleanup_errors.is_empty() {
            warn!(failures = cleanup_errors.len(), "Cleanup incomplete");
        }
        outcome
            .errors
            .extend(cleanup_errors.into_iter().map(StepError::from));

        outcome.duration = start.elapsed();
        if outcome.passed() {
            info!(duration = ?outcome.duration, "Test passed");
        } else {
            warn!(
                duration = ?outcome.duration,
                failed_step = outcome.failed_step.as_deref().unwrap_or("cleanup"),
                "Test failed"
            );
        }
        outcome
    }
}
