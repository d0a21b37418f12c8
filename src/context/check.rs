//! Assertion rounds
//!
//! One round fetches fresh live state and evaluates, in order, the step's
//! assertions, its assertion commands and its error assertions. The round
//! stops early as soon as a deadline-exceeded error shows up; otherwise every
//! failure is collected.

use super::Context;
use crate::client::namespaced;
use crate::command::run_command;
use crate::diff::pretty_diff;
use crate::error::StepError;
use crate::poll::{poll_until, PollError};
use crate::resource::{object_name, object_namespace, set_namespace, Node, ResourceRef};
use crate::step::{AssertItem, ErrorItem, Step};
use crate::strategy::RuleResolver;
use crate::subset::{is_subset, ExactStrategy};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Pause between assertion rounds
pub const ASSERT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Smallest time budget handed to a single round
const MIN_ROUND_BUDGET: Duration = Duration::from_secs(1);

fn has_timeout(errors: &[StepError]) -> bool {
    errors.iter().any(StepError::is_timeout)
}

fn identity(reference: &ResourceRef, obj: &Node) -> String {
    reference
        .with_identity(
            object_namespace(obj).unwrap_or_default(),
            object_name(obj).unwrap_or_default(),
        )
        .to_string()
}

impl Context {
    /// Expected document and the live objects it is compared with
    async fn fetch(&self, expected: &Node) -> Result<(ResourceRef, Node, Vec<Node>), StepError> {
        let reference =
            ResourceRef::from_object(expected).map_err(|e| StepError::Validation(e.to_string()))?;
        let target = namespaced(self.client(), &reference, &self.namespace)
            .await
            .map_err(|source| StepError::Client {
                resource: reference.to_string(),
                source,
            })?;

        let mut expected = expected.clone();
        if !target.namespace.is_empty() {
            set_namespace(&mut expected, &target.namespace);
        }

        let actuals = if target.name.is_empty() {
            self.client().list(&target).await
        } else {
            self.client().get(&target).await.map(|obj| vec![obj])
        };
        let actuals = actuals.map_err(|source| StepError::Client {
            resource: target.to_string(),
            source,
        })?;

        Ok((target, expected, actuals))
    }

    /// Compare one assertion with the live state
    ///
    /// A named assertion fetches that object. An unnamed one lists the kind
    /// in the namespace and passes when any listed object matches; otherwise
    /// every candidate's mismatch is reported.
    pub async fn check_resource(&self, item: &AssertItem) -> Vec<StepError> {
        let (target, expected, actuals) = match self.fetch(&item.object).await {
            Ok(fetched) => fetched,
            Err(e) => return vec![e],
        };

        if actuals.is_empty() {
            return vec![StepError::NoMatches { gvk: target.gvk() }];
        }

        let resolver = RuleResolver::new(&item.options, &expected);
        let mut errors = Vec::with_capacity(actuals.len());
        for actual in &actuals {
            match is_subset(&expected, actual, "", &resolver) {
                Ok(()) => return Vec::new(),
                Err(source) => {
                    let diff = pretty_diff(&expected, actual).ok();
                    if let Some(diff) = &diff {
                        debug!(resource = %target, "Assertion mismatch\n{diff}");
                    }
                    errors.push(StepError::Mismatch {
                        resource: identity(&target, actual),
                        source,
                        diff,
                    });
                }
            }
        }
        errors
    }

    /// Check that nothing live matches an error assertion
    pub async fn check_resource_absent(&self, item: &ErrorItem) -> Result<(), StepError> {
        let (target, expected, actuals) = match self.fetch(&item.object).await {
            Ok(fetched) => fetched,
            Err(StepError::Client { source, .. }) if source.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };

        let matched: Vec<&Node> = actuals
            .iter()
            .filter(|actual| is_subset(&expected, actual, "", &ExactStrategy).is_ok())
            .collect();

        match matched.split_first() {
            None => Ok(()),
            Some((first, rest)) => Err(StepError::Present {
                gvk: target.gvk(),
                name: object_name(first).unwrap_or_default().to_string(),
                others: rest.len(),
            }),
        }
    }

    /// Run the assertion commands of `step`, each bounded by `remaining`
    pub async fn check_assert_commands(&self, step: &Step, remaining: Duration) -> Vec<StepError> {
        let env = self.command_env(step, remaining);
        let mut errors = Vec::new();
        for command in &step.assert_commands {
            if let Err(e) = run_command(self.runner(), command, &env, false).await {
                let timed_out = e.is_timeout();
                errors.push(StepError::from(e));
                if timed_out {
                    break;
                }
            }
        }
        errors
    }

    /// One assertion round
    pub async fn check(&self, step: &Step, remaining: Duration) -> Vec<StepError> {
        let mut errors = Vec::new();

        for item in &step.asserts {
            errors.extend(self.check_resource(item).await);
            if has_timeout(&errors) {
                return errors;
            }
        }

        errors.extend(self.check_assert_commands(step, remaining).await);
        if has_timeout(&errors) {
            return errors;
        }

        for item in &step.errors {
            if let Err(e) = self.check_resource_absent(item).await {
                let timed_out = e.is_timeout();
                errors.push(e);
                if timed_out {
                    break;
                }
            }
        }

        errors
    }

    /// Repeat assertion rounds until one passes or time runs out
    ///
    /// Returns the failures of the last round, empty on success. A round with
    /// a deadline-exceeded error ends the loop without waiting out the step
    /// timeout.
    pub async fn poll_assert(&self, step: &Step) -> Vec<StepError> {
        let deadline = Instant::now() + self.step_timeout(step);

        let result = poll_until(|| async move {
            let remaining = deadline
                .saturating_duration_since(Instant::now())
                .max(MIN_ROUND_BUDGET);
            match tokio::time::timeout(remaining, self.check(step, remaining)).await {
                Ok(errors) if errors.is_empty() => Ok(true),
                Ok(errors) => {
                    debug!(failures = errors.len(), "Assertions not satisfied yet");
                    Err(errors)
                }
                Err(_) => Err(vec![StepError::Timeout(format!(
                    "assertion round for step {step} exceeded {remaining:?}"
                ))]),
            }
        })
        .interval(ASSERT_POLL_INTERVAL)
        .deadline(deadline)
        .deadline_opt(self.deadline)
        .cancel_on(self.cancel.clone())
        .retry_errors_if(|errors: &Vec<StepError>| !has_timeout(errors))
        .await_done()
        .await;

        match result {
            Ok(rounds) => {
                debug!(rounds, "Assertions passed");
                Vec::new()
            }
            Err(PollError::Timeout {
                last_error: Some(errors),
                ..
            }) => errors,
            Err(PollError::Timeout { elapsed, .. }) => {
                vec![StepError::Timeout(format!("assertions after {elapsed:?}"))]
            }
            Err(PollError::Failed(errors)) => errors,
            Err(PollError::Cancelled { .. }) => vec![StepError::Cancelled],
        }
    }
}
