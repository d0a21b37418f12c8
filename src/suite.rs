//! Running many test cases with bounded parallelism

use crate::case::{TestCase, TestOutcome};
use crate::config::HarnessConfig;
use crate::context::Context;
use crate::poll::{CancelHandle, CancelSignal};
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Outcome of every test case of a suite, in completion order
#[derive(Debug, Clone, Default)]
pub struct SuiteReport {
    pub outcomes: Vec<TestOutcome>,
    pub duration: Duration,
}

impl SuiteReport {
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(TestOutcome::passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &TestOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.passed())
    }
}

/// A set of independent test cases
#[derive(Debug)]
pub struct Suite {
    config: HarnessConfig,
    cases: Vec<TestCase>,
    cancel: Option<CancelSignal>,
}

impl Suite {
    pub fn new(config: HarnessConfig) -> Self {
        Self {
            config,
            cases: Vec::new(),
            cancel: None,
        }
    }

    #[must_use]
    pub fn case(mut self, case: TestCase) -> Self {
        self.cases.push(case);
        self
    }

    /// A handle that aborts the running suite
    ///
    /// Cancelling stops every wait in progress. Objects already created are
    /// still cleaned up unless deletion is suppressed.
    pub fn cancel_handle(&mut self) -> CancelHandle {
        let (handle, signal) = CancelSignal::pair();
        self.cancel = Some(signal);
        handle
    }

    /// Run every case, at most `parallel` at a time
    pub async fn run(self, ctx: &Context) -> SuiteReport {
        let start = Instant::now();
        let mut ctx = ctx.clone();
        if let Some(signal) = &self.cancel {
            ctx = ctx.cancel_on(signal.clone());
        }
        if let Some(timeout) = self.config.suite_timeout {
            ctx = ctx.deadline(start + timeout);
        }

        let parallel = self.config.parallel.max(1);
        info!(cases = self.cases.len(), parallel, "Running suite");

        let ctx = &ctx;
        let outcomes: Vec<TestOutcome> = stream::iter(self.cases)
            .map(|mut case| async move { case.run(ctx).await })
            .buffer_unordered(parallel)
            .collect()
            .await;

        let report = SuiteReport {
            outcomes,
            duration: start.elapsed(),
        };
        let failed = report.failures().count();
        if failed == 0 {
            info!(duration = ?report.duration, "Suite passed");
        } else {
            warn!(failed, duration = ?report.duration, "Suite failed");
        }
        report
    }
}
