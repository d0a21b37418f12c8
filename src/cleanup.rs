//! Deferred deletion of objects created by a test
//!
//! Every object a step creates is registered here (unless deletion is
//! suppressed). The owning test runs the list once its last step has
//! finished, newest object first, whether the steps passed or not.

use crate::client::{ClientError, ResourceClient};
use crate::error::CleanupError;
use crate::poll::{poll_until, CancelSignal, PollError};
use crate::resource::ResourceRef;
use crate::wait::WaitError;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How often deletion is re-checked
pub(crate) const DELETE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Fallback when a step has no timeout of its own
pub(crate) const DEFAULT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Wait until none of `targets` can be fetched
pub(crate) async fn wait_gone(
    client: &dyn ResourceClient,
    targets: &[ResourceRef],
    timeout: Duration,
    deadline: Option<Instant>,
    cancel: CancelSignal,
) -> Result<(), PollError<ClientError>> {
    if targets.is_empty() {
        return Ok(());
    }

    poll_until(|| async move {
        for target in targets {
            match client.get(target).await {
                Ok(_) => return Ok(false),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    })
    .interval(DELETE_POLL_INTERVAL)
    .timeout(timeout)
    .deadline_opt(deadline)
    .cancel_on(cancel)
    .retry_errors()
    .await_done()
    .await
    .map(|_| ())
}

/// Timeout error naming what is still there
///
/// When everything vanished between the last poll and this check, all
/// targets are reported.
pub(crate) async fn not_removed(
    client: &dyn ResourceClient,
    targets: &[ResourceRef],
    timeout: Duration,
    elapsed: Duration,
) -> WaitError {
    let mut present = Vec::new();
    for target in targets {
        if client.get(target).await.is_ok() {
            present.push(target.clone());
        }
    }
    if present.is_empty() {
        present = targets.to_vec();
    }
    WaitError::new(present, timeout, elapsed)
}

/// One registered deletion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cleanup {
    pub target: ResourceRef,
    pub timeout: Duration,
}

/// Deletions owned by a test, run in reverse registration order
#[derive(Debug, Clone, Default)]
pub struct Cleanups {
    actions: Vec<Cleanup>,
}

impl Cleanups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `target` for deletion; a zero timeout uses the default
    pub fn register(&mut self, target: ResourceRef, timeout: Duration) {
        let timeout = if timeout.is_zero() {
            DEFAULT_CLEANUP_TIMEOUT
        } else {
            timeout
        };
        debug!(resource = %target, "Registered cleanup");
        self.actions.push(Cleanup { target, timeout });
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Registered deletions, oldest first
    pub fn actions(&self) -> &[Cleanup] {
        &self.actions
    }

    /// Delete everything, newest first, confirming each removal
    ///
    /// Failures do not stop the remaining deletions; they are all returned.
    pub async fn run(self, client: &dyn ResourceClient) -> Vec<CleanupError> {
        let mut errors = Vec::new();

        for action in self.actions.into_iter().rev() {
            let resource = action.target.to_string();
            match client.delete(&action.target).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(source) => {
                    warn!(resource = %resource, error = %source, "Cleanup delete failed");
                    errors.push(CleanupError::Delete { resource, source });
                    continue;
                }
            }

            let targets = std::slice::from_ref(&action.target);
            let start = Instant::now();
            match wait_gone(client, targets, action.timeout, None, CancelSignal::never()).await {
                Ok(()) => info!(resource = %resource, "Deleted"),
                Err(PollError::Failed(source)) => {
                    errors.push(CleanupError::Delete { resource, source });
                }
                Err(_) => {
                    let err = not_removed(client, targets, action.timeout, start.elapsed()).await;
                    warn!(resource = %resource, "Object still present after cleanup");
                    errors.push(CleanupError::NotRemoved(err));
                }
            }
        }

        errors
    }
}
