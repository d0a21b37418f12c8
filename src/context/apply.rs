use super::Context;
use crate::cleanup::Cleanups;
use crate::client::{create_or_update, namespaced, ApplyAction};
use crate::error::StepError;
use crate::resource::ResourceRef;
use crate::step::{ApplyItem, Step};
use std::time::Duration;
use tracing::{debug, info};

impl Context {
    async fn apply_one(
        &self,
        item: &ApplyItem,
        timeout: Duration,
    ) -> Result<(ResourceRef, ApplyAction), StepError> {
        let reference = ResourceRef::from_object(&item.object)
            .map_err(|e| StepError::Validation(e.to_string()))?;
        let target = namespaced(self.client(), &reference, &self.namespace)
            .await
            .map_err(|source| StepError::Apply {
                resource: reference.to_string(),
                source,
            })?;

        let applied = tokio::select! {
            result = tokio::time::timeout(timeout, create_or_update(self.client(), &target, &item.object)) => result,
            () = self.cancel.cancelled() => return Err(StepError::Cancelled),
        };

        match applied {
            Ok(Ok((_, action))) => Ok((target, action)),
            Ok(Err(source)) => Err(StepError::Apply {
                resource: target.to_string(),
                source,
            }),
            Err(_) => Err(StepError::Timeout(format!("applying {target}"))),
        }
    }

    /// Create or update every object of `step`
    ///
    /// Created objects are registered in `cleanups` unless deletion is
    /// suppressed. Items marked `should_fail` invert the outcome: a rejection
    /// is swallowed and an accepted apply becomes an error. All items are
    /// attempted; every failure is returned.
    pub async fn apply_resources(
        &self,
        step: &mut Step,
        cleanups: &mut Cleanups,
    ) -> Vec<StepError> {
        let timeout = self.step_timeout(step);
        let skip_delete = self.skip_delete || step.skip_delete;
        let mut errors = Vec::new();

        for item in &mut step.apply {
            match self.apply_one(item, self.bounded(timeout)).await {
                Ok((target, action)) => {
                    info!(resource = %target, action = %action, "Applied");
                    item.action = Some(action);
                    if action == ApplyAction::Created && !skip_delete {
                        cleanups.register(target.clone(), timeout);
                    }
                    if item.should_fail {
                        errors.push(StepError::UnexpectedSuccess {
                            resource: target.to_string(),
                        });
                    }
                }
                Err(StepError::Cancelled) => {
                    errors.push(StepError::Cancelled);
                    break;
                }
                Err(e) if item.should_fail => {
                    debug!(error = %e, "Apply rejected as expected");
                }
                Err(e) => errors.push(e),
            }
        }

        errors
    }
}
