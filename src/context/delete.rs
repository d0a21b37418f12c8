//! Removing objects before a step runs

use super::Context;
use crate::client::namespaced;
use crate::cleanup::{not_removed, wait_gone};
use crate::error::StepError;
use crate::poll::PollError;
use crate::resource::{object_name, object_namespace, ResourceRef};
use crate::step::Step;
use tokio::time::Instant;
use tracing::{debug, info};

impl Context {
    /// Turn references into concrete objects
    ///
    /// Named references are qualified with the ambient namespace. References
    /// without a name are listed (by label selector) and expand to every match.
    async fn resolve_targets(&self, refs: &[ResourceRef]) -> Result<Vec<ResourceRef>, StepError> {
        let mut targets = Vec::new();
        for reference in refs {
            let resolved = namespaced(self.client(), reference, &self.namespace)
                .await
                .map_err(|source| StepError::Client {
                    resource: reference.to_string(),
                    source,
                })?;

            if !resolved.name.is_empty() {
                targets.push(resolved);
                continue;
            }

            let listed = self
                .client()
                .list(&resolved)
                .await
                .map_err(|source| StepError::Client {
                    resource: resolved.to_string(),
                    source,
                })?;
            debug!(selector = %resolved, matches = listed.len(), "Expanded delete selector");
            targets.extend(listed.iter().map(|obj| {
                resolved.with_identity(
                    object_namespace(obj).unwrap_or_default(),
                    object_name(obj).unwrap_or_default(),
                )
            }));
        }
        Ok(targets)
    }

    /// Delete the objects a step lists under `delete` and wait until they are gone
    ///
    /// Objects that are already missing are fine. Running out of time is an
    /// error naming what is still there.
    pub async fn delete_existing(&self, step: &Step) -> Result<(), StepError> {
        if step.delete.is_empty() {
            return Ok(());
        }

        let targets = self.resolve_targets(&step.delete).await?;
        for target in &targets {
            match self.client().delete(target).await {
                Ok(()) => info!(resource = %target, "Deleted"),
                Err(e) if e.is_not_found() => {}
                Err(source) => {
                    return Err(StepError::Delete {
                        resource: target.to_string(),
                        source,
                    })
                }
            }
        }

        let timeout = self.step_timeout(step);
        let start = Instant::now();
        match wait_gone(
            self.client(),
            &targets,
            timeout,
            self.deadline,
            self.cancel.clone(),
        )
        .await
        {
            Ok(()) => Ok(()),
            Err(PollError::Timeout { .. }) => Err(StepError::WaitTimeout(
                not_removed(self.client(), &targets, timeout, start.elapsed()).await,
            )),
            Err(PollError::Cancelled { .. }) => Err(StepError::Cancelled),
            Err(PollError::Failed(source)) => Err(StepError::Client {
                resource: targets
                    .first()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
                source,
            }),
        }
    }

    /// Delete every object `step` applies; missing objects are ignored
    ///
    /// Does not wait for the deletions to finish.
    pub async fn clean(&self, step: &Step) -> Result<(), StepError> {
        for item in &step.apply {
            let reference = ResourceRef::from_object(&item.object)
                .map_err(|e| StepError::Validation(e.to_string()))?;
            let target = namespaced(self.client(), &reference, &self.namespace)
                .await
                .map_err(|source| StepError::Client {
                    resource: reference.to_string(),
                    source,
                })?;

            match self.client().delete(&target).await {
                Ok(()) => info!(resource = %target, "Deleted"),
                Err(e) if e.is_not_found() => {}
                Err(source) => {
                    return Err(StepError::Delete {
                        resource: target.to_string(),
                        source,
                    })
                }
            }
        }
        Ok(())
    }
}
