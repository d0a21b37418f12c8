//! Deletion waits that ran out of time
//!
//! Returned when objects removed before a step, or during cleanup, are still
//! readable once the allowed time has passed.

use crate::resource::ResourceRef;
use std::collections::BTreeMap;
use std::time::Duration;

/// Objects still present when a deletion wait gave up
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "deletion not finished after {elapsed:?} (limit {timeout:?}), still present: {}",
    render_remaining(.remaining)
)]
pub struct WaitError {
    /// What could still be fetched, in the order it was waited on
    pub remaining: Vec<ResourceRef>,
    pub elapsed: Duration,
    pub timeout: Duration,
}

impl WaitError {
    pub fn new(remaining: Vec<ResourceRef>, timeout: Duration, elapsed: Duration) -> Self {
        Self {
            remaining,
            elapsed,
            timeout,
        }
    }

    /// Whether `target` was among the objects left behind
    pub fn contains(&self, target: &ResourceRef) -> bool {
        self.remaining.iter().any(|r| {
            r.kind == target.kind && r.namespace == target.namespace && r.name == target.name
        })
    }
}

/// `Pod world/a, world/b; Namespace team-a`
fn render_remaining(remaining: &[ResourceRef]) -> String {
    let mut by_kind: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for target in remaining {
        let name = if target.namespace.is_empty() {
            target.name.clone()
        } else {
            format!("{}/{}", target.namespace, target.name)
        };
        by_kind.entry(target.kind.as_str()).or_default().push(name);
    }

    by_kind
        .into_iter()
        .map(|(kind, names)| format!("{kind} {}", names.join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}
