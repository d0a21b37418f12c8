//! Resource store access
//!
//! The orchestrator talks to the cluster through [`ResourceClient`]. Two
//! implementations ship with the crate:
//! - [`KubeClient`]: a real cluster through the kube dynamic API
//! - [`MemoryClient`]: an in-process store for tests and dry runs

#![allow(clippy::missing_errors_doc)]

use crate::resource::{merge, object_name, set_namespace, Node, ResourceRef};
use async_trait::async_trait;
use std::fmt;
use tracing::debug;

mod kubernetes;
mod memory;

pub use kubernetes::KubeClient;
pub use memory::MemoryClient;

/// Errors from resource store operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("conflict updating {0}: {1}")]
    Conflict(String, String),

    #[error("invalid object: {0}")]
    Invalid(String),

    #[error("unknown kind: {0}")]
    UnknownKind(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("request timed out: {0}")]
    Timeout(String),
}

impl ClientError {
    /// Whether the object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether the request ran out of time
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Access to the remote resource store
///
/// References passed in are already namespace-qualified (see [`namespaced`]);
/// an empty namespace addresses cluster-scoped objects, or every namespace when
/// listing.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Fetch one object by name
    async fn get(&self, target: &ResourceRef) -> Result<Node, ClientError>;

    /// List objects of a kind, filtered by the reference's labels
    async fn list(&self, target: &ResourceRef) -> Result<Vec<Node>, ClientError>;

    /// Create an object
    async fn create(&self, target: &ResourceRef, obj: &Node) -> Result<Node, ClientError>;

    /// Replace an existing object; `obj` must carry the live resourceVersion
    async fn update(&self, target: &ResourceRef, obj: &Node) -> Result<Node, ClientError>;

    /// Delete one object by name
    async fn delete(&self, target: &ResourceRef) -> Result<(), ClientError>;

    /// Whether objects of this kind live in a namespace
    async fn is_namespaced(&self, api_version: &str, kind: &str) -> Result<bool, ClientError>;
}

/// Qualify a reference for the store
///
/// Cluster-scoped kinds lose their namespace. Namespaced kinds without one
/// take `default_namespace`.
pub async fn namespaced(
    client: &dyn ResourceClient,
    target: &ResourceRef,
    default_namespace: &str,
) -> Result<ResourceRef, ClientError> {
    let mut resolved = target.clone();
    if client
        .is_namespaced(&target.api_version, &target.kind)
        .await?
    {
        if resolved.namespace.is_empty() {
            resolved.namespace = default_namespace.to_string();
        }
    } else {
        resolved.namespace.clear();
    }
    Ok(resolved)
}

/// What an apply did to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyAction {
    Created,
    Updated,
}

impl fmt::Display for ApplyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
        }
    }
}

/// Create the object, or update it if it already exists
///
/// On update the declared document is merged over the live object, so
/// resourceVersion and other server-assigned fields are sent back unchanged.
pub async fn create_or_update(
    client: &dyn ResourceClient,
    target: &ResourceRef,
    obj: &Node,
) -> Result<(Node, ApplyAction), ClientError> {
    let mut declared = obj.clone();
    set_namespace(&mut declared, &target.namespace);

    if object_name(&declared).map_or(true, str::is_empty) {
        return Err(ClientError::Invalid(format!(
            "{} must have metadata.name",
            target.kind
        )));
    }

    match client.get(target).await {
        Ok(mut live) => {
            merge(&mut live, &declared);
            debug!(resource = %target, "Updating existing object");
            let updated = client.update(target, &live).await?;
            Ok((updated, ApplyAction::Updated))
        }
        Err(e) if e.is_not_found() => {
            debug!(resource = %target, "Creating object");
            let created = client.create(target, &declared).await?;
            Ok((created, ApplyAction::Created))
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod(name: &str) -> Node {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": name },
            "spec": { "containers": [{ "name": "nginx", "image": "nginx:1.7.9" }] }
        })
    }

    #[tokio::test]
    async fn test_namespaced_fills_ambient_namespace() {
        let client = MemoryClient::new();
        let target = ResourceRef::new("v1", "Pod").name("hello");

        let resolved = namespaced(&client, &target, "world").await.unwrap();
        assert_eq!(resolved.namespace, "world");

        let explicit = target.clone().namespace("other");
        let resolved = namespaced(&client, &explicit, "world").await.unwrap();
        assert_eq!(resolved.namespace, "other");
    }

    #[tokio::test]
    async fn test_namespaced_clears_cluster_scoped() {
        let client = MemoryClient::new();
        let target = ResourceRef::new("v1", "Namespace")
            .name("team-a")
            .namespace("world");

        let resolved = namespaced(&client, &target, "world").await.unwrap();
        assert!(resolved.namespace.is_empty());
    }

    #[tokio::test]
    async fn test_create_then_update() {
        let client = MemoryClient::new();
        let target = ResourceRef::new("v1", "Pod").name("hello").namespace("world");

        let (created, action) = create_or_update(&client, &target, &pod("hello"))
            .await
            .unwrap();
        assert_eq!(action, ApplyAction::Created);
        assert_eq!(created["metadata"]["namespace"], "world");

        let (updated, action) = create_or_update(&client, &target, &pod("hello"))
            .await
            .unwrap();
        assert_eq!(action, ApplyAction::Updated);
        assert_ne!(
            created["metadata"]["resourceVersion"],
            updated["metadata"]["resourceVersion"]
        );
    }

    #[tokio::test]
    async fn test_update_keeps_live_fields() {
        let client = MemoryClient::new();
        let mut live = pod("hello");
        live["metadata"]["namespace"] = json!("world");
        live["status"] = json!({ "phase": "Running" });
        client.insert(live).unwrap();

        let target = ResourceRef::new("v1", "Pod").name("hello").namespace("world");
        let mut declared = pod("hello");
        declared["metadata"]["labels"] = json!({ "app": "web" });

        let (updated, _) = create_or_update(&client, &target, &declared).await.unwrap();
        assert_eq!(updated["status"]["phase"], "Running");
        assert_eq!(updated["metadata"]["labels"]["app"], "web");
    }

    #[tokio::test]
    async fn test_create_requires_name() {
        let client = MemoryClient::new();
        let target = ResourceRef::new("v1", "Pod").namespace("world");
        let obj = json!({ "apiVersion": "v1", "kind": "Pod", "metadata": {} });

        let err = create_or_update(&client, &target, &obj).await.unwrap_err();
        assert!(matches!(err, ClientError::Invalid(_)));
    }

    #[test]
    fn test_apply_action_display() {
        assert_eq!(ApplyAction::Created.to_string(), "created");
        assert_eq!(ApplyAction::Updated.to_string(), "updated");
    }
}
