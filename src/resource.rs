//! Resource identity and helpers over untyped documents
//!
//! Every document the harness touches is a [`Node`] (a `serde_json::Value`).
//! [`ResourceRef`] is the identity of a remote object: its type, namespace and
//! either a name or a label selector.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A resource document: scalar, sequence or mapping
pub type Node = serde_json::Value;

/// Errors for documents that cannot be identified
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    #[error("document is not a mapping")]
    NotAnObject,

    #[error("document is missing {0}")]
    MissingField(&'static str),
}

/// Identity of a remote object
///
/// An empty `namespace` means "use the ambient namespace of the test". An
/// empty `name` means the reference addresses every object of the kind,
/// optionally narrowed by `labels`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    /// API group and version (e.g., "v1", "apps/v1")
    pub api_version: String,
    /// Kind (e.g., "Pod")
    pub kind: String,
    /// Namespace, empty for cluster-scoped objects or the ambient namespace
    #[serde(default)]
    pub namespace: String,
    /// Object name, empty to select by kind and labels
    #[serde(default)]
    pub name: String,
    /// Label selector used when `name` is empty
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ResourceRef {
    /// Reference every object of a kind
    pub fn new(api_version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            ..Default::default()
        }
    }

    /// Set the object name
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the namespace
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Add a label to the selector
    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Identity of a document from its `apiVersion`, `kind` and `metadata`
    pub fn from_object(obj: &Node) -> Result<Self, ResourceError> {
        let map = obj.as_object().ok_or(ResourceError::NotAnObject)?;
        let api_version = map
            .get("apiVersion")
            .and_then(Node::as_str)
            .filter(|s| !s.is_empty())
            .ok_or(ResourceError::MissingField("apiVersion"))?;
        let kind = map
            .get("kind")
            .and_then(Node::as_str)
            .filter(|s| !s.is_empty())
            .ok_or(ResourceError::MissingField("kind"))?;

        Ok(Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            namespace: object_namespace(obj).unwrap_or_default().to_string(),
            name: object_name(obj).unwrap_or_default().to_string(),
            labels: BTreeMap::new(),
        })
    }

    /// API group, empty for the core group
    pub fn group(&self) -> &str {
        self.api_version
            .split_once('/')
            .map_or("", |(group, _)| group)
    }

    /// API version without the group
    pub fn version(&self) -> &str {
        self.api_version
            .split_once('/')
            .map_or(self.api_version.as_str(), |(_, version)| version)
    }

    /// Label selector string (e.g., "app=web,tier=front"), if any labels are set
    pub fn label_selector(&self) -> Option<String> {
        if self.labels.is_empty() {
            return None;
        }
        Some(
            self.labels
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(","),
        )
    }

    /// Group/version/kind in the "apps/v1, Kind=Deployment" form
    pub fn gvk(&self) -> String {
        format!("{}, Kind={}", self.api_version, self.kind)
    }

    /// Reference to the same type with a specific name and namespace
    #[must_use]
    pub fn with_identity(&self, namespace: &str, name: &str) -> Self {
        Self {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            labels: BTreeMap::new(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = if self.name.is_empty() {
            "*"
        } else {
            self.name.as_str()
        };
        if self.namespace.is_empty() {
            write!(f, "{}:{}", self.kind, name)
        } else {
            write!(f, "{}:{}/{}", self.kind, self.namespace, name)
        }
    }
}

/// `metadata` of a document
pub fn metadata(obj: &Node) -> Option<&Node> {
    obj.get("metadata")
}

/// `metadata.name` of a document
pub fn object_name(obj: &Node) -> Option<&str> {
    metadata(obj)?.get("name")?.as_str()
}

/// `metadata.namespace` of a document
pub fn object_namespace(obj: &Node) -> Option<&str> {
    metadata(obj)?.get("namespace")?.as_str()
}

/// `metadata.labels` of a document as string pairs
pub fn object_labels(obj: &Node) -> BTreeMap<String, String> {
    metadata(obj)
        .and_then(|m| m.get("labels"))
        .and_then(Node::as_object)
        .map(|labels| {
            labels
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Set or clear `metadata.namespace`, creating `metadata` when needed
pub fn set_namespace(obj: &mut Node, namespace: &str) {
    let Some(map) = obj.as_object_mut() else {
        return;
    };
    let meta = map
        .entry("metadata")
        .or_insert_with(|| Node::Object(serde_json::Map::new()));
    if let Some(meta) = meta.as_object_mut() {
        if namespace.is_empty() {
            meta.remove("namespace");
        } else {
            meta.insert("namespace".to_string(), Node::String(namespace.to_string()));
        }
    }
}

/// Deep-merge `overlay` into `base`
///
/// Mappings merge key by key; any other value in `overlay` replaces the one in
/// `base`. Used to round-trip live objects on update so that server-assigned
/// fields survive.
pub fn merge(base: &mut Node, overlay: &Node) {
    match (base, overlay) {
        (Node::Object(base), Node::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_object() {
        let pod = json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": "hello", "namespace": "world" }
        });

        let r = ResourceRef::from_object(&pod).unwrap();
        assert_eq!(r.api_version, "v1");
        assert_eq!(r.kind, "Pod");
        assert_eq!(r.name, "hello");
        assert_eq!(r.namespace, "world");
        assert_eq!(r.to_string(), "Pod:world/hello");
    }

    #[test]
    fn test_from_object_missing_kind() {
        let err = ResourceRef::from_object(&json!({ "apiVersion": "v1" })).unwrap_err();
        assert_eq!(err, ResourceError::MissingField("kind"));

        let err = ResourceRef::from_object(&json!("scalar")).unwrap_err();
        assert_eq!(err, ResourceError::NotAnObject);
    }

    #[test]
    fn test_group_and_version() {
        let core = ResourceRef::new("v1", "Pod");
        assert_eq!(core.group(), "");
        assert_eq!(core.version(), "v1");

        let apps = ResourceRef::new("apps/v1", "Deployment");
        assert_eq!(apps.group(), "apps");
        assert_eq!(apps.version(), "v1");
        assert_eq!(apps.gvk(), "apps/v1, Kind=Deployment");
    }

    #[test]
    fn test_label_selector() {
        let r = ResourceRef::new("v1", "Pod")
            .label("tier", "front")
            .label("app", "web");
        assert_eq!(r.label_selector().as_deref(), Some("app=web,tier=front"));
        assert_eq!(ResourceRef::new("v1", "Pod").label_selector(), None);
    }

    #[test]
    fn test_display_cluster_scoped_and_selector() {
        let ns = ResourceRef::new("v1", "Namespace").name("team-a");
        assert_eq!(ns.to_string(), "Namespace:team-a");

        let all = ResourceRef::new("v1", "Pod").namespace("world");
        assert_eq!(all.to_string(), "Pod:world/*");
    }

    #[test]
    fn test_set_namespace() {
        let mut obj = json!({ "kind": "Pod" });
        set_namespace(&mut obj, "world");
        assert_eq!(object_namespace(&obj), Some("world"));

        set_namespace(&mut obj, "");
        assert_eq!(object_namespace(&obj), None);
    }

    #[test]
    fn test_merge_keeps_server_fields() {
        let mut live = json!({
            "metadata": { "name": "hello", "resourceVersion": "7" },
            "spec": { "containers": [{ "name": "a" }], "nodeName": "n1" }
        });
        let declared = json!({
            "metadata": { "name": "hello" },
            "spec": { "restartPolicy": "OnFailure", "containers": [] }
        });

        merge(&mut live, &declared);

        assert_eq!(live["metadata"]["resourceVersion"], "7");
        assert_eq!(live["spec"]["nodeName"], "n1");
        assert_eq!(live["spec"]["restartPolicy"], "OnFailure");
        assert_eq!(live["spec"]["containers"], json!([]));
    }

    #[test]
    fn test_object_labels() {
        let obj = json!({ "metadata": { "labels": { "app": "web", "n": 1 } } });
        let labels = object_labels(&obj);
        assert_eq!(labels.len(), 1);
        assert_eq!(labels.get("app").map(String::as_str), Some("web"));
    }
}
