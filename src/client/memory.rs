use super::{ClientError, ResourceClient};
use crate::resource::{object_labels, Node, ResourceRef};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

/// Kinds treated as cluster-scoped unless configured otherwise
const CLUSTER_SCOPED: &[&str] = &[
    "Namespace",
    "Node",
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
    "PersistentVolume",
    "StorageClass",
];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    api_version: String,
    kind: String,
    namespace: String,
    name: String,
}

impl Key {
    fn of(target: &ResourceRef) -> Self {
        Self {
            api_version: target.api_version.clone(),
            kind: target.kind.clone(),
            namespace: target.namespace.clone(),
            name: target.name.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct Store {
    objects: BTreeMap<Key, Node>,
    cluster_scoped: BTreeSet<String>,
    revision: u64,
}

impl Store {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    /// Write identity and bookkeeping fields into `obj`
    fn stamp(&mut self, key: &Key, obj: &mut Node, uid: Option<Node>) -> Result<(), ClientError> {
        let revision = self.next_revision();
        let map = obj
            .as_object_mut()
            .ok_or_else(|| ClientError::Invalid(format!("{} is not a mapping", key.kind)))?;
        map.insert("apiVersion".into(), Node::String(key.api_version.clone()));
        map.insert("kind".into(), Node::String(key.kind.clone()));

        let meta = map
            .entry("metadata")
            .or_insert_with(|| Node::Object(serde_json::Map::new()))
            .as_object_mut()
            .ok_or_else(|| ClientError::Invalid("metadata is not a mapping".to_string()))?;
        meta.insert("name".into(), Node::String(key.name.clone()));
        if key.namespace.is_empty() {
            meta.remove("namespace");
        } else {
            meta.insert("namespace".into(), Node::String(key.namespace.clone()));
        }
        meta.insert("resourceVersion".into(), Node::String(revision.clone()));
        let uid = uid.unwrap_or_else(|| Node::String(format!("uid-{revision}")));
        meta.insert("uid".into(), uid);
        Ok(())
    }
}

/// In-memory resource store
///
/// Behaves like a small API server: objects get a `uid` and a
/// `resourceVersion` that changes on every write, updates carrying a stale
/// `resourceVersion` are rejected with [`ClientError::Conflict`], and lists
/// honor label selectors. Clones share the same store.
///
/// # Example
///
/// ```
/// use seppo_harness::client::{MemoryClient, ResourceClient};
/// use seppo_harness::resource::ResourceRef;
/// use serde_json::json;
///
/// # tokio_test_block(async {
/// let client = MemoryClient::new();
/// client.insert(json!({
///     "apiVersion": "v1",
///     "kind": "Pod",
///     "metadata": { "name": "hello", "namespace": "world" }
/// })).unwrap();
///
/// let pod = ResourceRef::new("v1", "Pod").name("hello").namespace("world");
/// assert!(client.get(&pod).await.is_ok());
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f)
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MemoryClient {
    store: Arc<Mutex<Store>>,
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryClient {
    /// Empty store with the usual cluster-scoped kinds
    pub fn new() -> Self {
        let store = Store {
            cluster_scoped: CLUSTER_SCOPED.iter().map(|k| (*k).to_string()).collect(),
            ..Store::default()
        };
        Self {
            store: Arc::new(Mutex::new(store)),
        }
    }

    /// Treat `kind` as cluster-scoped
    #[must_use]
    pub fn with_cluster_scoped(self, kind: impl Into<String>) -> Self {
        self.lock().cluster_scoped.insert(kind.into());
        self
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Store `obj` as-is (create or overwrite), bypassing version checks
    ///
    /// Stands in for changes made by other actors, such as a controller
    /// filling in `status`.
    pub fn insert(&self, obj: Node) -> Result<Node, ClientError> {
        let mut target = ResourceRef::from_object(&obj)
            .map_err(|e| ClientError::Invalid(e.to_string()))?;
        if target.name.is_empty() {
            return Err(ClientError::Invalid(format!(
                "{} must have metadata.name",
                target.kind
            )));
        }

        let mut store = self.lock();
        if store.cluster_scoped.contains(&target.kind) {
            target.namespace.clear();
        }
        let key = Key::of(&target);
        let uid = store
            .objects
            .get(&key)
            .and_then(|o| o.pointer("/metadata/uid").cloned());

        let mut obj = obj;
        store.stamp(&key, &mut obj, uid)?;
        store.objects.insert(key, obj.clone());
        Ok(obj)
    }

    /// Every stored object, ordered by type, namespace and name
    pub fn objects(&self) -> Vec<Node> {
        self.lock().objects.values().cloned().collect()
    }
}

#[async_trait]
impl ResourceClient for MemoryClient {
    async fn get(&self, target: &ResourceRef) -> Result<Node, ClientError> {
        self.lock()
            .objects
            .get(&Key::of(target))
            .cloned()
            .ok_or_else(|| ClientError::NotFound(target.to_string()))
    }

    async fn list(&self, target: &ResourceRef) -> Result<Vec<Node>, ClientError> {
        let store = self.lock();
        Ok(store
            .objects
            .iter()
            .filter(|(key, _)| {
                key.api_version == target.api_version
                    && key.kind == target.kind
                    && (target.namespace.is_empty() || key.namespace == target.namespace)
            })
            .filter(|(_, obj)| {
                let labels = object_labels(obj);
                target
                    .labels
                    .iter()
                    .all(|(k, v)| labels.get(k) == Some(v))
            })
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(&self, target: &ResourceRef, obj: &Node) -> Result<Node, ClientError> {
        let mut target = target.clone();
        if target.name.is_empty() {
            target.name = crate::resource::object_name(obj)
                .unwrap_or_default()
                .to_string();
        }
        if target.name.is_empty() {
            return Err(ClientError::Invalid(format!(
                "{} must have metadata.name",
                target.kind
            )));
        }

        let mut store = self.lock();
        let key = Key::of(&target);
        if store.objects.contains_key(&key) {
            return Err(ClientError::AlreadyExists(target.to_string()));
        }

        let mut obj = obj.clone();
        store.stamp(&key, &mut obj, None)?;
        store.objects.insert(key, obj.clone());
        Ok(obj)
    }

    async fn update(&self, target: &ResourceRef, obj: &Node) -> Result<Node, ClientError> {
        let mut store = self.lock();
        let key = Key::of(target);
        let Some(live) = store.objects.get(&key) else {
            return Err(ClientError::NotFound(target.to_string()));
        };

        let live_version = live.pointer("/metadata/resourceVersion").cloned();
        let uid = live.pointer("/metadata/uid").cloned();
        if let Some(sent) = obj.pointer("/metadata/resourceVersion") {
            if Some(sent) != live_version.as_ref() {
                return Err(ClientError::Conflict(
                    target.to_string(),
                    format!(
                        "resourceVersion {sent} does not match {}",
                        live_version.unwrap_or(Node::Null)
                    ),
                ));
            }
        }

        let mut obj = obj.clone();
        store.stamp(&key, &mut obj, uid)?;
        store.objects.insert(key, obj.clone());
        Ok(obj)
    }

    async fn delete(&self, target: &ResourceRef) -> Result<(), ClientError> {
        self.lock()
            .objects
            .remove(&Key::of(target))
            .map(|_| ())
            .ok_or_else(|| ClientError::NotFound(target.to_string()))
    }

    async fn is_namespaced(&self, _api_version: &str, kind: &str) -> Result<bool, ClientError> {
        Ok(!self.lock().cluster_scoped.contains(kind))
    }
}
