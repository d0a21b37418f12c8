use super::{ClientError, ResourceClient};
use crate::resource::{Node, ResourceRef};
use async_trait::async_trait;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::core::GroupVersionKind;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::{pinned_kind, Scope};
use kube::{Client, Config};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Resource client backed by a live cluster
///
/// Uses the dynamic API, so any kind the API server knows (CRDs included) can
/// be applied and asserted. Kind lookups go through discovery once and are
/// cached for the life of the client.
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
    kinds: Arc<Mutex<HashMap<(String, String), (ApiResource, bool)>>>,
}

impl KubeClient {
    /// Wrap an existing kube client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            kinds: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Connect using the default kubeconfig / in-cluster configuration
    pub async fn try_default() -> Result<Self, ClientError> {
        let client = Client::try_default()
            .await
            .map_err(|e| ClientError::Api(format!("failed to create client: {e}")))?;
        Ok(Self::new(client))
    }

    /// Connect using the current context of a kubeconfig file
    pub async fn from_kubeconfig(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let kubeconfig = Kubeconfig::read_from(path)
            .map_err(|e| ClientError::Api(format!("reading {}: {e}", path.display())))?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| ClientError::Api(format!("loading {}: {e}", path.display())))?;
        let client = Client::try_from(config)
            .map_err(|e| ClientError::Api(format!("failed to create client: {e}")))?;
        Ok(Self::new(client))
    }

    /// The underlying kube client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    async fn resolve(&self, api_version: &str, kind: &str) -> Result<(ApiResource, bool), ClientError> {
        let key = (api_version.to_string(), kind.to_string());
        let cached = self
            .kinds
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&key)
            .cloned();
        if let Some(found) = cached {
            return Ok(found);
        }

        let (group, version) = api_version.split_once('/').unwrap_or(("", api_version));
        let gvk = GroupVersionKind::gvk(group, version, kind);
        let (resource, caps) = pinned_kind(&self.client, &gvk)
            .await
            .map_err(|e| ClientError::UnknownKind(format!("{api_version}, Kind={kind}: {e}")))?;
        let namespaced = caps.scope == Scope::Namespaced;

        debug!(api_version, kind, plural = %resource.plural, namespaced, "Discovered kind");
        self.kinds
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key, (resource.clone(), namespaced));
        Ok((resource, namespaced))
    }

    async fn api(&self, target: &ResourceRef) -> Result<Api<DynamicObject>, ClientError> {
        let (resource, namespaced) = self.resolve(&target.api_version, &target.kind).await?;
        Ok(if namespaced && !target.namespace.is_empty() {
            Api::namespaced_with(self.client.clone(), &target.namespace, &resource)
        } else {
            Api::all_with(self.client.clone(), &resource)
        })
    }
}

fn to_dynamic(obj: &Node) -> Result<DynamicObject, ClientError> {
    serde_json::from_value(obj.clone())
        .map_err(|e| ClientError::Invalid(format!("invalid object format: {e}")))
}

fn to_node(obj: DynamicObject) -> Result<Node, ClientError> {
    serde_json::to_value(obj).map_err(|e| ClientError::Api(format!("failed to serialize: {e}")))
}

/// Map a kube error onto the client taxonomy, with a readable message
fn map_error(err: kube::Error, target: &ResourceRef) -> ClientError {
    let resource = target.to_string();
    if let kube::Error::Api(ae) = &err {
        match ae.code {
            404 => return ClientError::NotFound(resource),
            409 if ae.reason == "AlreadyExists" => return ClientError::AlreadyExists(resource),
            409 => return ClientError::Conflict(resource, ae.message.clone()),
            400 | 422 => return ClientError::Invalid(format!("{resource}: {}", ae.message)),
            403 => {
                return ClientError::Api(format!("{resource}: permission denied (check RBAC)"))
            }
            408 | 504 => return ClientError::Timeout(format!("{resource}: {}", ae.message)),
            _ => {}
        }
    }

    let raw = err.to_string();
    if raw.contains("connection refused") || raw.contains("ECONNREFUSED") {
        return ClientError::Api(format!("{resource}: cannot connect to Kubernetes API"));
    }
    if raw.contains("timed out") || raw.contains("deadline exceeded") {
        return ClientError::Timeout(format!("{resource}: operation timed out"));
    }
    ClientError::Api(format!("{resource}: {raw}"))
}

#[async_trait]
impl ResourceClient for KubeClient {
    async fn get(&self, target: &ResourceRef) -> Result<Node, ClientError> {
        let api = self.api(target).await?;
        let obj = api
            .get(&target.name)
            .await
            .map_err(|e| map_error(e, target))?;
        to_node(obj)
    }

    async fn list(&self, target: &ResourceRef) -> Result<Vec<Node>, ClientError> {
        let api = self.api(target).await?;
        let mut params = ListParams::default();
        if let Some(selector) = target.label_selector() {
            params = params.labels(&selector);
        }

        let list = api.list(&params).await.map_err(|e| map_error(e, target))?;
        list.items.into_iter().map(to_node).collect()
    }

    async fn create(&self, target: &ResourceRef, obj: &Node) -> Result<Node, ClientError> {
        let api = self.api(target).await?;
        let created = api
            .create(&PostParams::default(), &to_dynamic(obj)?)
            .await
            .map_err(|e| map_error(e, target))?;
        to_node(created)
    }

    async fn update(&self, target: &ResourceRef, obj: &Node) -> Result<Node, ClientError> {
        let api = self.api(target).await?;
        let updated = api
            .replace(&target.name, &PostParams::default(), &to_dynamic(obj)?)
            .await
            .map_err(|e| map_error(e, target))?;
        to_node(updated)
    }

    async fn delete(&self, target: &ResourceRef) -> Result<(), ClientError> {
        let api = self.api(target).await?;
        api.delete(&target.name, &DeleteParams::background())
            .await
            .map(|_| ())
            .map_err(|e| map_error(e, target))
    }

    async fn is_namespaced(&self, api_version: &str, kind: &str) -> Result<bool, ClientError> {
        self.resolve(api_version, kind).await.map(|(_, namespaced)| namespaced)
    }
}
