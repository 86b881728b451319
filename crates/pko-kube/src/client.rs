//! Cluster access
//!
//! Every reconciler talks to the cluster through [`ClusterClient`]. The
//! trait works on typed orchestrator resources; the object's [`Scope`]
//! (derived from whether it carries a namespace) picks the wire kind.

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::discovery::ApiResource;
use serde_json::json;

use pko_core::resource::{API_GROUP, API_VERSION, api_version};
use pko_core::{LabelSelector, ObjectKey, Resource, Scope, selector};

use crate::error::{KubeError, Result};

/// Field manager recorded on status writes
pub const FIELD_MANAGER: &str = "package-operator";

/// Typed access to orchestrator resources.
///
/// `get` maps NotFound to `None` and `delete` treats NotFound as success.
/// `update` and `update_status` carry the object's resourceVersion as a
/// precondition and fail with a conflict when it is stale.
#[async_trait]
pub trait ClusterClient: Send + Sync + 'static {
    async fn get<R: Resource>(&self, key: &ObjectKey) -> Result<Option<R>>;

    /// List objects in `namespace`, or cluster-scoped objects when `None`.
    async fn list<R: Resource>(
        &self,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<R>>;

    async fn create<R: Resource>(&self, object: &R) -> Result<R>;

    async fn update<R: Resource>(&self, object: &R) -> Result<R>;

    async fn update_status<R: Resource>(&self, object: &R) -> Result<R>;

    async fn delete<R: Resource>(&self, object: &R) -> Result<()>;
}

/// [`ClusterClient`] backed by a real API server
#[derive(Clone)]
pub struct KubeCluster {
    client: kube::Client,
}

impl KubeCluster {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    /// Connect using the inferred kubeconfig or in-cluster configuration.
    pub async fn try_default() -> Result<Self> {
        Ok(Self::new(kube::Client::try_default().await?))
    }

    pub fn kube_client(&self) -> &kube::Client {
        &self.client
    }

    fn api<R: Resource>(&self, namespace: Option<&str>) -> Api<DynamicObject> {
        let resource = api_resource::<R>(Scope::of_namespace(namespace));
        match namespace.filter(|ns| !ns.is_empty()) {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        }
    }
}

/// API coordinates of `R` in `scope`.
pub fn api_resource<R: Resource>(scope: Scope) -> ApiResource {
    ApiResource {
        group: API_GROUP.to_string(),
        version: API_VERSION.to_string(),
        api_version: api_version(),
        kind: R::kind(scope).to_string(),
        plural: R::plural(scope),
    }
}

fn to_dynamic<R: Resource>(object: &R) -> Result<DynamicObject> {
    let mut value = serde_json::to_value(object)?;
    value["apiVersion"] = json!(api_version());
    value["kind"] = json!(R::kind(object.scope()));
    Ok(serde_json::from_value(value)?)
}

/// Body of a status replace: the whole object, so fields missing from
/// the new status are dropped on the server and resourceVersion guards
/// against stale writes.
fn status_body<R: Resource>(object: &R) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&to_dynamic(object)?)?)
}

fn from_dynamic<R: Resource>(object: DynamicObject) -> Result<R> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

/// Translate API status codes into the typed variants.
fn classify<R: Resource>(err: kube::Error, scope: Scope, name: &str) -> KubeError {
    let kind = R::kind(scope).to_string();
    let name = name.to_string();
    match &err {
        kube::Error::Api(resp) if resp.code == 404 => KubeError::NotFound { kind, name },
        kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
            KubeError::AlreadyExists { kind, name }
        }
        kube::Error::Api(resp) if resp.code == 409 => KubeError::Conflict { kind, name },
        _ => KubeError::Api(err),
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn get<R: Resource>(&self, key: &ObjectKey) -> Result<Option<R>> {
        let api = self.api::<R>(key.namespace.as_deref());
        match api.get_opt(&key.name).await? {
            Some(object) => Ok(Some(from_dynamic(object)?)),
            None => Ok(None),
        }
    }

    async fn list<R: Resource>(
        &self,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<R>> {
        let api = self.api::<R>(namespace);
        let params = ListParams::default().labels(&selector::to_query(selector));
        api.list(&params)
            .await?
            .items
            .into_iter()
            .map(from_dynamic)
            .collect()
    }

    async fn create<R: Resource>(&self, object: &R) -> Result<R> {
        let api = self.api::<R>(object.namespace());
        let created = api
            .create(&PostParams::default(), &to_dynamic(object)?)
            .await
            .map_err(|e| classify::<R>(e, object.scope(), object.name()))?;
        from_dynamic(created)
    }

    async fn update<R: Resource>(&self, object: &R) -> Result<R> {
        let api = self.api::<R>(object.namespace());
        let updated = api
            .replace(object.name(), &PostParams::default(), &to_dynamic(object)?)
            .await
            .map_err(|e| classify::<R>(e, object.scope(), object.name()))?;
        from_dynamic(updated)
    }

    async fn update_status<R: Resource>(&self, object: &R) -> Result<R> {
        let api = self.api::<R>(object.namespace());
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        let replaced = api
            .replace_status(object.name(), &params, status_body(object)?)
            .await
            .map_err(|e| classify::<R>(e, object.scope(), object.name()))?;
        from_dynamic(replaced)
    }

    async fn delete<R: Resource>(&self, object: &R) -> Result<()> {
        let api = self.api::<R>(object.namespace());
        match api.delete(object.name(), &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
