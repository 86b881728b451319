//! In-memory cluster for testing
//!
//! [`MockCluster`] implements [`ClusterClient`] with the API server rules the
//! reconcilers depend on: AlreadyExists on create, resourceVersion
//! preconditions on update, generation bumps on spec changes, status kept
//! apart from the main resource, and label selectors on list.

use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use pko_core::{LabelSelector, ObjectKey, Resource, Scope, selector};
use pko_engine::RawFiles;

use crate::client::ClusterClient;
use crate::error::{KubeError, Result};
use crate::package::ImageSource;

/// kind, namespace, name
type StoreKey = (String, Option<String>, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<StoreKey, JsonValue>,
    resource_version: u64,
    uid: u64,
    injected_conflicts: usize,
    operations: OperationCounts,
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub gets: usize,
    pub lists: usize,
    pub creates: usize,
    pub updates: usize,
    pub status_updates: usize,
    pub deletes: usize,
}

/// In-memory [`ClusterClient`]
#[derive(Clone, Default)]
pub struct MockCluster {
    state: Arc<RwLock<State>>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail the next `count` updates or status updates with a conflict.
    pub fn inject_conflicts(&self, count: usize) {
        self.write().injected_conflicts = count;
    }

    pub fn operation_counts(&self) -> OperationCounts {
        self.read().operations.clone()
    }

    pub fn reset_counts(&self) {
        self.write().operations = OperationCounts::default();
    }

    /// Every stored object of type `R` in `namespace`, sorted by name.
    pub fn all<R: Resource>(&self, namespace: Option<&str>) -> Vec<R> {
        let kind = R::kind(Scope::of_namespace(namespace));
        let namespace = namespace.filter(|ns| !ns.is_empty());
        self.read()
            .objects
            .iter()
            .filter(|((k, ns, _), _)| k == kind && ns.as_deref() == namespace)
            .filter_map(|(_, value)| serde_json::from_value(value.clone()).ok())
            .collect()
    }

    pub fn count<R: Resource>(&self, namespace: Option<&str>) -> usize {
        self.all::<R>(namespace).len()
    }
}

fn store_key<R: Resource>(namespace: Option<&str>, name: &str) -> StoreKey {
    let namespace = namespace.filter(|ns| !ns.is_empty());
    (
        R::kind(Scope::of_namespace(namespace)).to_string(),
        namespace.map(str::to_string),
        name.to_string(),
    )
}

fn object_key<R: Resource>(object: &R) -> StoreKey {
    store_key::<R>(object.namespace(), object.name())
}

/// Everything except metadata and status, the part that bumps the generation.
fn spec_part(value: &JsonValue) -> JsonValue {
    let mut value = value.clone();
    if let Some(map) = value.as_object_mut() {
        map.remove("metadata");
        map.remove("status");
    }
    value
}

fn resource_version_of(value: &JsonValue) -> Option<&str> {
    value
        .pointer("/metadata/resourceVersion")
        .and_then(JsonValue::as_str)
        .filter(|rv| !rv.is_empty())
}

impl State {
    fn next_resource_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }

    /// Shared precondition checks of `update` and `update_status`.
    fn check_update(&mut self, key: &StoreKey, incoming: &JsonValue) -> Result<JsonValue> {
        let (kind, _, name) = key.clone();
        if self.injected_conflicts > 0 {
            self.injected_conflicts -= 1;
            return Err(KubeError::Conflict { kind, name });
        }
        let stored = self
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| KubeError::NotFound {
                kind: kind.clone(),
                name: name.clone(),
            })?;
        if let Some(rv) = resource_version_of(incoming) {
            if Some(rv) != resource_version_of(&stored) {
                return Err(KubeError::Conflict { kind, name });
            }
        }
        Ok(stored)
    }
}

#[async_trait]
impl ClusterClient for MockCluster {
    async fn get<R: Resource>(&self, key: &ObjectKey) -> Result<Option<R>> {
        let mut state = self.write();
        state.operations.gets += 1;
        let stored = state
            .objects
            .get(&store_key::<R>(key.namespace.as_deref(), &key.name))
            .cloned();
        stored
            .map(|value| serde_json::from_value(value).map_err(KubeError::from))
            .transpose()
    }

    async fn list<R: Resource>(
        &self,
        namespace: Option<&str>,
        label_selector: &LabelSelector,
    ) -> Result<Vec<R>> {
        self.write().operations.lists += 1;
        let items: Vec<R> = self.all(namespace);
        Ok(items
            .into_iter()
            .filter(|item| selector::matches(label_selector, item.meta().labels.as_ref()))
            .collect())
    }

    async fn create<R: Resource>(&self, object: &R) -> Result<R> {
        let key = object_key(object);
        let mut state = self.write();
        state.operations.creates += 1;
        if state.objects.contains_key(&key) {
            return Err(KubeError::AlreadyExists {
                kind: key.0,
                name: key.2,
            });
        }

        let mut value = serde_json::to_value(object)?;
        state.uid += 1;
        let uid = format!("uid-{}", state.uid);
        let resource_version = state.next_resource_version();
        let metadata = value
            .as_object_mut()
            .map(|map| map.entry("metadata").or_insert_with(|| json!({})));
        if let Some(JsonValue::Object(metadata)) = metadata {
            metadata.insert("uid".to_string(), json!(uid));
            metadata.insert("resourceVersion".to_string(), json!(resource_version));
            metadata.insert("generation".to_string(), json!(1));
        }
        state.objects.insert(key, value.clone());
        Ok(serde_json::from_value(value)?)
    }

    async fn update<R: Resource>(&self, object: &R) -> Result<R> {
        let key = object_key(object);
        let mut state = self.write();
        state.operations.updates += 1;
        let stored = state.check_update(&key, &serde_json::to_value(object)?)?;

        let mut value = serde_json::to_value(object)?;
        let generation = stored
            .pointer("/metadata/generation")
            .and_then(JsonValue::as_i64)
            .unwrap_or(1);
        let generation = if spec_part(&value) == spec_part(&stored) {
            generation
        } else {
            generation + 1
        };
        let resource_version = state.next_resource_version();
        if let Some(map) = value.as_object_mut() {
            match stored.get("status") {
                Some(status) => map.insert("status".to_string(), status.clone()),
                None => map.remove("status"),
            };
            if let Some(JsonValue::Object(metadata)) = map.get_mut("metadata") {
                metadata.insert("uid".to_string(), stored["metadata"]["uid"].clone());
                metadata.insert("resourceVersion".to_string(), json!(resource_version));
                metadata.insert("generation".to_string(), json!(generation));
            }
        }
        state.objects.insert(key, value.clone());
        Ok(serde_json::from_value(value)?)
    }

    async fn update_status<R: Resource>(&self, object: &R) -> Result<R> {
        let key = object_key(object);
        let mut state = self.write();
        state.operations.status_updates += 1;
        let incoming = serde_json::to_value(object)?;
        let mut stored = state.check_update(&key, &incoming)?;

        let resource_version = state.next_resource_version();
        if let Some(map) = stored.as_object_mut() {
            match incoming.get("status") {
                Some(status) => map.insert("status".to_string(), status.clone()),
                None => map.remove("status"),
            };
            if let Some(JsonValue::Object(metadata)) = map.get_mut("metadata") {
                metadata.insert("resourceVersion".to_string(), json!(resource_version));
            }
        }
        state.objects.insert(key, stored.clone());
        Ok(serde_json::from_value(stored)?)
    }

    async fn delete<R: Resource>(&self, object: &R) -> Result<()> {
        let mut state = self.write();
        state.operations.deletes += 1;
        state.objects.remove(&object_key(object));
        Ok(())
    }
}

/// [`ImageSource`] serving package files from memory
#[derive(Clone, Default)]
pub struct StaticImageSource {
    images: Arc<RwLock<BTreeMap<String, RawFiles>>>,
}

impl StaticImageSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `files` for `image`, replacing what was there.
    pub fn insert(&self, image: impl Into<String>, files: RawFiles) {
        self.images
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(image.into(), files);
    }
}

#[async_trait]
impl ImageSource for StaticImageSource {
    async fn pull(&self, image: &str) -> Result<RawFiles> {
        self.images
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(image)
            .cloned()
            .ok_or_else(|| KubeError::ImagePull {
                image: image.to_string(),
                message: "manifest unknown".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pko_core::annotations::labels;
    use pko_core::{LifecycleState, ObjectMeta, ObjectSet, ObjectSlice, Package, PackageSpec};

    fn object_set(name: &str, instance: &str) -> ObjectSet {
        ObjectSet {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("apps".to_string()),
                labels: Some([(labels::INSTANCE.to_string(), instance.to_string())].into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_get_already_exists() {
        let cluster = MockCluster::new();
        let created = cluster.create(&object_set("web-1", "web")).await.unwrap();
        assert_eq!(created.metadata.uid.as_deref(), Some("uid-1"));
        assert_eq!(created.metadata.generation, Some(1));

        let err = cluster.create(&object_set("web-1", "web")).await.unwrap_err();
        assert!(err.is_already_exists());

        let key = ObjectKey::new(Some("apps"), "web-1");
        let fetched: Option<ObjectSet> = cluster.get(&key).await.unwrap();
        assert_eq!(fetched, Some(created));

        let missing: Option<ObjectSlice> = cluster.get(&key).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_update_conflict_and_generation() {
        let cluster = MockCluster::new();
        let mut set = cluster.create(&object_set("web-1", "web")).await.unwrap();

        set.metadata.annotations = Some([("a".to_string(), "b".to_string())].into());
        let set = cluster.update(&set).await.unwrap();
        assert_eq!(set.metadata.generation, Some(1));

        let mut stale = set.clone();
        let mut fresh = set.clone();
        fresh.spec.lifecycle_state = LifecycleState::Paused;
        let fresh = cluster.update(&fresh).await.unwrap();
        assert_eq!(fresh.metadata.generation, Some(2));

        stale.spec.revision = 7;
        assert!(cluster.update(&stale).await.unwrap_err().is_conflict());

        cluster.inject_conflicts(1);
        assert!(cluster.update(&fresh).await.unwrap_err().is_conflict());
        assert!(cluster.update(&fresh).await.is_ok());
    }

    #[tokio::test]
    async fn test_status_is_separate() {
        let cluster = MockCluster::new();
        let mut set = cluster.create(&object_set("web-1", "web")).await.unwrap();

        set.status.revision = 3;
        set.spec.revision = 9;
        let updated = cluster.update_status(&set).await.unwrap();
        assert_eq!(updated.status.revision, 3);
        assert_eq!(updated.spec.revision, 0);

        let mut spec_change = updated.clone();
        spec_change.status.revision = 0;
        spec_change.spec.revision = 1;
        let updated = cluster.update(&spec_change).await.unwrap();
        assert_eq!(updated.status.revision, 3);
        assert_eq!(updated.spec.revision, 1);
    }

    #[tokio::test]
    async fn test_list_filters_scope_and_labels() {
        let cluster = MockCluster::new();
        cluster.create(&object_set("web-1", "web")).await.unwrap();
        cluster.create(&object_set("db-1", "db")).await.unwrap();
        cluster
            .create(&Package {
                metadata: ObjectMeta {
                    name: Some("cluster-wide".to_string()),
                    ..Default::default()
                },
                spec: PackageSpec::default(),
                ..Default::default()
            })
            .await
            .unwrap();

        let selector = selector::from_labels(&[(labels::INSTANCE.to_string(), "web".to_string())].into());
        let sets: Vec<ObjectSet> = cluster.list(Some("apps"), &selector).await.unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].metadata.name.as_deref(), Some("web-1"));

        let packages: Vec<Package> = cluster.list(Some("apps"), &LabelSelector::default()).await.unwrap();
        assert!(packages.is_empty());
        assert_eq!(cluster.count::<Package>(None), 1);
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let cluster = MockCluster::new();
        cluster.delete(&object_set("nope", "web")).await.unwrap();
        assert_eq!(cluster.operation_counts().deletes, 1);
    }
}
