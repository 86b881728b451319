//! Deployment reconciler
//!
//! Writes the desired ObjectDeployment of a Package, moving large phases
//! into ObjectSlices on the way:
//!
//! 1. ensure the ObjectDeployment exists, created with an empty template
//!    so slices can point their owner reference at it
//! 2. chunk every phase and create or reuse one slice per chunk
//! 3. merge metadata and template onto the live object, retrying conflicts
//! 4. delete owned slices nothing references anymore

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use pko_core::annotations::{annotations, labels};
use pko_core::resource::{annotation, is_controlled_by, set_controller_reference};
use pko_core::{
    ObjectDeployment, ObjectMeta, ObjectSet, ObjectSetObject, ObjectSetTemplateSpec, ObjectSlice,
    Resource, fnv32_hash, selector,
};

use crate::chunking::ChunkingStrategy;
use crate::client::ClusterClient;
use crate::error::{KubeError, Result};

/// Name candidates tried before a slice collision is reported
pub const MAX_SLICE_ATTEMPTS: u32 = 16;
/// Re-read attempts when the ObjectDeployment update conflicts
pub const MAX_CONFLICT_ATTEMPTS: u32 = 5;
const CONFLICT_BACKOFF: Duration = Duration::from_millis(10);

/// Reconciles the ObjectDeployment of one Package
pub struct DeploymentReconciler<'a, C> {
    client: &'a C,
}

impl<'a, C: ClusterClient> DeploymentReconciler<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self { client }
    }

    /// Bring the live ObjectDeployment in line with `desired`.
    pub async fn reconcile(
        &self,
        desired: &ObjectDeployment,
        chunker: ChunkingStrategy,
    ) -> Result<ObjectDeployment> {
        let owner = self.ensure_exists(desired).await?;

        let mut template_spec = desired.spec.template.spec.clone();
        for phase in &mut template_spec.phases {
            let chunks = chunker.chunk(phase)?;
            if chunks.is_empty() {
                continue;
            }
            let mut slice_names = Vec::with_capacity(chunks.len());
            for chunk in chunks {
                slice_names.push(self.reconcile_slice(&owner, chunk).await?);
            }
            tracing::debug!(
                deployment = %owner.key(),
                phase = %phase.name,
                slices = slice_names.len(),
                "phase externalized"
            );
            phase.objects.clear();
            phase.slices = slice_names;
        }

        let deployment = self.update_with_retry(owner, desired, template_spec).await?;
        self.collect_slices(&deployment).await?;
        Ok(deployment)
    }

    async fn ensure_exists(&self, desired: &ObjectDeployment) -> Result<ObjectDeployment> {
        if let Some(actual) = self.client.get(&desired.key()).await? {
            return Ok(actual);
        }
        let mut initial = desired.clone();
        initial.spec.template.spec = ObjectSetTemplateSpec::default();
        initial.status = Default::default();
        let created = self.client.create(&initial).await?;
        tracing::info!(deployment = %created.key(), "created ObjectDeployment");
        Ok(created)
    }

    /// Create the slice for `objects`, or reuse an identical one, and
    /// return its name.
    async fn reconcile_slice(
        &self,
        owner: &ObjectDeployment,
        objects: Vec<ObjectSetObject>,
    ) -> Result<String> {
        let mut collision_count: i32 = 0;
        let mut name = String::new();

        for _ in 0..MAX_SLICE_ATTEMPTS {
            name = format!("{}-{}", owner.name(), fnv32_hash(&objects, Some(collision_count))?);
            let mut slice = ObjectSlice {
                metadata: ObjectMeta {
                    name: Some(name.clone()),
                    namespace: owner.namespace().map(str::to_string),
                    labels: Some(BTreeMap::from([(
                        labels::SLICE_OWNER.to_string(),
                        owner.name().to_string(),
                    )])),
                    ..Default::default()
                },
                objects: objects.clone(),
            };
            set_controller_reference(&mut slice.metadata, owner);

            match self.client.create(&slice).await {
                Ok(_) => {
                    tracing::info!(deployment = %owner.key(), slice = %name, "created ObjectSlice");
                    return Ok(name);
                }
                Err(err) if err.is_already_exists() => {}
                Err(err) => return Err(err),
            }

            match self.client.get::<ObjectSlice>(&slice.key()).await? {
                Some(existing)
                    if is_controlled_by(&existing.metadata, owner) && existing.objects == objects =>
                {
                    return Ok(name);
                }
                // Deleted in between, try the same name again.
                None => continue,
                Some(_) => {
                    collision_count += 1;
                    tracing::info!(
                        deployment = %owner.key(),
                        slice = %name,
                        collision_count,
                        "ObjectSlice name collision"
                    );
                }
            }
        }

        Err(KubeError::SliceCollisionLimit {
            name,
            attempts: MAX_SLICE_ATTEMPTS,
        })
    }

    async fn update_with_retry(
        &self,
        mut actual: ObjectDeployment,
        desired: &ObjectDeployment,
        template_spec: ObjectSetTemplateSpec,
    ) -> Result<ObjectDeployment> {
        let mut attempt = 0;
        loop {
            merge_desired(&mut actual, desired, template_spec.clone());
            let err = match self.client.update(&actual).await {
                Ok(updated) => return Ok(updated),
                Err(err) => err,
            };
            attempt += 1;
            if !err.is_conflict() || attempt >= MAX_CONFLICT_ATTEMPTS {
                return Err(err);
            }
            tracing::debug!(deployment = %desired.key(), attempt, "conflict updating ObjectDeployment, retrying");
            tokio::time::sleep(CONFLICT_BACKOFF * 2u32.pow(attempt - 1)).await;
            actual = self
                .client
                .get(&desired.key())
                .await?
                .ok_or_else(|| KubeError::NotFound {
                    kind: ObjectDeployment::kind(desired.scope()).to_string(),
                    name: desired.name().to_string(),
                })?;
        }
    }

    /// Delete owned slices referenced neither by the template nor by a
    /// live revision.
    async fn collect_slices(&self, deployment: &ObjectDeployment) -> Result<()> {
        let mut referenced: BTreeSet<String> = deployment
            .spec
            .template
            .spec
            .slice_names()
            .map(str::to_string)
            .collect();

        let revisions: Vec<ObjectSet> = self
            .client
            .list(deployment.namespace(), &deployment.spec.selector)
            .await?;
        for revision in revisions.iter().filter(|r| !r.is_archived()) {
            referenced.extend(revision.spec.template_spec.slice_names().map(str::to_string));
        }

        let owned = selector::from_labels(&BTreeMap::from([(
            labels::SLICE_OWNER.to_string(),
            deployment.name().to_string(),
        )]));
        let slices: Vec<ObjectSlice> = self.client.list(deployment.namespace(), &owned).await?;
        for slice in slices {
            if referenced.contains(slice.name()) {
                continue;
            }
            self.client.delete(&slice).await?;
            tracing::info!(deployment = %deployment.key(), slice = %slice.name(), "deleted unreferenced ObjectSlice");
        }
        Ok(())
    }
}

/// Merge `desired` onto `actual` without touching its identity.
fn merge_desired(
    actual: &mut ObjectDeployment,
    desired: &ObjectDeployment,
    template_spec: ObjectSetTemplateSpec,
) {
    let cause = change_cause(&actual.metadata, &desired.metadata)
        .map(str::to_string)
        .or_else(|| annotation(&actual.metadata, annotations::CHANGE_CAUSE).map(str::to_string));

    let merged = actual.metadata.annotations.get_or_insert_with(BTreeMap::new);
    merged.extend(desired.metadata.annotations.clone().unwrap_or_default());
    if let Some(cause) = cause {
        merged.insert(annotations::CHANGE_CAUSE.to_string(), cause);
    }
    actual
        .metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .extend(desired.metadata.labels.clone().unwrap_or_default());

    actual.spec.selector = desired.spec.selector.clone();
    actual.spec.revision_history_limit = desired.spec.revision_history_limit;
    actual.spec.template.metadata = desired.spec.template.metadata.clone();
    actual.spec.template.spec = template_spec;
    actual.spec.paused = desired.spec.paused;
}

/// Change cause describing what differs between the recorded source image
/// and config annotations. `None` when neither changed.
fn change_cause(actual: &ObjectMeta, desired: &ObjectMeta) -> Option<&'static str> {
    let differs = |key: &str| annotation(actual, key) != annotation(desired, key);
    match (differs(annotations::SOURCE_IMAGE), differs(annotations::CONFIG)) {
        (true, true) => Some("Package source image and config changed."),
        (true, false) => Some("Package source image changed."),
        (false, true) => Some("Package config changed."),
        (false, false) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCluster;
    use pko_core::{ObjectKey, ObjectSetTemplatePhase};
    use serde_json::json;

    fn config_map(name: &str) -> ObjectSetObject {
        ObjectSetObject::new(json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": name},
        }))
    }

    fn desired(image: &str, objects: Vec<ObjectSetObject>) -> ObjectDeployment {
        let labels = BTreeMap::from([(labels::INSTANCE.to_string(), "web".to_string())]);
        let mut deployment = ObjectDeployment {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("apps".to_string()),
                labels: Some(labels.clone()),
                annotations: Some(BTreeMap::from([
                    (annotations::SOURCE_IMAGE.to_string(), image.to_string()),
                    (annotations::CONFIG.to_string(), "null".to_string()),
                    (annotations::CHANGE_CAUSE.to_string(), "Installing web package.".to_string()),
                ])),
                ..Default::default()
            },
            ..Default::default()
        };
        deployment.spec.selector = selector::from_labels(&labels);
        deployment.spec.template.metadata.labels = labels;
        deployment.spec.template.spec.phases = vec![ObjectSetTemplatePhase {
            name: "deploy".to_string(),
            objects,
            ..Default::default()
        }];
        deployment
    }

    fn key() -> ObjectKey {
        ObjectKey::new(Some("apps"), "web")
    }

    #[tokio::test]
    async fn test_fresh_install_keeps_small_phase_inline() {
        let cluster = MockCluster::new();
        let reconciler = DeploymentReconciler::new(&cluster);
        let want = desired("quay.io/acme/web:v1", vec![config_map("a")]);

        let deployment = reconciler.reconcile(&want, ChunkingStrategy::default()).await.unwrap();

        assert_eq!(deployment.spec.template.spec, want.spec.template.spec);
        assert_eq!(
            annotation(&deployment.metadata, annotations::CHANGE_CAUSE),
            Some("Installing web package.")
        );
        assert_eq!(cluster.count::<ObjectSlice>(Some("apps")), 0);

        let counts = cluster.operation_counts();
        assert_eq!(counts.creates, 1);
        assert_eq!(counts.updates, 1);
    }

    #[tokio::test]
    async fn test_externalized_phase_is_stable() {
        let cluster = MockCluster::new();
        let reconciler = DeploymentReconciler::new(&cluster);
        let want = desired("img", vec![config_map("a"), config_map("b")]);

        let first = reconciler.reconcile(&want, ChunkingStrategy::EachObject).await.unwrap();
        let phase = &first.spec.template.spec.phases[0];
        assert!(phase.objects.is_empty());
        assert_eq!(phase.slices.len(), 2);
        assert!(phase.slices.iter().all(|name| name.starts_with("web-")));

        let slices = cluster.all::<ObjectSlice>(Some("apps"));
        assert_eq!(slices.len(), 2);
        for slice in &slices {
            assert!(is_controlled_by(&slice.metadata, &first));
            assert_eq!(pko_core::resource::label(&slice.metadata, labels::SLICE_OWNER), Some("web"));
        }

        cluster.reset_counts();
        let second = reconciler.reconcile(&want, ChunkingStrategy::EachObject).await.unwrap();
        assert_eq!(second.spec.template.spec, first.spec.template.spec);
        assert_eq!(cluster.operation_counts().deletes, 0);
    }

    #[tokio::test]
    async fn test_changed_object_replaces_only_its_slice() {
        let cluster = MockCluster::new();
        let reconciler = DeploymentReconciler::new(&cluster);

        let first = reconciler
            .reconcile(&desired("img", vec![config_map("a"), config_map("b")]), ChunkingStrategy::EachObject)
            .await
            .unwrap();
        let second = reconciler
            .reconcile(&desired("img", vec![config_map("a"), config_map("c")]), ChunkingStrategy::EachObject)
            .await
            .unwrap();

        let before = &first.spec.template.spec.phases[0].slices;
        let after = &second.spec.template.spec.phases[0].slices;
        assert_eq!(before[0], after[0]);
        assert_ne!(before[1], after[1]);

        let names: Vec<String> = cluster
            .all::<ObjectSlice>(Some("apps"))
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(!names.contains(&before[1]));
    }

    #[tokio::test]
    async fn test_slice_collision_bumps_name() {
        let cluster = MockCluster::new();
        let objects = vec![config_map("a")];
        let taken = format!("web-{}", fnv32_hash(&objects, Some(0)).unwrap());
        cluster
            .create(&ObjectSlice {
                metadata: ObjectMeta {
                    name: Some(taken.clone()),
                    namespace: Some("apps".to_string()),
                    ..Default::default()
                },
                objects: vec![config_map("foreign")],
            })
            .await
            .unwrap();

        let reconciler = DeploymentReconciler::new(&cluster);
        let deployment = reconciler
            .reconcile(&desired("img", objects.clone()), ChunkingStrategy::EachObject)
            .await
            .unwrap();

        let expected = format!("web-{}", fnv32_hash(&objects, Some(1)).unwrap());
        assert_eq!(deployment.spec.template.spec.phases[0].slices, vec![expected]);

        let foreign: ObjectSlice = cluster.get(&ObjectKey::new(Some("apps"), taken)).await.unwrap().unwrap();
        assert_eq!(foreign.objects, vec![config_map("foreign")]);
    }

    #[tokio::test]
    async fn test_update_retries_conflicts() {
        let cluster = MockCluster::new();
        let reconciler = DeploymentReconciler::new(&cluster);
        reconciler.reconcile(&desired("v1", vec![config_map("a")]), ChunkingStrategy::default()).await.unwrap();

        cluster.inject_conflicts(2);
        let deployment = reconciler
            .reconcile(&desired("v2", vec![config_map("a")]), ChunkingStrategy::default())
            .await
            .unwrap();
        assert_eq!(annotation(&deployment.metadata, annotations::SOURCE_IMAGE), Some("v2"));
        assert_eq!(
            annotation(&deployment.metadata, annotations::CHANGE_CAUSE),
            Some("Package source image changed.")
        );

        cluster.inject_conflicts(MAX_CONFLICT_ATTEMPTS as usize);
        let err = reconciler
            .reconcile(&desired("v3", vec![config_map("a")]), ChunkingStrategy::default())
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let stored: ObjectDeployment = cluster.get(&key()).await.unwrap().unwrap();
        assert_eq!(annotation(&stored.metadata, annotations::SOURCE_IMAGE), Some("v2"));
    }

    #[test]
    fn test_change_cause() {
        let meta = |image: &str, config: &str| ObjectMeta {
            annotations: Some(BTreeMap::from([
                (annotations::SOURCE_IMAGE.to_string(), image.to_string()),
                (annotations::CONFIG.to_string(), config.to_string()),
            ])),
            ..Default::default()
        };
        let actual = meta("img:v1", "{}");
        assert_eq!(change_cause(&actual, &meta("img:v1", "{}")), None);
        assert_eq!(change_cause(&actual, &meta("img:v2", "{}")), Some("Package source image changed."));
        assert_eq!(change_cause(&actual, &meta("img:v1", "{\"a\":1}")), Some("Package config changed."));
        assert_eq!(
            change_cause(&actual, &meta("img:v2", "null")),
            Some("Package source image and config changed.")
        );
    }
}
