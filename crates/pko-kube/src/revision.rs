//! Revision engine
//!
//! Discovers the ObjectSets of an ObjectDeployment, propagates the pause
//! flag onto them and stamps a new revision whenever the latest one does
//! not match the current template hash.

use std::collections::BTreeMap;

use pko_core::annotations::{annotations, labels};
use pko_core::objectset::ObjectSetSpec;
use pko_core::resource::{is_controlled_by, set_controller_reference};
use pko_core::{
    LifecycleState, ObjectDeployment, ObjectMeta, ObjectSet, PreviousRevisionReference, Resource,
};

use crate::client::ClusterClient;
use crate::error::Result;

/// The revisions of one ObjectDeployment, ascending by `spec.revision`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Revisions {
    /// Every revision except the current one
    pub previous: Vec<ObjectSet>,
    /// Latest revision, when it matches the template hash
    pub current: Option<ObjectSet>,
}

impl Revisions {
    /// Split sorted revisions on the template hash.
    pub fn split(mut sorted: Vec<ObjectSet>, template_hash: Option<&str>) -> Self {
        let is_current = sorted
            .last()
            .is_some_and(|latest| latest.template_hash().is_some() && latest.template_hash() == template_hash);
        let current = if is_current { sorted.pop() } else { None };
        Self {
            previous: sorted,
            current,
        }
    }

    /// All revisions, ascending.
    pub fn all(&self) -> impl Iterator<Item = &ObjectSet> {
        self.previous.iter().chain(self.current.as_ref())
    }

    fn max_revision(&self) -> i64 {
        self.all().map(|r| r.spec.revision).max().unwrap_or(0)
    }
}

/// Outcome of a revision engine pass
#[derive(Debug, Clone, PartialEq)]
pub enum RevisionState {
    /// Some revision has not published `status.revision` yet
    Uninitialized,
    Ready(Revisions),
}

pub struct RevisionEngine<'a, C> {
    client: &'a C,
}

impl<'a, C: ClusterClient> RevisionEngine<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self { client }
    }

    /// List the ObjectSets selected by `deployment`, sorted by revision.
    pub async fn discover(&self, deployment: &ObjectDeployment) -> Result<Vec<ObjectSet>> {
        let mut revisions: Vec<ObjectSet> = self
            .client
            .list(deployment.namespace(), &deployment.spec.selector)
            .await?;
        revisions.sort_by_key(|r| r.spec.revision);
        Ok(revisions)
    }

    /// Run one pass. A name collision bumps `status.collisionCount` on
    /// `deployment`; persisting it is up to the caller.
    pub async fn reconcile(&self, deployment: &mut ObjectDeployment) -> Result<RevisionState> {
        let discovered = self.discover(deployment).await?;
        if let Some(pending) = discovered.iter().find(|r| r.status.revision == 0) {
            tracing::debug!(
                deployment = %deployment.key(),
                revision = %pending.name(),
                "waiting for revision to initialize"
            );
            return Ok(RevisionState::Uninitialized);
        }

        let template_hash = deployment.status.template_hash.clone();
        let mut revisions = Revisions::split(discovered, template_hash.as_deref());

        for revision in revisions.previous.iter_mut().chain(revisions.current.as_mut()) {
            self.propagate_pause(deployment, revision).await?;
        }
        if deployment.spec.paused {
            return Ok(RevisionState::Ready(revisions));
        }

        if revisions.current.is_none() && !deployment.spec.template.spec.phases.is_empty() {
            revisions.current = self.create_revision(deployment, &revisions).await?;
        }
        Ok(RevisionState::Ready(revisions))
    }

    async fn propagate_pause(&self, deployment: &ObjectDeployment, revision: &mut ObjectSet) -> Result<()> {
        if revision.is_archived() {
            return Ok(());
        }
        let paused = deployment.spec.paused;
        if paused == revision.is_paused_by_parent() {
            return Ok(());
        }

        let mut updated = revision.clone();
        let annotations_map = updated.metadata.annotations.get_or_insert_with(BTreeMap::new);
        if paused {
            updated.spec.lifecycle_state = LifecycleState::Paused;
            annotations_map.insert(annotations::PAUSED_BY_PARENT.to_string(), "true".to_string());
        } else {
            updated.spec.lifecycle_state = LifecycleState::Active;
            annotations_map.remove(annotations::PAUSED_BY_PARENT);
        }
        *revision = self.client.update(&updated).await?;
        tracing::info!(deployment = %deployment.key(), revision = %revision.name(), paused, "propagated pause");
        Ok(())
    }

    /// Create the next revision. Returns `None` after a name collision.
    async fn create_revision(
        &self,
        deployment: &mut ObjectDeployment,
        revisions: &Revisions,
    ) -> Result<Option<ObjectSet>> {
        let desired = new_revision(deployment, revisions);
        let max_revision = revisions.max_revision();

        let err = match self.client.create(&desired).await {
            Ok(created) => {
                tracing::info!(
                    deployment = %deployment.key(),
                    revision = %created.name(),
                    number = created.spec.revision,
                    "created ObjectSet revision"
                );
                return Ok(Some(created));
            }
            Err(err) if err.is_already_exists() => err,
            Err(err) => return Err(err),
        };

        if let Some(existing) = self.client.get::<ObjectSet>(&desired.key()).await? {
            let adoptable = is_controlled_by(&existing.metadata, &*deployment)
                && !existing.is_archived()
                && existing.spec.revision >= max_revision
                && existing.spec.template_spec == desired.spec.template_spec;
            if adoptable {
                tracing::debug!(deployment = %deployment.key(), revision = %existing.name(), "revision already exists");
                return Ok(Some(existing));
            }
        }

        let count = deployment.status.collision_count.unwrap_or(0) + 1;
        deployment.status.collision_count = Some(count);
        tracing::info!(
            deployment = %deployment.key(),
            revision = %desired.name(),
            collision_count = count,
            error = %err,
            "ObjectSet name collision"
        );
        Ok(None)
    }
}

/// The ObjectSet stamped from the current template of `deployment`.
pub fn new_revision(deployment: &ObjectDeployment, revisions: &Revisions) -> ObjectSet {
    let hash = deployment.status.template_hash.clone().unwrap_or_default();

    let mut labels_map = deployment.spec.template.metadata.labels.clone();
    labels_map.insert(labels::INSTANCE.to_string(), deployment.name().to_string());

    let mut annotations_map = deployment.metadata.annotations.clone().unwrap_or_default();
    annotations_map.insert(annotations::HASH.to_string(), hash.clone());

    let mut revision = ObjectSet {
        metadata: ObjectMeta {
            name: Some(format!("{}-{}", deployment.name(), hash)),
            namespace: deployment.namespace().map(str::to_string),
            labels: Some(labels_map),
            annotations: Some(annotations_map),
            ..Default::default()
        },
        spec: ObjectSetSpec {
            lifecycle_state: LifecycleState::Active,
            previous: revisions
                .all()
                .map(|r| PreviousRevisionReference {
                    name: r.name().to_string(),
                })
                .collect(),
            revision: revisions.max_revision() + 1,
            template_spec: deployment.spec.template.spec.clone(),
        },
        status: Default::default(),
    };
    set_controller_reference(&mut revision.metadata, deployment);
    revision
}
