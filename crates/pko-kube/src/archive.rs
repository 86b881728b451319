//! Archival engine
//!
//! Retires revisions that no longer own anything the newer revisions need.
//! A revision is paused first and only archived once its own controller
//! reports `Paused=True`. Retired revisions beyond the history limit are
//! deleted, oldest first.

use std::collections::HashSet;

use pko_core::{LifecycleState, ObjectDeployment, ObjectIdentifier, ObjectKey, ObjectSet, ObjectSlice, Resource};

use crate::client::ClusterClient;
use crate::error::Result;
use crate::revision::Revisions;

pub struct ArchivalEngine<'a, C> {
    client: &'a C,
}

impl<'a, C: ClusterClient> ArchivalEngine<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self { client }
    }

    /// Run one archival pass. Does nothing without a current revision.
    ///
    /// Any API error aborts the pass; every step is safe to repeat.
    pub async fn reconcile(&self, deployment: &ObjectDeployment, revisions: &Revisions) -> Result<()> {
        if revisions.current.is_none() {
            return Ok(());
        }

        let mut candidates = self.candidates(revisions).await?;
        candidates.sort_by_key(|r| r.spec.revision);

        let mut retired: Vec<&ObjectSet> = revisions
            .previous
            .iter()
            .filter(|r| r.is_archived())
            .chain(candidates.iter().copied())
            .collect();
        retired.sort_by_key(|r| r.spec.revision);

        let excess = retired.len().saturating_sub(deployment.spec.history_limit());
        let mut deleted = HashSet::new();
        for revision in &retired[..excess] {
            self.client.delete(*revision).await?;
            deleted.insert(revision.name());
            tracing::info!(deployment = %deployment.key(), revision = %revision.name(), "deleted revision beyond history limit");
        }

        for candidate in candidates.iter().filter(|c| !deleted.contains(c.name())) {
            let mut archived = (*candidate).clone();
            archived.spec.lifecycle_state = LifecycleState::Archived;
            self.client.update(&archived).await?;
            tracing::info!(deployment = %deployment.key(), revision = %candidate.name(), "archived revision");
        }
        Ok(())
    }

    /// Revisions that are paused and ready to be archived. Revisions that
    /// qualify but are still running get paused on the way.
    async fn candidates<'r>(&self, revisions: &'r Revisions) -> Result<Vec<&'r ObjectSet>> {
        let all: Vec<&ObjectSet> = revisions.all().collect();
        let mut candidates = Vec::new();

        for j in (0..all.len()).rev() {
            let later = all[j];
            if later.is_available() {
                for earlier in &all[..j] {
                    if !earlier.is_archived()
                        && earlier.spec.revision < later.spec.revision
                        && self.ensure_paused(earlier).await?
                    {
                        candidates.push(*earlier);
                    }
                }
                break;
            }

            let Some(previous) = j.checked_sub(1).map(|i| all[i]) else {
                break;
            };
            if previous.is_archived() || later.spec.revision <= previous.spec.revision {
                continue;
            }
            if self.intermediate_can_be_archived(previous, later).await? {
                candidates.push(previous);
            }
        }
        Ok(candidates)
    }

    async fn intermediate_can_be_archived(&self, previous: &ObjectSet, later: &ObjectSet) -> Result<bool> {
        let Some(owned) = previous.actively_reconciled_objects() else {
            tracing::debug!(revision = %previous.name(), "controllerOf not published yet");
            return Ok(false);
        };
        if previous.is_available() {
            return Ok(false);
        }
        let wanted = self.objects_of(later).await?;
        if !owned.is_disjoint(&wanted) {
            return Ok(false);
        }
        self.ensure_paused(previous).await
    }

    /// Identities of every object in `revision`, inline or sliced.
    async fn objects_of(&self, revision: &ObjectSet) -> Result<HashSet<ObjectIdentifier>> {
        let mut objects = revision.inline_object_identifiers();
        for name in revision.spec.template_spec.slice_names() {
            let key = ObjectKey::new(revision.namespace(), name);
            if let Some(slice) = self.client.get::<ObjectSlice>(&key).await? {
                objects.extend(slice.objects.iter().map(|o| o.identifier(revision.namespace())));
            }
        }
        Ok(objects)
    }

    /// True once the revision reports `Paused=True`. Requests the pause
    /// when nobody did yet.
    async fn ensure_paused(&self, revision: &ObjectSet) -> Result<bool> {
        if revision.is_status_paused() {
            return Ok(true);
        }
        if revision.is_spec_paused() {
            return Ok(false);
        }
        let mut paused = revision.clone();
        paused.spec.lifecycle_state = LifecycleState::Paused;
        self.client.update(&paused).await?;
        tracing::info!(revision = %revision.name(), "paused revision for archival");
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCluster;
    use pko_core::conditions::{self, new_condition, status};
    use pko_core::objectset::condition_types;
    use pko_core::{ControlledObjectReference, ObjectMeta, ObjectSetObject, ObjectSetTemplatePhase};
    use serde_json::json;

    fn config_map(name: &str) -> ObjectSetObject {
        ObjectSetObject::new(json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": name}}))
    }

    fn owned(name: &str) -> ControlledObjectReference {
        ControlledObjectReference {
            kind: "ConfigMap".to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    async fn revision(cluster: &MockCluster, number: i64, objects: &[&str]) -> ObjectSet {
        let mut set = ObjectSet {
            metadata: ObjectMeta {
                name: Some(format!("web-{number}")),
                namespace: Some("apps".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        set.spec.revision = number;
        set.spec.template_spec.phases = vec![ObjectSetTemplatePhase {
            name: "deploy".to_string(),
            objects: objects.iter().map(|o| config_map(o)).collect(),
            ..Default::default()
        }];
        let mut set = cluster.create(&set).await.unwrap();
        set.status.revision = number;
        cluster.update_status(&set).await.unwrap()
    }

    async fn set_status(cluster: &MockCluster, set: &ObjectSet, type_: &str, controller_of: Option<&[&str]>) -> ObjectSet {
        let mut set: ObjectSet = cluster.get(&set.key()).await.unwrap().unwrap();
        let generation = set.generation();
        conditions::set(&mut set.status.conditions, new_condition(type_, status::TRUE, type_, "", generation));
        if let Some(names) = controller_of {
            set.status.controller_of = Some(names.iter().map(|n| owned(n)).collect());
        }
        cluster.update_status(&set).await.unwrap()
    }

    async fn fetch(cluster: &MockCluster, set: &ObjectSet) -> ObjectSet {
        cluster.get(&set.key()).await.unwrap().unwrap()
    }

    fn revisions(mut sets: Vec<ObjectSet>) -> Revisions {
        let current = sets.pop();
        Revisions { previous: sets, current }
    }

    #[tokio::test]
    async fn test_available_latest_pauses_then_archives() {
        let cluster = MockCluster::new();
        let deployment = ObjectDeployment::default();
        let engine = ArchivalEngine::new(&cluster);

        let first = revision(&cluster, 1, &["a"]).await;
        let second = revision(&cluster, 2, &["a"]).await;
        let second = set_status(&cluster, &second, condition_types::AVAILABLE, Some(&["a"])).await;

        engine.reconcile(&deployment, &revisions(vec![first.clone(), second.clone()])).await.unwrap();
        let first = fetch(&cluster, &first).await;
        assert_eq!(first.spec.lifecycle_state, LifecycleState::Paused);

        // Paused in spec but not yet observed: wait.
        engine.reconcile(&deployment, &revisions(vec![first.clone(), second.clone()])).await.unwrap();
        assert_eq!(fetch(&cluster, &first).await.spec.lifecycle_state, LifecycleState::Paused);

        let first = set_status(&cluster, &first, condition_types::PAUSED, None).await;
        engine.reconcile(&deployment, &revisions(vec![first.clone(), second])).await.unwrap();
        assert!(fetch(&cluster, &first).await.is_archived());
    }

    #[tokio::test]
    async fn test_intermediate_waits_for_hand_off() {
        let cluster = MockCluster::new();
        let deployment = ObjectDeployment::default();
        let engine = ArchivalEngine::new(&cluster);

        let first = revision(&cluster, 1, &["a"]).await;
        let second = revision(&cluster, 2, &["a", "b"]).await;

        // controllerOf not reported yet.
        engine.reconcile(&deployment, &revisions(vec![first.clone(), second.clone()])).await.unwrap();
        assert_eq!(fetch(&cluster, &first).await.spec.lifecycle_state, LifecycleState::Active);

        // Still owns an object the latest wants.
        let mut first = fetch(&cluster, &first).await;
        first.status.controller_of = Some(vec![owned("a")]);
        let first = cluster.update_status(&first).await.unwrap();
        engine.reconcile(&deployment, &revisions(vec![first.clone(), second.clone()])).await.unwrap();
        assert_eq!(fetch(&cluster, &first).await.spec.lifecycle_state, LifecycleState::Active);

        // Handed off.
        let mut first = fetch(&cluster, &first).await;
        first.status.controller_of = Some(Vec::new());
        let first = cluster.update_status(&first).await.unwrap();
        engine.reconcile(&deployment, &revisions(vec![first.clone(), second])).await.unwrap();
        assert_eq!(fetch(&cluster, &first).await.spec.lifecycle_state, LifecycleState::Paused);
    }

    #[tokio::test]
    async fn test_sliced_objects_count_for_hand_off() {
        let cluster = MockCluster::new();
        let engine = ArchivalEngine::new(&cluster);

        let mut first = revision(&cluster, 1, &["a"]).await;
        first.status.controller_of = Some(vec![owned("a")]);
        let first = cluster.update_status(&first).await.unwrap();

        cluster
            .create(&ObjectSlice {
                metadata: ObjectMeta {
                    name: Some("web-slice".to_string()),
                    namespace: Some("apps".to_string()),
                    ..Default::default()
                },
                objects: vec![config_map("a")],
            })
            .await
            .unwrap();
        let mut second = revision(&cluster, 2, &[]).await;
        second.spec.template_spec.phases[0].slices = vec!["web-slice".to_string()];

        engine
            .reconcile(&ObjectDeployment::default(), &revisions(vec![first.clone(), second]))
            .await
            .unwrap();
        assert_eq!(fetch(&cluster, &first).await.spec.lifecycle_state, LifecycleState::Active);
    }

    #[tokio::test]
    async fn test_history_limit_deletes_oldest() {
        let cluster = MockCluster::new();
        let mut deployment = ObjectDeployment::default();
        deployment.spec.revision_history_limit = Some(1);
        let engine = ArchivalEngine::new(&cluster);

        let mut sets = Vec::new();
        for number in 1..=3 {
            let set = revision(&cluster, number, &["a"]).await;
            let set = set_status(&cluster, &set, condition_types::PAUSED, None).await;
            sets.push(set);
        }
        let current = revision(&cluster, 4, &["a"]).await;
        sets.push(set_status(&cluster, &current, condition_types::AVAILABLE, Some(&["a"])).await);

        engine.reconcile(&deployment, &revisions(sets)).await.unwrap();

        let remaining = cluster.all::<ObjectSet>(Some("apps"));
        let names: Vec<&str> = remaining.iter().map(|s| s.name()).collect();
        assert_eq!(names, ["web-3", "web-4"]);
        assert!(remaining[0].is_archived());
        assert!(!remaining[1].is_archived());
    }

    #[tokio::test]
    async fn test_no_current_revision_is_noop() {
        let cluster = MockCluster::new();
        let first = revision(&cluster, 1, &["a"]).await;
        let revisions = Revisions {
            previous: vec![first],
            current: None,
        };
        ArchivalEngine::new(&cluster)
            .reconcile(&ObjectDeployment::default(), &revisions)
            .await
            .unwrap();
        assert_eq!(cluster.operation_counts().updates, 0);
    }
}
