//! ObjectDeployment controller
//!
//! One pass: hash the template, run the revision engine, archive what the
//! current revision made obsolete and aggregate the status, which is
//! written once at the end.

use kube::runtime::controller::Action;
use std::time::Duration;

use pko_core::{ObjectDeployment, ObjectKey, fnv32_hash};

use crate::archive::ArchivalEngine;
use crate::client::ClusterClient;
use crate::error::Result;
use crate::revision::{RevisionEngine, RevisionState};
use crate::status;

/// Reconciles ObjectDeployments and their revisions
#[derive(Clone)]
pub struct ObjectDeploymentController<C> {
    client: C,
    requeue_after: Duration,
}

impl<C: ClusterClient> ObjectDeploymentController<C> {
    pub fn new(client: C, requeue_after: Duration) -> Self {
        Self {
            client,
            requeue_after,
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    #[tracing::instrument(skip_all, fields(deployment = %key))]
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        let Some(mut deployment) = self.client.get::<ObjectDeployment>(key).await? else {
            tracing::debug!("ObjectDeployment gone");
            return Ok(Action::await_change());
        };

        let hash = fnv32_hash(&deployment.spec.template, deployment.status.collision_count)?;
        if deployment.status.template_hash.as_deref() != Some(hash.as_str()) {
            tracing::debug!(template_hash = %hash, "template hash changed");
            deployment.status.template_hash = Some(hash);
            deployment = self.client.update_status(&deployment).await?;
        }
        let observed = deployment.status.clone();

        match RevisionEngine::new(&self.client).reconcile(&mut deployment).await? {
            RevisionState::Uninitialized => {}
            RevisionState::Ready(revisions) => {
                if !deployment.spec.paused {
                    ArchivalEngine::new(&self.client)
                        .reconcile(&deployment, &revisions)
                        .await?;
                }
                status::aggregate(&mut deployment, &revisions);
            }
        }

        if deployment.status != observed {
            self.client.update_status(&deployment).await?;
            tracing::debug!(phase = ?deployment.status.phase, "status updated");
        }
        Ok(Action::requeue(self.requeue_after))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockCluster;
    use pko_core::annotations::labels;
    use pko_core::{ObjectMeta, ObjectSet, ObjectSetObject, ObjectSetTemplatePhase, Resource, selector};
    use serde_json::json;
    use std::collections::BTreeMap;

    async fn create_deployment(cluster: &MockCluster) -> ObjectDeployment {
        let labels = BTreeMap::from([(labels::INSTANCE.to_string(), "web".to_string())]);
        let mut deployment = ObjectDeployment {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("apps".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        deployment.spec.selector = selector::from_labels(&labels);
        deployment.spec.template.metadata.labels = labels;
        deployment.spec.template.spec.phases = vec![ObjectSetTemplatePhase {
            name: "deploy".to_string(),
            objects: vec![ObjectSetObject::new(json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "a"}}))],
            ..Default::default()
        }];
        cluster.create(&deployment).await.unwrap()
    }

    #[tokio::test]
    async fn test_hash_and_first_revision() {
        let cluster = MockCluster::new();
        let deployment = create_deployment(&cluster).await;
        let controller = ObjectDeploymentController::new(cluster.clone(), Duration::from_secs(30));

        controller.reconcile(&deployment.key()).await.unwrap();

        let stored: ObjectDeployment = cluster.get(&deployment.key()).await.unwrap().unwrap();
        let hash = fnv32_hash(&stored.spec.template, None).unwrap();
        assert_eq!(stored.status.template_hash.as_deref(), Some(hash.as_str()));
        assert_eq!(stored.status.revision, Some(1));

        let sets = cluster.all::<ObjectSet>(Some("apps"));
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].name(), format!("web-{hash}"));
    }

    #[tokio::test]
    async fn test_collision_changes_hash() {
        let cluster = MockCluster::new();
        let deployment = create_deployment(&cluster).await;
        let hash = fnv32_hash(&deployment.spec.template, None).unwrap();
        cluster
            .create(&ObjectSet {
                metadata: ObjectMeta {
                    name: Some(format!("web-{hash}")),
                    namespace: Some("apps".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            })
            .await
            .unwrap();

        let controller = ObjectDeploymentController::new(cluster.clone(), Duration::from_secs(30));
        controller.reconcile(&deployment.key()).await.unwrap();
        let stored: ObjectDeployment = cluster.get(&deployment.key()).await.unwrap().unwrap();
        assert_eq!(stored.status.collision_count, Some(1));

        // The foreign set is not selected, so the next pass creates a fresh name.
        controller.reconcile(&deployment.key()).await.unwrap();
        let stored: ObjectDeployment = cluster.get(&deployment.key()).await.unwrap().unwrap();
        let bumped = fnv32_hash(&stored.spec.template, Some(1)).unwrap();
        assert_eq!(stored.status.template_hash.as_deref(), Some(bumped.as_str()));
        assert_eq!(cluster.count::<ObjectSet>(Some("apps")), 2);
    }

    #[tokio::test]
    async fn test_missing_deployment_is_done() {
        let cluster = MockCluster::new();
        let controller = ObjectDeploymentController::new(cluster.clone(), Duration::from_secs(30));
        let action = controller.reconcile(&ObjectKey::new(Some("apps"), "gone")).await.unwrap();
        assert_eq!(action, Action::await_change());
    }
}
