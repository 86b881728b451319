//! ObjectDeployment: owner of a sequence of ObjectSet revisions

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use serde::{Deserialize, Serialize};

use crate::conditions::Condition;
use crate::objectset::{ControlledObjectReference, ObjectSetTemplateSpec, TemplateMetadata};
use crate::resource::Resource;

/// Revisions kept around when `revisionHistoryLimit` is unset
pub const DEFAULT_REVISION_HISTORY_LIMIT: i32 = 10;

/// ObjectDeployment condition types
pub mod condition_types {
    pub const AVAILABLE: &str = "Available";
    pub const PROGRESSING: &str = "Progressing";
    pub const PAUSED: &str = "Paused";
}

/// ObjectDeployment condition reasons
pub mod reasons {
    pub const AVAILABLE: &str = "Available";
    pub const OBJECT_SET_UNREADY: &str = "ObjectSetUnready";
    pub const PROGRESSING: &str = "Progressing";
    pub const LATEST_REVISION_PENDING_SUCCESS: &str = "LatestRevisionPendingSuccess";
    pub const IDLE: &str = "Idle";
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectDeployment {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ObjectDeploymentSpec,
    #[serde(default)]
    pub status: ObjectDeploymentStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectDeploymentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_history_limit: Option<i32>,

    /// Picks the revisions owned by this deployment
    #[serde(default)]
    pub selector: LabelSelector,

    #[serde(default)]
    pub template: ObjectSetTemplate,

    #[serde(default, skip_serializing_if = "is_false")]
    pub paused: bool,
}

impl ObjectDeploymentSpec {
    /// Effective number of archived revisions to retain.
    pub fn history_limit(&self) -> usize {
        let limit = self
            .revision_history_limit
            .unwrap_or(DEFAULT_REVISION_HISTORY_LIMIT);
        usize::try_from(limit).unwrap_or(0)
    }
}

/// Template every revision is stamped from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectSetTemplate {
    #[serde(default)]
    pub metadata: TemplateMetadata,
    #[serde(default)]
    pub spec: ObjectSetTemplateSpec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectDeploymentPhase {
    Pending,
    Progressing,
    Available,
    NotReady,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectDeploymentStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<ObjectDeploymentPhase>,

    /// Bumped when a revision name collides with a foreign object
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collision_count: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_hash: Option<String>,

    /// `spec.revision` of the current revision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub controller_of: Vec<ControlledObjectReference>,
}

impl Resource for ObjectDeployment {
    const NAMESPACED_KIND: &'static str = "ObjectDeployment";
    const CLUSTER_KIND: &'static str = "ClusterObjectDeployment";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}
