//! ObjectSet revisions, their templates and ObjectSlices

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::annotations::annotations;
use crate::conditions::{self, Condition};
use crate::resource::{Resource, annotation};

/// ObjectSet condition types
pub mod condition_types {
    pub const AVAILABLE: &str = "Available";
    pub const PAUSED: &str = "Paused";
    pub const ARCHIVED: &str = "Archived";
    pub const SUCCEEDED: &str = "Succeeded";
    pub const IN_TRANSITION: &str = "InTransition";
}

fn is_zero(value: &i32) -> bool {
    *value == 0
}

/// Ordered phases plus the probes deciding availability
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSetTemplateSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub phases: Vec<ObjectSetTemplatePhase>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub availability_probes: Vec<ObjectSetProbe>,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub success_delay_seconds: i32,
}

impl ObjectSetTemplateSpec {
    /// All inline objects, phase by phase.
    pub fn objects(&self) -> impl Iterator<Item = &ObjectSetObject> {
        self.phases.iter().flat_map(|phase| phase.objects.iter())
    }

    /// Names of every slice referenced by any phase.
    pub fn slice_names(&self) -> impl Iterator<Item = &str> {
        self.phases
            .iter()
            .flat_map(|phase| phase.slices.iter().map(String::as_str))
    }
}

/// One ordered step of a revision
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSetTemplatePhase {
    pub name: String,

    /// Selects an external phase reconciler when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub objects: Vec<ObjectSetObject>,

    /// Objects that are observed but never owned
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_objects: Vec<ObjectSetObject>,

    /// Names of ObjectSlices holding this phase's objects
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub slices: Vec<String>,
}

/// A managed object inside a phase
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSetObject {
    pub object: JsonValue,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collision_protection: Option<CollisionProtection>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub condition_mappings: Vec<ConditionMapping>,
}

impl ObjectSetObject {
    pub fn new(object: JsonValue) -> Self {
        Self {
            object,
            ..Default::default()
        }
    }

    /// Group/kind/namespace/name of the object, defaulting the namespace.
    pub fn identifier(&self, default_namespace: Option<&str>) -> ObjectIdentifier {
        ObjectIdentifier::from_object(&self.object, default_namespace)
    }
}

impl fmt::Display for ObjectSetObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.identifier(None);
        write!(f, "object {}/{} kind:{}", id.namespace, id.name, id.kind)
    }
}

/// How to handle objects already owned by someone else
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollisionProtection {
    Prevent,
    IfNoController,
    None,
}

/// Maps a condition of a managed object onto the owning revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionMapping {
    pub source_type: String,
    pub destination_type: String,
}

/// Availability probes applied to the objects matched by `selector`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectSetProbe {
    #[serde(default)]
    pub probes: Vec<Probe>,
    #[serde(default)]
    pub selector: ProbeSelector,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ProbeKindSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeKindSpec {
    #[serde(default)]
    pub group: String,
    pub kind: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Probe {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ProbeConditionSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields_equal: Option<ProbeFieldsEqualSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cel: Option<ProbeCelSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeConditionSpec {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeFieldsEqualSpec {
    pub field_a: String,
    pub field_b: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeCelSpec {
    pub rule: String,
    pub message: String,
}

/// Lifecycle of a revision. `Archived` is terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleState {
    #[default]
    Active,
    Paused,
    Archived,
}

/// By-name back-pointer to an older revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviousRevisionReference {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePhaseReference {
    pub name: String,
    pub uid: String,
}

/// Object actively controlled by a revision
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControlledObjectReference {
    pub kind: String,
    #[serde(default)]
    pub group: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

/// Version independent identity of a managed object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectIdentifier {
    pub group: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ObjectIdentifier {
    /// Identity of a raw object, using `default_namespace` when it has none.
    pub fn from_object(object: &JsonValue, default_namespace: Option<&str>) -> Self {
        let str_at = |pointer: &str| object.pointer(pointer).and_then(JsonValue::as_str);
        let api_version = str_at("/apiVersion").unwrap_or_default();
        let group = match api_version.rsplit_once('/') {
            Some((group, _)) => group,
            None => "",
        };
        let namespace = str_at("/metadata/namespace")
            .filter(|ns| !ns.is_empty())
            .or(default_namespace)
            .unwrap_or_default();
        Self {
            group: group.to_string(),
            kind: str_at("/kind").unwrap_or_default().to_string(),
            namespace: namespace.to_string(),
            name: str_at("/metadata/name").unwrap_or_default().to_string(),
        }
    }

    pub fn from_reference(
        reference: &ControlledObjectReference,
        default_namespace: Option<&str>,
    ) -> Self {
        let namespace = reference
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .or(default_namespace)
            .unwrap_or_default();
        Self {
            group: reference.group.clone(),
            kind: reference.kind.clone(),
            namespace: namespace.to_string(),
            name: reference.name.clone(),
        }
    }
}

impl fmt::Display for ObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.group, self.kind, self.namespace, self.name
        )
    }
}

/// A revision of an ObjectDeployment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectSet {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ObjectSetSpec,
    #[serde(default)]
    pub status: ObjectSetStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSetSpec {
    #[serde(default)]
    pub lifecycle_state: LifecycleState,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub previous: Vec<PreviousRevisionReference>,

    /// Strictly increasing within one deployment
    #[serde(default)]
    pub revision: i64,

    #[serde(flatten)]
    pub template_spec: ObjectSetTemplateSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSetStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Published by the object reconciler once it observed the revision
    #[serde(default)]
    pub revision: i64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remote_phases: Vec<RemotePhaseReference>,

    /// `None` until the object reconciler reported owned objects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller_of: Option<Vec<ControlledObjectReference>>,
}

impl Resource for ObjectSet {
    const NAMESPACED_KIND: &'static str = "ObjectSet";
    const CLUSTER_KIND: &'static str = "ClusterObjectSet";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl ObjectSet {
    pub fn is_archived(&self) -> bool {
        self.spec.lifecycle_state == LifecycleState::Archived
    }

    pub fn is_spec_paused(&self) -> bool {
        self.spec.lifecycle_state == LifecycleState::Paused
    }

    pub fn is_status_paused(&self) -> bool {
        conditions::is_true(&self.status.conditions, condition_types::PAUSED)
    }

    /// Available at the current generation.
    pub fn is_available(&self) -> bool {
        conditions::is_true_at_generation(
            &self.status.conditions,
            condition_types::AVAILABLE,
            self.generation(),
        )
    }

    pub fn is_succeeded(&self) -> bool {
        conditions::is_true(&self.status.conditions, condition_types::SUCCEEDED)
    }

    pub fn is_paused_by_parent(&self) -> bool {
        annotation(&self.metadata, annotations::PAUSED_BY_PARENT) == Some("true")
    }

    /// Template hash recorded at creation time
    pub fn template_hash(&self) -> Option<&str> {
        annotation(&self.metadata, annotations::HASH)
    }

    /// Objects this revision actively reconciles.
    ///
    /// Archived revisions reconcile nothing; `None` means the object
    /// reconciler has not reported yet.
    pub fn actively_reconciled_objects(&self) -> Option<HashSet<ObjectIdentifier>> {
        if self.is_archived() {
            return Some(HashSet::new());
        }
        let namespace = self.namespace();
        self.status.controller_of.as_ref().map(|refs| {
            refs.iter()
                .map(|r| ObjectIdentifier::from_reference(r, namespace))
                .collect()
        })
    }

    /// Identities of the inline objects of this revision's template.
    pub fn inline_object_identifiers(&self) -> HashSet<ObjectIdentifier> {
        let namespace = self.namespace();
        self.spec
            .template_spec
            .objects()
            .map(|o| o.identifier(namespace))
            .collect()
    }
}

/// A chunk of a phase's objects stored outside the revision
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectSlice {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub objects: Vec<ObjectSetObject>,
}

impl Resource for ObjectSlice {
    const NAMESPACED_KIND: &'static str = "ObjectSlice";
    const CLUSTER_KIND: &'static str = "ClusterObjectSlice";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Labels and annotations stamped onto every revision of a template
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateMetadata {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}
