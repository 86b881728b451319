//! PackageManifest and PackageManifestLock file formats
//!
//! A package image carries one `manifest.yaml` declaring scopes, phases,
//! probes, images, the config schema and platform constraints, plus an
//! optional `manifest.lock.yaml` pinning every image to a digest.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::context::TemplateTestContext;
use crate::error::Result;
use crate::objectset::ObjectSetProbe;

/// API group of manifest files
pub const MANIFEST_GROUP: &str = "manifests.package-operator.run";
/// Kind of the manifest document
pub const MANIFEST_KIND: &str = "PackageManifest";
/// Kind of the lock document
pub const MANIFEST_LOCK_KIND: &str = "PackageManifestLock";

/// Scope a package may be installed under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManifestScope {
    Cluster,
    Namespaced,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PackageManifestSpec,
    #[serde(default)]
    pub test: PackageManifestTest,
}

impl PackageManifest {
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// Names of the declared phases, in order.
    pub fn phase_names(&self) -> impl Iterator<Item = &str> {
        self.spec.phases.iter().map(|p| p.name.as_str())
    }

    pub fn components_enabled(&self) -> bool {
        self.spec.components.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifestSpec {
    #[serde(default)]
    pub scopes: Vec<ManifestScope>,

    #[serde(default)]
    pub phases: Vec<PackageManifestPhase>,

    #[serde(default)]
    pub availability_probes: Vec<ObjectSetProbe>,

    #[serde(default)]
    pub config: PackageManifestConfig,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<PackageManifestImage>,

    /// Presence enables `components/<name>/` sub-packages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<PackageManifestComponents>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<PackageManifestConstraint>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageManifestPhase {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageManifestConfig {
    #[serde(
        rename = "openAPIV3Schema",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub open_api_v3_schema: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifestImage {
    pub name: String,
    pub image: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifestComponents {}

/// Platform names understood by constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlatformName {
    Kubernetes,
    OpenShift,
}

impl std::fmt::Display for PlatformName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlatformName::Kubernetes => write!(f, "Kubernetes"),
            PlatformName::OpenShift => write!(f, "OpenShift"),
        }
    }
}

/// One constraint entry; exactly one field is expected to be set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifestConstraint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Vec<PlatformName>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_version: Option<PlatformVersionConstraint>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_in_scope: Option<UniqueInScopeConstraint>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformVersionConstraint {
    pub name: PlatformName,
    pub range: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniqueInScopeConstraint {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageManifestTest {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub template: Vec<PackageManifestTestCase>,
}

/// A template dry-run case
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageManifestTestCase {
    pub name: String,
    #[serde(default)]
    pub context: TemplateTestContext,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifestLock {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PackageManifestLockSpec,
}

impl PackageManifestLock {
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn image(&self, name: &str) -> Option<&PackageManifestLockImage> {
        self.spec.images.iter().find(|i| i.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageManifestLockSpec {
    #[serde(default)]
    pub images: Vec<PackageManifestLockImage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifestLockImage {
    pub name: String,
    pub image: String,
    pub digest: String,
}
