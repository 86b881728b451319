//! Package: the user facing entry point

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::conditions::Condition;
use crate::resource::Resource;

/// Package condition types
pub mod condition_types {
    pub const UNPACKED: &str = "Unpacked";
    pub const AVAILABLE: &str = "Available";
    pub const PROGRESSING: &str = "Progressing";
    pub const PAUSED: &str = "Paused";
    pub const INVALID: &str = "PackageInvalid";
}

/// Package condition reasons
pub mod reasons {
    pub const LOAD_ERROR: &str = "LoadError";
    pub const CONSTRAINTS_FAILED: &str = "ConstraintsFailed";
    pub const IMAGE_PULL_BACK_OFF: &str = "ImagePullBackOff";
    pub const UNPACK_SUCCESS: &str = "UnpackSuccess";
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PackageSpec,
    #[serde(default)]
    pub status: PackageStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageSpec {
    /// OCI reference of the package image
    pub image: String,

    /// Deploy a single component of a multi-component package
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,

    /// User configuration, validated against the manifest's schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<JsonValue>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub paused: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackageStatusPhase {
    Pending,
    Progressing,
    Available,
    NotReady,
    Invalid,
    Unpacking,
    Paused,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<PackageStatusPhase>,

    #[serde(default)]
    pub revision: i64,

    /// Hash of the last spec that was unpacked and evaluated, valid or not
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unpacked_hash: Option<String>,
}

impl Resource for Package {
    const NAMESPACED_KIND: &'static str = "Package";
    const CLUSTER_KIND: &'static str = "ClusterPackage";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Package {
    /// Selected component, treating an empty string as none.
    pub fn component(&self) -> Option<&str> {
        self.spec.component.as_deref().filter(|c| !c.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cluster_package_kind() {
        let package: Package = serde_json::from_value(json!({
            "metadata": {"name": "cert-manager"},
            "spec": {"image": "quay.io/pkg/cert-manager:v1"}
        }))
        .unwrap();
        assert_eq!(Package::kind(package.scope()), "ClusterPackage");
        assert_eq!(package.component(), None);
    }

    #[test]
    fn test_empty_component_is_none() {
        let package = Package {
            spec: PackageSpec {
                component: Some(String::new()),
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(package.component(), None);
    }

    #[test]
    fn test_paused_is_omitted_when_false() {
        let spec = PackageSpec {
            image: "img".to_string(),
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(&spec).unwrap(), json!({"image": "img"}));
    }
}
