//! Platform environment descriptor
//!
//! Describes the cluster a package is rendered for. Templates see it as
//! `environment`, and the constraint gate checks platforms and versions
//! against it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::context::ContextObjectMeta;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    #[serde(default)]
    pub kubernetes: KubernetesEnvironment,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_shift: Option<OpenShiftEnvironment>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyEnvironment>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hyper_shift: Option<HyperShiftEnvironment>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KubernetesEnvironment {
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenShiftEnvironment {
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed: Option<ManagedOpenShiftEnvironment>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManagedOpenShiftEnvironment {
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyEnvironment {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub http_proxy: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub https_proxy: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub no_proxy: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HyperShiftEnvironment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosted_cluster: Option<HostedClusterEnvironment>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostedClusterEnvironment {
    #[serde(default)]
    pub metadata: ContextObjectMeta,
    #[serde(default)]
    pub hosted_cluster_namespace: String,
}

impl Environment {
    /// Environment of a plain Kubernetes cluster at `version`.
    pub fn kubernetes(version: impl Into<String>) -> Self {
        Self {
            kubernetes: KubernetesEnvironment {
                version: version.into(),
            },
            ..Default::default()
        }
    }

    pub fn with_open_shift(mut self, version: impl Into<String>) -> Self {
        self.open_shift = Some(OpenShiftEnvironment {
            version: version.into(),
            managed: None,
        });
        self
    }
}
