//! Template rendering context

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

use crate::environment::Environment;

/// Context available to all templates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderContext {
    /// The Package being rendered
    pub package: PackageContext,

    /// Admitted user configuration
    pub config: JsonValue,

    /// Manifest image name to resolved reference
    pub images: BTreeMap<String, String>,

    /// Platform the package is rendered for
    pub environment: Environment,
}

/// Package information for templates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageContext {
    #[serde(default)]
    pub metadata: ContextObjectMeta,
    #[serde(default)]
    pub image: String,
}

/// Subset of object metadata exposed to templates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// Context of a template test case declared in a manifest
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateTestContext {
    #[serde(default)]
    pub package: PackageContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<JsonValue>,
    #[serde(default)]
    pub environment: Environment,
}
