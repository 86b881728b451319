//! Object rendering and phase collection
//!
//! Rendered package files are parsed into objects, stamped with the common
//! package labels and grouped into the phases of an ObjectSet template.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value as JsonValue, json};
use std::collections::BTreeMap;

use pko_core::annotations::{annotations, labels};
use pko_core::objectset::ConditionMapping;
use pko_core::{
    ObjectSetObject, ObjectSetTemplatePhase, ObjectSetTemplateSpec, PackageManifest, resolve_image,
};

use crate::engine::is_helper_file;
use crate::error::{Violation, ViolationReason};
use crate::loader::{LoadedPackage, RawFiles};
use crate::validation::PathObjects;

/// Image reference substituted for every manifest image in template tests
pub const STATIC_IMAGE: &str = "registry.package-operator.run/static-image";

static DOCUMENT_SEPARATOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^---$").expect("document separator regex is valid"));

/// Phase names assigned by [`assign_default_phases`]
pub mod default_phases {
    pub const CRDS_NAMESPACE: &str = "crds-namespace";
    pub const RBAC: &str = "rbac";
    pub const DEPLOY: &str = "deploy";
}

pub fn is_yaml_file(path: &str) -> bool {
    path.ends_with(".yaml") || path.ends_with(".yml")
}

/// Parse all YAML files into objects, ordered by path.
///
/// Helper files and non-YAML files are skipped. Paths sort as if `/` came
/// before every other character, so `a/b` precedes `a-b` and `ab`.
pub fn collect_objects(
    manifest: &PackageManifest,
    package_name: &str,
    files: &RawFiles,
) -> Result<PathObjects, Violation> {
    let mut collected = Vec::new();
    for (path, content) in files {
        if is_helper_file(path) || !is_yaml_file(path) {
            continue;
        }
        let objects = parse_objects(manifest.name(), package_name, path, content)?;
        if !objects.is_empty() {
            collected.push((path.clone(), objects));
        }
    }
    collected.sort_by_cached_key(|(path, _)| path.replace('/', "\0"));
    Ok(collected)
}

fn parse_objects(
    manifest_name: &str,
    package_name: &str,
    path: &str,
    content: &[u8],
) -> Result<Vec<JsonValue>, Violation> {
    let content = String::from_utf8_lossy(content);
    let content = content.trim_matches(|c| c == '-' || c == '\n');

    let mut objects = Vec::new();
    for (index, document) in DOCUMENT_SEPARATOR_RE.split(content).enumerate() {
        let invalid = |details: String| {
            Violation::new(ViolationReason::InvalidYaml)
                .with_path(path)
                .with_index(index)
                .with_details(details)
        };
        let value: JsonValue = serde_yaml::from_str(document).map_err(|e| invalid(e.to_string()))?;
        match value {
            JsonValue::Null => {}
            JsonValue::Object(map) if map.is_empty() => {}
            JsonValue::Object(mut map) => {
                merge_common_labels(&mut map, manifest_name, package_name);
                objects.push(JsonValue::Object(map));
            }
            other => {
                return Err(invalid(format!(
                    "document must be an object, got {}",
                    type_name(&other)
                )));
            }
        }
    }
    Ok(objects)
}

fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "list",
        JsonValue::Object(_) => "object",
    }
}

fn merge_common_labels(object: &mut Map<String, JsonValue>, manifest_name: &str, package_name: &str) {
    let metadata = object
        .entry("metadata")
        .or_insert_with(|| json!({}));
    if !metadata.is_object() {
        *metadata = json!({});
    }
    let Some(metadata) = metadata.as_object_mut() else {
        return;
    };
    let labels_value = metadata.entry("labels").or_insert_with(|| json!({}));
    if !labels_value.is_object() {
        *labels_value = json!({});
    }
    if let Some(map) = labels_value.as_object_mut() {
        map.insert(labels::PACKAGE.to_string(), json!(manifest_name));
        map.insert(labels::INSTANCE.to_string(), json!(package_name));
    }
}

/// Parse a condition-map annotation: one `SourceType => DestinationType`
/// per non-empty line.
pub fn parse_condition_map(value: &str) -> Result<Vec<ConditionMapping>, String> {
    value
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let (source, destination) = line
                .split_once("=>")
                .ok_or_else(|| format!("expected 'SourceType => DestinationType', got {line:?}"))?;
            let (source, destination) = (source.trim(), destination.trim());
            if source.is_empty() || destination.is_empty() {
                return Err(format!("empty condition type in {line:?}"));
            }
            Ok(ConditionMapping {
                source_type: source.to_string(),
                destination_type: destination.to_string(),
            })
        })
        .collect()
}

/// Group objects into the manifest's phases.
///
/// The phase, condition-map and external annotations are consumed. Objects
/// naming an undeclared phase are dropped, as are phases left empty; the
/// remaining phases keep manifest order.
pub fn render_template_spec(
    manifest: &PackageManifest,
    objects: impl IntoIterator<Item = JsonValue>,
) -> ObjectSetTemplateSpec {
    let mut phases: Vec<ObjectSetTemplatePhase> = manifest
        .spec
        .phases
        .iter()
        .map(|phase| ObjectSetTemplatePhase {
            name: phase.name.clone(),
            class: phase.class.clone(),
            ..Default::default()
        })
        .collect();

    for mut object in objects {
        let Some(annotations_map) = object
            .pointer_mut("/metadata/annotations")
            .and_then(JsonValue::as_object_mut)
        else {
            continue;
        };
        let phase_name = take_string(annotations_map, annotations::PHASE);
        let condition_map = take_string(annotations_map, annotations::CONDITION_MAP);
        let external = take_string(annotations_map, annotations::EXTERNAL_OBJECT) == "True";
        if annotations_map.is_empty() {
            if let Some(metadata) = object.get_mut("metadata").and_then(JsonValue::as_object_mut) {
                metadata.remove("annotations");
            }
        }

        let Some(phase) = phases.iter_mut().find(|p| p.name == phase_name) else {
            tracing::debug!(phase = %phase_name, "dropping object of undeclared phase");
            continue;
        };
        let entry = ObjectSetObject {
            object,
            condition_mappings: parse_condition_map(&condition_map).unwrap_or_default(),
            ..Default::default()
        };
        if external {
            phase.external_objects.push(entry);
        } else {
            phase.objects.push(entry);
        }
    }

    phases.retain(|p| !p.objects.is_empty() || !p.external_objects.is_empty());

    ObjectSetTemplateSpec {
        phases,
        availability_probes: manifest.spec.availability_probes.clone(),
        success_delay_seconds: 0,
    }
}

fn take_string(map: &mut Map<String, JsonValue>, key: &str) -> String {
    match map.remove(key) {
        Some(JsonValue::String(s)) => s,
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Manifest image name to `<registry>/<repository>@<digest>`, from the lock.
pub fn resolve_images(
    package: &LoadedPackage,
    registry_override: Option<&str>,
) -> pko_core::Result<BTreeMap<String, String>> {
    let mut images = BTreeMap::new();
    if let Some(lock) = &package.lock {
        for image in &lock.spec.images {
            images.insert(
                image.name.clone(),
                resolve_image(&image.image, &image.digest, registry_override)?,
            );
        }
    }
    Ok(images)
}

/// Every manifest image mapped to [`STATIC_IMAGE`].
pub fn static_images(manifest: &PackageManifest) -> BTreeMap<String, String> {
    manifest
        .spec
        .images
        .iter()
        .map(|image| (image.name.clone(), STATIC_IMAGE.to_string()))
        .collect()
}

/// Default phase of an object kind.
pub fn classify(kind: &str) -> &'static str {
    match kind {
        "CustomResourceDefinition" | "Namespace" => default_phases::CRDS_NAMESPACE,
        "ServiceAccount" | "Role" | "RoleBinding" | "ClusterRole" | "ClusterRoleBinding" => {
            default_phases::RBAC
        }
        _ => default_phases::DEPLOY,
    }
}

/// Annotate every object lacking a phase with its [`classify`] phase.
pub fn assign_default_phases(objects: &mut [JsonValue]) {
    for object in objects.iter_mut() {
        let kind = object
            .get("kind")
            .and_then(JsonValue::as_str)
            .unwrap_or_default();
        let phase = classify(kind);

        let Some(map) = object.as_object_mut() else {
            continue;
        };
        let metadata = map.entry("metadata").or_insert_with(|| json!({}));
        let Some(metadata) = metadata.as_object_mut() else {
            continue;
        };
        let annotations_value = metadata.entry("annotations").or_insert_with(|| json!({}));
        if let Some(annotations_map) = annotations_value.as_object_mut() {
            annotations_map
                .entry(annotations::PHASE)
                .or_insert_with(|| json!(phase));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::tests::{MANIFEST, files};
    use crate::loader::load;

    fn manifest(phases: &[&str]) -> PackageManifest {
        let mut manifest = PackageManifest::from_yaml(MANIFEST).unwrap();
        manifest.spec.phases = phases
            .iter()
            .map(|name| pko_core::PackageManifestPhase {
                name: name.to_string(),
                class: None,
            })
            .collect();
        manifest
    }

    #[test]
    fn test_collect_objects_order_and_labels() {
        let raw = files(&[
            ("ab.yaml", "kind: A\nmetadata: {name: ab}"),
            ("a/b.yaml", "---\nkind: B\nmetadata:\n  name: b\n  labels: {app: x}\n---\n---\nkind: C\nmetadata: {name: c}\n"),
            ("a-b.yml", "kind: D\nmetadata: {name: d}"),
            ("_helpers.yaml", "kind: Ignored"),
            ("README.md", "# readme"),
        ]);
        let collected = collect_objects(&manifest(&["deploy"]), "web", &raw).unwrap();
        let paths: Vec<&str> = collected.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["a/b.yaml", "a-b.yml", "ab.yaml"]);

        let b = &collected[0].1;
        assert_eq!(b.len(), 2);
        assert_eq!(
            b[0]["metadata"]["labels"],
            json!({
                "app": "x",
                "package-operator.run/package": "nginx",
                "package-operator.run/instance": "web",
            })
        );
    }

    #[test]
    fn test_collect_objects_invalid_yaml() {
        let raw = files(&[("bad.yaml", "kind: A\n---\nkind: [unclosed\n")]);
        let err = collect_objects(&manifest(&["deploy"]), "web", &raw).unwrap_err();
        assert_eq!(err.reason, ViolationReason::InvalidYaml);
        assert_eq!(err.path.as_deref(), Some("bad.yaml"));
        assert_eq!(err.index, Some(1));

        let raw = files(&[("list.yaml", "- a\n- b\n")]);
        let err = collect_objects(&manifest(&["deploy"]), "web", &raw).unwrap_err();
        assert!(err.details.unwrap().contains("must be an object"));
    }

    #[test]
    fn test_parse_condition_map() {
        let mappings = parse_condition_map("Available => my-prefix/Available\n\n Ready=>example.com/Ready ").unwrap();
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings[1].source_type, "Ready");
        assert_eq!(mappings[1].destination_type, "example.com/Ready");
        assert!(parse_condition_map("").unwrap().is_empty());
        assert!(parse_condition_map("Available").is_err());
        assert!(parse_condition_map("=> x").is_err());
    }

    #[test]
    fn test_phase_collector() {
        let objects = vec![
            json!({"kind": "Deployment", "metadata": {"name": "d", "annotations": {
                annotations::PHASE: "deploy",
                annotations::CONDITION_MAP: "Available => acme.io/Available",
            }}}),
            json!({"kind": "Secret", "metadata": {"name": "ext", "annotations": {
                annotations::PHASE: "deploy",
                annotations::EXTERNAL_OBJECT: "True",
                "keep": "me",
            }}}),
            json!({"kind": "Namespace", "metadata": {"name": "ns", "annotations": {annotations::PHASE: "namespaces"}}}),
            json!({"kind": "Role", "metadata": {"name": "r", "annotations": {annotations::PHASE: "unknown"}}}),
        ];
        let spec = render_template_spec(&manifest(&["namespaces", "rbac", "deploy"]), objects);

        let names: Vec<&str> = spec.phases.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["namespaces", "deploy"]);

        let deploy = &spec.phases[1];
        assert_eq!(deploy.objects.len(), 1);
        assert_eq!(deploy.objects[0].object["metadata"].get("annotations"), None);
        assert_eq!(
            deploy.objects[0].condition_mappings,
            vec![ConditionMapping {
                source_type: "Available".to_string(),
                destination_type: "acme.io/Available".to_string(),
            }]
        );
        assert_eq!(deploy.external_objects.len(), 1);
        assert_eq!(
            deploy.external_objects[0].object["metadata"]["annotations"],
            json!({"keep": "me"})
        );
        assert_eq!(spec.availability_probes.len(), 1);
    }

    #[test]
    fn test_resolve_images() {
        let lock = "apiVersion: manifests.package-operator.run/v1alpha1\nkind: PackageManifestLock\nspec:\n  images:\n  - {name: nginx, image: \"nginx:1.27\", digest: \"sha256:9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08\"}\n";
        let pkg = load(&files(&[("manifest.yaml", MANIFEST), ("manifest.lock.yaml", lock)])).unwrap();
        let images = resolve_images(&pkg, None).unwrap();
        assert_eq!(
            images["nginx"],
            "index.docker.io/library/nginx@sha256:9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08"
        );
        let images = resolve_images(&pkg, Some("mirror.local")).unwrap();
        assert!(images["nginx"].starts_with("mirror.local/library/nginx@sha256:"));
    }

    #[test]
    fn test_assign_default_phases() {
        let mut objects = vec![
            json!({"kind": "CustomResourceDefinition", "metadata": {"name": "a"}}),
            json!({"kind": "ClusterRoleBinding"}),
            json!({"kind": "Deployment", "metadata": {"annotations": {annotations::PHASE: "custom"}}}),
            json!({"kind": "Service"}),
        ];
        assign_default_phases(&mut objects);
        let phases: Vec<&str> = objects
            .iter()
            .map(|o| o["metadata"]["annotations"][annotations::PHASE].as_str().unwrap())
            .collect();
        assert_eq!(phases, vec!["crds-namespace", "rbac", "custom", "deploy"]);
    }
}
