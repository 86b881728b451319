//! Package validation
//!
//! Manifest structure, lock coherence, scope support and the per-object
//! rules every rendered object must satisfy.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashSet};

use pko_core::annotations::annotations;
use pko_core::{ManifestScope, ObjectIdentifier, PackageManifest, Scope};

use crate::admission;
use crate::constraints;
use crate::error::{Violation, ViolationReason, Violations};
use crate::loader::{LoadedPackage, MANIFEST_LOCK_FILENAME};
use crate::render;

static QUALIFIED_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9]$").expect("qualified name regex is valid")
});

static DNS1123_SUBDOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
        .expect("subdomain regex is valid")
});

static CONFIG_MAP_KEY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[-._a-zA-Z0-9]+$").expect("config map key regex is valid"));

/// Structural checks of a manifest, as `<field path>: <problem>` strings.
pub fn validate_manifest(manifest: &PackageManifest) -> Vec<String> {
    let mut errors = Vec::new();

    if manifest.name().is_empty() {
        errors.push("metadata.name: Required value".to_string());
    }
    if manifest.spec.scopes.is_empty() {
        errors.push("spec.scopes: Required value".to_string());
    }
    if manifest.spec.phases.is_empty() {
        errors.push("spec.phases: Required value".to_string());
    }

    let mut phase_names = HashSet::new();
    for (i, phase) in manifest.spec.phases.iter().enumerate() {
        if !phase_names.insert(phase.name.as_str()) {
            errors.push(format!(
                "spec.phases[{i}].name: Invalid value: {:?}: must be unique",
                phase.name
            ));
        }
    }

    for (i, probe) in manifest.spec.availability_probes.iter().enumerate() {
        if probe.probes.is_empty() {
            errors.push(format!("spec.availabilityProbes[{i}].probes: Required value"));
        }
    }

    let mut image_names = HashSet::new();
    for (i, image) in manifest.spec.images.iter().enumerate() {
        if image.name.is_empty() {
            errors.push(format!(
                "spec.images[{i}].name: Invalid value: \"\": must be non empty"
            ));
        } else if !image_names.insert(image.name.as_str()) {
            errors.push(format!(
                "spec.images[{i}].name: Invalid value: {:?}: must be unique",
                image.name
            ));
        }
        if image.image.is_empty() {
            errors.push(format!(
                "spec.images[{i}].image: Invalid value: \"\": must be non empty"
            ));
        }
    }

    for (i, constraint) in manifest.spec.constraints.iter().enumerate() {
        if let Some(version) = &constraint.platform_version {
            let path = format!("spec.constraints[{i}].platformVersion.range");
            if version.range.is_empty() {
                errors.push(format!("{path}: Required value"));
            } else if constraints::parse_range(&version.range).is_err() {
                errors.push(format!(
                    "{path}: Invalid value: {:?}: improper constraint",
                    version.range
                ));
            }
        }
    }

    let schema_errors = admission::check_schema(manifest);
    let schema_valid = schema_errors.is_empty();
    errors.extend(
        schema_errors
            .into_iter()
            .map(|e| format!("spec.config.openAPIV3Schema: {e}")),
    );

    for (i, case) in manifest.test.template.iter().enumerate() {
        let problems = config_map_key_errors(&case.name);
        if !problems.is_empty() {
            errors.push(format!(
                "test.template[{i}].name: Invalid value: {:?}: {}",
                case.name,
                problems.join(", ")
            ));
        }
        if schema_valid {
            if let Err(config_errors) =
                admission::admission_errors(manifest, case.context.config.as_ref())
            {
                errors.extend(
                    config_errors
                        .into_iter()
                        .map(|e| format!("test.template[{i}].context.config{e}")),
                );
            }
        }
    }

    errors
}

fn config_map_key_errors(key: &str) -> Vec<String> {
    let mut errors = Vec::new();
    if key.len() > 253 {
        errors.push("must be no more than 253 characters".to_string());
    }
    if !CONFIG_MAP_KEY_RE.is_match(key) {
        errors.push(
            "a valid config key must consist of alphanumeric characters, '-', '_' or '.'"
                .to_string(),
        );
    }
    if key == "." || key == ".." {
        errors.push("must not be '.' or '..'".to_string());
    }
    errors
}

/// Lock file coherence with the manifest's image list.
pub fn validate_lock(package: &LoadedPackage) -> Result<(), Violation> {
    let lock_path = format!("{MANIFEST_LOCK_FILENAME}.yaml");
    let manifest_images = &package.manifest.spec.images;

    let Some(lock) = &package.lock else {
        if manifest_images.is_empty() {
            return Ok(());
        }
        return Err(Violation::new(ViolationReason::LockfileMissing).with_path(lock_path));
    };

    for image in manifest_images {
        let Some(locked) = lock.image(&image.name) else {
            return Err(Violation::new(ViolationReason::LockfileMissing).with_details(&image.name));
        };
        if locked.image != image.image {
            return Err(
                Violation::new(ViolationReason::ImageDifferentToLockfile).with_details(format!(
                    "{:?}: {:?} vs {:?}",
                    image.name, image.image, locked.image
                )),
            );
        }
    }

    for locked in &lock.spec.images {
        if !manifest_images.iter().any(|i| i.name == locked.name) {
            return Err(
                Violation::new(ViolationReason::ImageDifferentToLockfile).with_details(&locked.name),
            );
        }
    }
    Ok(())
}

/// Looks up the digest a registry currently serves for an image reference.
pub trait DigestResolver: Send + Sync {
    fn resolve_digest(&self, image: &str) -> Result<String, String>;
}

/// Compare every locked digest with what `resolver` reports.
pub fn validate_lock_digests(package: &LoadedPackage, resolver: &dyn DigestResolver) -> Violations {
    let mut violations = Violations::default();
    let Some(lock) = &package.lock else {
        return violations;
    };

    for image in &lock.spec.images {
        match resolver.resolve_digest(&image.image) {
            Ok(digest) if digest == image.digest => {}
            Ok(digest) => violations.push(
                Violation::new(ViolationReason::LockfileDigestMismatch).with_details(format!(
                    "{:?}: locked {} but registry has {digest}",
                    image.name, image.digest
                )),
            ),
            Err(e) => violations.push(
                Violation::new(ViolationReason::LockfileDigestMismatch)
                    .with_details(format!("{:?}: {e}", image.name)),
            ),
        }
    }
    violations
}

/// The package must declare support for the scope it is installed in.
pub fn validate_scope(manifest: &PackageManifest, scope: Scope) -> Result<(), Violation> {
    let wanted = match scope {
        Scope::Namespaced => ManifestScope::Namespaced,
        Scope::Cluster => ManifestScope::Cluster,
    };
    if manifest.spec.scopes.contains(&wanted) {
        return Ok(());
    }
    Err(Violation::new(ViolationReason::UnsupportedScope).with_details(format!(
        "Package does not support {wanted:?} scope, supported scopes: {:?}",
        manifest.spec.scopes
    )))
}

/// Rendered objects grouped by the file they came from, in emission order
pub type PathObjects = Vec<(String, Vec<JsonValue>)>;

/// Run every object rule, collecting all violations.
pub fn validate_objects(manifest: &PackageManifest, objects: &PathObjects) -> Violations {
    let phases: HashSet<&str> = manifest.phase_names().collect();
    let mut violations = Violations::default();
    let mut seen = HashSet::new();

    for (path, objects) in objects {
        for (index, object) in objects.iter().enumerate() {
            let at = |reason| Violation::new(reason).with_path(path.as_str()).with_index(index);

            let api_version = str_at(object, "/apiVersion");
            let kind = str_at(object, "/kind");
            let version = api_version.rsplit('/').next().unwrap_or_default();
            if version.is_empty() || kind.is_empty() {
                violations.push(at(ViolationReason::MissingGvk));
            }

            match str_at(object, &format!("/metadata/annotations/{}", escape(annotations::PHASE))) {
                "" => violations.push(at(ViolationReason::MissingPhaseAnnotation)),
                phase if !phases.contains(phase) => violations.push(
                    at(ViolationReason::MissingPhaseAnnotation)
                        .with_details(format!("phase {phase:?} is not declared in the manifest")),
                ),
                _ => {}
            }

            let condition_map = str_at(
                object,
                &format!("/metadata/annotations/{}", escape(annotations::CONDITION_MAP)),
            );
            if let Err(e) = render::parse_condition_map(condition_map) {
                violations.push(at(ViolationReason::InvalidConditionMap).with_details(e));
            }

            let labels: BTreeMap<String, String> = object
                .pointer("/metadata/labels")
                .and_then(|l| serde_json::from_value(l.clone()).ok())
                .unwrap_or_default();
            let label_errors = label_errors(&labels);
            if !label_errors.is_empty() {
                violations.push(at(ViolationReason::LabelsInvalid).with_details(label_errors.join(", ")));
            }

            let identifier = ObjectIdentifier::from_object(object, None);
            if !seen.insert(identifier) {
                violations.push(at(ViolationReason::DuplicateObject));
            }
        }
    }
    violations
}

fn str_at<'a>(object: &'a JsonValue, pointer: &str) -> &'a str {
    object.pointer(pointer).and_then(JsonValue::as_str).unwrap_or_default()
}

/// JSON pointer escaping of a single reference token.
fn escape(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

/// Label key and value rules of the cluster API.
pub fn label_errors(labels: &BTreeMap<String, String>) -> Vec<String> {
    let mut errors = Vec::new();
    for (key, value) in labels {
        let name = match key.split_once('/') {
            Some((prefix, name)) => {
                if prefix.is_empty() || prefix.len() > 253 || !DNS1123_SUBDOMAIN_RE.is_match(prefix) {
                    errors.push(format!(
                        "metadata.labels: Invalid value: {key:?}: prefix part must be a lowercase RFC 1123 subdomain"
                    ));
                }
                name
            }
            None => key.as_str(),
        };
        if name.is_empty() || name.len() > 63 || !QUALIFIED_NAME_RE.is_match(name) {
            errors.push(format!(
                "metadata.labels: Invalid value: {key:?}: name part must consist of alphanumeric characters, '-', '_' or '.', and must be no more than 63 characters"
            ));
        }
        if value.len() > 63 || (!value.is_empty() && !QUALIFIED_NAME_RE.is_match(value)) {
            errors.push(format!(
                "metadata.labels: Invalid value: {value:?}: a valid label must be an empty string or consist of alphanumeric characters, '-', '_' or '.', and must be no more than 63 characters"
            ));
        }
    }
    errors
}
