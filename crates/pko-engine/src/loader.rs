//! Package structure loading
//!
//! Turns the flat file map of a package image into a manifest, an optional
//! lock and the remaining files, splitting `components/<name>/` subtrees
//! into their own packages when the manifest enables components.

use std::collections::BTreeMap;

use pko_core::manifest::{MANIFEST_GROUP, MANIFEST_KIND, MANIFEST_LOCK_KIND};
use pko_core::{PackageManifest, PackageManifestLock};

use crate::error::{Violation, ViolationReason};
use crate::validation;

/// Package files keyed by `/`-separated path relative to the package root
pub type RawFiles = BTreeMap<String, Vec<u8>>;

pub const MANIFEST_FILENAME: &str = "manifest";
pub const MANIFEST_LOCK_FILENAME: &str = "manifest.lock";
pub const COMPONENTS_FOLDER: &str = "components";

const YAML_EXTENSIONS: [&str; 2] = ["yaml", "yml"];

/// A package with its manifest parsed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedPackage {
    pub manifest: PackageManifest,
    pub lock: Option<PackageManifestLock>,
    /// Every file except the manifest, the lock and component subtrees
    pub files: RawFiles,
    pub components: Vec<LoadedPackage>,
}

/// Load the root package and all of its components.
pub fn load(files: &RawFiles) -> Result<LoadedPackage, Violation> {
    if files.is_empty() {
        return Err(Violation::new(ViolationReason::EmptyPackage));
    }
    load_tree(files, "")
}

/// Load a single component, or the root package alone when `component` is
/// empty.
pub fn load_component(files: &RawFiles, component: &str) -> Result<LoadedPackage, Violation> {
    let mut package = load(files)?;

    if !package.manifest.components_enabled() {
        if component.is_empty() {
            return Ok(package);
        }
        return Err(Violation::new(ViolationReason::ComponentsNotEnabled));
    }

    if component.is_empty() {
        package.components.clear();
        return Ok(package);
    }

    package
        .components
        .into_iter()
        .find(|c| c.manifest.name() == component)
        .ok_or_else(|| Violation::new(ViolationReason::ComponentNotFound).with_component(component))
}

fn load_tree(files: &RawFiles, component: &str) -> Result<LoadedPackage, Violation> {
    let (manifest_path, manifest_bytes) = find_single(
        files,
        MANIFEST_FILENAME,
        ViolationReason::PackageManifestDuplicated,
        component,
    )?
    .ok_or_else(|| {
        Violation::new(ViolationReason::PackageManifestNotFound)
            .with_details(format!(
                "searched at {MANIFEST_FILENAME}.yaml and {MANIFEST_FILENAME}.yml"
            ))
            .with_component(component)
    })?;
    let mut manifest = parse_manifest(&manifest_path, manifest_bytes, component)?;
    if !component.is_empty() {
        manifest.metadata.name = Some(component.to_string());
    }

    let lock = match find_single(
        files,
        MANIFEST_LOCK_FILENAME,
        ViolationReason::PackageManifestLockDuplicated,
        component,
    )? {
        Some((path, bytes)) => Some(parse_lock(&path, bytes, component)?),
        None => None,
    };

    let mut package = LoadedPackage {
        manifest,
        lock,
        files: files
            .iter()
            .filter(|(path, _)| !is_manifest_file(path))
            .map(|(path, content)| (path.clone(), content.clone()))
            .collect(),
        components: Vec::new(),
    };

    if !package.manifest.components_enabled() {
        return Ok(package);
    }
    if !component.is_empty() {
        return Err(
            Violation::new(ViolationReason::NestedMultiComponentPackage).with_component(component),
        );
    }

    let prefix = format!("{COMPONENTS_FOLDER}/");
    let mut component_files: BTreeMap<String, RawFiles> = BTreeMap::new();
    let component_paths: Vec<String> = package
        .files
        .keys()
        .filter(|path| path.starts_with(&prefix))
        .cloned()
        .collect();

    for path in component_paths {
        let Some(content) = package.files.remove(&path) else {
            continue;
        };
        let parts: Vec<&str> = path.splitn(3, '/').collect();
        match parts.as_slice() {
            [_, name] if name.starts_with('.') => {}
            [_, _] => {
                return Err(
                    Violation::new(ViolationReason::InvalidFileInComponentsDir).with_path(path),
                );
            }
            [_, name, rest] if !name.is_empty() && !rest.is_empty() => {
                component_files
                    .entry((*name).to_string())
                    .or_default()
                    .insert((*rest).to_string(), content);
            }
            _ => {
                return Err(Violation::new(ViolationReason::InvalidComponentPath).with_path(path));
            }
        }
    }

    for (name, files) in &component_files {
        let sub_package = load_tree(files, name)?;
        package.components.push(sub_package);
    }
    Ok(package)
}

fn is_manifest_file(path: &str) -> bool {
    YAML_EXTENSIONS.iter().any(|ext| {
        path == format!("{MANIFEST_FILENAME}.{ext}")
            || path == format!("{MANIFEST_LOCK_FILENAME}.{ext}")
    })
}

/// Locate `<basename>.yaml` or `<basename>.yml`; both present is a violation.
fn find_single<'a>(
    files: &'a RawFiles,
    basename: &str,
    duplicated: ViolationReason,
    component: &str,
) -> Result<Option<(String, &'a [u8])>, Violation> {
    let found: Vec<(String, &[u8])> = YAML_EXTENSIONS
        .iter()
        .map(|ext| format!("{basename}.{ext}"))
        .filter_map(|path| files.get(&path).map(|c| (path, c.as_slice())))
        .collect();

    match found.len() {
        0 => Ok(None),
        1 => Ok(found.into_iter().next()),
        _ => Err(Violation::new(duplicated).with_component(component)),
    }
}

fn check_kind(
    path: &str,
    api_version: &str,
    kind: &str,
    expected_kind: &str,
    component: &str,
) -> Result<(), Violation> {
    let group = api_version.rsplit_once('/').map(|(g, _)| g).unwrap_or_default();
    if group != MANIFEST_GROUP || kind != expected_kind {
        return Err(Violation::new(ViolationReason::UnknownGvk)
            .with_path(path)
            .with_component(component)
            .with_details(format!(
                "GroupKind must be {expected_kind}.{MANIFEST_GROUP}, is: {kind}.{group}"
            )));
    }
    Ok(())
}

fn parse_manifest(path: &str, bytes: &[u8], component: &str) -> Result<PackageManifest, Violation> {
    let content = String::from_utf8_lossy(bytes);
    let manifest = PackageManifest::from_yaml(&content).map_err(|e| {
        Violation::new(ViolationReason::InvalidYaml)
            .with_path(path)
            .with_component(component)
            .with_details(e.to_string())
    })?;
    check_kind(path, &manifest.api_version, &manifest.kind, MANIFEST_KIND, component)?;

    let errors = validation::validate_manifest(&manifest);
    if !errors.is_empty() {
        return Err(Violation::new(ViolationReason::PackageManifestInvalid)
            .with_path(path)
            .with_component(component)
            .with_details(errors.join(", ")));
    }
    Ok(manifest)
}

fn parse_lock(path: &str, bytes: &[u8], component: &str) -> Result<PackageManifestLock, Violation> {
    let content = String::from_utf8_lossy(bytes);
    let lock = PackageManifestLock::from_yaml(&content).map_err(|e| {
        Violation::new(ViolationReason::InvalidYaml)
            .with_path(path)
            .with_component(component)
            .with_details(e.to_string())
    })?;
    check_kind(path, &lock.api_version, &lock.kind, MANIFEST_LOCK_KIND, component)?;

    let mut errors = Vec::new();
    for (i, image) in lock.spec.images.iter().enumerate() {
        if image.name.is_empty() {
            errors.push(format!("spec.images[{i}].name: Required value"));
        }
        if image.image.is_empty() {
            errors.push(format!("spec.images[{i}].image: Required value"));
        }
        if image.digest.is_empty() {
            errors.push(format!("spec.images[{i}].digest: Required value"));
        }
    }
    if !errors.is_empty() {
        return Err(Violation::new(ViolationReason::PackageManifestLockInvalid)
            .with_path(path)
            .with_component(component)
            .with_details(errors.join(", ")));
    }
    Ok(lock)
}
