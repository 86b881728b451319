//! Package validation and rendering pipeline
//!
//! [`validate_package`] runs the checks that only depend on the package
//! content and its install scope. [`render_package`] turns a validated
//! package instance into an ObjectSet template.

use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

use pko_core::{Environment, ObjectSetTemplateSpec, PackageContext, RenderContext, Scope};

use crate::admission;
use crate::engine::Engine;
use crate::error::{EngineError, Result, Violation, ViolationReason, Violations};
use crate::loader::LoadedPackage;
use crate::render;
use crate::validation::{self, DigestResolver};

/// A package instance ready to be written as an ObjectDeployment template
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPackage {
    pub manifest_name: String,
    /// Configuration after pruning and defaulting
    pub config: JsonValue,
    pub template: ObjectSetTemplateSpec,
}

/// Everything about the installing Package that reaches the templates
#[derive(Debug, Clone)]
pub struct RenderRequest<'a> {
    pub package: PackageContext,
    pub config: Option<&'a JsonValue>,
    pub images: BTreeMap<String, String>,
    pub environment: &'a Environment,
}

/// Validate lock coherence, scope support and every template test case.
pub fn validate_package(
    package: &LoadedPackage,
    scope: Scope,
    digest_resolver: Option<&dyn DigestResolver>,
) -> Violations {
    let mut violations = Violations::default();

    if let Err(violation) = validation::validate_lock(package) {
        violations.push(violation);
    } else if let Some(resolver) = digest_resolver {
        violations.extend(validation::validate_lock_digests(package, resolver).0);
    }

    if let Err(violation) = validation::validate_scope(&package.manifest, scope) {
        violations.push(violation);
    }

    violations.extend(run_template_tests(package).0);
    violations
}

/// Render every `test.template` case with static image references.
pub fn run_template_tests(package: &LoadedPackage) -> Violations {
    let mut violations = Violations::default();
    let images = render::static_images(&package.manifest);

    for case in &package.manifest.test.template {
        let request = RenderRequest {
            package: case.context.package.clone(),
            config: case.context.config.as_ref(),
            images: images.clone(),
            environment: &case.context.environment,
        };
        match render_package(package, &request) {
            Ok(_) => tracing::debug!(test = %case.name, "template test passed"),
            Err(err) => violations.push(
                Violation::new(ViolationReason::TemplateTestFailed)
                    .with_details(format!("{}: {err}", case.name)),
            ),
        }
    }
    violations
}

/// Admit the configuration, render the templates and collect the objects
/// into phases.
pub fn render_package(package: &LoadedPackage, request: &RenderRequest<'_>) -> Result<RenderedPackage> {
    let manifest = &package.manifest;
    let config = admission::admit_config(manifest, request.config)?;

    let context = RenderContext {
        package: request.package.clone(),
        config: config.clone(),
        images: request.images.clone(),
        environment: request.environment.clone(),
    };
    let rendered = Engine::default().render_files(&package.files, &context)?;

    let objects = render::collect_objects(manifest, &request.package.metadata.name, &rendered)?;
    let violations = validation::validate_objects(manifest, &objects);
    if !violations.is_empty() {
        return Err(EngineError::from(violations));
    }

    let count: usize = objects.iter().map(|(_, objects)| objects.len()).sum();
    tracing::debug!(manifest = %manifest.name(), objects = count, "package rendered");

    Ok(RenderedPackage {
        manifest_name: manifest.name().to_string(),
        config,
        template: render::render_template_spec(
            manifest,
            objects.into_iter().flat_map(|(_, objects)| objects),
        ),
    })
}

/// Resolve manifest images for a real install, applying `registry_override`.
pub fn install_images(
    package: &LoadedPackage,
    registry_override: Option<&str>,
) -> Result<BTreeMap<String, String>> {
    Ok(render::resolve_images(package, registry_override)?)
}
