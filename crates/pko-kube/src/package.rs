//! Package controller
//!
//! Unpacks the package image of a Package, renders it into an
//! ObjectDeployment and mirrors the deployment's status back. Unpacking
//! only happens when the spec changed since the last evaluated one.
//! Failed image pulls are retried with a per-package backoff.

use async_trait::async_trait;
use kube::runtime::controller::Action;
use std::collections::BTreeMap;
use std::time::Duration;

use pko_core::annotations::{annotations, labels};
use pko_core::conditions::{self, new_condition, status};
use pko_core::package::{condition_types, reasons};
use pko_core::resource::{label, set_controller_reference};
use pko_core::{
    ContextObjectMeta, Environment, ObjectDeployment, ObjectKey, ObjectMeta, Package, PackageContext,
    PackageStatusPhase, Resource, sha256_hash, selector,
};
use pko_engine::pipeline::install_images;
use pko_engine::{
    LoadedPackage, RawFiles, RenderRequest, RenderedPackage, constraints, load_component,
    render_package, validate_package,
};

use crate::backoff::Backoff;
use crate::chunking::ChunkingStrategy;
use crate::client::ClusterClient;
use crate::deployer::DeploymentReconciler;
use crate::error::{KubeError, Result};

/// Fetches the files of a package image
#[async_trait]
pub trait ImageSource: Send + Sync + 'static {
    async fn pull(&self, image: &str) -> Result<RawFiles>;
}

/// Describes the cluster packages are rendered for
pub trait EnvironmentProvider: Send + Sync + 'static {
    fn environment(&self) -> Environment;
}

impl EnvironmentProvider for Environment {
    fn environment(&self) -> Environment {
        self.clone()
    }
}

/// A package problem that retrying cannot fix
struct Invalid {
    reason: &'static str,
    message: String,
}

impl Invalid {
    fn load_error(message: impl Into<String>) -> Self {
        Self {
            reason: reasons::LOAD_ERROR,
            message: message.into(),
        }
    }
}

/// How an unpack attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unpack {
    Deployed,
    Invalid,
    PullFailed,
}

/// Reconciles Packages into ObjectDeployments
pub struct PackageController<C, I, E> {
    client: C,
    images: I,
    environment: E,
    registry_override: Option<String>,
    requeue_after: Duration,
    backoff: Backoff,
}

impl<C: ClusterClient, I: ImageSource, E: EnvironmentProvider> PackageController<C, I, E> {
    pub fn new(client: C, images: I, environment: E, requeue_after: Duration) -> Self {
        Self {
            client,
            images,
            environment,
            registry_override: None,
            requeue_after,
            backoff: Backoff::default(),
        }
    }

    /// Replace the delays between failed image pulls.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Rewrite the registry host of every resolved image.
    pub fn with_registry_override(mut self, registry: Option<String>) -> Self {
        self.registry_override = registry.filter(|r| !r.is_empty());
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    #[tracing::instrument(skip_all, fields(package = %key))]
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<Action> {
        let Some(mut package) = self.client.get::<Package>(key).await? else {
            tracing::debug!("Package gone");
            self.backoff.reset(key);
            return Ok(Action::await_change());
        };
        let observed = package.status.clone();

        let spec_hash = sha256_hash(&package.spec, None)?;
        let mut pull_failed = false;
        if package.status.unpacked_hash.as_deref() != Some(spec_hash.as_str()) {
            pull_failed = self.unpack(&mut package, spec_hash).await? == Unpack::PullFailed;
        }

        self.mirror_deployment(&mut package).await?;
        package.status.phase = Some(phase(&package.status.conditions));

        if package.status != observed {
            self.client.update_status(&package).await?;
            tracing::debug!(phase = ?package.status.phase, "status updated");
        }

        if pull_failed {
            let delay = self.backoff.next(key);
            tracing::debug!(?delay, failures = self.backoff.failures(key), "backing off");
            return Ok(Action::requeue(delay));
        }
        self.backoff.reset(key);
        Ok(Action::requeue(self.requeue_after))
    }

    /// Pull, render and deploy the package. Every outcome but a failed pull
    /// records `spec_hash`, so the same spec is not evaluated twice.
    async fn unpack(&self, package: &mut Package, spec_hash: String) -> Result<Unpack> {
        let generation = package.generation();

        let files = match self.images.pull(&package.spec.image).await {
            Ok(files) => files,
            Err(err) => {
                tracing::warn!(image = %package.spec.image, error = %err, "pulling package image failed");
                conditions::set(
                    &mut package.status.conditions,
                    new_condition(
                        condition_types::UNPACKED,
                        status::FALSE,
                        reasons::IMAGE_PULL_BACK_OFF,
                        err.to_string(),
                        generation,
                    ),
                );
                return Ok(Unpack::PullFailed);
            }
        };

        let outcome = match self.render(package, &files).await? {
            Ok(rendered) => {
                let desired = desired_deployment(package, &rendered)?;
                DeploymentReconciler::new(&self.client)
                    .reconcile(&desired, ChunkingStrategy::for_package(package))
                    .await?;
                conditions::remove(&mut package.status.conditions, condition_types::INVALID);
                tracing::info!(manifest = %rendered.manifest_name, "package unpacked");
                Unpack::Deployed
            }
            Err(invalid) => {
                tracing::info!(reason = invalid.reason, message = %invalid.message, "package invalid");
                conditions::set(
                    &mut package.status.conditions,
                    new_condition(
                        condition_types::INVALID,
                        status::TRUE,
                        invalid.reason,
                        invalid.message,
                        generation,
                    ),
                );
                Unpack::Invalid
            }
        };

        package.status.unpacked_hash = Some(spec_hash);
        conditions::set(
            &mut package.status.conditions,
            new_condition(
                condition_types::UNPACKED,
                status::TRUE,
                reasons::UNPACK_SUCCESS,
                "Unpack job succeeded",
                generation,
            ),
        );
        Ok(outcome)
    }

    /// Load, validate, gate and render. The outer error is transient, the
    /// inner one a package problem.
    async fn render(
        &self,
        package: &mut Package,
        files: &RawFiles,
    ) -> Result<std::result::Result<RenderedPackage, Invalid>> {
        let loaded = match load_component(files, package.component().unwrap_or_default()) {
            Ok(loaded) => loaded,
            Err(violation) => return Ok(Err(Invalid::load_error(violation.to_string()))),
        };

        let violations = validate_package(&loaded, package.scope(), None);
        if !violations.is_empty() {
            return Ok(Err(Invalid::load_error(violations.to_string())));
        }

        let environment = self.environment.environment();
        let unmet = match self.check_constraints(package, &loaded, &environment).await {
            Ok(unmet) => unmet,
            Err(KubeError::Engine(err)) if err.is_invalid_package() => {
                return Ok(Err(Invalid::load_error(err.to_string())));
            }
            Err(err) => return Err(err),
        };
        if !unmet.is_empty() {
            return Ok(Err(Invalid {
                reason: reasons::CONSTRAINTS_FAILED,
                message: constraints::failure_message(&unmet),
            }));
        }

        let images = match install_images(&loaded, self.registry_override.as_deref()) {
            Ok(images) => images,
            Err(err) => return Ok(Err(Invalid::load_error(err.to_string()))),
        };

        let request = RenderRequest {
            package: PackageContext {
                metadata: ContextObjectMeta {
                    name: package.name().to_string(),
                    namespace: package.namespace().unwrap_or_default().to_string(),
                    labels: package.metadata.labels.clone().unwrap_or_default(),
                    annotations: package.metadata.annotations.clone().unwrap_or_default(),
                },
                image: package.spec.image.clone(),
            },
            config: package.spec.config.as_ref(),
            images,
            environment: &environment,
        };
        match render_package(&loaded, &request) {
            Ok(rendered) => Ok(Ok(rendered)),
            Err(err) if err.is_invalid_package() => Ok(Err(Invalid::load_error(err.to_string()))),
            Err(err) => Err(err.into()),
        }
    }

    /// Label the Package with its manifest name and evaluate the manifest
    /// constraints. Returns the messages of unmet constraints.
    async fn check_constraints(
        &self,
        package: &mut Package,
        loaded: &LoadedPackage,
        environment: &Environment,
    ) -> Result<Vec<String>> {
        let manifest = &loaded.manifest;
        if label(&package.metadata, labels::PACKAGE) != Some(manifest.name()) {
            let mut labelled = package.clone();
            labelled
                .metadata
                .labels
                .get_or_insert_with(BTreeMap::new)
                .insert(labels::PACKAGE.to_string(), manifest.name().to_string());
            let pending = std::mem::take(&mut package.status);
            *package = self.client.update(&labelled).await?;
            package.status = pending;
        }

        let packages_in_scope = if constraints::requires_scope_count(manifest) {
            let same_manifest = selector::from_labels(&BTreeMap::from([(
                labels::PACKAGE.to_string(),
                manifest.name().to_string(),
            )]));
            let packages: Vec<Package> = self.client.list(package.namespace(), &same_manifest).await?;
            Some(packages.len())
        } else {
            None
        };

        Ok(constraints::evaluate(
            &manifest.spec.constraints,
            environment,
            packages_in_scope,
        )?)
    }

    /// Copy the ObjectDeployment's conditions and revision onto the Package.
    async fn mirror_deployment(&self, package: &mut Package) -> Result<()> {
        let key = ObjectKey::new(package.namespace(), package.name());
        let Some(deployment) = self.client.get::<ObjectDeployment>(&key).await? else {
            return Ok(());
        };
        let generation = package.generation();
        let target = &mut package.status.conditions;

        target.retain(|c| !conditions::is_mapped(c));
        for type_ in [
            condition_types::AVAILABLE,
            condition_types::PROGRESSING,
            condition_types::PAUSED,
        ] {
            match conditions::find(&deployment.status.conditions, type_) {
                Some(condition) => {
                    let mut mirrored = condition.clone();
                    mirrored.observed_generation = Some(generation);
                    conditions::set(target, mirrored);
                }
                None => {
                    conditions::remove(target, type_);
                }
            }
        }
        for condition in deployment.status.conditions.iter().filter(|c| conditions::is_mapped(c)) {
            let mut mirrored = condition.clone();
            mirrored.observed_generation = Some(generation);
            target.push(mirrored);
        }

        package.status.revision = deployment.status.revision.unwrap_or_default();
        Ok(())
    }
}

/// The ObjectDeployment a Package renders to.
pub fn desired_deployment(package: &Package, rendered: &RenderedPackage) -> Result<ObjectDeployment> {
    let labels_map = BTreeMap::from([
        (labels::PACKAGE.to_string(), rendered.manifest_name.clone()),
        (labels::INSTANCE.to_string(), package.name().to_string()),
    ]);
    let annotations_map = BTreeMap::from([
        (annotations::SOURCE_IMAGE.to_string(), package.spec.image.clone()),
        (annotations::CONFIG.to_string(), serde_json::to_string(&package.spec.config)?),
        (
            annotations::CHANGE_CAUSE.to_string(),
            format!("Installing {} package.", rendered.manifest_name),
        ),
    ]);

    let mut deployment = ObjectDeployment {
        metadata: ObjectMeta {
            name: Some(package.name().to_string()),
            namespace: package.namespace().map(str::to_string),
            labels: Some(labels_map.clone()),
            annotations: Some(annotations_map),
            ..Default::default()
        },
        ..Default::default()
    };
    deployment.spec.selector = selector::from_labels(&labels_map);
    deployment.spec.template.metadata.labels = labels_map;
    deployment.spec.template.spec = rendered.template.clone();
    deployment.spec.paused = package.spec.paused;
    set_controller_reference(&mut deployment.metadata, package);
    Ok(deployment)
}

/// Package phase, first match wins.
fn phase(conditions_list: &[pko_core::Condition]) -> PackageStatusPhase {
    if conditions::is_true(conditions_list, condition_types::INVALID) {
        PackageStatusPhase::Invalid
    } else if !conditions::is_true(conditions_list, condition_types::UNPACKED) {
        PackageStatusPhase::Unpacking
    } else if conditions::is_true(conditions_list, condition_types::PAUSED) {
        PackageStatusPhase::Paused
    } else if conditions::is_true(conditions_list, condition_types::PROGRESSING) {
        PackageStatusPhase::Progressing
    } else if conditions::is_true(conditions_list, condition_types::AVAILABLE) {
        PackageStatusPhase::Available
    } else {
        PackageStatusPhase::NotReady
    }
}
