//! PKO Core - API types and primitives of the package orchestrator
//!
//! This crate provides the foundational types shared by every other crate:
//! - `Package`, `ObjectDeployment`, `ObjectSet`, `ObjectSlice`: the cluster API objects
//! - `Resource` / `Scope`: one type per entity, namespaced or cluster-scoped
//! - `PackageManifest` / `PackageManifestLock`: the package file formats
//! - `Environment` and `RenderContext`: what templates are rendered against
//! - `hash`: deterministic FNV-32a and SHA-256 hashing of structured values

pub mod annotations;
pub mod conditions;
pub mod context;
pub mod deployment;
pub mod environment;
pub mod error;
pub mod hash;
pub mod image;
pub mod manifest;
pub mod objectset;
pub mod package;
pub mod resource;
pub mod selector;

pub use conditions::Condition;
pub use context::{ContextObjectMeta, PackageContext, RenderContext, TemplateTestContext};
pub use deployment::{
    DEFAULT_REVISION_HISTORY_LIMIT, ObjectDeployment, ObjectDeploymentPhase, ObjectDeploymentSpec,
    ObjectDeploymentStatus, ObjectSetTemplate,
};
pub use environment::{Environment, KubernetesEnvironment, OpenShiftEnvironment};
pub use error::{CoreError, Result};
pub use hash::{fnv32_hash, sha256_hash};
pub use image::{ImageReference, resolve_image};
pub use manifest::{
    ManifestScope, PackageManifest, PackageManifestConstraint, PackageManifestLock,
    PackageManifestLockImage, PackageManifestPhase, PlatformName, PlatformVersionConstraint,
};
pub use objectset::{
    ControlledObjectReference, LifecycleState, ObjectIdentifier, ObjectSet, ObjectSetObject,
    ObjectSetSpec, ObjectSetStatus, ObjectSetTemplatePhase, ObjectSetTemplateSpec, ObjectSlice,
    PreviousRevisionReference, TemplateMetadata,
};
pub use package::{Package, PackageSpec, PackageStatus, PackageStatusPhase};
pub use resource::{ObjectKey, Resource, Scope};

/// Re-exported so downstream crates name the same metadata types.
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
