//! PKO Kube - cluster side of the package orchestrator
//!
//! This crate provides:
//! - **Cluster access**: the [`ClusterClient`] seam, backed by the API server
//!   ([`KubeCluster`]) or by memory ([`MockCluster`])
//! - **Chunking**: moving large phases into ObjectSlices
//! - **Deployment reconciler**: writing the ObjectDeployment of a Package
//! - **Revision engine**: stamping ObjectSet revisions and propagating pauses
//! - **Archival engine**: pausing, archiving and trimming old revisions
//! - **Status aggregation**: ObjectDeployment conditions from its revisions
//! - **Controllers**: Package and ObjectDeployment reconcile loops

pub mod archive;
pub mod backoff;
pub mod chunking;
pub mod client;
pub mod deployer;
pub mod error;
pub mod mock;
pub mod objectdeployment;
pub mod package;
pub mod revision;
pub mod status;

pub use archive::ArchivalEngine;
pub use backoff::Backoff;
pub use chunking::ChunkingStrategy;
pub use client::{ClusterClient, KubeCluster};
pub use deployer::DeploymentReconciler;
pub use error::{KubeError, Result};
pub use mock::{MockCluster, OperationCounts, StaticImageSource};
pub use objectdeployment::ObjectDeploymentController;
pub use package::{EnvironmentProvider, ImageSource, PackageController, desired_deployment};
pub use revision::{RevisionEngine, RevisionState, Revisions};
