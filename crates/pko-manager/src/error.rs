//! Manager error types

use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ManagerError>;

#[derive(Error, Debug, Diagnostic)]
pub enum ManagerError {
    /// No usable kubeconfig or in-cluster configuration
    #[error("connecting to the cluster: {0}")]
    #[diagnostic(
        code(pko::manager::connect),
        help("set KUBECONFIG or run inside a cluster with a service account")
    )]
    Connect(#[source] kube::Error),

    #[error("probing the cluster environment: {0}")]
    #[diagnostic(code(pko::manager::environment))]
    Environment(#[source] kube::Error),

    #[error("package directory {path} is not readable")]
    #[diagnostic(code(pko::manager::package_dir), help("create it or point --package-dir elsewhere"))]
    PackageDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
