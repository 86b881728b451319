//! Error types for pko-kube

use thiserror::Error;

/// Result type for pko-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur while reconciling against the cluster
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: String, name: String },

    /// Optimistic concurrency failure, the object changed since it was read
    #[error("conflict updating {kind} '{name}': the object has been modified")]
    Conflict { kind: String, name: String },

    /// Every slice name candidate was taken by foreign content
    #[error("ObjectSlice collision limit reached for '{name}' after {attempts} attempts")]
    SliceCollisionLimit { name: String, attempts: u32 },

    /// A package image could not be pulled
    #[error("pulling image '{image}': {message}")]
    ImagePull { image: String, message: String },

    /// Package content or configuration problem
    #[error(transparent)]
    Engine(#[from] pko_engine::EngineError),

    #[error(transparent)]
    Core(#[from] pko_core::CoreError),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl KubeError {
    /// Check if this is a Not Found error
    pub fn is_not_found(&self) -> bool {
        match self {
            KubeError::NotFound { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }

    /// Check if this is a conflict error (409)
    pub fn is_conflict(&self) -> bool {
        match self {
            KubeError::Conflict { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => {
                resp.code == 409 && resp.reason != "AlreadyExists"
            }
            _ => false,
        }
    }

    /// Check if a create failed because the name is taken
    pub fn is_already_exists(&self) -> bool {
        match self {
            KubeError::AlreadyExists { .. } => true,
            KubeError::Api(kube::Error::Api(resp)) => {
                resp.code == 409 && resp.reason == "AlreadyExists"
            }
            _ => false,
        }
    }

    /// True when the failure comes from the package itself and retrying
    /// without a spec change cannot help.
    pub fn is_invalid_package(&self) -> bool {
        matches!(self, KubeError::Engine(e) if e.is_invalid_package())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> KubeError {
        KubeError::Api(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: reason.to_string(),
            code,
        }))
    }

    #[test]
    fn test_error_classification() {
        assert!(api_error(404, "NotFound").is_not_found());
        assert!(api_error(409, "Conflict").is_conflict());
        assert!(!api_error(409, "AlreadyExists").is_conflict());
        assert!(api_error(409, "AlreadyExists").is_already_exists());

        let err = KubeError::Conflict {
            kind: "ObjectSet".to_string(),
            name: "a".to_string(),
        };
        assert!(err.is_conflict());
        assert!(!err.is_not_found());
    }
}
