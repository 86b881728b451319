//! Reserved label and annotation keys
//!
//! These keys are part of the wire contract with other controllers and with
//! users, so their values must never change.

/// Label keys
pub mod labels {
    /// Name of the package manifest an object was rendered from
    pub const PACKAGE: &str = "package-operator.run/package";
    /// Name of the Package instance owning an object or revision
    pub const INSTANCE: &str = "package-operator.run/instance";
    /// Name of the ObjectDeployment owning a slice
    pub const SLICE_OWNER: &str = "slices.package-operator.run/owner";
}

/// Annotation keys
pub mod annotations {
    /// Template hash a revision was created for
    pub const HASH: &str = "package-operator.run/hash";
    /// Set to `"true"` on revisions paused because their deployment is paused
    pub const PAUSED_BY_PARENT: &str = "package-operator.run/paused-by-parent";
    /// Optional explanation attached when pausing
    pub const PAUSE_MESSAGE: &str = "package-operator.run/pause-message";
    /// Phase a rendered object belongs to
    pub const PHASE: &str = "package-operator.run/phase";
    /// Condition mappings of a rendered object, one `Source => Destination` per line
    pub const CONDITION_MAP: &str = "package-operator.run/condition-map";
    /// Marks a rendered object as external (observed, never owned)
    pub const EXTERNAL_OBJECT: &str = "package-operator.run/external";
    /// Image a deployment was rendered from
    pub const SOURCE_IMAGE: &str = "package-operator.run/source-image";
    /// Admitted configuration a deployment was rendered with
    pub const CONFIG: &str = "package-operator.run/config";
    /// Chunking strategy override on a Package
    pub const CHUNKING_STRATEGY: &str = "packages.package-operator.run/chunking-strategy";
    /// Human readable reason of the latest deployment change
    pub const CHANGE_CAUSE: &str = "kubernetes.io/change-cause";
}
