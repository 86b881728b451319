//! Engine error types
//!
//! Package problems are reported as [`Violation`]s so they can be surfaced
//! verbatim in a Package condition. Template failures keep the source
//! position for `miette` rendering.

use miette::{Diagnostic, NamedSource, SourceSpan};
use std::fmt;
use thiserror::Error;

use pko_core::CoreError;

/// Main engine error type
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Violation(#[from] Violation),

    #[error("{0}")]
    Violations(Violations),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Configuration invalid: {}", .errors.join(", "))]
    Config { errors: Vec<String> },

    #[error("Invalid configuration schema: {message}")]
    Schema { message: String },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Package is not yet visible in its scope, cannot check uniqueness")]
    PackageNotInScope,

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// True for failures caused by the package content or the user's input,
    /// as opposed to problems talking to collaborators.
    pub fn is_invalid_package(&self) -> bool {
        matches!(
            self,
            Self::Violation(_)
                | Self::Violations(_)
                | Self::Template(_)
                | Self::Config { .. }
                | Self::Schema { .. }
                | Self::Core(CoreError::InvalidRange { .. })
                | Self::Core(CoreError::InvalidReference { .. })
        )
    }
}

impl From<Violations> for EngineError {
    fn from(mut violations: Violations) -> Self {
        if violations.0.len() == 1 {
            if let Some(violation) = violations.0.pop() {
                return Self::Violation(violation);
            }
        }
        Self::Violations(violations)
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Short description of how a package breaks the packaging rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationReason {
    EmptyPackage,
    PackageManifestNotFound,
    PackageManifestInvalid,
    PackageManifestDuplicated,
    PackageManifestLockInvalid,
    PackageManifestLockDuplicated,
    UnknownGvk,
    InvalidYaml,
    MissingPhaseAnnotation,
    MissingGvk,
    DuplicateObject,
    LabelsInvalid,
    InvalidConditionMap,
    UnsupportedScope,
    ComponentsNotEnabled,
    ComponentNotFound,
    InvalidComponentPath,
    NestedMultiComponentPackage,
    InvalidFileInComponentsDir,
    LockfileMissing,
    ImageDifferentToLockfile,
    LockfileDigestMismatch,
    TemplateTestFailed,
}

impl ViolationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmptyPackage => "Package image contains no files. Might be corrupted.",
            Self::PackageManifestNotFound => "PackageManifest not found",
            Self::PackageManifestInvalid => "PackageManifest invalid",
            Self::PackageManifestDuplicated => "PackageManifest present multiple times",
            Self::PackageManifestLockInvalid => "PackageManifestLock invalid",
            Self::PackageManifestLockDuplicated => "PackageManifestLock present multiple times",
            Self::UnknownGvk => "unknown GVK",
            Self::InvalidYaml => "Invalid YAML",
            Self::MissingPhaseAnnotation => "Missing package-operator.run/phase Annotation",
            Self::MissingGvk => "GroupVersionKind not set",
            Self::DuplicateObject => "Duplicate Object",
            Self::LabelsInvalid => "Labels invalid",
            Self::InvalidConditionMap => "Invalid package-operator.run/condition-map Annotation",
            Self::UnsupportedScope => "Package unsupported scope",
            Self::ComponentsNotEnabled => "Components not enabled",
            Self::ComponentNotFound => "Component not found",
            Self::InvalidComponentPath => "Invalid component path",
            Self::NestedMultiComponentPackage => "Nesting multi-component packages not allowed",
            Self::InvalidFileInComponentsDir => {
                "The components directory may only contain folders and dot files"
            }
            Self::LockfileMissing => "Manifest lock file is missing",
            Self::ImageDifferentToLockfile => {
                "Image specified in manifest does not match with lockfile"
            }
            Self::LockfileDigestMismatch => "Lockfile digest does not match the registry",
            Self::TemplateTestFailed => "Template test failed",
        }
    }
}

impl fmt::Display for ViolationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single packaging rule violation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub reason: ViolationReason,
    pub details: Option<String>,
    /// File inside the package responsible for the violation
    pub path: Option<String>,
    /// Index of the YAML document within `path`
    pub index: Option<usize>,
    pub component: Option<String>,
}

impl Violation {
    pub fn new(reason: ViolationReason) -> Self {
        Self {
            reason,
            details: None,
            path: None,
            index: None,
            component: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        let component = component.into();
        if !component.is_empty() {
            self.component = Some(component);
        }
        self
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason.as_str())?;
        if let Some(path) = &self.path {
            write!(f, " in {path}")?;
            if let Some(index) = self.index {
                write!(f, " idx {index}")?;
            }
        }
        if let Some(component) = &self.component {
            write!(f, " [{component}]")?;
        }
        if let Some(details) = &self.details {
            write!(f, ": {details}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Violation {}

/// Every violation found by one validation step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Violations(pub Vec<Violation>);

impl Violations {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, violation: Violation) {
        self.0.push(violation);
    }

    /// `Ok(())` when nothing was collected.
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self.into())
        }
    }
}

impl Extend<Violation> for Violations {
    fn extend<T: IntoIterator<Item = Violation>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

impl fmt::Display for Violations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, violation) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{violation}")?;
        }
        Ok(())
    }
}

/// Error kind for categorizing template errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TemplateErrorKind {
    UndefinedVariable,
    UnknownFilter,
    UnknownFunction,
    SyntaxError,
    TypeError,
    InvalidOperation,
    Other,
}

/// Template-specific error with source information
#[derive(Error, Debug, Diagnostic, Clone)]
#[error("{message}")]
#[diagnostic(code(pko::template::render))]
pub struct TemplateError {
    pub message: String,

    pub kind: TemplateErrorKind,

    /// Name of the file inside the package
    pub template: String,

    #[source_code]
    pub src: NamedSource<String>,

    #[label("error occurred here")]
    pub span: Option<SourceSpan>,
}

impl TemplateError {
    /// Create a new template error from a MiniJinja error
    pub fn from_minijinja(err: minijinja::Error, template_name: &str, template_source: &str) -> Self {
        let kind = match err.kind() {
            minijinja::ErrorKind::UndefinedError => TemplateErrorKind::UndefinedVariable,
            minijinja::ErrorKind::UnknownFilter => TemplateErrorKind::UnknownFilter,
            minijinja::ErrorKind::UnknownFunction => TemplateErrorKind::UnknownFunction,
            minijinja::ErrorKind::SyntaxError => TemplateErrorKind::SyntaxError,
            minijinja::ErrorKind::InvalidOperation => TemplateErrorKind::InvalidOperation,
            minijinja::ErrorKind::NonPrimitive | minijinja::ErrorKind::NonKey => {
                TemplateErrorKind::TypeError
            }
            _ => TemplateErrorKind::Other,
        };
        let span = err
            .line()
            .and_then(|line_num| calculate_span(template_source, line_num));
        let message = match err.line() {
            Some(line) => format!("{template_name}:{line}: {err}"),
            None => format!("{template_name}: {err}"),
        };

        Self {
            message,
            kind,
            template: template_name.to_string(),
            src: NamedSource::new(template_name, template_source.to_string()),
            span,
        }
    }
}

/// Calculate the source span covering line `line_num` (1-based)
fn calculate_span(source: &str, line_num: usize) -> Option<SourceSpan> {
    let mut offset = 0;

    for (current, line) in source.lines().enumerate() {
        if current + 1 == line_num {
            return Some(SourceSpan::new(offset.into(), line.len()));
        }
        offset += line.len() + 1;
    }

    None
}
