//! PKO Engine - package loading, validation and rendering
//!
//! This crate turns the raw files of a package image into an ObjectSet
//! template:
//! - `loader`: manifest, lock and component discovery
//! - `validation` / `admission`: structural rules and config admission
//! - `engine` / `filters`: MiniJinja environment for `.j2` templates
//! - `render`: object parsing and phase collection
//! - `constraints`: platform constraint gate
//! - `pipeline`: the steps above in deploy order

pub mod admission;
pub mod constraints;
pub mod engine;
pub mod error;
pub mod files_object;
pub mod filters;
pub mod loader;
pub mod pipeline;
pub mod render;
pub mod validation;

pub use engine::{Engine, EngineBuilder};
pub use error::{
    EngineError, Result, TemplateError, TemplateErrorKind, Violation, ViolationReason, Violations,
};
pub use loader::{LoadedPackage, RawFiles, load, load_component};
pub use pipeline::{RenderRequest, RenderedPackage, render_package, validate_package};
pub use validation::DigestResolver;
