//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid image reference {reference:?}: {message}")]
    InvalidReference { reference: String, message: String },

    #[error("invalid version constraint {range:?}: {message}")]
    InvalidRange { range: String, message: String },

    #[error("invalid version {version:?}: {message}")]
    InvalidVersion { version: String, message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Missing required field: {field}")]
    MissingField { field: String },
}

pub type Result<T> = std::result::Result<T, CoreError>;
