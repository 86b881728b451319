//! OCI image references
//!
//! Parsing follows Docker conventions: a bare `nginx` is
//! `index.docker.io/library/nginx`, and the first path component is only a
//! registry host when it looks like one (contains `.` or `:` or is
//! `localhost`).

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

use crate::error::{CoreError, Result};

/// Registry used when a reference names none
pub const DEFAULT_REGISTRY: &str = "index.docker.io";

static REPOSITORY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*)*$")
        .expect("repository regex is valid")
});

static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\w][\w.-]{0,127}$").expect("tag regex is valid"));

static DIGEST_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]+(?:[.+_-][a-z0-9]+)*:[a-zA-Z0-9=_-]{32,}$").expect("digest regex is valid")
});

/// A parsed image reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse an image reference string
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = |message: &str| CoreError::InvalidReference {
            reference: s.to_string(),
            message: message.to_string(),
        };

        let clean = s.trim().trim_start_matches("oci://");
        if clean.is_empty() {
            return Err(invalid("empty reference"));
        }

        let (name, digest) = match clean.split_once('@') {
            Some((name, digest)) => {
                if !DIGEST_RE.is_match(digest) {
                    return Err(invalid("malformed digest"));
                }
                (name, Some(digest.to_string()))
            }
            None => (clean, None),
        };

        let last_slash = name.rfind('/').map_or(0, |i| i + 1);
        let (name, tag) = match name[last_slash..].rsplit_once(':') {
            Some((_, tag)) => {
                if !TAG_RE.is_match(tag) {
                    return Err(invalid("malformed tag"));
                }
                (
                    &name[..name.len() - tag.len() - 1],
                    Some(tag.to_string()),
                )
            }
            None => (name, None),
        };

        let (registry, repository) = match name.split_once('/') {
            Some((host, rest)) if looks_like_registry(host) => (host.to_string(), rest.to_string()),
            _ => (DEFAULT_REGISTRY.to_string(), name.to_string()),
        };
        let registry = if registry == "docker.io" {
            DEFAULT_REGISTRY.to_string()
        } else {
            registry
        };
        let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("library/{repository}")
        } else {
            repository
        };

        if !REPOSITORY_RE.is_match(&repository) {
            return Err(invalid("malformed repository"));
        }

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Same repository pinned to `digest`; any tag is dropped.
    pub fn with_digest(&self, digest: impl Into<String>) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: None,
            digest: Some(digest.into()),
        }
    }

    /// Same repository, tag and digest on another registry host.
    pub fn with_registry(&self, registry: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            ..self.clone()
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

fn looks_like_registry(host: &str) -> bool {
    host.contains('.') || host.contains(':') || host == "localhost"
}

/// Canonical `<registry>/<repository>@<digest>` form of `image`, optionally
/// moved to `registry_override`.
pub fn resolve_image(image: &str, digest: &str, registry_override: Option<&str>) -> Result<String> {
    let reference = ImageReference::parse(image)?.with_digest(digest);
    let reference = match registry_override {
        Some(registry) if !registry.is_empty() => reference.with_registry(registry),
        _ => reference,
    };
    Ok(reference.to_string())
}
