//! Platform constraint gate
//!
//! Checks the manifest's `platform`, `platformVersion` and `uniqueInScope`
//! constraints against the detected environment. Every unmet constraint
//! contributes one message; an empty list means the package may deploy.

use once_cell::sync::Lazy;
use regex::Regex;
use semver::{Version, VersionReq};

use pko_core::{CoreError, Environment, PackageManifest, PackageManifestConstraint, PlatformName};

use crate::error::{EngineError, Result};

/// Message of a failed uniqueness check
pub const UNIQUE_IN_SCOPE_MESSAGE: &str =
    "package has unique constraint set but another package in the same namespace uses the same manifest";

static HYPHEN_RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\S+)\s+-\s+(\S+)").expect("hyphen range regex is valid")
});

static OPERATOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(>=|<=|!=|=|>|<|\^|~)?v?(.*)$").expect("operator regex is valid"));

/// A parsed version range: satisfied when any alternative matches.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionRange {
    alternatives: Vec<VersionReq>,
}

impl VersionRange {
    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }
}

/// Parse a range such as `>=1.29`, `1.2 - 1.4`, `^4.14 || ~4.16` or
/// `>=1.25 <1.31`.
pub fn parse_range(range: &str) -> std::result::Result<VersionRange, CoreError> {
    let invalid = |message: String| CoreError::InvalidRange {
        range: range.to_string(),
        message,
    };

    let mut alternatives = Vec::new();
    for alternative in range.split("||") {
        let expanded = HYPHEN_RANGE_RE.replace_all(alternative.trim(), ">=$1 <=$2");
        let mut comparators = Vec::new();
        let mut pending_operator: Option<&str> = None;

        for token in expanded.split(|c: char| c.is_whitespace() || c == ',') {
            if token.is_empty() {
                continue;
            }
            if matches!(token, ">=" | "<=" | "!=" | "=" | ">" | "<" | "^" | "~") {
                pending_operator = Some(token);
                continue;
            }
            let token = match pending_operator.take() {
                Some(op) => format!("{op}{token}"),
                None => token.to_string(),
            };
            comparators.push(normalize_comparator(&token).map_err(&invalid)?);
        }
        if pending_operator.is_some() {
            return Err(invalid("dangling operator".to_string()));
        }

        let joined = if comparators.is_empty() {
            "*".to_string()
        } else {
            comparators.join(", ")
        };
        alternatives.push(VersionReq::parse(&joined).map_err(|e| invalid(e.to_string()))?);
    }

    Ok(VersionRange { alternatives })
}

fn normalize_comparator(token: &str) -> std::result::Result<String, String> {
    let captures = OPERATOR_RE
        .captures(token)
        .ok_or_else(|| format!("malformed comparator {token:?}"))?;
    let operator = captures.get(1).map_or("", |m| m.as_str());
    let version = captures.get(2).map_or("", |m| m.as_str());

    if operator == "!=" {
        return Err(format!("unsupported operator in {token:?}"));
    }
    if version.is_empty() {
        return Err(format!("missing version in {token:?}"));
    }
    if matches!(version, "*" | "x" | "X") {
        if !operator.is_empty() {
            return Err(format!("operator {operator:?} cannot qualify a wildcard in {token:?}"));
        }
        return Ok("*".to_string());
    }
    // A bare version pins the given components.
    let operator = if operator.is_empty() { "=" } else { operator };
    Ok(format!("{operator}{version}"))
}

/// Parse a platform version, tolerating a leading `v` and missing
/// minor/patch components.
pub fn parse_version(version: &str) -> std::result::Result<Version, CoreError> {
    let trimmed = version.trim().trim_start_matches('v');
    let split_at = trimmed.find(['-', '+']).unwrap_or(trimmed.len());
    let (core, suffix) = trimmed.split_at(split_at);

    let mut parts: Vec<&str> = core.split('.').collect();
    while parts.len() < 3 {
        parts.push("0");
    }
    let padded = format!("{}{suffix}", parts.join("."));

    Version::parse(&padded).map_err(|e| CoreError::InvalidVersion {
        version: version.to_string(),
        message: e.to_string(),
    })
}

/// True when the manifest needs the number of same-manifest packages in scope.
pub fn requires_scope_count(manifest: &PackageManifest) -> bool {
    manifest
        .spec
        .constraints
        .iter()
        .any(|c| c.unique_in_scope.is_some())
}

/// Evaluate every constraint, returning the messages of those not met.
///
/// `packages_in_scope` is the number of Packages in the effective scope
/// labelled with this manifest's name. It must be known whenever a
/// `uniqueInScope` constraint is present.
pub fn evaluate(
    constraints: &[PackageManifestConstraint],
    env: &Environment,
    packages_in_scope: Option<usize>,
) -> Result<Vec<String>> {
    let mut messages = Vec::new();
    let mut unique = false;

    for constraint in constraints {
        if let Some(platforms) = &constraint.platform {
            if let Some(missing) = platforms.iter().find(|p| !platform_present(**p, env)) {
                messages.push(format!("{missing} platform"));
            }
        }

        if let Some(platform_version) = &constraint.platform_version {
            let range = parse_range(&platform_version.range)?;
            let Some(raw) = platform_version_of(platform_version.name, env) else {
                continue;
            };
            let version = parse_version(raw)?;
            if !range.matches(&version) {
                messages.push(format!(
                    "{} {} does not meet constraint {}",
                    platform_version.name, version, platform_version.range
                ));
            }
        }

        unique |= constraint.unique_in_scope.is_some();
    }

    if unique {
        match packages_in_scope.unwrap_or(0) {
            0 => return Err(EngineError::PackageNotInScope),
            1 => {}
            _ => messages.push(UNIQUE_IN_SCOPE_MESSAGE.to_string()),
        }
    }

    if !messages.is_empty() {
        tracing::debug!(?messages, "constraints not met");
    }
    Ok(messages)
}

/// Condition message for a non-empty list of unmet constraints.
pub fn failure_message(messages: &[String]) -> String {
    format!("Constraints not met: {}", messages.join(", "))
}

fn platform_present(platform: PlatformName, env: &Environment) -> bool {
    match platform {
        PlatformName::Kubernetes => true,
        PlatformName::OpenShift => env.open_shift.is_some(),
    }
}

fn platform_version_of(platform: PlatformName, env: &Environment) -> Option<&str> {
    match platform {
        PlatformName::Kubernetes => Some(env.kubernetes.version.as_str()),
        PlatformName::OpenShift => env.open_shift.as_ref().map(|o| o.version.as_str()),
    }
}
