//! Phase chunking
//!
//! Large phases are moved out of the ObjectSet template into ObjectSlices.
//! A strategy returns the chunks to externalize; zero chunks means the
//! phase stays inline.

use std::str::FromStr;

use pko_core::annotations::annotations;
use pko_core::resource::annotation;
use pko_core::{ObjectSetObject, ObjectSetTemplatePhase, Package, Resource};

use crate::error::Result;

/// Upper bound for the serialized objects of one slice
pub const BIN_SIZE_BYTES: usize = 1024 * 1024;

/// How the objects of a phase are split into slices
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChunkingStrategy {
    /// Never externalize
    NoOp,
    /// One slice per object
    EachObject,
    /// Fill 1 MiB bins in order, externalize only when more than one is needed
    #[default]
    BinpackNextFit,
}

impl FromStr for ChunkingStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "NoOp" => Ok(Self::NoOp),
            "EachObject" => Ok(Self::EachObject),
            "BinpackNextFit" => Ok(Self::BinpackNextFit),
            other => Err(format!("unknown chunking strategy '{other}'")),
        }
    }
}

impl ChunkingStrategy {
    /// Strategy requested by the Package annotation. Unknown values fall
    /// back to the default.
    pub fn for_package(package: &Package) -> Self {
        match annotation(&package.metadata, annotations::CHUNKING_STRATEGY) {
            Some(value) => value.parse().unwrap_or_else(|err| {
                tracing::warn!(package = %package.key(), %err, "using default chunking strategy");
                Self::default()
            }),
            None => Self::default(),
        }
    }

    /// Split the inline objects of `phase`. Object order is preserved.
    pub fn chunk(&self, phase: &ObjectSetTemplatePhase) -> Result<Vec<Vec<ObjectSetObject>>> {
        match self {
            Self::NoOp => Ok(Vec::new()),
            Self::EachObject => Ok(phase.objects.iter().map(|o| vec![o.clone()]).collect()),
            Self::BinpackNextFit => binpack_next_fit(&phase.objects, BIN_SIZE_BYTES),
        }
    }
}

fn binpack_next_fit(objects: &[ObjectSetObject], bin_size: usize) -> Result<Vec<Vec<ObjectSetObject>>> {
    let mut chunks = Vec::new();
    let mut current: Vec<ObjectSetObject> = Vec::new();
    let mut current_size = 0;

    for object in objects {
        let size = serde_json::to_vec(&object.object)?.len();
        if !current.is_empty() && current_size + size > bin_size {
            chunks.push(std::mem::take(&mut current));
            current_size = 0;
        }
        current.push(object.clone());
        current_size += size;
    }

    if chunks.is_empty() {
        return Ok(Vec::new());
    }
    chunks.push(current);
    Ok(chunks)
}
