//! Deterministic hashing of structured values
//!
//! Two hash kinds are provided:
//! - **FNV-32a**: short, name-safe strings used as suffixes of revision and
//!   slice names.
//! - **SHA-256**: hex digests used where collisions must be astronomically
//!   unlikely, e.g. deciding whether a Package spec was already unpacked.
//!
//! Both hash the same byte stream: the value serialized to JSON with object
//! keys sorted recursively, followed by the little-endian bytes of the
//! collision counter when one is given. Reordering map keys in the input
//! therefore never changes the result.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::Result;

const FNV32_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV32_PRIME: u32 = 0x0100_0193;

/// Consonants only: encoded hashes never start with a digit and never
/// spell words.
const SAFE_ALPHABET: &[u8] = b"bcdfghjklmnpqrstvwxz";

/// FNV-1a, 32 bit.
#[derive(Debug, Clone, Copy)]
struct Fnv32a(u32);

impl Fnv32a {
    fn new() -> Self {
        Self(FNV32_OFFSET_BASIS)
    }

    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.0 ^= u32::from(*byte);
            self.0 = self.0.wrapping_mul(FNV32_PRIME);
        }
    }

    fn finish(self) -> u32 {
        self.0
    }
}

/// Compute the name-safe FNV-32a hash of `value`.
///
/// `collision_count` is mixed into the stream when present, so bumping the
/// counter yields a different hash for the same value.
pub fn fnv32_hash<T>(value: &T, collision_count: Option<i32>) -> Result<String>
where
    T: Serialize + ?Sized,
{
    let mut hasher = Fnv32a::new();
    hasher.write(&canonical_bytes(value)?);
    if let Some(count) = collision_count {
        hasher.write(&count.to_le_bytes());
    }
    Ok(safe_encode(&hasher.finish().to_string()))
}

/// Compute the hex encoded SHA-256 hash of `value`.
pub fn sha256_hash<T>(value: &T, collision_count: Option<i32>) -> Result<String>
where
    T: Serialize + ?Sized,
{
    let mut hasher = Sha256::new();
    hasher.update(canonical_bytes(value)?);
    if let Some(count) = collision_count {
        hasher.update(count.to_le_bytes());
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Serialize `value` to JSON with every object's keys in sorted order.
pub fn canonical_bytes<T>(value: &T) -> Result<Vec<u8>>
where
    T: Serialize + ?Sized,
{
    let value = canonicalize(serde_json::to_value(value)?);
    Ok(serde_json::to_vec(&value)?)
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key, canonicalize(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Map every byte of `input` onto [`SAFE_ALPHABET`].
///
/// The ten decimal digits land on ten distinct letters, so encoding the
/// decimal form of a hash is injective.
pub fn safe_encode(input: &str) -> String {
    input
        .bytes()
        .map(|byte| SAFE_ALPHABET[usize::from(byte) % SAFE_ALPHABET.len()] as char)
        .collect()
}
