//! MW-020: BLAKE3 hashing for desired state, trigger definitions and ids.

use crate::core::error::{StackError, StackResult};
use serde::Serialize;

/// Hash the canonical JSON encoding of a value.
/// Struct fields and index maps serialize in declaration/insertion order,
/// so equal values give equal hashes.
pub fn hash_serialized<T: Serialize + ?Sized>(value: &T) -> StackResult<String> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| StackError::State(format!("cannot encode for hashing: {}", e)))?;
    Ok(format!("blake3:{}", blake3::hash(&bytes).to_hex()))
}

/// First `len` hex characters of a BLAKE3 hash, for short identifiers.
pub fn short_digest(input: &str, len: usize) -> String {
    let hex = blake3::hash(input.as_bytes()).to_hex();
    hex.as_str()[..len.min(hex.len())].to_string()
}
