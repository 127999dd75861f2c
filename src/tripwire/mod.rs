//! Tripwire: BLAKE3 hashing and provenance events.

pub mod eventlog;
pub mod hasher;
