//! Mountwright: declarative provisioning of a shared-filesystem inference stack.
//!
//! Dependency-ordered graph, one-shot triggers, BLAKE3 deployment state.

pub mod cli;
pub mod core;
pub mod provider;
pub mod resources;
pub mod tripwire;
