//! Resource definitions. Each module turns configuration into a `Spec`
//! variant whose references to other nodes are `NodeId`s.

pub mod build;
pub mod compute;
pub mod network;
pub mod storage;
pub mod trigger;
