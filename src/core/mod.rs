//! Core provisioning logic: types, parsing, graph, ordering, planning, execution.

pub mod error;
pub mod executor;
pub mod graph;
pub mod parser;
pub mod planner;
pub mod resolver;
pub mod stack;
pub mod state;
pub mod types;
