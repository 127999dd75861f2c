//! MW-003: Stack graph: an arena of resource specs plus an edge list.
//!
//! Specs are plain data and refer to each other by `NodeId`. Edges are
//! derived from those references ("inferred") or declared with
//! `add_dependency` ("explicit") when the ordering is not visible in data.

use super::error::{StackError, StackResult};
use super::types::{Observed, ResourceKind};
use crate::resources::build::BuildJobSpec;
use crate::resources::compute::FunctionSpec;
use crate::resources::network::{NetworkSpec, SecurityGroupSpec};
use crate::resources::storage::{AccessPointSpec, FileSystemSpec};
use crate::resources::trigger::TriggerSpec;
use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a node in the stack arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Desired specification of one resource.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Spec {
    Network(NetworkSpec),
    SecurityGroup(SecurityGroupSpec),
    FileSystem(FileSystemSpec),
    AccessPoint(AccessPointSpec),
    Function(FunctionSpec),
    BuildJob(BuildJobSpec),
    Trigger(TriggerSpec),
}

impl Spec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Network(_) => ResourceKind::Network,
            Self::SecurityGroup(_) => ResourceKind::SecurityGroup,
            Self::FileSystem(_) => ResourceKind::FileSystem,
            Self::AccessPoint(_) => ResourceKind::AccessPoint,
            Self::Function(_) => ResourceKind::Function,
            Self::BuildJob(_) => ResourceKind::BuildJob,
            Self::Trigger(_) => ResourceKind::Trigger,
        }
    }

    /// Nodes whose handles this spec embeds.
    pub fn references(&self) -> Vec<NodeId> {
        match self {
            Self::Network(_) => Vec::new(),
            Self::SecurityGroup(sg) => {
                let mut refs = vec![sg.network];
                refs.extend(sg.rules.iter().map(|r| r.target));
                refs
            }
            Self::FileSystem(fs) => vec![fs.network, fs.security_group],
            Self::AccessPoint(ap) => vec![ap.file_system],
            Self::Function(f) => {
                let mut refs = vec![f.network, f.security_group];
                if let Some(ref m) = f.mount {
                    refs.push(m.access_point);
                }
                refs
            }
            Self::BuildJob(job) => {
                let mut refs = vec![job.network];
                refs.extend(job.security_groups.iter().copied());
                refs.extend(job.mounts.iter().map(|m| m.file_system));
                refs
            }
            Self::Trigger(t) => t.references(),
        }
    }
}

/// A node: desired spec plus whatever the provider reported for it.
#[derive(Debug, Clone)]
pub struct Node {
    pub logical_id: String,
    pub spec: Spec,
    pub observed: Option<Observed>,
}

/// Why an edge exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// The dependent spec embeds the dependency's handle.
    Reference,
    /// Declared with `add_dependency`; invisible in the data.
    Explicit,
}

/// `from` must exist before `to` is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub kind: EdgeKind,
}

/// Named stack output pointing at a node attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRef {
    pub node: NodeId,
    pub attribute: String,
}

/// Arena of resource specs with explicit ordering overrides.
#[derive(Debug, Clone, Default)]
pub struct StackGraph {
    nodes: Vec<Node>,
    explicit: Vec<(NodeId, NodeId)>,
    outputs: IndexMap<String, OutputRef>,
}

impl StackGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a spec under a unique logical id.
    pub fn add(&mut self, logical_id: impl Into<String>, spec: Spec) -> StackResult<NodeId> {
        let logical_id = logical_id.into();
        if self.find(&logical_id).is_some() {
            return Err(StackError::config(format!(
                "duplicate resource id '{}'",
                logical_id
            )));
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            logical_id,
            spec,
            observed: None,
        });
        Ok(id)
    }

    /// Declare that `dependent` must be created after `dependency`.
    pub fn add_dependency(&mut self, dependent: NodeId, dependency: NodeId) -> StackResult<()> {
        self.node(dependent)?;
        self.node(dependency)?;
        if dependent == dependency {
            return Err(StackError::config(format!(
                "resource '{}' depends on itself",
                self.nodes[dependent.0].logical_id
            )));
        }
        if !self.explicit.contains(&(dependency, dependent)) {
            self.explicit.push((dependency, dependent));
        }
        Ok(())
    }

    /// Drop an explicit dependency. Returns whether one was present.
    pub fn remove_dependency(&mut self, dependent: NodeId, dependency: NodeId) -> bool {
        let before = self.explicit.len();
        self.explicit.retain(|&pair| pair != (dependency, dependent));
        before != self.explicit.len()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0)
    }

    /// Like `get`, but a missing node is a configuration error.
    pub fn node(&self, id: NodeId) -> StackResult<&Node> {
        self.get(id)
            .ok_or_else(|| StackError::config(format!("reference to unknown resource {}", id)))
    }

    pub fn find(&self, logical_id: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| n.logical_id == logical_id)
            .map(NodeId)
    }

    pub fn logical_id(&self, id: NodeId) -> &str {
        self.get(id).map(|n| n.logical_id.as_str()).unwrap_or("?")
    }

    /// Edges implied by embedded references.
    pub fn inferred_edges(&self) -> Vec<Edge> {
        let mut seen = FxHashSet::default();
        let mut edges = Vec::new();
        for (idx, node) in self.nodes.iter().enumerate() {
            for dep in node.spec.references() {
                if seen.insert((dep, NodeId(idx))) {
                    edges.push(Edge {
                        from: dep,
                        to: NodeId(idx),
                        kind: EdgeKind::Reference,
                    });
                }
            }
        }
        edges
    }

    pub fn explicit_edges(&self) -> Vec<Edge> {
        self.explicit
            .iter()
            .map(|&(from, to)| Edge {
                from,
                to,
                kind: EdgeKind::Explicit,
            })
            .collect()
    }

    /// All ordering edges. An explicit edge that duplicates a reference edge
    /// is reported once, as `Reference`.
    pub fn edges(&self) -> Vec<Edge> {
        let mut edges = self.inferred_edges();
        let seen: FxHashSet<(NodeId, NodeId)> = edges.iter().map(|e| (e.from, e.to)).collect();
        edges.extend(
            self.explicit_edges()
                .into_iter()
                .filter(|e| !seen.contains(&(e.from, e.to))),
        );
        edges
    }

    /// Handle of a realized node; unrealized is a configuration error.
    pub fn observed(&self, id: NodeId) -> StackResult<&Observed> {
        let node = self.node(id)?;
        node.observed.as_ref().ok_or_else(|| {
            StackError::config(format!(
                "resource '{}' referenced before it was realized",
                node.logical_id
            ))
        })
    }

    pub fn set_observed(&mut self, id: NodeId, observed: Observed) -> StackResult<()> {
        let node = self
            .get_mut(id)
            .ok_or_else(|| StackError::config(format!("reference to unknown resource {}", id)))?;
        node.observed = Some(observed);
        Ok(())
    }

    pub fn add_output(&mut self, name: impl Into<String>, node: NodeId, attribute: &str) {
        self.outputs.insert(
            name.into(),
            OutputRef {
                node,
                attribute: attribute.to_string(),
            },
        );
    }

    pub fn outputs(&self) -> &IndexMap<String, OutputRef> {
        &self.outputs
    }

    /// Resolve every output against observed handles.
    pub fn resolve_outputs(&self) -> StackResult<IndexMap<String, String>> {
        let mut resolved = IndexMap::new();
        for (name, out) in &self.outputs {
            let observed = self.observed(out.node)?;
            let value = observed.attr(&out.attribute).ok_or_else(|| {
                StackError::config(format!(
                    "output '{}': resource '{}' has no attribute '{}'",
                    name,
                    self.logical_id(out.node),
                    out.attribute
                ))
            })?;
            resolved.insert(name.clone(), value.to_string());
        }
        Ok(resolved)
    }

    /// Graphviz rendering; explicit edges are dashed.
    pub fn to_dot(&self) -> String {
        let mut lines = vec!["digraph stack {".to_string(), "  rankdir=LR;".to_string()];
        for node in &self.nodes {
            lines.push(format!(
                "  \"{}\" [label=\"{}\\n({})\"];",
                node.logical_id,
                node.logical_id,
                node.spec.kind()
            ));
        }
        for edge in self.edges() {
            let style = match edge.kind {
                EdgeKind::Reference => "",
                EdgeKind::Explicit => " [style=dashed]",
            };
            lines.push(format!(
                "  \"{}\" -> \"{}\"{};",
                self.logical_id(edge.from),
                self.logical_id(edge.to),
                style
            ));
        }
        lines.push("}".to_string());
        lines.join("\n")
    }
}
