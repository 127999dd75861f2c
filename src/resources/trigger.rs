//! MW-014: One-shot trigger.
//!
//! A trigger invokes one external action when it is first created and takes
//! a field of the action's response as its physical id. Afterwards it is a
//! no-op for as long as its definition hash is unchanged. A changed
//! definition is a replacement: the action fires again and a new physical id
//! is recorded. Nothing runs on delete, and the trigger never waits for
//! whatever the action started.

use crate::core::error::{StackError, StackResult};
use crate::core::graph::{NodeId, StackGraph};
use crate::core::types::{ResourceLock, ResourceStatus};
use crate::tripwire::hasher;
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Permission scope covering every resource.
pub const ANY_RESOURCE: &str = "*";

pub const BUILD_SERVICE: &str = "CodeBuild";
pub const START_BUILD: &str = "startBuild";

/// A parameter: either a literal or a handle attribute of another node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamValue {
    Literal(serde_json::Value),
    Ref { node: NodeId, attribute: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerPolicy {
    pub resources: Vec<String>,
}

impl TriggerPolicy {
    pub fn any_resource() -> Self {
        Self {
            resources: vec![ANY_RESOURCE.to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSpec {
    pub service: String,
    pub action: String,
    pub parameters: IndexMap<String, ParamValue>,
    /// Dotted path into the response naming the physical id (`build.id`)
    pub physical_id_path: String,
    pub policy: TriggerPolicy,
}

fn path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.([A-Za-z_][A-Za-z0-9_]*|[0-9]+))*$")
            .expect("static regex")
    })
}

impl TriggerSpec {
    pub fn new(service: &str, action: &str, physical_id_path: &str) -> StackResult<Self> {
        if service.is_empty() || action.is_empty() {
            return Err(StackError::config("trigger needs a service and an action"));
        }
        if !path_re().is_match(physical_id_path) {
            return Err(StackError::config(format!(
                "invalid physical id path '{}'",
                physical_id_path
            )));
        }
        Ok(Self {
            service: service.to_string(),
            action: action.to_string(),
            parameters: IndexMap::new(),
            physical_id_path: physical_id_path.to_string(),
            policy: TriggerPolicy::any_resource(),
        })
    }

    pub fn param(mut self, key: &str, value: ParamValue) -> Self {
        self.parameters.insert(key.to_string(), value);
        self
    }

    /// Start one run of a build job; identity is the returned build id.
    pub fn start_build(job: NodeId) -> Self {
        Self {
            service: BUILD_SERVICE.to_string(),
            action: START_BUILD.to_string(),
            parameters: IndexMap::from([(
                "projectName".to_string(),
                ParamValue::Ref {
                    node: job,
                    attribute: "name".to_string(),
                },
            )]),
            physical_id_path: "build.id".to_string(),
            policy: TriggerPolicy::any_resource(),
        }
    }

    pub fn references(&self) -> Vec<NodeId> {
        self.parameters
            .values()
            .filter_map(|v| match v {
                ParamValue::Ref { node, .. } => Some(*node),
                ParamValue::Literal(_) => None,
            })
            .collect()
    }

    pub fn qualified_action(&self) -> String {
        format!("{}.{}", self.service, self.action)
    }

    /// True if the physical id of this trigger is a build id.
    pub fn starts_build(&self) -> bool {
        self.service == BUILD_SERVICE && self.action == START_BUILD
    }

    /// Content hash of the definition: service, action, parameters,
    /// id path and policy.
    pub fn definition_hash(&self) -> StackResult<String> {
        hasher::hash_serialized(self)
    }

    /// Substitute `Ref` parameters with observed handle attributes.
    pub fn resolve_parameters(&self, graph: &StackGraph) -> StackResult<serde_json::Value> {
        let mut out = serde_json::Map::new();
        for (key, value) in &self.parameters {
            let resolved = match value {
                ParamValue::Literal(v) => v.clone(),
                ParamValue::Ref { node, attribute } => {
                    let observed = graph.observed(*node)?;
                    let attr = observed.attr(attribute).ok_or_else(|| {
                        StackError::config(format!(
                            "trigger parameter '{}': '{}' has no attribute '{}'",
                            key,
                            graph.logical_id(*node),
                            attribute
                        ))
                    })?;
                    serde_json::Value::String(attr.to_string())
                }
            };
            out.insert(key.clone(), resolved);
        }
        Ok(serde_json::Value::Object(out))
    }
}

/// Walk a dotted path through a JSON response. Object keys and array
/// indices are supported; strings and numbers are returned as text.
pub fn extract_physical_id(response: &serde_json::Value, path: &str) -> Option<String> {
    let mut current = response;
    for segment in path.split('.') {
        current = match current {
            serde_json::Value::Object(map) => map.get(segment)?,
            serde_json::Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    match current {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Trigger lifecycle as recovered from the deployment record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerState {
    Untriggered,
    Triggered {
        physical_id: String,
        definition_hash: String,
    },
}

/// What to do with a trigger on this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerDecision {
    /// Invoke the action (first creation or changed definition).
    Fire,
    /// Same definition as last time; keep the recorded identity.
    Keep { physical_id: String },
}

impl TriggerState {
    /// A failed or missing record counts as never triggered.
    pub fn from_lock(entry: Option<&ResourceLock>) -> Self {
        match entry {
            Some(rl) if rl.status == ResourceStatus::Converged => match rl.observed {
                Some(ref obs) if !obs.physical_id.is_empty() => Self::Triggered {
                    physical_id: obs.physical_id.clone(),
                    definition_hash: rl.hash.clone(),
                },
                _ => Self::Untriggered,
            },
            _ => Self::Untriggered,
        }
    }

    pub fn decide(&self, definition_hash: &str) -> TriggerDecision {
        match self {
            Self::Untriggered => TriggerDecision::Fire,
            Self::Triggered {
                physical_id,
                definition_hash: recorded,
            } if recorded == definition_hash => TriggerDecision::Keep {
                physical_id: physical_id.clone(),
            },
            Self::Triggered { .. } => TriggerDecision::Fire,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Observed, ResourceKind};
    use serde_json::json;

    fn converged(hash: &str, physical_id: &str) -> ResourceLock {
        ResourceLock {
            kind: ResourceKind::Trigger,
            status: ResourceStatus::Converged,
            applied_at: None,
            duration_seconds: None,
            hash: hash.to_string(),
            observed: Some(Observed::new(physical_id)),
        }
    }

    #[test]
    fn test_mw014_extract_physical_id() {
        let response = json!({"build": {"id": "proj:abc", "number": 7, "phases": [{"name": "SUBMITTED"}]}});
        assert_eq!(
            extract_physical_id(&response, "build.id").as_deref(),
            Some("proj:abc")
        );
        assert_eq!(
            extract_physical_id(&response, "build.number").as_deref(),
            Some("7")
        );
        assert_eq!(
            extract_physical_id(&response, "build.phases.0.name").as_deref(),
            Some("SUBMITTED")
        );
        assert_eq!(extract_physical_id(&response, "build.missing"), None);
        assert_eq!(extract_physical_id(&response, "build"), None);
    }

    #[test]
    fn test_mw014_start_build_definition() {
        let t = TriggerSpec::start_build(NodeId(8));
        assert_eq!(t.qualified_action(), "CodeBuild.startBuild");
        assert_eq!(t.physical_id_path, "build.id");
        assert_eq!(t.policy.resources, vec!["*".to_string()]);
        assert_eq!(t.references(), vec![NodeId(8)]);
        assert!(t.starts_build());
    }

    #[test]
    fn test_mw014_new_validates_path() {
        assert!(TriggerSpec::new("CodeBuild", "startBuild", "build.id").is_ok());
        assert!(TriggerSpec::new("CodeBuild", "startBuild", "build..id").is_err());
        assert!(TriggerSpec::new("CodeBuild", "startBuild", "").is_err());
        assert!(TriggerSpec::new("", "startBuild", "build.id").is_err());
    }

    #[test]
    fn test_mw014_definition_hash_tracks_definition() {
        let a = TriggerSpec::start_build(NodeId(8));
        let b = TriggerSpec::start_build(NodeId(8));
        assert_eq!(a.definition_hash().unwrap(), b.definition_hash().unwrap());

        let c = b.param("environmentVariablesOverride", ParamValue::Literal(json!([])));
        assert_ne!(a.definition_hash().unwrap(), c.definition_hash().unwrap());
    }

    #[test]
    fn test_mw014_state_machine() {
        let hash = "blake3:aaa";
        assert_eq!(TriggerState::from_lock(None), TriggerState::Untriggered);
        assert_eq!(TriggerState::Untriggered.decide(hash), TriggerDecision::Fire);

        let lock = converged(hash, "proj:1");
        let state = TriggerState::from_lock(Some(&lock));
        assert_eq!(
            state.decide(hash),
            TriggerDecision::Keep {
                physical_id: "proj:1".to_string()
            }
        );
        assert_eq!(state.decide("blake3:bbb"), TriggerDecision::Fire);
    }

    #[test]
    fn test_mw014_failed_record_is_untriggered() {
        let mut lock = converged("blake3:aaa", "proj:1");
        lock.status = ResourceStatus::Failed;
        assert_eq!(TriggerState::from_lock(Some(&lock)), TriggerState::Untriggered);
    }

    #[test]
    fn test_mw014_resolve_parameters() {
        use crate::core::graph::Spec;
        use crate::resources::network::define_network;

        let mut g = StackGraph::new();
        let vpc = g
            .add("vpc", Spec::Network(define_network(1, 0).unwrap()))
            .unwrap();
        let t = TriggerSpec::new("Svc", "act", "id")
            .unwrap()
            .param("vpcId", ParamValue::Ref { node: vpc, attribute: "id".to_string() })
            .param("dryRun", ParamValue::Literal(json!(true)));

        assert!(t.resolve_parameters(&g).is_err());
        g.set_observed(vpc, Observed::new("vpc-1")).unwrap();
        let params = t.resolve_parameters(&g).unwrap();
        assert_eq!(params, json!({"vpcId": "vpc-1", "dryRun": true}));
    }
}
