//! MW-005: Plan generation. Diff the desired graph against the deployment record.

use super::error::StackResult;
use super::graph::{Node, NodeId, Spec, StackGraph};
use super::types::*;
use crate::resources::trigger::{TriggerDecision, TriggerState};
use crate::tripwire::hasher;

/// Generate an execution plan by comparing the graph to the lock.
pub fn plan(
    name: &str,
    graph: &StackGraph,
    execution_order: &[NodeId],
    lock: Option<&StateLock>,
) -> StackResult<ExecutionPlan> {
    let mut changes = Vec::with_capacity(execution_order.len());
    let mut to_create = 0u32;
    let mut to_update = 0u32;
    let mut unchanged = 0u32;

    for &id in execution_order {
        let node = graph.node(id)?;
        let hash = hash_desired_state(node)?;
        let entry = lock.and_then(|l| l.resources.get(&node.logical_id));
        let action = determine_action(node, &hash, entry);

        match action {
            PlanAction::Create => to_create += 1,
            PlanAction::Update => to_update += 1,
            PlanAction::NoOp => unchanged += 1,
        }

        changes.push(PlannedChange {
            resource_id: node.logical_id.clone(),
            kind: node.spec.kind(),
            action,
            description: describe_action(node, action, entry),
            hash,
        });
    }

    Ok(ExecutionPlan {
        name: name.to_string(),
        changes,
        execution_order: execution_order
            .iter()
            .map(|&id| graph.logical_id(id).to_string())
            .collect(),
        to_create,
        to_update,
        unchanged,
    })
}

/// Determine what action to take for one node.
fn determine_action(node: &Node, desired_hash: &str, entry: Option<&ResourceLock>) -> PlanAction {
    if let Spec::Trigger(_) = node.spec {
        return match (TriggerState::from_lock(entry), entry) {
            (TriggerState::Untriggered, None) => PlanAction::Create,
            (state, _) => match state.decide(desired_hash) {
                TriggerDecision::Keep { .. } => PlanAction::NoOp,
                // Replacement: a changed definition fires again
                TriggerDecision::Fire => PlanAction::Update,
            },
        };
    }

    match entry {
        Some(rl) if rl.status == ResourceStatus::Converged => {
            if rl.hash == desired_hash && rl.observed.is_some() {
                PlanAction::NoOp
            } else {
                PlanAction::Update
            }
        }
        // Previously failed or unknown: re-apply
        Some(_) => PlanAction::Update,
        None => PlanAction::Create,
    }
}

/// Hash of the desired state. Triggers hash their definition only.
pub fn hash_desired_state(node: &Node) -> StackResult<String> {
    match node.spec {
        Spec::Trigger(ref t) => t.definition_hash(),
        ref spec => hasher::hash_serialized(spec),
    }
}

/// Generate a human-readable description of a planned action.
fn describe_action(node: &Node, action: PlanAction, entry: Option<&ResourceLock>) -> String {
    let id = &node.logical_id;
    match (action, &node.spec) {
        (PlanAction::Create, Spec::Network(n)) => format!(
            "{}: create network ({} AZs, {} NAT)",
            id, n.max_azs, n.nat_gateways
        ),
        (PlanAction::Create, Spec::SecurityGroup(sg)) => {
            format!("{}: create security group {} ({} rules)", id, sg.name, sg.rules.len())
        }
        (PlanAction::Create, Spec::FileSystem(fs)) => match fs.provisioned_mibps {
            Some(rate) => format!("{}: create filesystem ({} MiB/s provisioned)", id, rate),
            None => format!("{}: create filesystem (bursting)", id),
        },
        (PlanAction::Create, Spec::AccessPoint(ap)) => format!(
            "{}: create access point {} ({}:{} {})",
            id, ap.path, ap.posix_user.uid, ap.posix_user.gid, ap.creation_acl.permissions
        ),
        (PlanAction::Create, Spec::Function(f)) => {
            format!("{}: create function {} ({} MB)", id, f.runtime, f.memory_mb)
        }
        (PlanAction::Create, Spec::BuildJob(job)) => format!(
            "{}: create build job {} ({} mounts)",
            id,
            job.name,
            job.mounts.len()
        ),
        (PlanAction::Create, Spec::Trigger(t)) => {
            format!("{}: invoke {}", id, t.qualified_action())
        }
        (PlanAction::Update, Spec::Trigger(t)) => {
            format!("{}: definition changed, invoke {} again", id, t.qualified_action())
        }
        (PlanAction::Update, _) => format!("{}: update (state changed)", id),
        (PlanAction::NoOp, Spec::Trigger(_)) => {
            let fired = entry
                .and_then(|rl| rl.observed.as_ref())
                .map(|o| o.physical_id.as_str())
                .unwrap_or("?");
            format!("{}: already fired ({})", id, fired)
        }
        (PlanAction::NoOp, _) => format!("{}: no changes", id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{resolver, stack, state};

    fn make_graph() -> (StackGraph, Vec<NodeId>) {
        let config: StackConfig = serde_yaml_ng::from_str("version: \"1.0\"\nname: ml\n").unwrap();
        let ctx = DeployContext::from_config(&config);
        let graph = stack::assemble(&config, &ctx).unwrap();
        let order = resolver::build_execution_order(&graph).unwrap();
        (graph, order)
    }

    fn converged_lock(graph: &StackGraph, order: &[NodeId]) -> StateLock {
        let mut lock = state::new_lock("ml", "us-east-1");
        for &id in order {
            let node = graph.node(id).unwrap();
            lock.resources.insert(
                node.logical_id.clone(),
                ResourceLock {
                    kind: node.spec.kind(),
                    status: ResourceStatus::Converged,
                    applied_at: None,
                    duration_seconds: None,
                    hash: hash_desired_state(node).unwrap(),
                    observed: Some(Observed::new(format!("{}-1", node.logical_id))),
                },
            );
        }
        lock
    }

    fn action_of(plan: &ExecutionPlan, id: &str) -> PlanAction {
        plan.changes
            .iter()
            .find(|c| c.resource_id == id)
            .unwrap()
            .action
    }

    #[test]
    fn test_mw005_plan_all_create() {
        let (graph, order) = make_graph();
        let plan = plan("ml", &graph, &order, None).unwrap();
        assert_eq!(plan.to_create as usize, graph.len());
        assert_eq!(plan.to_update, 0);
        assert_eq!(plan.unchanged, 0);
        assert!(plan.changes.iter().all(|c| c.action == PlanAction::Create));
        assert_eq!(plan.execution_order.len(), graph.len());
        assert_eq!(plan.execution_order[0], "vpc");
    }

    #[test]
    fn test_mw005_plan_all_unchanged() {
        let (graph, order) = make_graph();
        let lock = converged_lock(&graph, &order);
        let plan = plan("ml", &graph, &order, Some(&lock)).unwrap();
        assert_eq!(plan.unchanged as usize, graph.len());
        assert_eq!(plan.to_create, 0);
        let trigger = plan
            .changes
            .iter()
            .find(|c| c.kind == ResourceKind::Trigger)
            .unwrap();
        assert!(trigger.description.contains("already fired"));
    }

    #[test]
    fn test_mw005_plan_update_on_hash_mismatch() {
        let (graph, order) = make_graph();
        let mut lock = converged_lock(&graph, &order);
        lock.resources["file-system"].hash = "blake3:stale".to_string();
        let plan = plan("ml", &graph, &order, Some(&lock)).unwrap();
        assert_eq!(plan.to_update, 1);
        assert_eq!(action_of(&plan, "file-system"), PlanAction::Update);
    }

    #[test]
    fn test_mw005_failed_resource_gets_retried() {
        let (graph, order) = make_graph();
        let mut lock = converged_lock(&graph, &order);
        lock.resources["access-point"].status = ResourceStatus::Failed;
        let plan = plan("ml", &graph, &order, Some(&lock)).unwrap();
        assert_eq!(action_of(&plan, "access-point"), PlanAction::Update);
    }

    #[test]
    fn test_mw005_changed_trigger_is_replaced() {
        let (graph, order) = make_graph();
        let mut lock = converged_lock(&graph, &order);
        lock.resources["populate-trigger"].hash = "blake3:old-definition".to_string();
        let plan = plan("ml", &graph, &order, Some(&lock)).unwrap();
        assert_eq!(action_of(&plan, "populate-trigger"), PlanAction::Update);
        let change = plan
            .changes
            .iter()
            .find(|c| c.resource_id == "populate-trigger")
            .unwrap();
        assert!(change.description.contains("invoke CodeBuild.startBuild again"));
    }

    #[test]
    fn test_mw005_failed_trigger_fires_again() {
        let (graph, order) = make_graph();
        let mut lock = converged_lock(&graph, &order);
        lock.resources["populate-trigger"].status = ResourceStatus::Failed;
        let plan = plan("ml", &graph, &order, Some(&lock)).unwrap();
        assert_eq!(action_of(&plan, "populate-trigger"), PlanAction::Update);
    }

    #[test]
    fn test_mw005_hash_deterministic() {
        let (graph, order) = make_graph();
        let node = graph.node(order[0]).unwrap();
        let h1 = hash_desired_state(node).unwrap();
        let h2 = hash_desired_state(node).unwrap();
        assert_eq!(h1, h2);
        assert!(h1.starts_with("blake3:"));
    }

    #[test]
    fn test_mw005_describe_create() {
        let (graph, order) = make_graph();
        let plan = plan("ml", &graph, &order, None).unwrap();
        let fs = plan
            .changes
            .iter()
            .find(|c| c.resource_id == "file-system")
            .unwrap();
        assert!(fs.description.contains("1024 MiB/s"));
        let job = plan
            .changes
            .iter()
            .find(|c| c.resource_id == "populate-job")
            .unwrap();
        assert!(job.description.contains("ml-populate"));
        assert!(job.description.contains("1 mounts"));
    }
}
