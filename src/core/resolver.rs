//! MW-004: Template resolution and creation order.
//!
//! Resolves `{{stack}}`, `{{region}}` and `{{params.key}}` templates.
//! Computes a topological creation order over inferred and explicit edges
//! using Kahn's algorithm; ties go to the lowest node id, so the order
//! follows insertion wherever the graph leaves it open.

use super::error::{StackError, StackResult};
use super::graph::{NodeId, StackGraph};
use super::types::{DeployContext, StackParams};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Resolve all template variables in a string.
pub fn resolve_template(
    template: &str,
    ctx: &DeployContext,
    params: &StackParams,
) -> StackResult<String> {
    let mut result = template.to_string();
    let mut start = 0;

    while let Some(open) = result[start..].find("{{") {
        let open = start + open;
        let close = result[open..].find("}}").ok_or_else(|| {
            StackError::config(format!(
                "unclosed template at position {} in '{}'",
                open, template
            ))
        })?;
        let close = open + close + 2;
        let key = result[open + 2..close - 2].trim();

        let value = match key {
            "stack" => ctx.stack.clone(),
            "region" => ctx.region.clone(),
            "params.install_packages" => params.install_packages.clone().ok_or_else(|| {
                StackError::config("param 'install_packages' is referenced but not set")
            })?,
            other if other.starts_with("params.") => {
                return Err(StackError::config(format!(
                    "unknown param: {}",
                    &other["params.".len()..]
                )));
            }
            other => {
                return Err(StackError::config(format!(
                    "unknown template variable: {}",
                    other
                )));
            }
        };

        result.replace_range(open..close, &value);
        start = open + value.len();
    }

    Ok(result)
}

/// Build a topological creation order from the graph's edges.
/// A dangling reference or a cycle is a configuration error.
pub fn build_execution_order(graph: &StackGraph) -> StackResult<Vec<NodeId>> {
    let n = graph.len();
    let mut in_degree = vec![0usize; n];
    let mut adjacency: Vec<Vec<NodeId>> = vec![Vec::new(); n];

    for edge in graph.edges() {
        if edge.from.index() >= n {
            return Err(StackError::config(format!(
                "resource '{}' depends on unknown resource {}",
                graph.logical_id(edge.to),
                edge.from
            )));
        }
        if edge.to.index() >= n {
            return Err(StackError::config(format!(
                "unknown resource {} depends on '{}'",
                edge.to,
                graph.logical_id(edge.from)
            )));
        }
        adjacency[edge.from.index()].push(edge.to);
        in_degree[edge.to.index()] += 1;
    }

    let mut ready: BinaryHeap<Reverse<NodeId>> = graph
        .ids()
        .filter(|id| in_degree[id.index()] == 0)
        .map(Reverse)
        .collect();

    let mut order = Vec::with_capacity(n);
    while let Some(Reverse(current)) = ready.pop() {
        order.push(current);
        for &next in &adjacency[current.index()] {
            let degree = &mut in_degree[next.index()];
            *degree -= 1;
            if *degree == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if order.len() != n {
        let members: Vec<&str> = graph
            .ids()
            .filter(|id| in_degree[id.index()] > 0)
            .map(|id| graph.logical_id(id))
            .collect();
        return Err(StackError::config(format!(
            "dependency cycle detected involving: {}",
            members.join(", ")
        )));
    }

    Ok(order)
}

/// Logical ids for an order, for display and the deployment plan.
pub fn order_ids(graph: &StackGraph, order: &[NodeId]) -> Vec<String> {
    order
        .iter()
        .map(|&id| graph.logical_id(id).to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::Spec;
    use crate::resources::network::{define_network, define_security_group};
    use proptest::prelude::*;

    fn ctx() -> DeployContext {
        DeployContext::new("ml", "eu-west-1")
    }

    fn network() -> Spec {
        Spec::Network(define_network(1, 0).unwrap())
    }

    fn position(order: &[NodeId], id: NodeId) -> usize {
        order.iter().position(|&n| n == id).unwrap()
    }

    #[test]
    fn test_mw004_resolve_context() {
        let params = StackParams::default();
        assert_eq!(
            resolve_template("{{stack}}-populate", &ctx(), &params).unwrap(),
            "ml-populate"
        );
        assert_eq!(
            resolve_template("{{ region }}/{{stack}}", &ctx(), &params).unwrap(),
            "eu-west-1/ml"
        );
        assert_eq!(
            resolve_template("no templates", &ctx(), &params).unwrap(),
            "no templates"
        );
    }

    #[test]
    fn test_mw004_resolve_params() {
        let params = StackParams {
            install_packages: Some("torch".to_string()),
        };
        assert_eq!(
            resolve_template("pip3 install {{params.install_packages}}", &ctx(), &params).unwrap(),
            "pip3 install torch"
        );
        let err = resolve_template("{{params.install_packages}}", &ctx(), &StackParams::default())
            .unwrap_err();
        assert!(err.to_string().contains("not set"));
    }

    #[test]
    fn test_mw004_resolve_errors() {
        let params = StackParams::default();
        assert!(resolve_template("{{params.missing}}", &ctx(), &params)
            .unwrap_err()
            .to_string()
            .contains("unknown param: missing"));
        assert!(resolve_template("{{account}}", &ctx(), &params)
            .unwrap_err()
            .to_string()
            .contains("unknown template variable"));
        assert!(resolve_template("{{stack", &ctx(), &params)
            .unwrap_err()
            .is_configuration());
    }

    #[test]
    fn test_mw004_order_follows_references() {
        let mut g = StackGraph::new();
        let vpc = g.add("vpc", network()).unwrap();
        let sg = g
            .add("sg", Spec::SecurityGroup(define_security_group(vpc, "sg")))
            .unwrap();
        let order = build_execution_order(&g).unwrap();
        assert_eq!(order, vec![vpc, sg]);
        assert_eq!(order_ids(&g, &order), vec!["vpc", "sg"]);
    }

    #[test]
    fn test_mw004_ties_follow_insertion() {
        let mut g = StackGraph::new();
        let a = g.add("zeta", network()).unwrap();
        let b = g.add("alpha", network()).unwrap();
        let c = g.add("mid", network()).unwrap();
        assert_eq!(build_execution_order(&g).unwrap(), vec![a, b, c]);
    }

    #[test]
    fn test_mw004_explicit_edge_overrides_insertion() {
        let mut g = StackGraph::new();
        let late = g.add("job", network()).unwrap();
        let early = g.add("access-point", network()).unwrap();
        assert_eq!(build_execution_order(&g).unwrap(), vec![late, early]);

        g.add_dependency(late, early).unwrap();
        assert_eq!(build_execution_order(&g).unwrap(), vec![early, late]);
    }

    #[test]
    fn test_mw004_cycle() {
        let mut g = StackGraph::new();
        let a = g.add("a", network()).unwrap();
        let b = g.add("b", network()).unwrap();
        let c = g.add("c", network()).unwrap();
        g.add_dependency(a, b).unwrap();
        g.add_dependency(b, a).unwrap();
        g.add_dependency(c, a).unwrap();
        let err = build_execution_order(&g).unwrap_err();
        assert!(err.is_configuration());
        let msg = err.to_string();
        assert!(msg.contains("cycle"));
        assert!(msg.contains("a, b"));
    }

    #[test]
    fn test_mw004_dangling_reference() {
        let mut g = StackGraph::new();
        g.add(
            "sg",
            Spec::SecurityGroup(define_security_group(NodeId(7), "sg")),
        )
        .unwrap();
        let err = build_execution_order(&g).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("unknown resource #7"));
    }

    #[test]
    fn test_mw004_empty_graph() {
        assert!(build_execution_order(&StackGraph::new()).unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn test_mw004_order_respects_every_edge(
            n in 2usize..12,
            pairs in proptest::collection::vec((0usize..64, 0usize..64), 0..40),
        ) {
            let mut g = StackGraph::new();
            let ids: Vec<NodeId> = (0..n)
                .map(|i| g.add(format!("n{}", i), network()).unwrap())
                .collect();
            // Dependencies always sit at a higher index than their dependents,
            // so the graph is acyclic and runs against insertion order.
            for (a, b) in pairs {
                let (lo, hi) = ((a % n).min(b % n), (a % n).max(b % n));
                if lo != hi {
                    g.add_dependency(ids[lo], ids[hi]).unwrap();
                }
            }

            let order = build_execution_order(&g).unwrap();
            prop_assert_eq!(order.len(), n);
            for edge in g.edges() {
                prop_assert!(position(&order, edge.from) < position(&order, edge.to));
            }
            prop_assert_eq!(order, build_execution_order(&g).unwrap());
        }
    }
}
