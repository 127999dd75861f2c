//! MW-010: Network and security-group topology.
//!
//! Builds the network spec and the three security groups (compute-side,
//! function-side, storage-side). Allow rules are one-directional: a rule
//! lives in the source group's rule set and says nothing about the reverse.

use crate::core::error::{StackError, StackResult};
use crate::core::graph::{NodeId, Spec, StackGraph};
use crate::core::types::NetworkConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

/// NFS port used by the shared filesystem.
pub const NFS_PORT: u16 = 2049;

/// Desired network: availability zones and NAT gateways.
/// Public and private subnets are created by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub max_azs: u8,
    pub nat_gateways: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubnetType {
    Public,
    Private,
}

impl fmt::Display for SubnetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Private => write!(f, "private"),
        }
    }
}

/// Which subnets of the network a resource is placed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetSelection {
    pub subnet_type: SubnetType,
}

impl SubnetSelection {
    pub fn private() -> Self {
        Self {
            subnet_type: SubnetType::Private,
        }
    }

    /// Observed attribute holding the comma-joined subnet ids.
    pub fn attribute(&self) -> String {
        format!("{}_subnets", self.subnet_type)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

/// Outbound permission from the owning group to `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowRule {
    pub target: NodeId,
    pub protocol: Protocol,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupSpec {
    pub name: String,
    pub network: NodeId,
    pub rules: Vec<AllowRule>,
}

impl SecurityGroupSpec {
    /// True if this group may reach `target` on `protocol`/`port`.
    pub fn allows(&self, target: NodeId, protocol: Protocol, port: u16) -> bool {
        self.rules
            .iter()
            .any(|r| r.target == target && r.protocol == protocol && r.port == port)
    }
}

pub fn define_network(max_azs: u8, nat_gateways: u8) -> StackResult<NetworkSpec> {
    if max_azs == 0 {
        return Err(StackError::config("network needs at least one availability zone"));
    }
    if nat_gateways > max_azs {
        return Err(StackError::config(format!(
            "{} NAT gateways requested for {} availability zones",
            nat_gateways, max_azs
        )));
    }
    Ok(NetworkSpec {
        max_azs,
        nat_gateways,
    })
}

pub fn define_security_group(network: NodeId, name: impl Into<String>) -> SecurityGroupSpec {
    SecurityGroupSpec {
        name: name.into(),
        network,
        rules: Vec::new(),
    }
}

/// Append an allow rule to `from`'s rule set. The reverse flow is untouched.
pub fn allow(
    graph: &mut StackGraph,
    from: NodeId,
    to: NodeId,
    protocol: Protocol,
    port: u16,
) -> StackResult<()> {
    if from == to {
        return Err(StackError::config(format!(
            "security group '{}' cannot allow itself",
            graph.logical_id(from)
        )));
    }
    if !matches!(graph.node(to)?.spec, Spec::SecurityGroup(_)) {
        return Err(StackError::config(format!(
            "allow target '{}' is not a security group",
            graph.logical_id(to)
        )));
    }
    let from_id = graph.logical_id(from).to_string();
    let node = graph
        .get_mut(from)
        .ok_or_else(|| StackError::config(format!("reference to unknown resource {}", from)))?;
    let Spec::SecurityGroup(ref mut sg) = node.spec else {
        return Err(StackError::config(format!(
            "allow source '{}' is not a security group",
            from_id
        )));
    };
    let rule = AllowRule {
        target: to,
        protocol,
        port,
    };
    if !sg.rules.contains(&rule) {
        sg.rules.push(rule);
    }
    Ok(())
}

/// Node ids of the network and its three groups.
#[derive(Debug, Clone, Copy)]
pub struct Topology {
    pub network: NodeId,
    pub compute_sg: NodeId,
    pub function_sg: NodeId,
    pub storage_sg: NodeId,
}

/// Add the network and security groups to the graph.
/// Compute-side and function-side groups may reach the storage group on NFS;
/// nothing else is opened.
pub fn build_topology(
    graph: &mut StackGraph,
    prefix: &str,
    config: &NetworkConfig,
) -> StackResult<Topology> {
    let network = graph.add(
        "vpc",
        Spec::Network(define_network(config.max_azs, config.nat_gateways)?),
    )?;
    let compute_sg = graph.add(
        "compute-sg",
        Spec::SecurityGroup(define_security_group(network, format!("{}-compute-sg", prefix))),
    )?;
    let function_sg = graph.add(
        "function-sg",
        Spec::SecurityGroup(define_security_group(network, format!("{}-function-sg", prefix))),
    )?;
    let storage_sg = graph.add(
        "storage-sg",
        Spec::SecurityGroup(define_security_group(network, format!("{}-storage-sg", prefix))),
    )?;

    allow(graph, compute_sg, storage_sg, Protocol::Tcp, NFS_PORT)?;
    allow(graph, function_sg, storage_sg, Protocol::Tcp, NFS_PORT)?;

    Ok(Topology {
        network,
        compute_sg,
        function_sg,
        storage_sg,
    })
}
