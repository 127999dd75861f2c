//! MW-012: Inference function spec.
//!
//! Memory increments and the concurrency quota are the provider's to check;
//! violations come back as provider rejections.

use super::network::SubnetSelection;
use crate::core::error::{StackError, StackResult};
use crate::core::graph::NodeId;
use serde::{Deserialize, Serialize};

/// Managed policy letting the function open connections to the filesystem.
pub const FS_CLIENT_POLICY: &str = "AmazonElasticFileSystemClientFullAccess";

/// Mount of an access point inside the function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionMount {
    pub access_point: NodeId,
    pub local_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub runtime: String,
    pub handler: String,
    pub code: String,
    pub network: NodeId,
    pub subnets: SubnetSelection,
    pub security_group: NodeId,
    pub timeout_seconds: u32,
    pub memory_mb: u32,
    pub reserved_concurrency: u32,
    pub mount: Option<FunctionMount>,
    /// Attached to the function's execution identity after creation
    pub managed_policies: Vec<String>,
}

/// Inputs to `define_function`.
#[derive(Debug, Clone)]
pub struct FunctionProps {
    pub runtime: String,
    pub handler: String,
    pub code: String,
    pub network: NodeId,
    pub subnets: SubnetSelection,
    pub security_group: NodeId,
    pub timeout_seconds: u32,
    pub memory_mb: u32,
    pub reserved_concurrency: u32,
    pub mount: Option<FunctionMount>,
}

pub fn define_function(props: FunctionProps) -> StackResult<FunctionSpec> {
    if props.handler.is_empty() || props.runtime.is_empty() {
        return Err(StackError::config("function needs a runtime and a handler"));
    }
    if props.timeout_seconds == 0 {
        return Err(StackError::config("function timeout must be positive"));
    }

    let mut managed_policies = Vec::new();
    if let Some(ref mount) = props.mount {
        if !mount.local_path.starts_with("/mnt/") {
            return Err(StackError::config(format!(
                "function mount path '{}' must be under /mnt/",
                mount.local_path
            )));
        }
        managed_policies.push(FS_CLIENT_POLICY.to_string());
    }

    Ok(FunctionSpec {
        runtime: props.runtime,
        handler: props.handler,
        code: props.code,
        network: props.network,
        subnets: props.subnets,
        security_group: props.security_group,
        timeout_seconds: props.timeout_seconds,
        memory_mb: props.memory_mb,
        reserved_concurrency: props.reserved_concurrency,
        mount: props.mount,
        managed_policies,
    })
}
