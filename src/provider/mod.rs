//! MW-030: Provider contract. The opaque services that realize specs.
//!
//! Providers take a spec (with references already resolved to handles) and
//! return a handle. Every create call carries the node's logical id so a
//! provider can recognize a resource it already holds.

pub mod simulated;

use crate::resources::build::{ComputeSize, LogConfig, ResolvedMount};
use crate::resources::network::{NetworkSpec, Protocol, SubnetType};
use crate::resources::storage::{AccessPointSpec, FileSystemSpec};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors a provider may report.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Invalid property value, quota exceeded, unknown handle.
    #[error("{0}")]
    Rejected(String),

    /// The service could not be reached.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: String,
    pub subnet_type: SubnetType,
    pub availability_zone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkHandle {
    pub id: String,
    pub subnets: Vec<Subnet>,
}

impl NetworkHandle {
    pub fn subnet_ids(&self, subnet_type: SubnetType) -> Vec<String> {
        self.subnets
            .iter()
            .filter(|s| s.subnet_type == subnet_type)
            .map(|s| s.id.clone())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupHandle {
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileSystemState {
    Creating,
    Available,
}

impl fmt::Display for FileSystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Creating => write!(f, "creating"),
            Self::Available => write!(f, "available"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSystemHandle {
    pub id: String,
    pub state: FileSystemState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPointHandle {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionHandle {
    pub name: String,
    pub arn: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildJobHandle {
    pub name: String,
}

/// Function creation request with every reference resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionRequest {
    pub runtime: String,
    pub handler: String,
    pub code: String,
    pub subnet_ids: Vec<String>,
    pub security_group_id: String,
    pub timeout_seconds: u32,
    pub memory_mb: u32,
    pub reserved_concurrency: u32,
    /// (access point id, local mount path)
    pub mount: Option<(String, String)>,
}

/// Build job creation request, before the mount/log patches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildJobRequest {
    pub name: String,
    pub description: String,
    pub subnet_ids: Vec<String>,
    pub security_group_ids: Vec<String>,
    pub buildspec: serde_json::Value,
    pub image: String,
    pub compute: ComputeSize,
    pub privileged: bool,
    pub timeout_minutes: u32,
}

/// Status of a started build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildStatus {
    InProgress,
    Succeeded,
    Failed { reason: String },
}

impl BuildStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::Succeeded => write!(f, "SUCCEEDED"),
            Self::Failed { .. } => write!(f, "FAILED"),
        }
    }
}

/// Interface the orchestration core needs from the underlying services.
pub trait Provider {
    fn create_network(&mut self, logical_id: &str, spec: &NetworkSpec)
        -> ProviderResult<NetworkHandle>;

    fn create_security_group(
        &mut self,
        logical_id: &str,
        network_id: &str,
        name: &str,
    ) -> ProviderResult<SecurityGroupHandle>;

    /// Permit traffic from `sg_id` to `target_sg_id`. One direction only.
    fn allow(
        &mut self,
        sg_id: &str,
        target_sg_id: &str,
        protocol: Protocol,
        port: u16,
    ) -> ProviderResult<()>;

    fn create_filesystem(
        &mut self,
        logical_id: &str,
        network_id: &str,
        sg_id: &str,
        spec: &FileSystemSpec,
    ) -> ProviderResult<FileSystemHandle>;

    fn create_access_point(
        &mut self,
        logical_id: &str,
        filesystem_id: &str,
        spec: &AccessPointSpec,
    ) -> ProviderResult<AccessPointHandle>;

    fn create_function(
        &mut self,
        logical_id: &str,
        request: &FunctionRequest,
    ) -> ProviderResult<FunctionHandle>;

    fn attach_policy(&mut self, function: &FunctionHandle, policy: &str) -> ProviderResult<()>;

    fn create_build_job(
        &mut self,
        logical_id: &str,
        request: &BuildJobRequest,
    ) -> ProviderResult<BuildJobHandle>;

    fn patch_filesystem_mounts(
        &mut self,
        job: &BuildJobHandle,
        mounts: &[ResolvedMount],
    ) -> ProviderResult<()>;

    fn patch_logging(&mut self, job: &BuildJobHandle, config: &LogConfig) -> ProviderResult<()>;

    /// Invoke an arbitrary service action; the response is free-form.
    fn invoke_action(
        &mut self,
        service: &str,
        action: &str,
        params: &serde_json::Value,
    ) -> ProviderResult<serde_json::Value>;

    fn build_status(&mut self, build_id: &str) -> ProviderResult<BuildStatus>;
}
