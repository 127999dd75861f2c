//! MW-001: Stack file schema, deployment record, plan and provenance types.
//!
//! Everything here derives Serialize/Deserialize. Config types also derive
//! JsonSchema so `mountwright schema` can emit the stack file schema.

use crate::resources::build::ComputeSize;
use crate::resources::storage::{ThroughputMode, DEFAULT_PROVISIONED_MIBPS};
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Top-level stack.yaml
// ============================================================================

/// Root configuration: the desired shape of the stack.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StackConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Stack name; also the state directory key
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Deployment region, threaded through every pass
    #[serde(default = "default_region")]
    pub region: String,

    /// Operator parameters
    #[serde(default)]
    pub params: StackParams,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub function: FunctionConfig,

    #[serde(default)]
    pub build: BuildConfig,

    /// Execution policy
    #[serde(default)]
    pub policy: Policy,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Operator-supplied parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct StackParams {
    /// Package expression handed to `pip3 install` (default: tensorflow)
    #[serde(default)]
    pub install_packages: Option<String>,
}

// ============================================================================
// Section configs
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NetworkConfig {
    #[serde(default = "default_max_azs")]
    pub max_azs: u8,
    #[serde(default = "default_nat_gateways")]
    pub nat_gateways: u8,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_azs: default_max_azs(),
            nat_gateways: default_nat_gateways(),
        }
    }
}

fn default_max_azs() -> u8 {
    2
}

fn default_nat_gateways() -> u8 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StorageConfig {
    #[serde(default)]
    pub throughput_mode: ThroughputMode,

    /// Provisioned throughput in MiB/s. Provisioned mode falls back to
    /// 1 GiB/s when unset.
    #[serde(default)]
    pub provisioned_mibps: Option<u32>,

    #[serde(default = "default_access_point_path")]
    pub access_point_path: String,

    #[serde(default = "default_shared_id")]
    pub uid: u32,

    #[serde(default = "default_shared_id")]
    pub gid: u32,

    /// Creation ACL permission bits
    #[serde(default = "default_permissions")]
    pub permissions: String,
}

impl StorageConfig {
    /// Throughput rate handed to the filesystem: the configured rate, or the
    /// default rate in provisioned mode.
    pub fn throughput_mibps(&self) -> Option<u32> {
        match self.throughput_mode {
            ThroughputMode::Provisioned => Some(
                self.provisioned_mibps
                    .unwrap_or(DEFAULT_PROVISIONED_MIBPS),
            ),
            ThroughputMode::Bursting => self.provisioned_mibps,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            throughput_mode: ThroughputMode::default(),
            provisioned_mibps: None,
            access_point_path: default_access_point_path(),
            uid: default_shared_id(),
            gid: default_shared_id(),
            permissions: default_permissions(),
        }
    }
}

fn default_access_point_path() -> String {
    "/lambda".to_string()
}

fn default_shared_id() -> u32 {
    1000
}

fn default_permissions() -> String {
    "777".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FunctionConfig {
    #[serde(default = "default_runtime")]
    pub runtime: String,
    #[serde(default = "default_handler")]
    pub handler: String,
    /// Code bundle reference (directory or archive path)
    #[serde(default = "default_code")]
    pub code: String,
    #[serde(default = "default_function_timeout")]
    pub timeout_seconds: u32,
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u32,
    #[serde(default = "default_reserved_concurrency")]
    pub reserved_concurrency: u32,
    #[serde(default = "default_mount_path")]
    pub mount_path: String,
}

impl Default for FunctionConfig {
    fn default() -> Self {
        Self {
            runtime: default_runtime(),
            handler: default_handler(),
            code: default_code(),
            timeout_seconds: default_function_timeout(),
            memory_mb: default_memory_mb(),
            reserved_concurrency: default_reserved_concurrency(),
            mount_path: default_mount_path(),
        }
    }
}

fn default_runtime() -> String {
    "python3.8".to_string()
}

fn default_handler() -> String {
    "main.lambda_handler".to_string()
}

fn default_code() -> String {
    "lambda".to_string()
}

fn default_function_timeout() -> u32 {
    120
}

fn default_memory_mb() -> u32 {
    3008
}

fn default_reserved_concurrency() -> u32 {
    10
}

fn default_mount_path() -> String {
    "/mnt/python".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BuildConfig {
    /// Build project name (templatable)
    #[serde(default = "default_build_name")]
    pub name: String,
    #[serde(default = "default_build_description")]
    pub description: String,
    #[serde(default = "default_build_image")]
    pub image: String,
    #[serde(default)]
    pub compute: ComputeSize,
    #[serde(default = "default_true")]
    pub privileged: bool,
    #[serde(default = "default_build_timeout")]
    pub timeout_minutes: u32,
    #[serde(default = "default_mount_path")]
    pub mount_path: String,
    /// Mount identifier; exposed to commands as `$CODEBUILD_<IDENTIFIER>`
    #[serde(default = "default_identifier")]
    pub identifier: String,
    #[serde(default = "default_mount_options")]
    pub mount_options: String,
    /// Model archive downloaded onto the shared filesystem
    #[serde(default = "default_model_url")]
    pub model_url: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            name: default_build_name(),
            description: default_build_description(),
            image: default_build_image(),
            compute: ComputeSize::default(),
            privileged: true,
            timeout_minutes: default_build_timeout(),
            mount_path: default_mount_path(),
            identifier: default_identifier(),
            mount_options: default_mount_options(),
            model_url: default_model_url(),
        }
    }
}

fn default_build_name() -> String {
    "{{stack}}-populate".to_string()
}

fn default_build_description() -> String {
    "Installs Python libraries to EFS.".to_string()
}

fn default_build_image() -> String {
    "lambci/lambda:build-python3.8".to_string()
}

fn default_build_timeout() -> u32 {
    30
}

fn default_identifier() -> String {
    "efs1".to_string()
}

fn default_mount_options() -> String {
    "nfsvers=4.1,rsize=1048576,wsize=1048576,hard,timeo=600,retrans=2".to_string()
}

fn default_model_url() -> String {
    "https://storage.googleapis.com/tfhub-modules/google/openimages_v4/ssd/mobilenet_v2/1.tar.gz"
        .to_string()
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Policy
// ============================================================================

/// Execution policy.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Policy {
    /// What a failed populate build means for the pass
    #[serde(default)]
    pub build_failure: BuildFailurePolicy,

    /// Status checks before giving up on a build (fatal policy only)
    #[serde(default = "default_poll_attempts")]
    pub build_poll_attempts: u32,

    /// Seconds between build status checks (fatal policy only)
    #[serde(default = "default_poll_interval")]
    pub build_poll_interval_secs: u64,

    /// Append provenance events on every apply
    #[serde(default = "default_true")]
    pub tripwire: bool,

}

impl Default for Policy {
    fn default() -> Self {
        Self {
            build_failure: BuildFailurePolicy::default(),
            build_poll_attempts: default_poll_attempts(),
            build_poll_interval_secs: default_poll_interval(),
            tripwire: true,
        }
    }
}

fn default_poll_attempts() -> u32 {
    60
}

fn default_poll_interval() -> u64 {
    30
}

/// How a failed populate build is treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BuildFailurePolicy {
    /// Start the build and move on; failures are detected out-of-band.
    #[default]
    Report,
    /// Wait for the build after the pass and fail the pass if it fails.
    Fatal,
}

// ============================================================================
// Deploy context
// ============================================================================

/// Stack-wide values every spec may need (region, stack name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployContext {
    pub stack: String,
    pub region: String,
}

impl DeployContext {
    pub fn new(stack: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            region: region.into(),
        }
    }

    pub fn from_config(config: &StackConfig) -> Self {
        Self::new(config.name.clone(), config.region.clone())
    }
}

// ============================================================================
// Resource kinds and observed handles
// ============================================================================

/// Resource kind enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Network,
    SecurityGroup,
    FileSystem,
    AccessPoint,
    Function,
    BuildJob,
    Trigger,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::SecurityGroup => write!(f, "security_group"),
            Self::FileSystem => write!(f, "file_system"),
            Self::AccessPoint => write!(f, "access_point"),
            Self::Function => write!(f, "function"),
            Self::BuildJob => write!(f, "build_job"),
            Self::Trigger => write!(f, "trigger"),
        }
    }
}

/// What the provider reported back for a realized node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observed {
    /// Provider identity of the resource
    pub physical_id: String,

    /// Named handle attributes (name, arn, subnet ids, lifecycle state)
    #[serde(default)]
    pub attributes: IndexMap<String, String>,
}

impl Observed {
    pub fn new(physical_id: impl Into<String>) -> Self {
        Self {
            physical_id: physical_id.into(),
            attributes: IndexMap::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }

    /// Look up an attribute; `id` always resolves to the physical id.
    pub fn attr(&self, key: &str) -> Option<&str> {
        if key == "id" {
            return Some(&self.physical_id);
        }
        self.attributes.get(key).map(String::as_str)
    }
}

// ============================================================================
// Deployment record (lock file)
// ============================================================================

/// Per-stack deployment record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateLock {
    /// Schema version
    pub schema: String,

    /// Stack name
    pub stack: String,

    /// Region the stack was deployed to
    pub region: String,

    /// When the lock was generated
    pub generated_at: String,

    /// Generator version
    pub generator: String,

    /// BLAKE3 version
    pub blake3_version: String,

    /// Per-resource state, in realization order
    pub resources: IndexMap<String, ResourceLock>,

    /// Stack outputs from the last successful pass
    #[serde(default)]
    pub outputs: IndexMap<String, String>,
}

/// Per-resource lock entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLock {
    pub kind: ResourceKind,

    pub status: ResourceStatus,

    #[serde(default)]
    pub applied_at: Option<String>,

    #[serde(default)]
    pub duration_seconds: Option<f64>,

    /// BLAKE3 hash of the desired spec that was realized
    pub hash: String,

    /// Handle returned by the provider
    #[serde(default)]
    pub observed: Option<Observed>,
}

/// Resource realization status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Converged,
    Failed,
    Unknown,
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Converged => write!(f, "CONVERGED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ============================================================================
// Plan
// ============================================================================

/// Action to take on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAction {
    Create,
    Update,
    NoOp,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::NoOp => write!(f, "NO-OP"),
        }
    }
}

/// A single planned change.
#[derive(Debug, Clone)]
pub struct PlannedChange {
    pub resource_id: String,
    pub kind: ResourceKind,
    pub action: PlanAction,
    /// Desired-state hash the change converges to
    pub hash: String,
    pub description: String,
}

/// Full execution plan.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Stack name
    pub name: String,

    /// Planned changes in execution order
    pub changes: Vec<PlannedChange>,

    /// Topological execution order (logical ids)
    pub execution_order: Vec<String>,

    pub to_create: u32,
    pub to_update: u32,
    pub unchanged: u32,
}

// ============================================================================
// Provenance events
// ============================================================================

/// Provenance event for the JSONL event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvenanceEvent {
    ApplyStarted {
        stack: String,
        run_id: String,
        version: String,
    },
    ResourceStarted {
        stack: String,
        resource: String,
        action: String,
    },
    ResourceConverged {
        stack: String,
        resource: String,
        physical_id: String,
        duration_seconds: f64,
        hash: String,
    },
    ResourceFailed {
        stack: String,
        resource: String,
        error: String,
    },
    TriggerFired {
        stack: String,
        resource: String,
        action: String,
        physical_id: String,
    },
    BuildFinished {
        stack: String,
        build_id: String,
        status: String,
    },
    ApplyCompleted {
        stack: String,
        run_id: String,
        resources_converged: u32,
        resources_unchanged: u32,
        total_seconds: f64,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: ProvenanceEvent,
}

// ============================================================================
// Apply result
// ============================================================================

/// Result of one provisioning pass.
#[derive(Debug, Clone)]
pub struct ApplyResult {
    pub stack: String,
    pub resources_converged: u32,
    pub resources_unchanged: u32,
    /// Named outputs (e.g. `LambdaFunctionName`)
    pub outputs: IndexMap<String, String>,
    /// Builds started by triggers during this pass
    pub builds_started: Vec<String>,
    pub total_duration: std::time::Duration,
}
