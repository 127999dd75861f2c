//! MW-031: Deterministic in-memory provider.
//!
//! Ids are derived from BLAKE3 digests of the logical id, so repeated passes
//! see the same handles. Every call is recorded for inspection. Rejections
//! and action failures can be injected per resource.

use super::*;
use crate::tripwire::hasher::short_digest;
use rustc_hash::FxHashMap;

/// Account concurrency that must stay unreserved.
const UNRESERVED_CONCURRENCY: u32 = 100;

/// One recorded provider call.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderCall {
    CreateNetwork { logical_id: String },
    CreateSecurityGroup { logical_id: String, name: String },
    Allow { sg_id: String, target_sg_id: String, protocol: Protocol, port: u16 },
    CreateFilesystem { logical_id: String },
    CreateAccessPoint { logical_id: String, filesystem_id: String },
    CreateFunction { logical_id: String },
    AttachPolicy { function: String, policy: String },
    CreateBuildJob { logical_id: String, name: String },
    PatchFilesystemMounts { job: String, mounts: Vec<ResolvedMount> },
    PatchLogging { job: String, enabled: bool },
    InvokeAction { service: String, action: String, params: serde_json::Value },
    BuildStatus { build_id: String },
}

#[derive(Debug)]
pub struct SimulatedProvider {
    region: String,
    account_concurrency: u32,
    filesystem_state: FileSystemState,
    build_outcome: BuildStatus,
    /// Status checks answered with `InProgress` before the outcome
    pending_checks: u32,
    calls: Vec<ProviderCall>,
    rejections: FxHashMap<String, String>,
    action_failures: FxHashMap<String, String>,
    jobs: FxHashMap<String, u32>,
    builds: FxHashMap<String, u32>,
}

impl SimulatedProvider {
    pub fn new(region: &str) -> Self {
        Self {
            region: region.to_string(),
            account_concurrency: 1000,
            filesystem_state: FileSystemState::Available,
            build_outcome: BuildStatus::Succeeded,
            pending_checks: 0,
            calls: Vec::new(),
            rejections: FxHashMap::default(),
            action_failures: FxHashMap::default(),
            jobs: FxHashMap::default(),
            builds: FxHashMap::default(),
        }
    }

    /// Refuse to create the resource with this logical id.
    pub fn reject(&mut self, logical_id: &str, reason: &str) -> &mut Self {
        self.rejections
            .insert(logical_id.to_string(), reason.to_string());
        self
    }

    /// Fail every call to `service.action`.
    pub fn fail_action(&mut self, service: &str, action: &str, reason: &str) -> &mut Self {
        self.action_failures
            .insert(format!("{}.{}", service, action), reason.to_string());
        self
    }

    pub fn set_account_concurrency(&mut self, limit: u32) -> &mut Self {
        self.account_concurrency = limit;
        self
    }

    /// Lifecycle state reported for new filesystems.
    pub fn set_filesystem_state(&mut self, state: FileSystemState) -> &mut Self {
        self.filesystem_state = state;
        self
    }

    /// Status reported for started builds after `pending_checks` checks.
    pub fn set_build_outcome(&mut self, outcome: BuildStatus, pending_checks: u32) -> &mut Self {
        self.build_outcome = outcome;
        self.pending_checks = pending_checks;
        self
    }

    pub fn calls(&self) -> &[ProviderCall] {
        &self.calls
    }

    /// Number of external action invocations so far.
    pub fn invocations(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, ProviderCall::InvokeAction { .. }))
            .count()
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    fn check_rejection(&self, logical_id: &str) -> ProviderResult<()> {
        match self.rejections.get(logical_id) {
            Some(reason) => Err(ProviderError::Rejected(reason.clone())),
            None => Ok(()),
        }
    }

    fn id(prefix: &str, seed: &str) -> String {
        format!("{}-{}", prefix, short_digest(seed, 17))
    }

    fn start_build(&mut self, params: &serde_json::Value) -> ProviderResult<serde_json::Value> {
        let project = params
            .get("projectName")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProviderError::Rejected("projectName is required".to_string()))?;
        let counter = self
            .jobs
            .get_mut(project)
            .ok_or_else(|| ProviderError::Rejected(format!("project '{}' not found", project)))?;
        *counter += 1;
        let number = *counter;
        let digest = short_digest(&format!("{}#{}", project, number), 32);
        let build_id = format!(
            "{}:{}-{}-{}-{}-{}",
            project,
            &digest[..8],
            &digest[8..12],
            &digest[12..16],
            &digest[16..20],
            &digest[20..32]
        );
        self.builds.insert(build_id.clone(), 0);
        Ok(serde_json::json!({
            "build": {
                "id": build_id,
                "buildNumber": number,
                "projectName": project,
                "buildStatus": "IN_PROGRESS",
            }
        }))
    }
}

impl Provider for SimulatedProvider {
    fn create_network(
        &mut self,
        logical_id: &str,
        spec: &NetworkSpec,
    ) -> ProviderResult<NetworkHandle> {
        self.calls.push(ProviderCall::CreateNetwork {
            logical_id: logical_id.to_string(),
        });
        self.check_rejection(logical_id)?;
        if spec.max_azs > 6 {
            return Err(ProviderError::Rejected(format!(
                "region {} has fewer than {} availability zones",
                self.region, spec.max_azs
            )));
        }

        let mut subnets = Vec::new();
        for az in 0..spec.max_azs {
            let zone = format!("{}{}", self.region, char::from(b'a' + az));
            for subnet_type in [SubnetType::Public, SubnetType::Private] {
                subnets.push(Subnet {
                    id: Self::id("subnet", &format!("{}/{}/{}", logical_id, zone, subnet_type)),
                    subnet_type,
                    availability_zone: zone.clone(),
                });
            }
        }
        Ok(NetworkHandle {
            id: Self::id("vpc", logical_id),
            subnets,
        })
    }

    fn create_security_group(
        &mut self,
        logical_id: &str,
        network_id: &str,
        name: &str,
    ) -> ProviderResult<SecurityGroupHandle> {
        self.calls.push(ProviderCall::CreateSecurityGroup {
            logical_id: logical_id.to_string(),
            name: name.to_string(),
        });
        self.check_rejection(logical_id)?;
        Ok(SecurityGroupHandle {
            id: Self::id("sg", &format!("{}/{}", network_id, logical_id)),
        })
    }

    fn allow(
        &mut self,
        sg_id: &str,
        target_sg_id: &str,
        protocol: Protocol,
        port: u16,
    ) -> ProviderResult<()> {
        self.calls.push(ProviderCall::Allow {
            sg_id: sg_id.to_string(),
            target_sg_id: target_sg_id.to_string(),
            protocol,
            port,
        });
        Ok(())
    }

    fn create_filesystem(
        &mut self,
        logical_id: &str,
        _network_id: &str,
        _sg_id: &str,
        spec: &FileSystemSpec,
    ) -> ProviderResult<FileSystemHandle> {
        self.calls.push(ProviderCall::CreateFilesystem {
            logical_id: logical_id.to_string(),
        });
        self.check_rejection(logical_id)?;
        if spec.provisioned_mibps.is_some_and(|rate| rate > 3072) {
            return Err(ProviderError::Rejected(
                "provisioned throughput exceeds 3072 MiB/s".to_string(),
            ));
        }
        Ok(FileSystemHandle {
            id: format!("fs-{}", short_digest(logical_id, 8)),
            state: self.filesystem_state,
        })
    }

    fn create_access_point(
        &mut self,
        logical_id: &str,
        filesystem_id: &str,
        _spec: &AccessPointSpec,
    ) -> ProviderResult<AccessPointHandle> {
        self.calls.push(ProviderCall::CreateAccessPoint {
            logical_id: logical_id.to_string(),
            filesystem_id: filesystem_id.to_string(),
        });
        self.check_rejection(logical_id)?;
        Ok(AccessPointHandle {
            id: Self::id("fsap", &format!("{}/{}", filesystem_id, logical_id)),
        })
    }

    fn create_function(
        &mut self,
        logical_id: &str,
        request: &FunctionRequest,
    ) -> ProviderResult<FunctionHandle> {
        self.calls.push(ProviderCall::CreateFunction {
            logical_id: logical_id.to_string(),
        });
        self.check_rejection(logical_id)?;
        if request.memory_mb % 64 != 0 {
            return Err(ProviderError::Rejected(format!(
                "MemorySize {} is not a multiple of 64",
                request.memory_mb
            )));
        }
        let available = self
            .account_concurrency
            .saturating_sub(UNRESERVED_CONCURRENCY);
        if request.reserved_concurrency > available {
            return Err(ProviderError::Rejected(format!(
                "ReservedConcurrentExecutions {} exceeds the {} available in this account",
                request.reserved_concurrency, available
            )));
        }
        let name = format!(
            "{}-{}",
            logical_id,
            short_digest(logical_id, 12).to_uppercase()
        );
        Ok(FunctionHandle {
            arn: format!(
                "arn:aws:lambda:{}:000000000000:function:{}",
                self.region, name
            ),
            name,
        })
    }

    fn attach_policy(&mut self, function: &FunctionHandle, policy: &str) -> ProviderResult<()> {
        self.calls.push(ProviderCall::AttachPolicy {
            function: function.name.clone(),
            policy: policy.to_string(),
        });
        Ok(())
    }

    fn create_build_job(
        &mut self,
        logical_id: &str,
        request: &BuildJobRequest,
    ) -> ProviderResult<BuildJobHandle> {
        self.calls.push(ProviderCall::CreateBuildJob {
            logical_id: logical_id.to_string(),
            name: request.name.clone(),
        });
        self.check_rejection(logical_id)?;
        self.jobs.entry(request.name.clone()).or_insert(0);
        Ok(BuildJobHandle {
            name: request.name.clone(),
        })
    }

    fn patch_filesystem_mounts(
        &mut self,
        job: &BuildJobHandle,
        mounts: &[ResolvedMount],
    ) -> ProviderResult<()> {
        self.calls.push(ProviderCall::PatchFilesystemMounts {
            job: job.name.clone(),
            mounts: mounts.to_vec(),
        });
        if !self.jobs.contains_key(&job.name) {
            return Err(ProviderError::Rejected(format!(
                "project '{}' not found",
                job.name
            )));
        }
        Ok(())
    }

    fn patch_logging(&mut self, job: &BuildJobHandle, config: &LogConfig) -> ProviderResult<()> {
        self.calls.push(ProviderCall::PatchLogging {
            job: job.name.clone(),
            enabled: config.enabled,
        });
        Ok(())
    }

    fn invoke_action(
        &mut self,
        service: &str,
        action: &str,
        params: &serde_json::Value,
    ) -> ProviderResult<serde_json::Value> {
        self.calls.push(ProviderCall::InvokeAction {
            service: service.to_string(),
            action: action.to_string(),
            params: params.clone(),
        });
        if let Some(reason) = self.action_failures.get(&format!("{}.{}", service, action)) {
            return Err(ProviderError::Unavailable(reason.clone()));
        }
        match (service, action) {
            ("CodeBuild", "startBuild") => self.start_build(params),
            _ => Err(ProviderError::Rejected(format!(
                "unsupported action {}.{}",
                service, action
            ))),
        }
    }

    fn build_status(&mut self, build_id: &str) -> ProviderResult<BuildStatus> {
        self.calls.push(ProviderCall::BuildStatus {
            build_id: build_id.to_string(),
        });
        let checks = self
            .builds
            .get_mut(build_id)
            .ok_or_else(|| ProviderError::Rejected(format!("build '{}' not found", build_id)))?;
        *checks += 1;
        if *checks <= self.pending_checks {
            return Ok(BuildStatus::InProgress);
        }
        Ok(self.build_outcome.clone())
    }
}
