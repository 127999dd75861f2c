//! MW-008: Executor. The provisioning pass.
//!
//! validate → assemble → order → plan → for each node in order:
//! resolve references → provider call → record observed handle → events.
//! Any error aborts the pass; resources realized before it stay in place
//! and are recorded in the lock.

use super::error::{StackError, StackResult};
use super::graph::{NodeId, Spec, StackGraph};
use super::parser;
use super::planner;
use super::resolver;
use super::stack;
use super::state;
use super::types::*;
use crate::provider::{BuildJobRequest, BuildStatus, FunctionRequest, Provider, ProviderError};
use crate::resources::network::{SubnetSelection, SubnetType};
use crate::resources::storage::AVAILABLE;
use crate::resources::trigger::extract_physical_id;
use crate::tripwire::eventlog;
use std::path::Path;
use std::time::{Duration, Instant};

/// Configuration for an apply run.
pub struct ApplyConfig<'a> {
    pub config: &'a StackConfig,
    pub state_dir: &'a Path,
    /// Re-submit unchanged resources. Triggers are never forced.
    pub force: bool,
    pub dry_run: bool,
}

/// Execute one provisioning pass for the configured stack.
pub fn apply<P: Provider>(cfg: &ApplyConfig, provider: &mut P) -> StackResult<ApplyResult> {
    let errors = parser::validate_config(cfg.config);
    if !errors.is_empty() {
        let messages: Vec<String> = errors.iter().map(|e| e.message.clone()).collect();
        return Err(StackError::config(messages.join("; ")));
    }
    let ctx = DeployContext::from_config(cfg.config);
    let graph = stack::assemble(cfg.config, &ctx)?;
    apply_graph(cfg, &ctx, graph, provider)
}

/// Execute one provisioning pass over an already assembled graph.
pub fn apply_graph<P: Provider>(
    cfg: &ApplyConfig,
    ctx: &DeployContext,
    mut graph: StackGraph,
    provider: &mut P,
) -> StackResult<ApplyResult> {
    let start = Instant::now();

    // Ordering and planning happen before any provider call
    let execution_order = resolver::build_execution_order(&graph)?;
    let existing = state::load_deployment(cfg.state_dir, ctx)?;
    let plan = planner::plan(&ctx.stack, &graph, &execution_order, existing.as_ref())?;

    if cfg.dry_run {
        return Ok(ApplyResult {
            stack: ctx.stack.clone(),
            resources_converged: 0,
            resources_unchanged: plan.unchanged,
            outputs: existing.map(|l| l.outputs).unwrap_or_default(),
            builds_started: Vec::new(),
            total_duration: start.elapsed(),
        });
    }

    let run_id = eventlog::generate_run_id();
    let tripwire = cfg.config.policy.tripwire;
    let mut lock = existing.unwrap_or_else(|| state::new_lock(&ctx.stack, &ctx.region));

    log_tripwire(
        cfg.state_dir,
        &ctx.stack,
        tripwire,
        ProvenanceEvent::ApplyStarted {
            stack: ctx.stack.clone(),
            run_id: run_id.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    );
    tracing::info!(
        stack = %ctx.stack,
        region = %ctx.region,
        run_id = %run_id,
        create = plan.to_create,
        update = plan.to_update,
        unchanged = plan.unchanged,
        "apply started"
    );

    let mut converged = 0u32;
    let mut unchanged = 0u32;
    let mut builds_started = Vec::new();

    let mut rctx = RecordCtx {
        lock: &mut lock,
        state_dir: cfg.state_dir,
        stack: &ctx.stack,
        tripwire,
    };

    for (&id, change) in execution_order.iter().zip(&plan.changes) {
        match apply_single_resource(cfg, ctx, provider, &mut graph, id, change, &mut rctx) {
            Ok(ResourceOutcome::Converged { build_started }) => {
                converged += 1;
                builds_started.extend(build_started);
            }
            Ok(ResourceOutcome::Unchanged) => unchanged += 1,
            Err(e) => {
                rctx.lock.generated_at = eventlog::now_iso8601();
                if let Err(save) = state::save_lock(cfg.state_dir, rctx.lock) {
                    tracing::warn!(error = %save, "could not record failed pass");
                }
                tracing::error!(
                    stack = %ctx.stack,
                    resource = %change.resource_id,
                    error = %e,
                    "pass aborted"
                );
                return Err(e);
            }
        }
    }

    let outputs = graph.resolve_outputs()?;
    let lock = rctx.lock;
    lock.outputs = outputs.clone();
    lock.generated_at = eventlog::now_iso8601();
    // Always written: the record is how a trigger knows it already fired
    state::save_lock(cfg.state_dir, lock)?;

    match cfg.config.policy.build_failure {
        BuildFailurePolicy::Fatal => {
            for build_id in &builds_started {
                await_build(cfg, ctx, provider, build_id)?;
            }
        }
        BuildFailurePolicy::Report => {
            for build_id in &builds_started {
                tracing::info!(build_id = %build_id, "populate build started; not awaited");
            }
        }
    }

    log_tripwire(
        cfg.state_dir,
        &ctx.stack,
        tripwire,
        ProvenanceEvent::ApplyCompleted {
            stack: ctx.stack.clone(),
            run_id,
            resources_converged: converged,
            resources_unchanged: unchanged,
            total_seconds: start.elapsed().as_secs_f64(),
        },
    );
    tracing::info!(
        stack = %ctx.stack,
        converged,
        unchanged,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "apply completed"
    );

    Ok(ApplyResult {
        stack: ctx.stack.clone(),
        resources_converged: converged,
        resources_unchanged: unchanged,
        outputs,
        builds_started,
        total_duration: start.elapsed(),
    })
}

/// Outcome of applying a single resource.
enum ResourceOutcome {
    /// Realized this pass; triggers that start a build carry its id.
    Converged { build_started: Option<String> },
    /// NoOp; observed handle restored from the lock.
    Unchanged,
}

/// Shared context for recording resource outcomes.
struct RecordCtx<'a> {
    lock: &'a mut StateLock,
    state_dir: &'a Path,
    stack: &'a str,
    tripwire: bool,
}

fn apply_single_resource<P: Provider>(
    cfg: &ApplyConfig,
    ctx: &DeployContext,
    provider: &mut P,
    graph: &mut StackGraph,
    id: NodeId,
    change: &PlannedChange,
    rctx: &mut RecordCtx,
) -> StackResult<ResourceOutcome> {
    let spec = graph.node(id)?.spec.clone();
    let is_trigger = matches!(spec, Spec::Trigger(_));

    if change.action == PlanAction::NoOp && (!cfg.force || is_trigger) {
        let observed = rctx
            .lock
            .resources
            .get(&change.resource_id)
            .and_then(|rl| rl.observed.clone())
            .ok_or_else(|| {
                StackError::State(format!(
                    "lock entry for '{}' has no observed handle",
                    change.resource_id
                ))
            })?;
        graph.set_observed(id, observed)?;
        tracing::debug!(resource = %change.resource_id, "unchanged");
        return Ok(ResourceOutcome::Unchanged);
    }

    log_tripwire(
        rctx.state_dir,
        rctx.stack,
        rctx.tripwire,
        ProvenanceEvent::ResourceStarted {
            stack: rctx.stack.to_string(),
            resource: change.resource_id.clone(),
            action: change.action.to_string(),
        },
    );

    let started = Instant::now();
    let observed = match realize(provider, graph, ctx, &change.resource_id, &spec) {
        Ok(observed) => observed,
        Err(e) => {
            record_failure(rctx, change, started.elapsed().as_secs_f64(), &e);
            return Err(e);
        }
    };
    let duration = started.elapsed().as_secs_f64();

    let mut build_started = None;
    if let Spec::Trigger(ref t) = spec {
        log_tripwire(
            rctx.state_dir,
            rctx.stack,
            rctx.tripwire,
            ProvenanceEvent::TriggerFired {
                stack: rctx.stack.to_string(),
                resource: change.resource_id.clone(),
                action: t.qualified_action(),
                physical_id: observed.physical_id.clone(),
            },
        );
        if t.starts_build() {
            build_started = Some(observed.physical_id.clone());
        }
    }

    tracing::info!(
        resource = %change.resource_id,
        kind = %change.kind,
        action = %change.action,
        physical_id = %observed.physical_id,
        "converged"
    );
    record_success(rctx, change, &observed, duration);
    graph.set_observed(id, observed)?;
    Ok(ResourceOutcome::Converged { build_started })
}

/// Record a successful resource realization into the lock and event log.
fn record_success(ctx: &mut RecordCtx, change: &PlannedChange, observed: &Observed, duration: f64) {
    ctx.lock.resources.insert(
        change.resource_id.clone(),
        ResourceLock {
            kind: change.kind,
            status: ResourceStatus::Converged,
            applied_at: Some(eventlog::now_iso8601()),
            duration_seconds: Some(duration),
            hash: change.hash.clone(),
            observed: Some(observed.clone()),
        },
    );

    log_tripwire(
        ctx.state_dir,
        ctx.stack,
        ctx.tripwire,
        ProvenanceEvent::ResourceConverged {
            stack: ctx.stack.to_string(),
            resource: change.resource_id.clone(),
            physical_id: observed.physical_id.clone(),
            duration_seconds: duration,
            hash: change.hash.clone(),
        },
    );
}

/// Record a resource failure into the lock and event log.
fn record_failure(ctx: &mut RecordCtx, change: &PlannedChange, duration: f64, error: &StackError) {
    ctx.lock.resources.insert(
        change.resource_id.clone(),
        ResourceLock {
            kind: change.kind,
            status: ResourceStatus::Failed,
            applied_at: Some(eventlog::now_iso8601()),
            duration_seconds: Some(duration),
            hash: String::new(),
            observed: None,
        },
    );

    log_tripwire(
        ctx.state_dir,
        ctx.stack,
        ctx.tripwire,
        ProvenanceEvent::ResourceFailed {
            stack: ctx.stack.to_string(),
            resource: change.resource_id.clone(),
            error: error.to_string(),
        },
    );
}

/// Log a tripwire event if tripwire is enabled.
fn log_tripwire(state_dir: &Path, stack: &str, tripwire: bool, event: ProvenanceEvent) {
    if tripwire {
        if let Err(e) = eventlog::append_event(state_dir, stack, event) {
            tracing::warn!(error = %e, "event log append failed");
        }
    }
}

fn rejected(resource: &str) -> impl Fn(ProviderError) -> StackError + '_ {
    move |e| StackError::ProviderRejection {
        resource: resource.to_string(),
        reason: e.to_string(),
    }
}

fn physical_id(graph: &StackGraph, id: NodeId) -> StackResult<String> {
    Ok(graph.observed(id)?.physical_id.clone())
}

fn subnet_ids(
    graph: &StackGraph,
    network: NodeId,
    selection: &SubnetSelection,
) -> StackResult<Vec<String>> {
    let attribute = selection.attribute();
    let joined = graph.observed(network)?.attr(&attribute).ok_or_else(|| {
        StackError::config(format!(
            "network '{}' reported no {}",
            graph.logical_id(network),
            attribute
        ))
    })?;
    Ok(joined
        .split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

/// Filesystem id, provided the filesystem reports itself available.
/// Mounts resolved against a filesystem in any other state would fail.
fn available_filesystem(graph: &StackGraph, fs: NodeId, dependent: &str) -> StackResult<String> {
    let observed = graph.observed(fs)?;
    match observed.attr("state") {
        Some(AVAILABLE) => Ok(observed.physical_id.clone()),
        other => Err(StackError::ProviderRejection {
            resource: dependent.to_string(),
            reason: format!(
                "filesystem '{}' is {}, not {}",
                graph.logical_id(fs),
                other.unwrap_or("in an unknown state"),
                AVAILABLE
            ),
        }),
    }
}

/// Resolve a spec's references and hand it to the provider.
fn realize<P: Provider>(
    provider: &mut P,
    graph: &StackGraph,
    ctx: &DeployContext,
    logical_id: &str,
    spec: &Spec,
) -> StackResult<Observed> {
    match spec {
        Spec::Network(net) => {
            let handle = provider
                .create_network(logical_id, net)
                .map_err(rejected(logical_id))?;
            let mut observed = Observed::new(handle.id.clone());
            for subnet_type in [SubnetType::Public, SubnetType::Private] {
                observed = observed.with(
                    &SubnetSelection { subnet_type }.attribute(),
                    handle.subnet_ids(subnet_type).join(","),
                );
            }
            Ok(observed)
        }
        Spec::SecurityGroup(sg) => {
            let network_id = physical_id(graph, sg.network)?;
            let handle = provider
                .create_security_group(logical_id, &network_id, &sg.name)
                .map_err(rejected(logical_id))?;
            for rule in &sg.rules {
                let target = physical_id(graph, rule.target)?;
                provider
                    .allow(&handle.id, &target, rule.protocol, rule.port)
                    .map_err(rejected(logical_id))?;
            }
            Ok(Observed::new(handle.id).with("name", sg.name.clone()))
        }
        Spec::FileSystem(fs) => {
            let network_id = physical_id(graph, fs.network)?;
            let sg_id = physical_id(graph, fs.security_group)?;
            let handle = provider
                .create_filesystem(logical_id, &network_id, &sg_id, fs)
                .map_err(rejected(logical_id))?;
            Ok(Observed::new(handle.id).with("state", handle.state.to_string()))
        }
        Spec::AccessPoint(ap) => {
            let fs_id = available_filesystem(graph, ap.file_system, logical_id)?;
            let handle = provider
                .create_access_point(logical_id, &fs_id, ap)
                .map_err(rejected(logical_id))?;
            Ok(Observed::new(handle.id)
                .with("file_system_id", fs_id)
                .with("path", ap.path.clone()))
        }
        Spec::Function(f) => {
            let mount = match f.mount {
                Some(ref m) => Some((physical_id(graph, m.access_point)?, m.local_path.clone())),
                None => None,
            };
            let request = FunctionRequest {
                runtime: f.runtime.clone(),
                handler: f.handler.clone(),
                code: f.code.clone(),
                subnet_ids: subnet_ids(graph, f.network, &f.subnets)?,
                security_group_id: physical_id(graph, f.security_group)?,
                timeout_seconds: f.timeout_seconds,
                memory_mb: f.memory_mb,
                reserved_concurrency: f.reserved_concurrency,
                mount,
            };
            let handle = provider
                .create_function(logical_id, &request)
                .map_err(rejected(logical_id))?;
            for policy in &f.managed_policies {
                provider
                    .attach_policy(&handle, policy)
                    .map_err(rejected(logical_id))?;
            }
            Ok(Observed::new(handle.name.clone())
                .with("name", handle.name)
                .with("arn", handle.arn))
        }
        Spec::BuildJob(job) => {
            // Every patch is resolved before submission and applied right after it
            let mut mounts = Vec::with_capacity(job.mounts.len());
            for m in &job.mounts {
                let fs_id = available_filesystem(graph, m.file_system, logical_id)?;
                mounts.push(m.resolve(&fs_id, &ctx.region));
            }
            let request = BuildJobRequest {
                name: job.name.clone(),
                description: job.description.clone(),
                subnet_ids: subnet_ids(graph, job.network, &job.subnets)?,
                security_group_ids: job
                    .security_groups
                    .iter()
                    .map(|&sg| physical_id(graph, sg))
                    .collect::<StackResult<Vec<_>>>()?,
                buildspec: job.buildspec(),
                image: job.image.clone(),
                compute: job.compute,
                privileged: job.privileged,
                timeout_minutes: job.timeout_minutes,
            };
            let handle = provider
                .create_build_job(logical_id, &request)
                .map_err(rejected(logical_id))?;
            if !mounts.is_empty() {
                provider
                    .patch_filesystem_mounts(&handle, &mounts)
                    .map_err(rejected(logical_id))?;
            }
            if job.logs.enabled {
                provider
                    .patch_logging(&handle, &job.logs)
                    .map_err(rejected(logical_id))?;
            }
            let locations: Vec<&str> = mounts.iter().map(|m| m.location.as_str()).collect();
            Ok(Observed::new(handle.name.clone())
                .with("name", handle.name)
                .with("mount_locations", locations.join(","))
                .with("logging", if job.logs.enabled { "enabled" } else { "disabled" }))
        }
        Spec::Trigger(t) => {
            let failed = |reason: String| StackError::TriggerInvocation {
                resource: logical_id.to_string(),
                reason,
            };
            let params = t.resolve_parameters(graph)?;
            let response = provider
                .invoke_action(&t.service, &t.action, &params)
                .map_err(|e| failed(format!("{}: {}", t.qualified_action(), e)))?;
            let id = extract_physical_id(&response, &t.physical_id_path).ok_or_else(|| {
                failed(format!(
                    "{} response has no '{}' field",
                    t.qualified_action(),
                    t.physical_id_path
                ))
            })?;
            Ok(Observed::new(id).with("action", t.qualified_action()))
        }
    }
}

/// Poll a started build until it finishes or the attempts run out.
fn await_build<P: Provider>(
    cfg: &ApplyConfig,
    ctx: &DeployContext,
    provider: &mut P,
    build_id: &str,
) -> StackResult<()> {
    let policy = &cfg.config.policy;
    let mut status = BuildStatus::InProgress;
    for attempt in 0..policy.build_poll_attempts {
        if attempt > 0 && policy.build_poll_interval_secs > 0 {
            std::thread::sleep(Duration::from_secs(policy.build_poll_interval_secs));
        }
        status = provider
            .build_status(build_id)
            .map_err(|e| StackError::BuildExecution {
                build_id: build_id.to_string(),
                reason: format!("status check failed: {}", e),
            })?;
        tracing::debug!(build_id, attempt, status = %status, "build status");
        if status.is_terminal() {
            break;
        }
    }

    log_tripwire(
        cfg.state_dir,
        &ctx.stack,
        policy.tripwire,
        ProvenanceEvent::BuildFinished {
            stack: ctx.stack.clone(),
            build_id: build_id.to_string(),
            status: status.to_string(),
        },
    );

    match status {
        BuildStatus::Succeeded => {
            tracing::info!(build_id, "populate build succeeded");
            Ok(())
        }
        BuildStatus::Failed { reason } => Err(StackError::BuildExecution {
            build_id: build_id.to_string(),
            reason,
        }),
        BuildStatus::InProgress => Err(StackError::BuildExecution {
            build_id: build_id.to_string(),
            reason: format!(
                "still in progress after {} status checks",
                policy.build_poll_attempts
            ),
        }),
    }
}
