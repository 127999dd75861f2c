//! MW-007: Stack assembly. Turns a validated stack.yaml into the resource graph.

use super::error::StackResult;
use super::graph::{NodeId, Spec, StackGraph};
use super::resolver::resolve_template;
use super::types::{DeployContext, StackConfig};
use crate::resources::build::{self, BuildJobProps, PopulateLayout};
use crate::resources::compute::{self, FunctionMount, FunctionProps};
use crate::resources::network::{build_topology, SubnetSelection, Topology};
use crate::resources::storage;
use crate::resources::trigger::TriggerSpec;

/// Name of the stack output carrying the realized function name.
pub const FUNCTION_NAME_OUTPUT: &str = "LambdaFunctionName";

/// Node ids of the assembled stack, for callers that need to address them.
#[derive(Debug, Clone, Copy)]
pub struct StackNodes {
    pub topology: Topology,
    pub file_system: NodeId,
    pub access_point: NodeId,
    pub function: NodeId,
    pub build_job: NodeId,
    pub trigger: NodeId,
}

/// Build the full graph for a stack.
pub fn assemble(config: &StackConfig, ctx: &DeployContext) -> StackResult<StackGraph> {
    let mut graph = StackGraph::new();
    assemble_into(&mut graph, config, ctx)?;
    Ok(graph)
}

/// Build the full graph into `graph` and return the node ids.
pub fn assemble_into(
    graph: &mut StackGraph,
    config: &StackConfig,
    ctx: &DeployContext,
) -> StackResult<StackNodes> {
    let topology = build_topology(graph, &ctx.stack, &config.network)?;

    let file_system = graph.add(
        "file-system",
        Spec::FileSystem(storage::define_file_system(
            topology.network,
            topology.storage_sg,
            config.storage.throughput_mode,
            config.storage.throughput_mibps(),
        )?),
    )?;

    let (posix_user, acl) = storage::shared_ownership(
        config.storage.uid,
        config.storage.gid,
        &config.storage.permissions,
    );
    let access_point = graph.add(
        "access-point",
        Spec::AccessPoint(storage::define_access_point(
            file_system,
            &config.storage.access_point_path,
            posix_user,
            acl,
        )?),
    )?;

    let function = graph.add(
        "inference-function",
        Spec::Function(compute::define_function(FunctionProps {
            runtime: config.function.runtime.clone(),
            handler: config.function.handler.clone(),
            code: config.function.code.clone(),
            network: topology.network,
            subnets: SubnetSelection::private(),
            security_group: topology.function_sg,
            timeout_seconds: config.function.timeout_seconds,
            memory_mb: config.function.memory_mb,
            reserved_concurrency: config.function.reserved_concurrency,
            mount: Some(FunctionMount {
                access_point,
                local_path: config.function.mount_path.clone(),
            }),
        })?),
    )?;

    let layout = PopulateLayout {
        identifier: config.build.identifier.clone(),
        root: config.storage.access_point_path.clone(),
        model_url: config.build.model_url.clone(),
        venv: build::VENV_DIR.to_string(),
        uid: config.storage.uid,
        gid: config.storage.gid,
    };
    let job_spec = build::define_build_job(BuildJobProps {
        name: resolve_template(&config.build.name, ctx, &config.params)?,
        description: config.build.description.clone(),
        network: topology.network,
        subnets: SubnetSelection::private(),
        commands: build::populate_commands(&layout, config.params.install_packages.as_deref()),
        image: config.build.image.clone(),
        compute: config.build.compute,
        privileged: config.build.privileged,
        security_groups: vec![topology.compute_sg],
        timeout_minutes: config.build.timeout_minutes,
    })?
    .attach_filesystem_mount(
        file_system,
        &config.build.mount_path,
        &config.build.identifier,
        &config.build.mount_options,
    )?
    .enable_logging()
    .finish()?;
    let build_job = graph.add("populate-job", Spec::BuildJob(job_spec))?;

    // The mount names the raw filesystem; the access point must still exist
    // before the job's network mount can succeed.
    graph.add_dependency(build_job, access_point)?;

    let trigger = graph.add(
        "populate-trigger",
        Spec::Trigger(TriggerSpec::start_build(build_job)),
    )?;

    graph.add_output(FUNCTION_NAME_OUTPUT, function, "name");

    tracing::debug!(stack = %ctx.stack, nodes = graph.len(), "assembled stack graph");

    Ok(StackNodes {
        topology,
        file_system,
        access_point,
        function,
        build_job,
        trigger,
    })
}
