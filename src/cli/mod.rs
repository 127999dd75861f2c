//! MW-017: CLI subcommands: init, validate, plan, apply, graph, status, schema.

use crate::core::error::{StackError, StackResult};
use crate::core::graph::{NodeId, StackGraph};
use crate::core::{executor, parser, planner, resolver, stack, state, types};
use crate::provider::simulated::SimulatedProvider;
use clap::Subcommand;
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new stack directory
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate stack.yaml and its dependency graph without provisioning
    Validate {
        /// Path to stack.yaml
        #[arg(short, long, default_value = "stack.yaml")]
        file: PathBuf,
    },

    /// Show execution plan (desired graph vs deployment record)
    Plan {
        /// Path to stack.yaml
        #[arg(short, long, default_value = "stack.yaml")]
        file: PathBuf,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Provision the stack in dependency order
    Apply {
        /// Path to stack.yaml
        #[arg(short, long, default_value = "stack.yaml")]
        file: PathBuf,

        /// Re-submit unchanged resources (triggers still fire at most once)
        #[arg(long)]
        force: bool,

        /// Show what would be executed without calling the provider
        #[arg(long)]
        dry_run: bool,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Print the resource graph in execution order
    Graph {
        /// Path to stack.yaml
        #[arg(short, long, default_value = "stack.yaml")]
        file: PathBuf,

        /// Emit Graphviz DOT instead of a list
        #[arg(long)]
        dot: bool,
    },

    /// Show deployment records
    Status {
        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Only this stack
        #[arg(short, long)]
        stack: Option<String>,
    },

    /// Print the JSON Schema of stack.yaml
    Schema,
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    let result = match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Plan { file, state_dir } => cmd_plan(&file, &state_dir),
        Commands::Apply {
            file,
            force,
            dry_run,
            state_dir,
        } => cmd_apply(&file, &state_dir, force, dry_run),
        Commands::Graph { file, dot } => cmd_graph(&file, dot),
        Commands::Status { state_dir, stack } => cmd_status(&state_dir, stack.as_deref()),
        Commands::Schema => cmd_schema(),
    };
    result.map_err(|e| e.to_string())
}

const STACK_TEMPLATE: &str = r#"version: "1.0"
name: lambda-efs-ml
region: us-east-1

params: {}

network:
  max_azs: 2
  nat_gateways: 1

storage:
  throughput_mode: provisioned
  provisioned_mibps: 1024
  access_point_path: /lambda

function:
  runtime: python3.8
  handler: main.lambda_handler
  code: lambda
  memory_mb: 3008
  reserved_concurrency: 10
  mount_path: /mnt/python

build:
  name: "{{stack}}-populate"
  mount_path: /mnt/python

policy:
  build_failure: report
  tripwire: true
"#;

fn cmd_init(path: &Path) -> StackResult<()> {
    let config_path = path.join("stack.yaml");
    if config_path.exists() {
        return Err(StackError::config(format!(
            "{} already exists",
            config_path.display()
        )));
    }

    let state_dir = path.join("state");
    std::fs::create_dir_all(&state_dir)
        .map_err(|e| StackError::State(format!("cannot create state dir: {}", e)))?;
    std::fs::write(&config_path, STACK_TEMPLATE).map_err(|e| {
        StackError::State(format!("cannot write {}: {}", config_path.display(), e))
    })?;

    println!("Initialized stack at {}", path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}/", state_dir.display());
    Ok(())
}

/// Parse and validate a stack file, printing every validation error.
fn parse_and_validate(file: &Path) -> StackResult<types::StackConfig> {
    let config = parser::parse_config_file(file)?;
    let errors = parser::validate_config(&config);
    if errors.is_empty() {
        return Ok(config);
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err(StackError::config(format!(
        "{} validation error(s)",
        errors.len()
    )))
}

/// Parse, validate, assemble and order a stack file.
fn load_stack(
    file: &Path,
) -> StackResult<(types::StackConfig, types::DeployContext, StackGraph, Vec<NodeId>)> {
    let config = parse_and_validate(file)?;
    let ctx = types::DeployContext::from_config(&config);
    let graph = stack::assemble(&config, &ctx)?;
    let order = resolver::build_execution_order(&graph)?;
    Ok((config, ctx, graph, order))
}

fn cmd_validate(file: &Path) -> StackResult<()> {
    let (config, ctx, graph, _) = load_stack(file)?;
    println!(
        "OK: {} ({} resources, {} edges, region {})",
        config.name,
        graph.len(),
        graph.edges().len(),
        ctx.region
    );
    Ok(())
}

fn cmd_plan(file: &Path, state_dir: &Path) -> StackResult<()> {
    let (_, ctx, graph, order) = load_stack(file)?;
    let lock = state::load_deployment(state_dir, &ctx)?;
    let plan = planner::plan(&ctx.stack, &graph, &order, lock.as_ref())?;
    print_plan(&plan);
    Ok(())
}

/// Display a plan to stdout.
fn print_plan(plan: &types::ExecutionPlan) {
    println!("Planning: {} ({} resources)", plan.name, plan.changes.len());
    println!();

    for change in &plan.changes {
        let symbol = match change.action {
            types::PlanAction::Create => "+",
            types::PlanAction::Update => "~",
            types::PlanAction::NoOp => " ",
        };
        println!("  {} {}", symbol, change.description);
    }

    println!();
    println!(
        "Plan: {} to add, {} to change, {} unchanged.",
        plan.to_create, plan.to_update, plan.unchanged
    );
}

fn cmd_apply(file: &Path, state_dir: &Path, force: bool, dry_run: bool) -> StackResult<()> {
    let config = parse_and_validate(file)?;
    if dry_run {
        cmd_plan(file, state_dir)?;
    }

    let cfg = executor::ApplyConfig {
        config: &config,
        state_dir,
        force,
        dry_run,
    };
    let mut provider = SimulatedProvider::new(&config.region);
    let result = executor::apply(&cfg, &mut provider)?;

    if dry_run {
        println!("Dry run: no changes applied.");
        return Ok(());
    }

    println!(
        "{}: {} converged, {} unchanged ({:.1}s)",
        result.stack,
        result.resources_converged,
        result.resources_unchanged,
        result.total_duration.as_secs_f64()
    );
    for build_id in &result.builds_started {
        println!("  Build started: {}", build_id);
    }
    if !result.outputs.is_empty() {
        println!();
        println!("Outputs:");
        for (name, value) in &result.outputs {
            println!("  {} = {}", name, value);
        }
    }
    Ok(())
}

fn cmd_graph(file: &Path, dot: bool) -> StackResult<()> {
    let (_, _, graph, order) = load_stack(file)?;
    if dot {
        print!("{}", graph.to_dot());
        return Ok(());
    }
    for (i, &id) in order.iter().enumerate() {
        let node = graph.node(id)?;
        let deps: Vec<&str> = graph
            .edges()
            .into_iter()
            .filter(|e| e.to == id)
            .map(|e| graph.logical_id(e.from))
            .collect();
        if deps.is_empty() {
            println!("{:>2}. {} [{}]", i + 1, node.logical_id, node.spec.kind());
        } else {
            println!(
                "{:>2}. {} [{}] <- {}",
                i + 1,
                node.logical_id,
                node.spec.kind(),
                deps.join(", ")
            );
        }
    }
    Ok(())
}

fn cmd_status(state_dir: &Path, stack_filter: Option<&str>) -> StackResult<()> {
    let entries = std::fs::read_dir(state_dir).map_err(|e| {
        StackError::State(format!(
            "cannot read state dir {}: {}",
            state_dir.display(),
            e
        ))
    })?;

    let mut found = false;

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(filter) = stack_filter {
            if name != filter {
                continue;
            }
        }

        if !entry.path().is_dir() {
            continue;
        }

        if let Some(lock) = state::load_lock(state_dir, &name)? {
            found = true;
            println!("Stack: {} ({})", lock.stack, lock.region);
            println!("  Generated: {}", lock.generated_at);
            println!("  Generator: {}", lock.generator);
            println!("  Resources: {}", lock.resources.len());

            for (id, rl) in &lock.resources {
                let physical = rl
                    .observed
                    .as_ref()
                    .map(|o| format!(" {}", o.physical_id))
                    .unwrap_or_default();
                let duration = rl
                    .duration_seconds
                    .map(|d| format!(" ({:.2}s)", d))
                    .unwrap_or_default();
                println!("    {}: {} [{}]{}{}", id, rl.status, rl.kind, physical, duration);
            }
            for (name, value) in &lock.outputs {
                println!("  Output {} = {}", name, value);
            }
            println!();
        }
    }

    if !found {
        println!("No state found. Run `mountwright apply` first.");
    }

    Ok(())
}

fn cmd_schema() -> StackResult<()> {
    let schema = schemars::schema_for!(types::StackConfig);
    let json = serde_json::to_string_pretty(&schema)
        .map_err(|e| StackError::State(format!("schema serialization: {}", e)))?;
    println!("{}", json);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_stack(dir: &Path, yaml: &str) -> PathBuf {
        let file = dir.join("stack.yaml");
        std::fs::write(&file, yaml).unwrap();
        file
    }

    #[test]
    fn test_mw017_init() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("ml");
        std::fs::create_dir_all(&sub).unwrap();
        cmd_init(&sub).unwrap();
        assert!(sub.join("stack.yaml").exists());
        assert!(sub.join("state").is_dir());
        // The generated template is itself a valid stack
        cmd_validate(&sub.join("stack.yaml")).unwrap();
    }

    #[test]
    fn test_mw017_init_already_exists() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stack.yaml"), "exists").unwrap();
        assert!(cmd_init(dir.path()).is_err());
    }

    #[test]
    fn test_mw017_validate_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_stack(dir.path(), "version: \"2.0\"\nname: \"\"\n");
        let err = cmd_validate(&file).unwrap_err();
        assert!(err.to_string().contains("2 validation error(s)"));
    }

    #[test]
    fn test_mw017_plan_and_apply() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_stack(dir.path(), "version: \"1.0\"\nname: ml\n");
        let state_dir = dir.path().join("state");

        cmd_plan(&file, &state_dir).unwrap();
        cmd_apply(&file, &state_dir, false, true).unwrap();
        assert!(state::load_lock(&state_dir, "ml").unwrap().is_none());

        cmd_apply(&file, &state_dir, false, false).unwrap();
        let lock = state::load_lock(&state_dir, "ml").unwrap().unwrap();
        assert_eq!(lock.resources.len(), 9);
        assert!(lock.outputs.contains_key(stack::FUNCTION_NAME_OUTPUT));

        cmd_status(&state_dir, None).unwrap();
        cmd_status(&state_dir, Some("other")).unwrap();
    }

    #[test]
    fn test_mw017_second_apply_keeps_trigger() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_stack(dir.path(), "version: \"1.0\"\nname: ml\n");
        let state_dir = dir.path().join("state");
        cmd_apply(&file, &state_dir, false, false).unwrap();
        let first = state::load_lock(&state_dir, "ml").unwrap().unwrap();
        cmd_apply(&file, &state_dir, false, false).unwrap();
        let second = state::load_lock(&state_dir, "ml").unwrap().unwrap();
        assert_eq!(
            first.resources["populate-trigger"].observed,
            second.resources["populate-trigger"].observed
        );
    }

    #[test]
    fn test_mw017_graph() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_stack(dir.path(), "version: \"1.0\"\nname: ml\n");
        cmd_graph(&file, false).unwrap();
        cmd_graph(&file, true).unwrap();
    }

    #[test]
    fn test_mw017_status_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(cmd_status(&dir.path().join("nope"), None).is_err());
    }

    #[test]
    fn test_mw017_status_empty() {
        let dir = tempfile::tempdir().unwrap();
        cmd_status(dir.path(), None).unwrap();
    }

    #[test]
    fn test_mw017_schema() {
        cmd_schema().unwrap();
    }

    #[test]
    fn test_mw017_dispatch_validate_error_is_string() {
        let dir = tempfile::tempdir().unwrap();
        let err = dispatch(Commands::Validate {
            file: dir.path().join("missing.yaml"),
        })
        .unwrap_err();
        assert!(err.contains("failed to read"));
    }
}
