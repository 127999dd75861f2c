//! Benchmarks for mountwright core operations.
//!
//! Run with: cargo bench
//!
//! Results include 95% confidence intervals via Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mountwright::core::graph::{Spec, StackGraph};
use mountwright::core::types::DeployContext;
use mountwright::core::{parser, planner, resolver, stack};
use mountwright::resources::network::{self, Protocol, NFS_PORT};

const STACK_YAML: &str = r#"
version: "1.0"
name: bench-stack
region: us-east-1
params:
  install_packages: "tensorflow keras"
network:
  max_azs: 3
  nat_gateways: 1
storage:
  throughput_mode: provisioned
  provisioned_mibps: 1024
function:
  memory_mb: 3008
  reserved_concurrency: 10
policy:
  build_failure: report
"#;

/// A network plus `n` security groups, each allowing NFS into the previous one.
fn chain_graph(n: usize) -> StackGraph {
    let mut g = StackGraph::new();
    let vpc = g
        .add("vpc", Spec::Network(network::define_network(2, 1).unwrap()))
        .unwrap();
    let mut prev = None;
    for i in 0..n {
        let sg = g
            .add(
                format!("sg-{i}"),
                Spec::SecurityGroup(network::define_security_group(vpc, format!("sg-{i}"))),
            )
            .unwrap();
        if let Some(p) = prev {
            network::allow(&mut g, sg, p, Protocol::Tcp, NFS_PORT).unwrap();
        }
        prev = Some(sg);
    }
    g
}

fn bench_blake3_string(c: &mut Criterion) {
    let mut group = c.benchmark_group("blake3_string");
    for size in [64, 256, 1024, 4096] {
        let input: String = "x".repeat(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &input, |b, input| {
            b.iter(|| {
                let hash = blake3::hash(black_box(input.as_bytes()));
                black_box(hash);
            });
        });
    }
    group.finish();
}

fn bench_yaml_parse(c: &mut Criterion) {
    c.bench_function("yaml_parse_stack", |b| {
        b.iter(|| {
            let config = parser::parse_config(black_box(STACK_YAML)).unwrap();
            black_box(config);
        });
    });
}

fn bench_execution_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("execution_order");
    for n in [10, 100, 1000] {
        let graph = chain_graph(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &graph, |b, graph| {
            b.iter(|| {
                let order = resolver::build_execution_order(black_box(graph)).unwrap();
                black_box(order);
            });
        });
    }
    group.finish();
}

fn bench_assemble_and_plan(c: &mut Criterion) {
    let config = parser::parse_config(STACK_YAML).unwrap();
    let ctx = DeployContext::from_config(&config);

    c.bench_function("assemble_stack", |b| {
        b.iter(|| {
            let graph = stack::assemble(black_box(&config), &ctx).unwrap();
            black_box(graph);
        });
    });

    let graph = stack::assemble(&config, &ctx).unwrap();
    let order = resolver::build_execution_order(&graph).unwrap();
    c.bench_function("plan_fresh_stack", |b| {
        b.iter(|| {
            let plan = planner::plan("bench-stack", black_box(&graph), &order, None).unwrap();
            black_box(plan);
        });
    });
}

criterion_group!(
    benches,
    bench_blake3_string,
    bench_yaml_parse,
    bench_execution_order,
    bench_assemble_and_plan,
);
criterion_main!(benches);
