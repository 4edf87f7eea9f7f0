// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! CLI tool to run the coherence benchmarks and generate reports.

use coherence_benchmark::{
    BenchmarkOrchestrator, BenchmarkReport, ComparisonTable, JsonReporter, LatencyMetrics,
    OperationKind,
};
use coherence_core::{BenchmarkConfig, ConfigLoader};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "run_benchmarks")]
#[command(about = "Measure cache coherence across backends and generate JSON reports")]
struct Args {
    /// Configuration file (built-in four-backend suite if not specified)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output directory for benchmark data (the crate's `data/` if not specified)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Measured iterations per operation (overrides the configuration)
    #[arg(short, long)]
    iterations: Option<u32>,

    /// Backends to run, by name or kind (all if not specified)
    #[arg(short, long)]
    backend: Vec<String>,

    /// Run in quick mode (fewer iterations)
    #[arg(long)]
    quick: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    let mut config = match &args.config {
        Some(path) => ConfigLoader::load_file(path)?,
        None => ConfigLoader::default_config(),
    };
    apply_overrides(&mut config, &args)?;

    let reporter = match &args.output {
        Some(dir) => JsonReporter::new(dir)?,
        None => JsonReporter::default_location()?,
    };

    println!("Coherence Benchmark Suite");
    println!("=========================");
    println!("Output directory: {:?}", reporter.output_dir());
    println!("Iterations: {}", config.harness.iterations);
    println!(
        "Backends: {}",
        config
            .backends
            .iter()
            .map(|b| b.name())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!();

    let report = BenchmarkOrchestrator::new(config).run().await?;

    let path = reporter.save(&report)?;
    println!();
    println!("Benchmark report saved to: {:?}", path);
    println!();

    print_summary(&report);

    Ok(())
}

fn apply_overrides(config: &mut BenchmarkConfig, args: &Args) -> anyhow::Result<()> {
    if args.quick {
        config.harness.warmup_iterations = 2;
        config.harness.iterations = 10;
    }
    if let Some(iterations) = args.iterations {
        config.harness.iterations = iterations;
    }

    if !args.backend.is_empty() {
        config.backends.retain(|b| {
            args.backend
                .iter()
                .any(|f| f.eq_ignore_ascii_case(b.name()) || f.eq_ignore_ascii_case(b.kind().name()))
        });
        if config.backends.is_empty() {
            anyhow::bail!("no configured backend matches {:?}", args.backend);
        }
    }
    Ok(())
}

fn print_summary(report: &BenchmarkReport) {
    println!("Summary");
    println!("-------");
    println!();
    print!("{}", ComparisonTable::render(report));
    println!();

    for backend in &report.backends {
        if let Some(refresh) = backend.operation(OperationKind::Refresh) {
            println!(
                "{}: refresh median={}, p99={}",
                backend.name,
                LatencyMetrics::format_latency(refresh.latency.median_ns),
                LatencyMetrics::format_latency(refresh.latency.p99_ns)
            );
        }
    }
}
