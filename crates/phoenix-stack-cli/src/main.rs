//! phoenix-stack: declare, inspect and simulate the phoenix demo environment
//!
//! The binary builds the demo resource graph from a config file (or the
//! defaults), prints its provisioning plan, and can walk the plan against
//! the in-memory provider to show apply and teardown ordering.

mod render;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use phoenix_stack_common::StackConfig;
use phoenix_stack_core::{Plan, phoenix_demo};
use phoenix_stack_engine::{Engine, EngineConfig, MemoryProvider};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "phoenix-stack")]
#[command(about = "Declare and simulate the phoenix demo stack")]
#[command(version)]
struct Args {
    /// JSON stack configuration (defaults are used for missing fields)
    #[arg(long, global = true, env = "PHOENIX_STACK_CONFIG")]
    config: Option<PathBuf>,

    /// Override the stack name
    #[arg(long, global = true, env = "PHOENIX_STACK_NAME")]
    stack_name: Option<String>,

    /// Override the region
    #[arg(long, global = true, env = "AWS_REGION")]
    region: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Table,
    Json,
}

/// Arguments for the simulate command
#[derive(clap::Args, Debug)]
struct SimulateArgs {
    /// Reject the create call of this node (repeatable)
    #[arg(long = "fail", value_name = "NODE")]
    fail: Vec<String>,

    /// Throttle the first create calls of this node (repeatable)
    #[arg(long = "throttle", value_name = "NODE")]
    throttle: Vec<String>,

    /// How many times a throttled node is refused
    #[arg(long, default_value_t = 2)]
    throttle_times: u32,

    /// Simulated latency of each create call, in milliseconds
    #[arg(long, default_value_t = 5)]
    latency_ms: u64,

    /// Provider calls in flight at once
    #[arg(long, default_value_t = 8)]
    max_concurrency: usize,

    /// Keep the simulated resources instead of tearing them down
    #[arg(long)]
    keep: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the provisioning plan
    Plan {
        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Table)]
        format: Format,
    },

    /// Print the dependency graph in Graphviz DOT format
    Graph,

    /// Print the order nodes are torn down in
    DestroyOrder,

    /// Apply (and by default destroy) the plan against an in-memory provider
    Simulate(SimulateArgs),
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&e);
        std::process::exit(1);
    }
}

/// Print error in a user-friendly way
fn print_error(e: &anyhow::Error) {
    use std::io::Write;

    let mut stderr = std::io::stderr();
    let _ = writeln!(stderr, "\n\x1b[1;31mError:\x1b[0m {e}");

    let mut source = e.source();
    while let Some(cause) = source {
        let _ = writeln!(stderr, "  \x1b[33mCaused by:\x1b[0m {cause}");
        source = cause.source();
    }

    if std::env::var("RUST_BACKTRACE").is_err() {
        let _ = writeln!(
            stderr,
            "\n\x1b[2mSet RUST_BACKTRACE=1 for a detailed backtrace\x1b[0m"
        );
    } else {
        let backtrace = e.backtrace();
        if backtrace.status() == std::backtrace::BacktraceStatus::Captured {
            let _ = writeln!(stderr, "\n\x1b[2mBacktrace:\x1b[0m\n{backtrace}");
        }
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(args.config.as_deref(), args.stack_name, args.region)?;
    let stack = phoenix_demo(&config)
        .with_context(|| format!("Failed to declare stack '{}'", config.stack_name))?;
    let plan = stack.plan().context("Failed to resolve the dependency graph")?;
    info!(stack = %stack.name(), nodes = plan.len(), edges = plan.edge_count(), "Resolved plan");

    match args.command {
        Command::Plan { format } => print_plan(&plan, format)?,
        Command::Graph => print!("{}", plan.to_dot(stack.name())),
        Command::DestroyOrder => {
            for (i, id) in plan.destruction_order().iter().enumerate() {
                println!("{:>3}  {id}", i + 1);
            }
        }
        Command::Simulate(sim) => simulate(&plan, &config, sim).await?,
    }

    Ok(())
}

/// Load the stack config and apply command-line overrides.
fn load_config(path: Option<&Path>, stack_name: Option<String>, region: Option<String>) -> Result<StackConfig> {
    let mut config = match path {
        Some(path) => StackConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => StackConfig::default(),
    };
    if let Some(name) = stack_name {
        config.stack_name = name;
    }
    if let Some(region) = region {
        config.region = region;
    }
    config.check().context("Invalid stack configuration")?;
    Ok(config)
}

fn print_plan(plan: &Plan, format: Format) -> Result<()> {
    match format {
        Format::Json => {
            println!("{}", serde_json::to_string_pretty(&plan.document())?);
        }
        Format::Table => {
            println!("{}", render::plan_table(plan));
            println!("\nTotal: {} nodes, {} edges", plan.len(), plan.edge_count());
        }
    }
    Ok(())
}

async fn simulate(plan: &Plan, config: &StackConfig, sim: SimulateArgs) -> Result<()> {
    let provider = Arc::new(
        MemoryProvider::new(&config.region, "123456789012")
            .with_latency(Duration::from_millis(sim.latency_ms)),
    );
    for node in &sim.fail {
        provider.fail(node.as_str());
    }
    for node in &sim.throttle {
        provider.throttle(node.as_str(), sim.throttle_times);
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing in-flight nodes");
            ctrl_c.cancel();
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            println!("{}", render::format_event(&event));
        }
    });

    let engine = Engine::new(
        provider.clone(),
        EngineConfig::fast(&config.stack_name).with_max_concurrency(sim.max_concurrency),
    )
    .with_cancellation(cancel)
    .with_events(tx);

    println!("Applying {} nodes", plan.len());
    let report = engine.apply(plan).await;
    let mut state = report.state.clone();

    let teardown = if sim.keep {
        None
    } else {
        println!("\nDestroying {} materialized nodes", state.len());
        Some(engine.destroy(plan, &mut state).await)
    };
    drop(engine);
    printer.await.context("Event printer stopped unexpectedly")?;

    println!("\n{}", render::apply_summary(&report));
    let teardown_failures = teardown.iter().flat_map(|t| &t.failed);
    for failure in report.failed.iter().chain(teardown_failures) {
        println!("{}", render::format_failure(failure));
    }
    if let Some(teardown) = &teardown {
        println!(
            "Destroyed {}, retained {}, left in provider {}",
            teardown.destroyed.len(),
            teardown.retained.len(),
            provider.resource_ids().len()
        );
    }

    if let Some(first) = report.failed.first() {
        anyhow::bail!(
            "{} node(s) failed to apply, {} skipped (first failure: {first})",
            report.failed.len(),
            report.skipped.len()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use phoenix_stack_test_utils::{test_stack_name, write_config};

    #[test]
    fn test_load_config_overrides() {
        let file = write_config(&StackConfig::default());
        let name = test_stack_name();
        let config = load_config(Some(file.path()), Some(name.clone()), Some("eu-west-1".to_string())).unwrap();
        assert_eq!(config.stack_name, name);
        assert_eq!(config.region, "eu-west-1");
    }

    #[test]
    fn test_load_config_rejects_invalid_file() {
        let config = StackConfig {
            max_azs: 0,
            ..StackConfig::default()
        };
        let file = write_config(&config);
        assert!(load_config(Some(file.path()), None, None).is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["phoenix-stack", "--stack-name", "demo", "plan", "--format", "json"]);
        assert_eq!(args.stack_name.as_deref(), Some("demo"));
        assert!(matches!(args.command, Command::Plan { format: Format::Json }));

        let args = Args::parse_from(["phoenix-stack", "simulate", "--fail", "Database", "--keep"]);
        let Command::Simulate(sim) = args.command else {
            panic!("expected simulate");
        };
        assert_eq!(sim.fail, vec!["Database"]);
        assert!(sim.keep);
    }
}
