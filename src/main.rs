use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use beamline_core::config::AppConfig;
use beamline_core::event::EventBus;
use beamline_core::types::{Params, RunId};
use beamline_engine::{
    AcceptAll, PlanNode, PredicateRegistry, RunFailure, RunLogger, RunReport, StepRegistry,
    WorkflowEngine,
};
use beamline_objective::{run_objective_as, LogRouter, NewObjective, ObjectiveRegistry};

#[derive(Parser)]
#[command(name = "beamline", version, about = "Workflow composition and execution engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "beamline.toml", env = "BEAMLINE_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a plan and print the resulting context and log
    Run {
        /// Plan file (JSON)
        #[arg(long)]
        plan: PathBuf,
        /// Run input as a JSON object
        #[arg(long)]
        input: Option<String>,
        /// Track the run as an objective with this name
        #[arg(long)]
        objective: Option<String>,
    },
    /// Check a plan against the built-in step units
    Validate {
        /// Plan file (JSON)
        #[arg(long)]
        plan: PathBuf,
    },
    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Validate { plan } => {
            let plan = load_plan(&plan)?;
            plan.validate(&StepRegistry::with_builtins(), &PredicateRegistry::new())?;
            println!("Plan OK: {} step(s)", plan.leaf_count());
        }
        Commands::Run {
            plan,
            input,
            objective,
        } => {
            let plan = load_plan(&plan)?;
            let input = parse_input(input.as_deref())?;
            run(config, plan, input, objective).await?;
        }
    }

    Ok(())
}

fn load_plan(path: &Path) -> anyhow::Result<PlanNode> {
    PlanNode::load(path).with_context(|| format!("loading plan {}", path.display()))
}

fn parse_input(raw: Option<&str>) -> anyhow::Result<Params> {
    match raw {
        Some(raw) => serde_json::from_str(raw).context("--input must be a JSON object"),
        None => Ok(Params::new()),
    }
}

async fn run(
    config: AppConfig,
    plan: PlanNode,
    input: Params,
    objective: Option<String>,
) -> anyhow::Result<()> {
    let event_bus = Arc::new(EventBus::new(config.engine.event_bus_capacity));
    let engine = WorkflowEngine::new(
        Arc::new(StepRegistry::with_builtins()),
        Arc::new(PredicateRegistry::new()),
    )
    .with_event_bus(event_bus.clone())
    .with_config(config.engine.clone());

    let run_id = RunId::new();
    let cancel = CancellationToken::new();
    let logger = match &config.log {
        Some(log) if log.enabled => {
            let logger = RunLogger::new(log.log_dir(), log.level);
            info!(path = %logger.log_path(&run_id).display(), "Run log enabled");
            Some(logger.spawn(&event_bus, run_id.clone(), cancel.clone()))
        }
        _ => None,
    };

    let outcome = match objective {
        Some(name) => {
            let registry = ObjectiveRegistry::spawn(
                Arc::new(LogRouter),
                config.objective.clone(),
                Some(event_bus.clone()),
            );
            let objective_id = registry.create(NewObjective::new(name)).await?;
            let run =
                run_objective_as(&registry, &objective_id, run_id, &engine, &plan, input).await?;
            eprintln!(
                "Objective {}: {}",
                objective_id,
                serde_json::to_string(&run.status)?
            );
            run.outcome
        }
        None => {
            let timeout = config.engine.global_timeout();
            engine.run_as(run_id, &plan, input, &AcceptAll, timeout).await
        }
    };

    if let Some(handle) = logger {
        // The logger stops on its own at RunComplete/RunError.
        if let Err(e) = handle.await {
            warn!(error = %e, "Run logger task failed");
        }
    }
    cancel.cancel();

    print_outcome(outcome)
}

fn print_outcome(outcome: Result<RunReport, RunFailure>) -> anyhow::Result<()> {
    match outcome {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(failure) => {
            let partial = serde_json::json!({
                "run_id": failure.run_id,
                "error": failure.error.to_string(),
                "elapsed_ms": failure.elapsed_ms,
                "context": failure.context,
                "log": failure.log,
            });
            println!("{}", serde_json::to_string_pretty(&partial)?);
            Err(failure.into())
        }
    }
}
