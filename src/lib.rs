// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod model;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::dag::{resolve_execution_order, DependencyGraph};
use crate::engine::{run_task_sequence, LoggingObserver, TaskRunResult};
use crate::exec::{ContainerRuntime, DockerCli};
use crate::model::stages::RunStagePlanner;

/// High-level entry point used by `main.rs`. Returns the process exit code.
///
/// This wires together:
/// - config loading
/// - prerequisite resolution
/// - dependency graph construction for each task
/// - the execution manager and docker runtime
/// - Ctrl-C handling
///
/// Tasks run one after another; the first that does not succeed stops the
/// run and its exit code is returned.

pub async fn run(args: CliArgs) -> Result<i32> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    let tasks = resolve_execution_order(&cfg, &args.task, args.skip_prerequisites)?;

    if args.dry_run {
        let names: Vec<&str> = tasks.iter().map(|t| t.name.as_str()).collect();
        println!("execution order: {}", names.join(" -> "));
        for task in tasks {
            println!();
            let graph = DependencyGraph::for_task(&cfg, &task.name)?;
            print_dry_run(&task.name, &graph)?;
        }
        return Ok(0);
    }

    // Ctrl-C → stop run steps of the current task, then clean up.
    let interrupted = CancellationToken::new();
    {
        let interrupted = interrupted.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            interrupted.cancel();
        });
    }

    let outcomes = run_task_sequence(
        &cfg,
        &tasks,
        args.run_options(),
        |graph: &DependencyGraph| -> Arc<dyn ContainerRuntime> {
            Arc::new(DockerCli::new(graph.project_name()))
        },
        Arc::new(LoggingObserver),
        &interrupted,
    )
    .await?;

    for outcome in outcomes.iter() {
        print_summary(&outcome.task, &outcome.result);
    }

    Ok(outcomes
        .last()
        .filter(|outcome| !outcome.result.succeeded())
        .map_or(0, |outcome| exit_code_for(&outcome.result)))
}

/// Process exit code for a finished task.
pub fn exit_code_for(result: &TaskRunResult) -> i32 {
    i32::try_from(result.exit_code).unwrap_or(-1)
}

fn print_summary(task: &str, result: &TaskRunResult) {
    if !result.failures.is_empty() {
        eprintln!();
        eprintln!("The task '{task}' failed:");
        for failure in result.failures.iter() {
            eprintln!("  - {failure}");
        }
    }

    if let Some(manual) = &result.manual_cleanup {
        eprintln!();
        eprintln!(
            "Some resources were not cleaned up ({}). Run these commands to remove them:",
            manual.reason
        );
        for instruction in manual.instructions.iter() {
            eprintln!("  {instruction}");
        }
    }

    info!(
        task,
        exit_code = result.exit_code,
        failures = result.failures.len(),
        "task complete"
    );
}

/// Print the task container, startup order and run rules.
fn print_dry_run(task: &str, graph: &DependencyGraph) -> Result<()> {
    println!("stevedore dry-run");
    println!("  project = {}", graph.project_name());
    println!("  task = {task}");
    println!(
        "  task container = {}",
        graph.task_container_node().name()
    );
    println!();

    println!("startup order ({}):", graph.len());
    for name in graph.startup_order()? {
        let Some(node) = graph.node_for(&name) else {
            continue;
        };
        println!("  - {name}");
        if !node.depends_on().is_empty() {
            let deps: Vec<&str> = node.depends_on().iter().map(String::as_str).collect();
            println!("      depends on: {}", deps.join(", "));
        }
        if let Some(command) = &node.container().command {
            println!("      command: {command}");
        }
    }
    println!();

    let stage = RunStagePlanner::create_stage(graph);
    println!("run rules ({}):", stage.pending_rules().len());
    for rule in stage.pending_rules() {
        println!("  - {rule}");
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
