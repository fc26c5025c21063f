// src/engine/sequence.rs

//! Runs a resolved list of tasks one after another.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::model::{ConfigFile, TaskDefinition};
use crate::dag::DependencyGraph;
use crate::errors::Result;
use crate::exec::ContainerRuntime;
use crate::model::events::TaskEvent;

use super::core::INTERNAL_FAILURE_EXIT_CODE;
use super::observer::TaskEventObserver;
use super::runtime::ExecutionManager;
use super::{RunOptions, TaskRunResult};

/// The result of one task in a sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub task: String,
    pub result: TaskRunResult,
}

/// Run `tasks` in order, each with its own graph and execution manager.
///
/// The first task that does not succeed ends the sequence; it is the last
/// entry of the returned outcomes. Cancelling `interrupted` cancels the
/// running task, and no further task is started.
pub async fn run_task_sequence(
    config: &ConfigFile,
    tasks: &[&TaskDefinition],
    options: RunOptions,
    runtime_for: impl Fn(&DependencyGraph) -> Arc<dyn ContainerRuntime>,
    observer: Arc<dyn TaskEventObserver>,
    interrupted: &CancellationToken,
) -> Result<Vec<TaskOutcome>> {
    let mut outcomes = Vec::with_capacity(tasks.len());

    for (index, task) in tasks.iter().enumerate() {
        if interrupted.is_cancelled() {
            warn!(task = %task.name, "interrupted; not starting task");
            outcomes.push(TaskOutcome {
                task: task.name.clone(),
                result: TaskRunResult {
                    exit_code: INTERNAL_FAILURE_EXIT_CODE,
                    failures: vec![TaskEvent::UserInterrupted.to_string()],
                    manual_cleanup: None,
                },
            });
            break;
        }

        info!(task = %task.name, position = index + 1, total = tasks.len(), "running task");

        let graph = DependencyGraph::for_task(config, &task.name)?;
        let runtime = runtime_for(&graph);
        let manager = ExecutionManager::new(graph, options, runtime, Arc::clone(&observer));

        let forward = {
            let handle = manager.cancellation_handle();
            let interrupted = interrupted.clone();
            tokio::spawn(async move {
                interrupted.cancelled().await;
                handle.cancel();
            })
        };

        let result = manager.run().await;
        forward.abort();
        let result = result?;

        let succeeded = result.succeeded();
        outcomes.push(TaskOutcome {
            task: task.name.clone(),
            result,
        });

        if !succeeded {
            if index + 1 < tasks.len() {
                warn!(task = %task.name, "task did not succeed; skipping the tasks after it");
            }
            break;
        }
    }

    Ok(outcomes)
}
