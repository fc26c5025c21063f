// src/engine/core.rs

//! Pure core state machine.
//!
//! [`TaskStateMachine`] owns the event log and the active stage. It is fed
//! events and asked for the next steps to dispatch; it never performs IO,
//! spawns tasks or touches channels. The async shell
//! (`engine::runtime::ExecutionManager`) drives it.

use tracing::{debug, error, info, warn};

use crate::dag::DependencyGraph;
use crate::engine::{ManualCleanup, RunOptions, TaskRunResult};
use crate::errors::{Result, StevedoreError};
use crate::model::events::{EventLog, TaskEvent};
use crate::model::rules::CleanupStepRule;
use crate::model::stages::{
    manual_cleanup_commands, CleanupStage, CleanupStagePlanner, RunStage, RunStagePlanner,
};
use crate::model::steps::TaskStep;
use crate::types::{CleanupOption, ManualCleanupReason};

/// Exit code reported when the task container never produced one.
pub const INTERNAL_FAILURE_EXIT_CODE: i64 = -1;

/// Which stage the state machine is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Run,
    Cleanup,
    Finished,
}

#[derive(Debug)]
pub struct TaskStateMachine {
    graph: DependencyGraph,
    options: RunOptions,
    events: EventLog,
    run_stage: RunStage,
    cleanup_stage: Option<CleanupStage>,
    cleanup_option: CleanupOption,
    abandoned_cleanup_rules: Vec<CleanupStepRule>,
    /// Events raised by the machine itself, not yet handed to observers.
    raised: Vec<TaskEvent>,
    internal_failure: bool,
    finished: bool,
}

impl TaskStateMachine {
    pub fn new(graph: DependencyGraph, options: RunOptions) -> Self {
        let run_stage = RunStagePlanner::create_stage(&graph);
        Self {
            graph,
            options,
            events: EventLog::new(),
            run_stage,
            cleanup_stage: None,
            cleanup_option: CleanupOption::Cleanup,
            abandoned_cleanup_rules: Vec::new(),
            raised: Vec::new(),
            internal_failure: false,
            finished: false,
        }
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn stage(&self) -> StageKind {
        if self.finished {
            StageKind::Finished
        } else if self.cleanup_stage.is_some() {
            StageKind::Cleanup
        } else {
            StageKind::Run
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Record an event. Informational and duplicate events are dropped.
    pub fn post_event(&mut self, event: TaskEvent) {
        debug!(event = %event.to_json(), "event posted");

        if event.is_failure() {
            warn!(stage = ?self.stage(), "{}", event);
        }

        self.events.append(event);
    }

    /// Stop dispatching run steps; cleanup starts once in-flight steps finish.
    pub fn request_cancellation(&mut self) {
        if self.stage() == StageKind::Run {
            info!("cancellation requested");
            self.raise(TaskEvent::UserInterrupted);
        }
    }

    /// Events the machine recorded on its own (cancellation, deadlocks)
    /// since the last call. Step events are not included.
    pub fn take_raised_events(&mut self) -> Vec<TaskEvent> {
        std::mem::take(&mut self.raised)
    }

    /// Steps that are safe to dispatch now.
    ///
    /// `steps_in_flight` is the number of dispatched steps that have not yet
    /// reported completion. An empty result with nothing in flight means the
    /// machine has finished.
    pub fn next_steps(&mut self, steps_in_flight: usize) -> Result<Vec<TaskStep>> {
        loop {
            match self.stage() {
                StageKind::Finished => return Ok(Vec::new()),
                StageKind::Run => {
                    if self.run_stage_complete() {
                        if steps_in_flight > 0 {
                            return Ok(Vec::new());
                        }
                        self.begin_cleanup();
                        continue;
                    }

                    let limit = self.available_slots(steps_in_flight);
                    if limit == Some(0) {
                        return Ok(Vec::new());
                    }

                    let steps = self.run_stage.pop_ready_steps(&self.events, limit);
                    if !steps.is_empty() || steps_in_flight > 0 {
                        return Ok(steps);
                    }

                    if self.run_stage.has_pending_rules() {
                        self.report_run_stage_deadlock();
                    }
                    self.begin_cleanup();
                }
                StageKind::Cleanup => {
                    let limit = self.available_slots(steps_in_flight);
                    if limit == Some(0) {
                        return Ok(Vec::new());
                    }

                    let Some(stage) = self.cleanup_stage.as_mut() else {
                        return Err(StevedoreError::InternalError(
                            "cleanup stage missing".to_string(),
                        ));
                    };

                    let steps = stage.rules.pop_ready_steps(&self.events, limit);
                    if !steps.is_empty() || steps_in_flight > 0 {
                        return Ok(steps);
                    }

                    if stage.rules.has_pending_rules() {
                        if !self.events.any(TaskEvent::is_cleanup_failure) {
                            let pending: Vec<String> =
                                stage.rules.pending_rules().iter().map(|r| r.to_string()).collect();
                            error!(?pending, "cleanup stage cannot make progress");
                            return Err(StevedoreError::InternalError(format!(
                                "cleanup stage has pending rules but none are ready and no steps are running: {}",
                                pending.join(", ")
                            )));
                        }

                        let abandoned = stage.rules.abandon_pending();
                        warn!(
                            count = abandoned.len(),
                            "abandoning cleanup rules that can no longer run"
                        );
                        self.abandoned_cleanup_rules.extend(abandoned);
                    }

                    info!("cleanup stage finished");
                    self.finished = true;
                    return Ok(Vec::new());
                }
            }
        }
    }

    /// Outcome of the task. Meaningful once [`is_finished`](Self::is_finished).
    pub fn result(&self) -> TaskRunResult {
        let exit_code = if self.run_failed() {
            INTERNAL_FAILURE_EXIT_CODE
        } else {
            self.events
                .container_exit_code(self.graph.task_container_node().name())
                .unwrap_or(INTERNAL_FAILURE_EXIT_CODE)
        };

        let failures = self
            .events
            .iter()
            .filter(|e| e.is_failure())
            .map(|e| e.to_string())
            .collect();

        TaskRunResult {
            exit_code,
            failures,
            manual_cleanup: self.manual_cleanup(),
        }
    }

    pub fn into_result(self) -> TaskRunResult {
        self.result()
    }

    fn run_stage_complete(&self) -> bool {
        let task_container = self.graph.task_container_node().name();

        self.events.has_failure()
            || self.events.container_exit_code(task_container).is_some()
            || !self.run_stage.has_pending_rules()
    }

    fn run_failed(&self) -> bool {
        self.internal_failure
            || self
                .events
                .any(|e| e.is_failure() && !e.is_cleanup_failure())
    }

    fn available_slots(&self, steps_in_flight: usize) -> Option<usize> {
        self.options
            .max_parallelism
            .map(|max| max.max(1).saturating_sub(steps_in_flight))
    }

    fn report_run_stage_deadlock(&mut self) {
        let pending: Vec<String> = self
            .run_stage
            .pending_rules()
            .iter()
            .map(|r| r.to_string())
            .collect();

        error!(?pending, "run stage cannot make progress");

        self.internal_failure = true;
        self.raise(TaskEvent::TaskFailed {
            message: format!(
                "internal error: no steps are ready or running, but rules are still pending: {}",
                pending.join(", ")
            ),
        });
    }

    fn raise(&mut self, event: TaskEvent) {
        self.raised.push(event.clone());
        self.post_event(event);
    }

    fn begin_cleanup(&mut self) {
        self.cleanup_option = if self.run_failed() {
            self.options.cleanup_after_failure
        } else {
            self.options.cleanup_after_success
        };

        info!(
            failed = self.run_failed(),
            cleanup = ?self.cleanup_option,
            "run stage finished, starting cleanup"
        );

        self.cleanup_stage = Some(CleanupStagePlanner::create_stage(
            &self.graph,
            &self.events,
            self.cleanup_option,
        ));
    }

    fn manual_cleanup(&self) -> Option<ManualCleanup> {
        let stage = self.cleanup_stage.as_ref()?;

        if self.cleanup_option == CleanupOption::DontCleanup {
            if stage.manual_cleanup_commands.is_empty() {
                return None;
            }
            return Some(ManualCleanup {
                reason: ManualCleanupReason::CleanupDisabled,
                instructions: stage.manual_cleanup_commands.clone(),
            });
        }

        let failed_rules = stage.rules.fired_rules().iter().filter_map(|(rule, step)| {
            self.events
                .any(|e| matches!(e, TaskEvent::StepFailed { step: failed, .. } if failed == step))
                .then_some(rule)
        });

        let instructions =
            manual_cleanup_commands(failed_rules.chain(self.abandoned_cleanup_rules.iter()));

        if instructions.is_empty() {
            None
        } else {
            Some(ManualCleanup {
                reason: ManualCleanupReason::CleanupFailed,
                instructions,
            })
        }
    }
}
