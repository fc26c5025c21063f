// src/engine/runtime.rs

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dag::DependencyGraph;
use crate::errors::{Result, StevedoreError};
use crate::exec::{ContainerRuntime, TaskStepRunner};
use crate::model::events::{TaskEvent, TaskEventSink};
use crate::model::steps::TaskStep;

use super::core::TaskStateMachine;
use super::observer::TaskEventObserver;
use super::{RunOptions, TaskRunResult};

/// Messages flowing from step tasks (and the Ctrl-C handler) to the
/// scheduler loop.
#[derive(Debug, Clone)]
pub enum ExecutionMessage {
    Event(TaskEvent),
    /// Sent exactly once per dispatched step, after all of its events.
    StepFinished(TaskStep),
    CancellationRequested,
}

/// Requests cancellation of a running [`ExecutionManager`].
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    tx: mpsc::UnboundedSender<ExecutionMessage>,
}

impl CancellationHandle {
    pub fn cancel(&self) {
        if self.tx.send(ExecutionMessage::CancellationRequested).is_err() {
            debug!("cancellation requested after execution finished");
        }
    }
}

/// Sink handed to each step: observers see events immediately, the
/// scheduler receives them over the channel.
struct ChannelEventSink {
    tx: mpsc::UnboundedSender<ExecutionMessage>,
    observer: Arc<dyn TaskEventObserver>,
}

impl TaskEventSink for ChannelEventSink {
    fn post_event(&self, event: TaskEvent) {
        self.observer.on_event(&event);

        if event.is_informational() {
            return;
        }

        if self.tx.send(ExecutionMessage::Event(event)).is_err() {
            warn!("execution loop has stopped; dropping event");
        }
    }
}

/// Drives the [`TaskStateMachine`]: dispatches the steps it hands out onto
/// Tokio tasks and feeds their events back in.
///
/// This is a pure IO shell around the state machine, which contains all the
/// scheduling semantics.
pub struct ExecutionManager {
    state: TaskStateMachine,
    runner: TaskStepRunner,
    observer: Arc<dyn TaskEventObserver>,
    tx: mpsc::UnboundedSender<ExecutionMessage>,
    rx: mpsc::UnboundedReceiver<ExecutionMessage>,
    run_cancellation: CancellationToken,
    cleanup_cancellation: CancellationToken,
    steps_in_flight: usize,
}

impl fmt::Debug for ExecutionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionManager")
            .field("state", &self.state)
            .field("steps_in_flight", &self.steps_in_flight)
            .finish_non_exhaustive()
    }
}

impl ExecutionManager {
    pub fn new(
        graph: DependencyGraph,
        options: RunOptions,
        runtime: Arc<dyn ContainerRuntime>,
        observer: Arc<dyn TaskEventObserver>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            state: TaskStateMachine::new(graph, options),
            runner: TaskStepRunner::new(runtime),
            observer,
            tx,
            rx,
            run_cancellation: CancellationToken::new(),
            cleanup_cancellation: CancellationToken::new(),
            steps_in_flight: 0,
        }
    }

    pub fn cancellation_handle(&self) -> CancellationHandle {
        CancellationHandle {
            tx: self.tx.clone(),
        }
    }

    /// Main loop.
    ///
    /// - Asks the state machine for ready steps and spawns them.
    /// - Waits for step events, completions or cancellation.
    /// - Returns once both stages are done.
    pub async fn run(mut self) -> Result<TaskRunResult> {
        info!(
            task_container = %self.state.graph().task_container_node().name(),
            containers = self.state.graph().len(),
            "starting task"
        );

        loop {
            let steps = self.state.next_steps(self.steps_in_flight)?;
            self.forward_raised_events();
            for step in steps {
                self.dispatch(step);
            }

            if self.steps_in_flight == 0 {
                if self.state.is_finished() {
                    break;
                }
                return Err(StevedoreError::InternalError(
                    "no steps are running but the task has not finished".to_string(),
                ));
            }

            // The loop holds a sender, so the channel never closes here.
            let Some(message) = self.rx.recv().await else {
                return Err(StevedoreError::InternalError(
                    "execution channel closed unexpectedly".to_string(),
                ));
            };

            self.handle_message(message);
        }

        let result = self.state.into_result();
        info!(exit_code = result.exit_code, "task finished");
        Ok(result)
    }

    fn handle_message(&mut self, message: ExecutionMessage) {
        match message {
            ExecutionMessage::Event(event) => self.state.post_event(event),
            ExecutionMessage::StepFinished(step) => {
                debug!(step = %step, "step finished");
                self.steps_in_flight = self.steps_in_flight.saturating_sub(1);
            }
            ExecutionMessage::CancellationRequested => {
                if !self.run_cancellation.is_cancelled() {
                    self.state.request_cancellation();
                    self.forward_raised_events();
                    self.run_cancellation.cancel();
                }
            }
        }
    }

    /// Observers see events the state machine raised itself, like step events.
    fn forward_raised_events(&mut self) {
        for event in self.state.take_raised_events() {
            self.observer.on_event(&event);
        }
    }

    fn dispatch(&mut self, step: TaskStep) {
        debug!(step = %step, "dispatching step");
        self.steps_in_flight += 1;

        let cancel = if step.is_cleanup() {
            self.cleanup_cancellation.clone()
        } else {
            self.run_cancellation.clone()
        };

        let sink = Arc::new(ChannelEventSink {
            tx: self.tx.clone(),
            observer: Arc::clone(&self.observer),
        });
        let runner = self.runner.clone();
        let tx = self.tx.clone();

        // Supervisor: a panicking step still reports failure and completion.
        tokio::spawn(async move {
            let step_sink = Arc::clone(&sink);
            let step_to_run = step.clone();
            let handle = tokio::spawn(async move {
                runner.run(step_to_run, step_sink.as_ref(), &cancel).await;
            });

            if let Err(join_error) = handle.await {
                sink.post_event(TaskEvent::StepFailed {
                    step: step.clone(),
                    message: format!("step did not complete: {join_error}"),
                });
            }

            if tx.send(ExecutionMessage::StepFinished(step)).is_err() {
                warn!("execution loop has stopped; dropping step completion");
            }
        });
    }
}
