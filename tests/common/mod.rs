#![allow(dead_code)]

pub use stevedore_test_utils::builders;
pub use stevedore_test_utils::{init_tracing, with_timeout};

use std::sync::Mutex;

use stevedore::engine::TaskStateMachine;
use stevedore::model::{CleanupStep, RunStep, TaskEvent, TaskEventSink, TaskStep};
use stevedore_test_utils::fake_runtime::{
    fake_built_image_id, fake_container_id, fake_pulled_image_id, FAKE_NETWORK_ID,
};

/// Sink that keeps every event posted to it.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<TaskEvent>>,
}

impl CollectingSink {
    pub fn events(&self) -> Vec<TaskEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Events with informational ones removed.
    pub fn facts(&self) -> Vec<TaskEvent> {
        self.events()
            .into_iter()
            .filter(|e| !e.is_informational())
            .collect()
    }
}

impl TaskEventSink for CollectingSink {
    fn post_event(&self, event: TaskEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Events a successful run of `step` would produce, using the fake runtime's ids.
pub fn successful_outcome(step: &TaskStep) -> Vec<TaskEvent> {
    match step {
        TaskStep::Run(run) => match run {
            RunStep::CreateNetwork => vec![TaskEvent::NetworkCreated {
                network_id: FAKE_NETWORK_ID.to_string(),
            }],
            RunStep::BuildImage { source, .. } => vec![TaskEvent::ImageBuilt {
                source: source.clone(),
                image_id: fake_built_image_id(source),
            }],
            RunStep::PullImage { source } => vec![TaskEvent::ImagePulled {
                source: source.clone(),
                image_id: fake_pulled_image_id(source),
            }],
            RunStep::CreateContainer { container, .. } => vec![TaskEvent::ContainerCreated {
                container: container.name.clone(),
                runtime_id: fake_container_id(&container.name),
            }],
            RunStep::StartContainer { container, .. } => vec![TaskEvent::ContainerStarted {
                container: container.clone(),
            }],
            RunStep::WaitForContainerHealthy { container, .. } => {
                vec![TaskEvent::ContainerBecameHealthy {
                    container: container.clone(),
                }]
            }
            RunStep::RunContainerSetupCommands { container, .. } => {
                vec![TaskEvent::ContainerBecameReady {
                    container: container.name.clone(),
                }]
            }
            RunStep::RunContainer { container, .. } => vec![
                TaskEvent::ContainerStarted {
                    container: container.clone(),
                },
                TaskEvent::ContainerExited {
                    container: container.clone(),
                    exit_code: 0,
                },
            ],
        },
        TaskStep::Cleanup(cleanup) => match cleanup {
            CleanupStep::StopContainer { container, .. } => vec![TaskEvent::ContainerStopped {
                container: container.clone(),
            }],
            CleanupStep::RemoveContainer { container, .. } => vec![TaskEvent::ContainerRemoved {
                container: container.clone(),
            }],
            CleanupStep::DeleteNetwork { network_id } => vec![TaskEvent::NetworkDeleted {
                network_id: network_id.clone(),
            }],
            CleanupStep::DeleteTemporaryFile { path } => {
                vec![TaskEvent::TemporaryFileDeleted { path: path.clone() }]
            }
            CleanupStep::DeleteTemporaryDirectory { path } => {
                vec![TaskEvent::TemporaryDirectoryDeleted { path: path.clone() }]
            }
        },
    }
}

/// Drive the state machine synchronously: every batch of ready steps is
/// completed (via `respond`) before the next batch is requested.
///
/// Returns the batches in dispatch order.
pub fn drive(
    machine: &mut TaskStateMachine,
    mut respond: impl FnMut(&TaskStep) -> Vec<TaskEvent>,
) -> Vec<Vec<TaskStep>> {
    let mut batches = Vec::new();

    for _ in 0..1000 {
        let steps = machine
            .next_steps(0)
            .expect("state machine reported an internal error");

        if steps.is_empty() {
            assert!(machine.is_finished(), "no steps returned but not finished");
            return batches;
        }

        for step in steps.iter() {
            for event in respond(step) {
                machine.post_event(event);
            }
        }
        batches.push(steps);
    }

    panic!("state machine did not finish after 1000 batches");
}

/// Every step in dispatch order.
pub fn flatten(batches: &[Vec<TaskStep>]) -> Vec<TaskStep> {
    batches.iter().flatten().cloned().collect()
}

/// Index of the first batch containing a step matching `predicate`.
pub fn batch_of(batches: &[Vec<TaskStep>], predicate: impl Fn(&TaskStep) -> bool) -> Option<usize> {
    batches.iter().position(|batch| batch.iter().any(&predicate))
}

/// Display names of every step, in dispatch order.
pub fn step_names(batches: &[Vec<TaskStep>]) -> Vec<String> {
    flatten(batches).iter().map(|s| s.to_string()).collect()
}
