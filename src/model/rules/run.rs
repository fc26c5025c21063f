// src/model/rules/run.rs

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::config::model::{BuildImageSource, Container, ContainerName, ImageSource, PullImageSource};
use crate::model::events::{EventLog, TaskEvent};
use crate::model::rules::{RuleEvaluation, TaskStepRule};
use crate::model::steps::RunStep;

/// Rules making up the run stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "rule")]
pub enum RunStepRule {
    CreateNetwork,
    BuildImage {
        source: BuildImageSource,
        image_tags: BTreeSet<String>,
    },
    PullImage {
        source: PullImageSource,
    },
    /// Ready once the network exists and the container's image is available.
    CreateContainer {
        container: Arc<Container>,
    },
    /// Ready once created and every dependency is ready.
    StartContainer {
        container: ContainerName,
        dependencies: BTreeSet<ContainerName>,
    },
    WaitForContainerHealthy {
        container: ContainerName,
    },
    RunContainerSetupCommands {
        container: Arc<Container>,
    },
    /// Same readiness as `StartContainer`; used for the task container only.
    RunContainer {
        container: ContainerName,
        dependencies: BTreeSet<ContainerName>,
    },
}

impl TaskStepRule for RunStepRule {
    fn evaluate(&self, events: &EventLog) -> RuleEvaluation {
        let step = match self {
            RunStepRule::CreateNetwork => Some(RunStep::CreateNetwork),
            RunStepRule::BuildImage { source, image_tags } => Some(RunStep::BuildImage {
                source: source.clone(),
                image_tags: image_tags.clone(),
            }),
            RunStepRule::PullImage { source } => Some(RunStep::PullImage {
                source: source.clone(),
            }),
            RunStepRule::CreateContainer { container } => {
                evaluate_create_container(container, events)
            }
            RunStepRule::StartContainer {
                container,
                dependencies,
            } => created_with_ready_dependencies(container, dependencies, events).map(
                |runtime_id| RunStep::StartContainer {
                    container: container.clone(),
                    runtime_id,
                },
            ),
            RunStepRule::WaitForContainerHealthy { container } => {
                if events.container_started(container) {
                    events
                        .container_runtime_id(container)
                        .map(|id| RunStep::WaitForContainerHealthy {
                            container: container.clone(),
                            runtime_id: id.to_string(),
                        })
                } else {
                    None
                }
            }
            RunStepRule::RunContainerSetupCommands { container } => {
                if events.container_healthy(&container.name) {
                    events
                        .container_runtime_id(&container.name)
                        .map(|id| RunStep::RunContainerSetupCommands {
                            container: Arc::clone(container),
                            runtime_id: id.to_string(),
                        })
                } else {
                    None
                }
            }
            RunStepRule::RunContainer {
                container,
                dependencies,
            } => created_with_ready_dependencies(container, dependencies, events).map(
                |runtime_id| RunStep::RunContainer {
                    container: container.clone(),
                    runtime_id,
                },
            ),
        };

        match step {
            Some(step) => RuleEvaluation::Ready(step.into()),
            None => RuleEvaluation::NotReady,
        }
    }
}

fn evaluate_create_container(container: &Arc<Container>, events: &EventLog) -> Option<RunStep> {
    let network_id = events.network_id()?;
    let image_id = match &container.image_source {
        ImageSource::Build(source) => events.built_image_id(source)?,
        ImageSource::Pull(source) => events.pulled_image_id(source)?,
    };

    Some(RunStep::CreateContainer {
        container: Arc::clone(container),
        image_id: image_id.to_string(),
        network_id: network_id.to_string(),
    })
}

fn created_with_ready_dependencies(
    container: &str,
    dependencies: &BTreeSet<ContainerName>,
    events: &EventLog,
) -> Option<String> {
    let runtime_id = events.container_runtime_id(container)?;

    let ready: HashSet<&str> = events
        .iter()
        .filter_map(|e| match e {
            TaskEvent::ContainerBecameReady { container } => Some(container.as_str()),
            _ => None,
        })
        .collect();

    if dependencies.iter().all(|d| ready.contains(d.as_str())) {
        Some(runtime_id.to_string())
    } else {
        None
    }
}

impl fmt::Display for RunStepRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStepRule::CreateNetwork => f.write_str("CreateNetwork"),
            RunStepRule::BuildImage { source, image_tags } => {
                let tags: Vec<&str> = image_tags.iter().map(String::as_str).collect();
                write!(f, "BuildImage(source: {source}, tags: [{}])", tags.join(", "))
            }
            RunStepRule::PullImage { source } => write!(f, "PullImage(image: {source})"),
            RunStepRule::CreateContainer { container } => {
                write!(f, "CreateContainer(container: '{}')", container.name)
            }
            RunStepRule::StartContainer {
                container,
                dependencies,
            } => write!(
                f,
                "StartContainer(container: '{container}', dependencies: {})",
                format_names(dependencies)
            ),
            RunStepRule::WaitForContainerHealthy { container } => {
                write!(f, "WaitForContainerHealthy(container: '{container}')")
            }
            RunStepRule::RunContainerSetupCommands { container } => {
                write!(f, "RunContainerSetupCommands(container: '{}')", container.name)
            }
            RunStepRule::RunContainer {
                container,
                dependencies,
            } => write!(
                f,
                "RunContainer(container: '{container}', dependencies: {})",
                format_names(dependencies)
            ),
        }
    }
}

pub(crate) fn format_names(names: &BTreeSet<ContainerName>) -> String {
    let quoted: Vec<String> = names.iter().map(|n| format!("'{n}'")).collect();
    format!("[{}]", quoted.join(", "))
}
