// src/model/steps.rs

//! Units of work handed from the scheduler to the step runner.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::config::model::{BuildImageSource, Container, ContainerName, PullImageSource};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "stage", content = "step")]
pub enum TaskStep {
    Run(RunStep),
    Cleanup(CleanupStep),
}

impl TaskStep {
    pub fn is_cleanup(&self) -> bool {
        matches!(self, TaskStep::Cleanup(_))
    }

    /// Container this step acts on, if any.
    pub fn container_name(&self) -> Option<&str> {
        match self {
            TaskStep::Run(step) => step.container_name(),
            TaskStep::Cleanup(step) => step.container_name(),
        }
    }
}

impl fmt::Display for TaskStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStep::Run(step) => step.fmt(f),
            TaskStep::Cleanup(step) => step.fmt(f),
        }
    }
}

impl From<RunStep> for TaskStep {
    fn from(step: RunStep) -> Self {
        TaskStep::Run(step)
    }
}

impl From<CleanupStep> for TaskStep {
    fn from(step: CleanupStep) -> Self {
        TaskStep::Cleanup(step)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type")]
pub enum RunStep {
    CreateNetwork,
    BuildImage {
        source: BuildImageSource,
        image_tags: BTreeSet<String>,
    },
    PullImage {
        source: PullImageSource,
    },
    CreateContainer {
        container: Arc<Container>,
        image_id: String,
        network_id: String,
    },
    StartContainer {
        container: ContainerName,
        runtime_id: String,
    },
    WaitForContainerHealthy {
        container: ContainerName,
        runtime_id: String,
    },
    RunContainerSetupCommands {
        container: Arc<Container>,
        runtime_id: String,
    },
    /// Start the task container attached and wait for it to exit.
    RunContainer {
        container: ContainerName,
        runtime_id: String,
    },
}

impl RunStep {
    pub fn container_name(&self) -> Option<&str> {
        match self {
            RunStep::CreateNetwork | RunStep::BuildImage { .. } | RunStep::PullImage { .. } => None,
            RunStep::CreateContainer { container, .. }
            | RunStep::RunContainerSetupCommands { container, .. } => Some(&container.name),
            RunStep::StartContainer { container, .. }
            | RunStep::WaitForContainerHealthy { container, .. }
            | RunStep::RunContainer { container, .. } => Some(container),
        }
    }
}

impl fmt::Display for RunStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStep::CreateNetwork => f.write_str("create task network"),
            RunStep::BuildImage { source, .. } => write!(f, "build image from {source}"),
            RunStep::PullImage { source } => write!(f, "pull image '{source}'"),
            RunStep::CreateContainer { container, .. } => {
                write!(f, "create container '{}'", container.name)
            }
            RunStep::StartContainer { container, .. } => write!(f, "start container '{container}'"),
            RunStep::WaitForContainerHealthy { container, .. } => {
                write!(f, "wait for container '{container}' to become healthy")
            }
            RunStep::RunContainerSetupCommands { container, .. } => {
                write!(f, "run setup commands for container '{}'", container.name)
            }
            RunStep::RunContainer { container, .. } => write!(f, "run container '{container}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type")]
pub enum CleanupStep {
    StopContainer {
        container: ContainerName,
        runtime_id: String,
    },
    RemoveContainer {
        container: ContainerName,
        runtime_id: String,
    },
    DeleteNetwork {
        network_id: String,
    },
    DeleteTemporaryFile {
        path: PathBuf,
    },
    DeleteTemporaryDirectory {
        path: PathBuf,
    },
}

impl CleanupStep {
    pub fn container_name(&self) -> Option<&str> {
        match self {
            CleanupStep::StopContainer { container, .. }
            | CleanupStep::RemoveContainer { container, .. } => Some(container),
            _ => None,
        }
    }
}

impl fmt::Display for CleanupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupStep::StopContainer { container, .. } => write!(f, "stop container '{container}'"),
            CleanupStep::RemoveContainer { container, .. } => {
                write!(f, "remove container '{container}'")
            }
            CleanupStep::DeleteNetwork { network_id } => write!(f, "delete network '{network_id}'"),
            CleanupStep::DeleteTemporaryFile { path } => {
                write!(f, "delete temporary file '{}'", path.display())
            }
            CleanupStep::DeleteTemporaryDirectory { path } => {
                write!(f, "delete temporary directory '{}'", path.display())
            }
        }
    }
}
