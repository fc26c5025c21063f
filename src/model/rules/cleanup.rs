// src/model/rules/cleanup.rs

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::config::model::ContainerName;
use crate::model::events::EventLog;
use crate::model::rules::run::format_names;
use crate::model::rules::{RuleEvaluation, TaskStepRule};
use crate::model::steps::CleanupStep;

/// Rules making up the cleanup stage.
///
/// Each one exists only for a resource the run stage actually created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "rule")]
pub enum CleanupStepRule {
    /// Ready once every started dependent has been stopped.
    StopContainer {
        container: ContainerName,
        runtime_id: String,
        must_stop_first: BTreeSet<ContainerName>,
    },
    /// Ready immediately if the container never started, otherwise once stopped.
    RemoveContainer {
        container: ContainerName,
        runtime_id: String,
        was_started: bool,
    },
    /// Ready once every created container has been removed.
    DeleteNetwork {
        network_id: String,
        must_remove_first: BTreeSet<ContainerName>,
    },
    DeleteTemporaryFile {
        path: PathBuf,
        owner: Option<ContainerName>,
    },
    DeleteTemporaryDirectory {
        path: PathBuf,
        owner: Option<ContainerName>,
    },
}

/// Presentation order for manual cleanup instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ManualCleanupSortOrder {
    DeleteNetwork,
    StopContainer,
    RemoveContainer,
    DeleteTemporaryFile,
    DeleteTemporaryDirectory,
}

impl CleanupStepRule {
    /// Shell command a user can run to do this step by hand, if one is needed.
    ///
    /// Stopping has no instruction: removal uses `--force`.
    pub fn manual_cleanup_instruction(&self) -> Option<String> {
        match self {
            CleanupStepRule::StopContainer { .. } => None,
            CleanupStepRule::RemoveContainer { runtime_id, .. } => {
                Some(format!("docker rm --force --volumes {runtime_id}"))
            }
            CleanupStepRule::DeleteNetwork { network_id, .. } => {
                Some(format!("docker network rm {network_id}"))
            }
            CleanupStepRule::DeleteTemporaryFile { path, .. } => {
                Some(format!("rm {}", path.display()))
            }
            CleanupStepRule::DeleteTemporaryDirectory { path, .. } => {
                Some(format!("rm -rf {}", path.display()))
            }
        }
    }

    pub fn manual_cleanup_sort_order(&self) -> ManualCleanupSortOrder {
        match self {
            CleanupStepRule::StopContainer { .. } => ManualCleanupSortOrder::StopContainer,
            CleanupStepRule::RemoveContainer { .. } => ManualCleanupSortOrder::RemoveContainer,
            CleanupStepRule::DeleteNetwork { .. } => ManualCleanupSortOrder::DeleteNetwork,
            CleanupStepRule::DeleteTemporaryFile { .. } => {
                ManualCleanupSortOrder::DeleteTemporaryFile
            }
            CleanupStepRule::DeleteTemporaryDirectory { .. } => {
                ManualCleanupSortOrder::DeleteTemporaryDirectory
            }
        }
    }
}

impl TaskStepRule for CleanupStepRule {
    fn evaluate(&self, events: &EventLog) -> RuleEvaluation {
        let step = match self {
            CleanupStepRule::StopContainer {
                container,
                runtime_id,
                must_stop_first,
            } => must_stop_first
                .iter()
                .all(|c| events.container_stopped(c))
                .then(|| CleanupStep::StopContainer {
                    container: container.clone(),
                    runtime_id: runtime_id.clone(),
                }),
            CleanupStepRule::RemoveContainer {
                container,
                runtime_id,
                was_started,
            } => (!was_started || events.container_stopped(container)).then(|| {
                CleanupStep::RemoveContainer {
                    container: container.clone(),
                    runtime_id: runtime_id.clone(),
                }
            }),
            CleanupStepRule::DeleteNetwork {
                network_id,
                must_remove_first,
            } => must_remove_first
                .iter()
                .all(|c| events.container_removed(c))
                .then(|| CleanupStep::DeleteNetwork {
                    network_id: network_id.clone(),
                }),
            CleanupStepRule::DeleteTemporaryFile { path, owner } => {
                owner_removed(owner.as_deref(), events).then(|| CleanupStep::DeleteTemporaryFile {
                    path: path.clone(),
                })
            }
            CleanupStepRule::DeleteTemporaryDirectory { path, owner } => {
                owner_removed(owner.as_deref(), events).then(|| {
                    CleanupStep::DeleteTemporaryDirectory { path: path.clone() }
                })
            }
        };

        match step {
            Some(step) => RuleEvaluation::Ready(step.into()),
            None => RuleEvaluation::NotReady,
        }
    }
}

fn owner_removed(owner: Option<&str>, events: &EventLog) -> bool {
    owner.is_none_or(|c| events.container_removed(c))
}

impl fmt::Display for CleanupStepRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupStepRule::StopContainer {
                container,
                must_stop_first,
                ..
            } => write!(
                f,
                "StopContainer(container: '{container}', must stop first: {})",
                format_names(must_stop_first)
            ),
            CleanupStepRule::RemoveContainer {
                container,
                was_started,
                ..
            } => write!(
                f,
                "RemoveContainer(container: '{container}', was started: {was_started})"
            ),
            CleanupStepRule::DeleteNetwork {
                network_id,
                must_remove_first,
            } => write!(
                f,
                "DeleteNetwork(network: '{network_id}', must remove first: {})",
                format_names(must_remove_first)
            ),
            CleanupStepRule::DeleteTemporaryFile { path, owner } => write!(
                f,
                "DeleteTemporaryFile(path: '{}', owner: {})",
                path.display(),
                owner.as_deref().unwrap_or("none")
            ),
            CleanupStepRule::DeleteTemporaryDirectory { path, owner } => write!(
                f,
                "DeleteTemporaryDirectory(path: '{}', owner: {})",
                path.display(),
                owner.as_deref().unwrap_or("none")
            ),
        }
    }
}
