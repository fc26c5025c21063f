// src/model/events.rs

//! Facts learned while running a task, and the append-only log that holds them.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::config::model::{BuildImageSource, ContainerName, PullImageSource};
use crate::model::steps::TaskStep;

/// Something that happened while running a task.
///
/// Every variant is a fact; nothing in the log is ever changed or removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum TaskEvent {
    NetworkCreated {
        network_id: String,
    },
    NetworkDeleted {
        network_id: String,
    },
    ImageBuilt {
        source: BuildImageSource,
        image_id: String,
    },
    ImagePulled {
        source: PullImageSource,
        image_id: String,
    },
    ContainerCreated {
        container: ContainerName,
        runtime_id: String,
    },
    ContainerStarted {
        container: ContainerName,
    },
    ContainerBecameHealthy {
        container: ContainerName,
    },
    /// Healthy and all setup commands have completed.
    ContainerBecameReady {
        container: ContainerName,
    },
    ContainerExited {
        container: ContainerName,
        exit_code: i64,
    },
    ContainerStopped {
        container: ContainerName,
    },
    ContainerRemoved {
        container: ContainerName,
    },
    TemporaryFileCreated {
        container: ContainerName,
        path: PathBuf,
    },
    TemporaryFileDeleted {
        path: PathBuf,
    },
    TemporaryDirectoryCreated {
        container: ContainerName,
        path: PathBuf,
    },
    TemporaryDirectoryDeleted {
        path: PathBuf,
    },
    StepFailed {
        step: TaskStep,
        message: String,
    },
    /// A failure not tied to a single step (internal errors, panics in a step).
    TaskFailed {
        message: String,
    },
    UserInterrupted,

    /// Shown to observers only; never stored in the log.
    StepStarting {
        step: TaskStep,
    },
    /// Shown to observers only; never stored in the log.
    RunningSetupCommand {
        container: ContainerName,
        command: String,
        index: usize,
        total: usize,
    },
}

impl TaskEvent {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TaskEvent::StepFailed { .. } | TaskEvent::TaskFailed { .. } | TaskEvent::UserInterrupted
        )
    }

    pub fn is_informational(&self) -> bool {
        matches!(
            self,
            TaskEvent::StepStarting { .. } | TaskEvent::RunningSetupCommand { .. }
        )
    }

    /// The failure happened while cleaning up.
    pub fn is_cleanup_failure(&self) -> bool {
        matches!(self, TaskEvent::StepFailed { step, .. } if step.is_cleanup())
    }

    /// Single-line JSON form used for debug logging.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("<unserializable event: {e}>"))
    }
}

impl fmt::Display for TaskEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskEvent::NetworkCreated { network_id } => write!(f, "network '{network_id}' created"),
            TaskEvent::NetworkDeleted { network_id } => write!(f, "network '{network_id}' deleted"),
            TaskEvent::ImageBuilt { source, image_id } => {
                write!(f, "image '{image_id}' built from {source}")
            }
            TaskEvent::ImagePulled { source, image_id } => {
                write!(f, "image '{source}' pulled ({image_id})")
            }
            TaskEvent::ContainerCreated {
                container,
                runtime_id,
            } => write!(f, "container '{container}' created ({runtime_id})"),
            TaskEvent::ContainerStarted { container } => write!(f, "container '{container}' started"),
            TaskEvent::ContainerBecameHealthy { container } => {
                write!(f, "container '{container}' became healthy")
            }
            TaskEvent::ContainerBecameReady { container } => {
                write!(f, "container '{container}' is ready")
            }
            TaskEvent::ContainerExited {
                container,
                exit_code,
            } => write!(f, "container '{container}' exited with code {exit_code}"),
            TaskEvent::ContainerStopped { container } => write!(f, "container '{container}' stopped"),
            TaskEvent::ContainerRemoved { container } => write!(f, "container '{container}' removed"),
            TaskEvent::TemporaryFileCreated { container, path } => write!(
                f,
                "temporary file '{}' created for container '{container}'",
                path.display()
            ),
            TaskEvent::TemporaryFileDeleted { path } => {
                write!(f, "temporary file '{}' deleted", path.display())
            }
            TaskEvent::TemporaryDirectoryCreated { container, path } => write!(
                f,
                "temporary directory '{}' created for container '{container}'",
                path.display()
            ),
            TaskEvent::TemporaryDirectoryDeleted { path } => {
                write!(f, "temporary directory '{}' deleted", path.display())
            }
            TaskEvent::StepFailed { step, message } => write!(f, "could not {step}: {message}"),
            TaskEvent::TaskFailed { message } => write!(f, "task failed: {message}"),
            TaskEvent::UserInterrupted => f.write_str("interrupted by user"),
            TaskEvent::StepStarting { step } => write!(f, "starting: {step}"),
            TaskEvent::RunningSetupCommand {
                container,
                command,
                index,
                total,
            } => write!(
                f,
                "running setup command {} of {total} in container '{container}': {command}",
                index + 1
            ),
        }
    }
}

/// An event together with the moment it was appended.
#[derive(Debug, Clone, Serialize)]
pub struct LoggedEvent {
    pub recorded_at: DateTime<Utc>,
    pub event: TaskEvent,
}

/// Append-only record of everything learned so far.
///
/// Rules are evaluated against this log; it has a single writer (the
/// scheduler) and never shrinks.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<LoggedEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events(events: impl IntoIterator<Item = TaskEvent>) -> Self {
        let mut log = Self::new();
        for event in events {
            log.append(event);
        }
        log
    }

    /// Append an event. Returns `false` if an equal event is already logged.
    ///
    /// Informational events are rejected; they are for observers only.
    pub fn append(&mut self, event: TaskEvent) -> bool {
        if event.is_informational() {
            warn!(event = %event, "informational event not recorded in event log");
            return false;
        }

        if self.contains(&event) {
            warn!(event = %event, "ignoring duplicate event");
            return false;
        }

        self.events.push(LoggedEvent {
            recorded_at: Utc::now(),
            event,
        });
        true
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskEvent> {
        self.events.iter().map(|e| &e.event)
    }

    pub fn logged(&self) -> &[LoggedEvent] {
        &self.events
    }

    pub fn contains(&self, event: &TaskEvent) -> bool {
        self.iter().any(|e| e == event)
    }

    pub fn any(&self, predicate: impl Fn(&TaskEvent) -> bool) -> bool {
        self.iter().any(predicate)
    }

    pub fn has_failure(&self) -> bool {
        self.any(TaskEvent::is_failure)
    }

    /// The one value `select` extracts from the log, if any.
    ///
    /// # Panics
    ///
    /// Panics if more than one event matches; callers only use this for
    /// relations that are one-to-one by construction.
    pub fn single_instance<'a, T>(&'a self, select: impl Fn(&'a TaskEvent) -> Option<T>) -> Option<T> {
        let mut matches = self.events.iter().filter_map(|e| select(&e.event));
        let first = matches.next()?;
        if matches.next().is_some() {
            panic!("event log contains more than one matching event where one was expected");
        }
        Some(first)
    }

    pub fn network_id(&self) -> Option<&str> {
        self.single_instance(|e| match e {
            TaskEvent::NetworkCreated { network_id } => Some(network_id.as_str()),
            _ => None,
        })
    }

    pub fn container_runtime_id(&self, container: &str) -> Option<&str> {
        self.single_instance(|e| match e {
            TaskEvent::ContainerCreated {
                container: c,
                runtime_id,
            } if c == container => Some(runtime_id.as_str()),
            _ => None,
        })
    }

    pub fn built_image_id(&self, source: &BuildImageSource) -> Option<&str> {
        self.single_instance(|e| match e {
            TaskEvent::ImageBuilt { source: s, image_id } if s == source => Some(image_id.as_str()),
            _ => None,
        })
    }

    pub fn pulled_image_id(&self, source: &PullImageSource) -> Option<&str> {
        self.single_instance(|e| match e {
            TaskEvent::ImagePulled { source: s, image_id } if s == source => Some(image_id.as_str()),
            _ => None,
        })
    }

    pub fn container_started(&self, container: &str) -> bool {
        self.any(|e| matches!(e, TaskEvent::ContainerStarted { container: c } if c == container))
    }

    pub fn container_healthy(&self, container: &str) -> bool {
        self.any(|e| matches!(e, TaskEvent::ContainerBecameHealthy { container: c } if c == container))
    }

    pub fn container_ready(&self, container: &str) -> bool {
        self.any(|e| matches!(e, TaskEvent::ContainerBecameReady { container: c } if c == container))
    }

    pub fn container_stopped(&self, container: &str) -> bool {
        self.any(|e| matches!(e, TaskEvent::ContainerStopped { container: c } if c == container))
    }

    pub fn container_removed(&self, container: &str) -> bool {
        self.any(|e| matches!(e, TaskEvent::ContainerRemoved { container: c } if c == container))
    }

    pub fn container_exit_code(&self, container: &str) -> Option<i64> {
        self.single_instance(|e| match e {
            TaskEvent::ContainerExited {
                container: c,
                exit_code,
            } if c == container => Some(*exit_code),
            _ => None,
        })
    }
}

/// Where steps report what they learned.
pub trait TaskEventSink: Send + Sync {
    fn post_event(&self, event: TaskEvent);
}
