// src/engine/observer.rs

//! Push-only notifications for presentation.
//!
//! Nothing in the engine depends on what an observer does.

use tracing::{debug, error, info, warn};

use crate::model::events::TaskEvent;
use crate::model::steps::TaskStep;

pub trait TaskEventObserver: Send + Sync {
    fn on_step_starting(&self, step: &TaskStep);

    fn on_event(&self, event: &TaskEvent);
}

/// Reports progress through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl TaskEventObserver for LoggingObserver {
    fn on_step_starting(&self, step: &TaskStep) {
        match step.container_name() {
            Some(container) => info!(step = %step, container, "step starting"),
            None => info!(step = %step, "step starting"),
        }
    }

    fn on_event(&self, event: &TaskEvent) {
        match event {
            TaskEvent::StepStarting { step } => self.on_step_starting(step),
            TaskEvent::StepFailed { step, .. } if step.is_cleanup() => warn!("{}", event),
            TaskEvent::StepFailed { .. } | TaskEvent::TaskFailed { .. } => error!("{}", event),
            TaskEvent::UserInterrupted => warn!("{}", event),
            TaskEvent::RunningSetupCommand { .. }
            | TaskEvent::ContainerBecameReady { .. }
            | TaskEvent::ContainerExited { .. } => info!("{}", event),
            _ => debug!("{}", event),
        }
    }
}
