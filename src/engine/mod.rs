// src/engine/mod.rs

//! Execution engine for a single task.
//!
//! The pure core state machine lives in [`core`]; the async/IO shell that
//! dispatches steps and collects their events is implemented in [`runtime`].
//! Observers in [`observer`] receive every event as it happens, and
//! [`sequence`] runs a task after its prerequisites.

use serde::Serialize;

use crate::types::{CleanupOption, ManualCleanupReason};

/// Options used by both the core and the async shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub cleanup_after_success: CleanupOption,
    pub cleanup_after_failure: CleanupOption,
    /// Upper bound on concurrently running steps; unbounded when `None`.
    pub max_parallelism: Option<usize>,
}

/// Commands a user has to run because automatic cleanup did not happen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManualCleanup {
    pub reason: ManualCleanupReason,
    pub instructions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRunResult {
    /// The task container's exit code, or `-1` if the run did not complete.
    pub exit_code: i64,
    /// Human-readable description of every failure, in the order they happened.
    pub failures: Vec<String>,
    pub manual_cleanup: Option<ManualCleanup>,
}

impl TaskRunResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 && self.failures.is_empty()
    }
}

pub mod core;
pub mod observer;
pub mod runtime;
pub mod sequence;

pub use core::{StageKind, TaskStateMachine, INTERNAL_FAILURE_EXIT_CODE};
pub use observer::{LoggingObserver, TaskEventObserver};
pub use runtime::ExecutionManager;
pub use sequence::{run_task_sequence, TaskOutcome};
