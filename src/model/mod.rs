// src/model/mod.rs

//! Execution model: events, steps, the rules that produce steps, and the
//! stages that group rules.

pub mod events;
pub mod rules;
pub mod stages;
pub mod steps;

pub use events::{EventLog, LoggedEvent, TaskEvent, TaskEventSink};
pub use rules::{
    CleanupStepRule, ManualCleanupSortOrder, RuleEvaluation, RunStepRule, TaskStepRule,
};
pub use stages::{CleanupStage, CleanupStagePlanner, RunStage, RunStagePlanner, Stage};
pub use steps::{CleanupStep, RunStep, TaskStep};
