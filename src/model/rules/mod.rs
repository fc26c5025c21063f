// src/model/rules/mod.rs

//! Rules decide when a step may run, based only on the event log.
//!
//! A rule is a pure predicate plus a factory: `evaluate` returns the step to
//! run once every precondition is present in the log. Because the log only
//! grows, a rule that is ready stays ready.

pub mod cleanup;
pub mod run;

use std::fmt;

use crate::model::events::EventLog;
use crate::model::steps::TaskStep;

pub use cleanup::{CleanupStepRule, ManualCleanupSortOrder};
pub use run::RunStepRule;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleEvaluation {
    Ready(TaskStep),
    NotReady,
}

impl RuleEvaluation {
    pub fn is_ready(&self) -> bool {
        matches!(self, RuleEvaluation::Ready(_))
    }
}

pub trait TaskStepRule: fmt::Display + fmt::Debug + Send + Sync {
    fn evaluate(&self, events: &EventLog) -> RuleEvaluation;
}
