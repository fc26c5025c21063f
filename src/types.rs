use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Whether to clean up containers, networks and temporary files once a task
/// finishes.
///
/// - `Cleanup`: run the cleanup stage (default).
/// - `DontCleanup`: skip the cleanup stage and report what would have to be
///   removed by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupOption {
    #[default]
    Cleanup,
    DontCleanup,
}

impl FromStr for CleanupOption {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "cleanup" => Ok(CleanupOption::Cleanup),
            "dont-cleanup" | "dontcleanup" => Ok(CleanupOption::DontCleanup),
            other => Err(format!(
                "invalid cleanup option: {other} (expected \"cleanup\" or \"dont-cleanup\")"
            )),
        }
    }
}

/// Why manual cleanup instructions were produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ManualCleanupReason {
    /// Automatic cleanup was attempted but at least one step failed.
    CleanupFailed,
    /// Automatic cleanup was turned off for this outcome.
    CleanupDisabled,
}

impl fmt::Display for ManualCleanupReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManualCleanupReason::CleanupFailed => f.write_str("cleanup failed"),
            ManualCleanupReason::CleanupDisabled => f.write_str("cleanup disabled"),
        }
    }
}

/// Final state of a container's health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// The image defines no health check; treat the container as healthy.
    NoHealthCheck,
    BecameHealthy,
    BecameUnhealthy { message: String },
    /// The container stopped before reporting healthy.
    Exited { exit_code: i64 },
}
