// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

use crate::engine::RunOptions;
use crate::types::CleanupOption;

/// Command-line arguments for `stevedore`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "stevedore",
    version,
    about = "Run a task inside a set of dependent containers, then clean up after it.",
    long_about = None
)]
pub struct CliArgs {
    /// Name of the task to run.
    #[arg(value_name = "TASK")]
    pub task: String,

    /// Path to the config file (TOML).
    ///
    /// Default: `stevedore.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "stevedore.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `STEVEDORE_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the startup order and run rules, but don't
    /// touch any containers.
    #[arg(long)]
    pub dry_run: bool,

    /// Leave containers, network and temporary files in place if the task fails.
    #[arg(long)]
    pub no_cleanup_after_failure: bool,

    /// Leave containers, network and temporary files in place if the task succeeds.
    #[arg(long)]
    pub no_cleanup_after_success: bool,

    /// Shorthand for both `--no-cleanup-after-failure` and `--no-cleanup-after-success`.
    #[arg(long)]
    pub no_cleanup: bool,

    /// Run only the named task, not its prerequisites.
    #[arg(long)]
    pub skip_prerequisites: bool,

    /// Maximum number of steps to run at the same time.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..))]
    pub max_parallelism: Option<u16>,
}

impl CliArgs {
    pub fn run_options(&self) -> RunOptions {
        let cleanup = |disabled: bool| {
            if disabled || self.no_cleanup {
                CleanupOption::DontCleanup
            } else {
                CleanupOption::Cleanup
            }
        };

        RunOptions {
            cleanup_after_success: cleanup(self.no_cleanup_after_success),
            cleanup_after_failure: cleanup(self.no_cleanup_after_failure),
            max_parallelism: self.max_parallelism.map(usize::from),
        }
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
