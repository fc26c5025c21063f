// tests/cli_and_logging.rs

mod common;

use std::error::Error;

use clap::Parser;
use stevedore::cli::{CliArgs, LogLevel};
use stevedore::engine::TaskRunResult;
use stevedore::logging::resolve_level;
use stevedore::types::CleanupOption;

type TestResult = Result<(), Box<dyn Error>>;

#[test]
fn defaults_clean_up_everything_without_limit() -> TestResult {
    let args = CliArgs::try_parse_from(["stevedore", "test"])?;

    assert_eq!(args.task, "test");
    assert_eq!(args.config, "stevedore.toml");
    assert!(!args.dry_run);
    assert!(!args.skip_prerequisites);

    let options = args.run_options();
    assert_eq!(options.cleanup_after_success, CleanupOption::Cleanup);
    assert_eq!(options.cleanup_after_failure, CleanupOption::Cleanup);
    assert_eq!(options.max_parallelism, None);
    Ok(())
}

#[test]
fn cleanup_flags_map_to_options() -> TestResult {
    let failure_only =
        CliArgs::try_parse_from(["stevedore", "test", "--no-cleanup-after-failure"])?.run_options();
    let success_only =
        CliArgs::try_parse_from(["stevedore", "test", "--no-cleanup-after-success"])?.run_options();
    let both = CliArgs::try_parse_from(["stevedore", "test", "--no-cleanup"])?.run_options();

    assert_eq!(failure_only.cleanup_after_failure, CleanupOption::DontCleanup);
    assert_eq!(failure_only.cleanup_after_success, CleanupOption::Cleanup);
    assert_eq!(success_only.cleanup_after_failure, CleanupOption::Cleanup);
    assert_eq!(success_only.cleanup_after_success, CleanupOption::DontCleanup);
    assert_eq!(both.cleanup_after_failure, CleanupOption::DontCleanup);
    assert_eq!(both.cleanup_after_success, CleanupOption::DontCleanup);
    Ok(())
}

#[test]
fn max_parallelism_must_be_positive() -> TestResult {
    let args = CliArgs::try_parse_from(["stevedore", "test", "--max-parallelism", "3"])?;
    assert_eq!(args.run_options().max_parallelism, Some(3));

    assert!(CliArgs::try_parse_from(["stevedore", "test", "--max-parallelism", "0"]).is_err());
    Ok(())
}

#[test]
fn task_name_is_required() {
    assert!(CliArgs::try_parse_from(["stevedore"]).is_err());
}

#[test]
fn config_and_dry_run_are_parsed() -> TestResult {
    let args = CliArgs::try_parse_from([
        "stevedore",
        "build",
        "--config",
        "ci/stevedore.toml",
        "--dry-run",
        "--log-level",
        "debug",
        "--skip-prerequisites",
    ])?;

    assert_eq!(args.task, "build");
    assert_eq!(args.config, "ci/stevedore.toml");
    assert!(args.dry_run);
    assert!(matches!(args.log_level, Some(LogLevel::Debug)));
    assert!(args.skip_prerequisites);
    Ok(())
}

#[test]
fn log_level_flag_beats_environment() {
    assert_eq!(
        resolve_level(Some(LogLevel::Warn), Some("trace")),
        tracing::Level::WARN
    );
    assert_eq!(resolve_level(None, Some("DEBUG")), tracing::Level::DEBUG);
    assert_eq!(resolve_level(None, Some("warning")), tracing::Level::WARN);
    assert_eq!(resolve_level(None, Some("loud")), tracing::Level::INFO);
    assert_eq!(resolve_level(None, None), tracing::Level::INFO);
    assert_eq!(resolve_level(None, Some(" Trace ")), tracing::Level::TRACE);
    assert_eq!(resolve_level(None, Some("")), tracing::Level::INFO);
}

#[test]
fn cli_log_levels_map_onto_tracing_levels() {
    assert_eq!(tracing::Level::from(LogLevel::Error), tracing::Level::ERROR);
    assert_eq!(tracing::Level::from(LogLevel::Info), tracing::Level::INFO);
    assert_eq!(tracing::Level::from(LogLevel::Trace), tracing::Level::TRACE);
}

#[test]
fn cleanup_option_parses_from_text() {
    assert_eq!("cleanup".parse::<CleanupOption>(), Ok(CleanupOption::Cleanup));
    assert_eq!(
        "dont-cleanup".parse::<CleanupOption>(),
        Ok(CleanupOption::DontCleanup)
    );
    assert!("sometimes".parse::<CleanupOption>().is_err());
}

#[test]
fn process_exit_code_follows_task_exit_code() {
    let result = |exit_code| TaskRunResult {
        exit_code,
        failures: Vec::new(),
        manual_cleanup: None,
    };

    assert_eq!(stevedore::exit_code_for(&result(0)), 0);
    assert_eq!(stevedore::exit_code_for(&result(7)), 7);
    assert_eq!(stevedore::exit_code_for(&result(-1)), -1);
    assert_eq!(stevedore::exit_code_for(&result(i64::MAX)), -1);
}
