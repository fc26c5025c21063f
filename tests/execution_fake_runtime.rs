// tests/execution_fake_runtime.rs

mod common;
use crate::common::builders::{db_cache_app, graph_of, ContainerBuilder};
use crate::common::{init_tracing, with_timeout};

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use stevedore::dag::DependencyGraph;
use stevedore::engine::{ExecutionManager, RunOptions, TaskRunResult, INTERNAL_FAILURE_EXIT_CODE};
use stevedore::model::{RunStep, TaskEvent, TaskStep};
use stevedore::types::{CleanupOption, ManualCleanupReason};
use stevedore_test_utils::fake_runtime::{
    fake_container_id, FakeContainerRuntime, RuntimeCall, FAKE_NETWORK_ID,
};
use stevedore_test_utils::RecordingObserver;

type TestResult = Result<(), Box<dyn Error>>;

async fn run_with(
    graph: DependencyGraph,
    options: RunOptions,
    runtime: &FakeContainerRuntime,
) -> Result<(TaskRunResult, Arc<RecordingObserver>), Box<dyn Error>> {
    let observer = Arc::new(RecordingObserver::new());
    let manager = ExecutionManager::new(
        graph,
        options,
        Arc::new(runtime.clone()),
        Arc::clone(&observer) as Arc<dyn stevedore::engine::TaskEventObserver>,
    );

    let result = with_timeout(manager.run()).await?;
    Ok((result, observer))
}

fn stop(container: &str) -> RuntimeCall {
    RuntimeCall::StopContainer {
        container_id: fake_container_id(container),
    }
}

fn remove(container: &str) -> RuntimeCall {
    RuntimeCall::RemoveContainer {
        container_id: fake_container_id(container),
    }
}

fn delete_network() -> RuntimeCall {
    RuntimeCall::DeleteNetwork {
        network_id: FAKE_NETWORK_ID.to_string(),
    }
}

#[tokio::test]
async fn successful_task_runs_everything_and_cleans_up() -> TestResult {
    init_tracing();
    let runtime = FakeContainerRuntime::new();

    let (result, observer) =
        run_with(graph_of(db_cache_app(), "app"), RunOptions::default(), &runtime).await?;

    assert_eq!(result.exit_code, 0);
    assert!(result.succeeded());
    assert!(result.manual_cleanup.is_none());

    let run_app = RuntimeCall::RunContainer {
        container_id: fake_container_id("app"),
    };
    let db_healthy = RuntimeCall::WaitForHealthy {
        container_id: fake_container_id("db"),
    };
    assert!(runtime.index_of(&db_healthy) < runtime.index_of(&run_app));
    assert!(runtime.index_of(&stop("app")) < runtime.index_of(&stop("db")));
    assert!(runtime.index_of(&remove("db")) < runtime.index_of(&delete_network()));
    assert_eq!(runtime.calls().last(), Some(&delete_network()));

    assert!(observer
        .steps()
        .iter()
        .any(|s| matches!(s, TaskStep::Run(RunStep::RunContainer { .. }))));
    assert!(observer.events().iter().any(|e| matches!(
        e,
        TaskEvent::ContainerExited { container, exit_code: 0 } if container == "app"
    )));
    Ok(())
}

#[tokio::test]
async fn task_exit_code_is_returned() -> TestResult {
    let runtime = FakeContainerRuntime::new().with_exit_code("app", 42);

    let (result, _) =
        run_with(graph_of(db_cache_app(), "app"), RunOptions::default(), &runtime).await?;

    assert_eq!(result.exit_code, 42);
    assert_eq!(stevedore::exit_code_for(&result), 42);
    assert!(runtime.was_called(&delete_network()));
    Ok(())
}

#[tokio::test]
async fn failed_dependency_prevents_task_and_is_cleaned_up() -> TestResult {
    let runtime = FakeContainerRuntime::new().failing(RuntimeCall::StartContainer {
        container_id: fake_container_id("db"),
    });

    let (result, _) =
        run_with(graph_of(db_cache_app(), "app"), RunOptions::default(), &runtime).await?;

    assert_eq!(result.exit_code, INTERNAL_FAILURE_EXIT_CODE);
    assert_eq!(result.failures.len(), 1);
    assert!(result.failures[0].starts_with("could not start container 'db'"));

    assert!(!runtime.was_called(&RuntimeCall::RunContainer {
        container_id: fake_container_id("app"),
    }));
    assert!(!runtime.was_called(&stop("db")));
    assert!(runtime.was_called(&remove("db")));
    assert!(runtime.was_called(&remove("app")));
    assert!(runtime.was_called(&delete_network()));
    Ok(())
}

#[tokio::test]
async fn cleanup_can_be_skipped_after_failure() -> TestResult {
    let runtime = FakeContainerRuntime::new().failing(RuntimeCall::StartContainer {
        container_id: fake_container_id("db"),
    });
    let options = RunOptions {
        cleanup_after_failure: CleanupOption::DontCleanup,
        ..RunOptions::default()
    };

    let (result, _) = run_with(graph_of(db_cache_app(), "app"), options, &runtime).await?;

    assert!(runtime.was_called(&stop("cache")));
    assert!(!runtime.was_called(&remove("cache")));
    assert!(!runtime.was_called(&delete_network()));

    let manual = result.manual_cleanup.ok_or("manual cleanup expected")?;
    assert_eq!(manual.reason, ManualCleanupReason::CleanupDisabled);
    assert_eq!(manual.instructions[0], "docker network rm fake-network");
    assert_eq!(manual.instructions.len(), 4);
    Ok(())
}

#[tokio::test]
async fn failed_cleanup_reports_manual_instructions() -> TestResult {
    let runtime = FakeContainerRuntime::new()
        .with_temporary_file("app", "/tmp/stevedore-env-app".into())
        .failing(remove("app"));

    let (result, _) =
        run_with(graph_of(db_cache_app(), "app"), RunOptions::default(), &runtime).await?;

    assert_eq!(result.exit_code, 0);
    assert!(!runtime.was_called(&delete_network()));

    let manual = result.manual_cleanup.ok_or("manual cleanup expected")?;
    assert_eq!(manual.reason, ManualCleanupReason::CleanupFailed);
    assert_eq!(
        manual.instructions,
        vec![
            "docker network rm fake-network".to_string(),
            "docker rm --force --volumes app-id".to_string(),
            "rm /tmp/stevedore-env-app".to_string(),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn cancellation_stops_the_task_and_cleans_up() -> TestResult {
    init_tracing();
    let runtime = FakeContainerRuntime::new().hanging_on_run();
    let observer = Arc::new(RecordingObserver::new());
    let manager = ExecutionManager::new(
        graph_of(db_cache_app(), "app"),
        RunOptions::default(),
        Arc::new(runtime.clone()),
        observer.clone(),
    );
    let handle = manager.cancellation_handle();

    let watched = runtime.clone();
    tokio::spawn(async move {
        let run_app = RuntimeCall::RunContainer {
            container_id: fake_container_id("app"),
        };
        while !watched.was_called(&run_app) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.cancel();
    });

    let result = with_timeout(manager.run()).await?;

    assert_eq!(result.exit_code, INTERNAL_FAILURE_EXIT_CODE);
    assert_eq!(result.failures, vec!["interrupted by user".to_string()]);
    assert!(result.manual_cleanup.is_none());

    for container in ["app", "cache", "db"] {
        assert!(runtime.was_called(&stop(container)));
        assert!(runtime.was_called(&remove(container)));
    }
    assert!(runtime.was_called(&delete_network()));
    let interruptions = observer
        .events()
        .iter()
        .filter(|e| matches!(e, TaskEvent::UserInterrupted))
        .count();
    assert_eq!(interruptions, 1);
    Ok(())
}

#[tokio::test]
async fn cancellation_after_finish_is_harmless() -> TestResult {
    let runtime = FakeContainerRuntime::new();
    let manager = ExecutionManager::new(
        graph_of(vec![ContainerBuilder::new("app").build()], "app"),
        RunOptions::default(),
        Arc::new(runtime.clone()),
        Arc::new(RecordingObserver::new()),
    );
    let handle = manager.cancellation_handle();

    let result = with_timeout(manager.run()).await?;
    handle.cancel();

    assert!(result.succeeded());
    Ok(())
}

#[tokio::test]
async fn panicking_step_is_reported_as_failure() -> TestResult {
    init_tracing();
    let runtime = FakeContainerRuntime::new().panicking(RuntimeCall::StartContainer {
        container_id: fake_container_id("cache"),
    });

    let (result, _) =
        run_with(graph_of(db_cache_app(), "app"), RunOptions::default(), &runtime).await?;

    assert_eq!(result.exit_code, INTERNAL_FAILURE_EXIT_CODE);
    assert_eq!(result.failures.len(), 1);
    assert!(result.failures[0].starts_with("could not start container 'cache': step did not complete"));
    assert!(runtime.was_called(&remove("cache")));
    assert!(runtime.was_called(&delete_network()));
    Ok(())
}

#[tokio::test]
async fn max_parallelism_limits_concurrent_runtime_calls() -> TestResult {
    let runtime = FakeContainerRuntime::new().with_delay(Duration::from_millis(10));
    let options = RunOptions {
        max_parallelism: Some(1),
        ..RunOptions::default()
    };

    let (result, observer) = run_with(graph_of(db_cache_app(), "app"), options, &runtime).await?;

    assert_eq!(result.exit_code, 0);

    // With one step at a time, every step starts only after the previous
    // one has reported its outcome.
    let mut in_flight = 0usize;
    for event in observer.events() {
        match event {
            TaskEvent::StepStarting { step } => {
                assert_eq!(in_flight, 0, "{step} started while another step was running");
                in_flight += 1;
            }
            e if !e.is_informational() && in_flight > 0 => in_flight = 0,
            _ => {}
        }
    }
    Ok(())
}

#[tokio::test]
async fn task_dependencies_start_before_task_container() -> TestResult {
    let runtime = FakeContainerRuntime::new();
    let config = crate::common::builders::ConfigFileBuilder::new()
        .with_container(ContainerBuilder::new("app").build())
        .with_container(ContainerBuilder::new("mock-api").build())
        .with_task_definition(stevedore::config::TaskDefinition {
            name: "test".to_string(),
            container: "app".to_string(),
            command: Some("make test".to_string()),
            environment: Default::default(),
            dependencies: ["mock-api".to_string()].into_iter().collect(),
            prerequisites: Vec::new(),
        })
        .build();
    let graph = DependencyGraph::for_task(&config, "test")?;

    let (result, observer) = run_with(graph, RunOptions::default(), &runtime).await?;

    assert_eq!(result.exit_code, 0);
    let steps = observer.steps();
    let ready_api = steps
        .iter()
        .position(|s| matches!(s, TaskStep::Run(RunStep::RunContainerSetupCommands { container, .. }) if container.name == "mock-api"))
        .ok_or("mock-api never became ready")?;
    let run_app = steps
        .iter()
        .position(|s| matches!(s, TaskStep::Run(RunStep::RunContainer { .. })))
        .ok_or("task container never ran")?;
    assert!(ready_api < run_app);
    Ok(())
}
