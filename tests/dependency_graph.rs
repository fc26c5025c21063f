// tests/dependency_graph.rs

mod common;
use crate::common::builders::{containers, db_cache_app, graph_of, ConfigFileBuilder, ContainerBuilder};

use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;

use stevedore::config::TaskDefinition;
use stevedore::dag::DependencyGraph;
use stevedore::errors::StevedoreError;

type TestResult = Result<(), Box<dyn Error>>;

fn names(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn task_with_dependencies(name: &str, container: &str, deps: &[&str]) -> TaskDefinition {
    TaskDefinition {
        name: name.to_string(),
        container: container.to_string(),
        command: None,
        environment: BTreeMap::new(),
        dependencies: names(deps),
        prerequisites: Vec::new(),
    }
}

#[test]
fn graph_links_dependencies_in_both_directions() -> TestResult {
    let graph = DependencyGraph::build(&containers(db_cache_app()), "app")?;

    let app = graph.node_for("app").ok_or("app missing")?;
    assert!(app.is_task_container());
    assert_eq!(app.depends_on(), &names(&["cache", "db"]));
    assert!(app.depended_on_by().is_empty());

    let db = graph.node_for("db").ok_or("db missing")?;
    assert!(!db.is_task_container());
    assert!(db.depends_on().is_empty());
    assert_eq!(db.depended_on_by(), &names(&["app"]));

    assert_eq!(graph.task_container_node().name(), "app");
    assert_eq!(graph.len(), 3);
    Ok(())
}

#[test]
fn containers_not_reachable_from_task_container_are_left_out() -> TestResult {
    let mut list = db_cache_app();
    list.push(ContainerBuilder::new("unrelated").build());

    let graph = DependencyGraph::build(&containers(list), "app")?;

    assert!(graph.node_for("unrelated").is_none());
    let all: Vec<&str> = graph.all_nodes().map(|n| n.name()).collect();
    assert_eq!(all, vec!["app", "cache", "db"]);
    Ok(())
}

#[test]
fn transitive_dependencies_are_included() -> TestResult {
    let graph = graph_of(
        vec![
            ContainerBuilder::new("a").depends_on("b").build(),
            ContainerBuilder::new("b").depends_on("c").build(),
            ContainerBuilder::new("c").build(),
        ],
        "a",
    );

    assert_eq!(graph.len(), 3);
    assert_eq!(graph.node_for("c").ok_or("c missing")?.depended_on_by(), &names(&["b"]));
    Ok(())
}

#[test]
fn shared_dependency_gets_a_single_node() -> TestResult {
    let graph = graph_of(
        vec![
            ContainerBuilder::new("app").depends_on("api").depends_on("worker").build(),
            ContainerBuilder::new("api").depends_on("db").build(),
            ContainerBuilder::new("worker").depends_on("db").build(),
            ContainerBuilder::new("db").build(),
        ],
        "app",
    );

    assert_eq!(graph.len(), 4);
    assert_eq!(
        graph.node_for("db").ok_or("db missing")?.depended_on_by(),
        &names(&["api", "worker"])
    );
    Ok(())
}

#[test]
fn unknown_dependency_is_reported_with_its_parent() {
    let list = vec![
        ContainerBuilder::new("app").depends_on("dep").build(),
        ContainerBuilder::new("dep").depends_on("missing").build(),
    ];

    let err = DependencyGraph::build(&containers(list), "app").unwrap_err();

    assert!(matches!(err, StevedoreError::ContainerNotFound(_)));
    assert_eq!(
        err.to_string(),
        "The container 'missing' referenced by container 'dep' does not exist."
    );
}

#[test]
fn unknown_task_container_is_reported() {
    let err = DependencyGraph::build(&containers(db_cache_app()), "nope").unwrap_err();
    assert!(matches!(err, StevedoreError::ContainerNotFound(_)));
}

#[test]
fn container_depending_on_itself_is_rejected() {
    let list = vec![
        ContainerBuilder::new("app").depends_on("dep").build(),
        ContainerBuilder::new("dep").depends_on("dep").build(),
    ];

    let err = DependencyGraph::build(&containers(list), "app").unwrap_err();

    assert_eq!(err.to_string(), "The container 'dep' cannot depend on itself.");
}

#[test]
fn two_container_cycle_names_the_full_path() {
    let config = ConfigFileBuilder::new()
        .with_container(ContainerBuilder::new("container-a").depends_on("container-b").build())
        .with_container(ContainerBuilder::new("container-b").depends_on("container-a").build())
        .with_task("the-task", "container-a")
        .build();

    let err = DependencyGraph::for_task(&config, "the-task").unwrap_err();

    assert!(matches!(err, StevedoreError::DependencyCycle(_)));
    assert_eq!(
        err.to_string(),
        "There is a dependency cycle in task 'the-task'. Container 'container-a' depends on 'container-b', which depends on 'container-a'."
    );
}

#[test]
fn three_container_cycle_names_the_full_path() {
    let list = vec![
        ContainerBuilder::new("container-a").depends_on("container-b").build(),
        ContainerBuilder::new("container-b").depends_on("container-c").build(),
        ContainerBuilder::new("container-c").depends_on("container-a").build(),
    ];

    let err = DependencyGraph::build(&containers(list), "container-a").unwrap_err();

    assert_eq!(
        err.to_string(),
        "Container 'container-a' depends on 'container-b', which depends on 'container-c', which depends on 'container-a'."
    );
}

#[test]
fn cycle_through_task_dependency_back_to_task_container() {
    let config = ConfigFileBuilder::new()
        .with_container(ContainerBuilder::new("container-a").build())
        .with_container(ContainerBuilder::new("container-b").depends_on("container-c").build())
        .with_container(ContainerBuilder::new("container-c").depends_on("container-a").build())
        .with_task_definition(task_with_dependencies("the-task", "container-a", &["container-b"]))
        .build();

    let err = DependencyGraph::for_task(&config, "the-task").unwrap_err();

    assert_eq!(
        err.to_string(),
        "There is a dependency cycle in task 'the-task'. Container 'container-b' (which is explicitly started by the task) depends on 'container-c', and 'container-c' depends on the task container 'container-a'."
    );
}

#[test]
fn task_container_cannot_also_be_a_task_dependency() {
    let config = ConfigFileBuilder::new()
        .with_container(ContainerBuilder::new("app").build())
        .with_task_definition(task_with_dependencies("test", "app", &["app"]))
        .build();

    let err = DependencyGraph::for_task(&config, "test").unwrap_err();

    assert!(matches!(err, StevedoreError::TaskContainerIsDependency(_)));
    assert_eq!(
        err.to_string(),
        "The task 'test' cannot have the container 'app' as both the main task container and also a dependency."
    );
}

#[test]
fn task_settings_are_applied_to_the_task_container() -> TestResult {
    let mut task = task_with_dependencies("test", "app", &["extra"]);
    task.command = Some("cargo test --all".to_string());
    task.environment.insert("CI".to_string(), "1".to_string());

    let config = ConfigFileBuilder::new()
        .project_name("shop")
        .with_container(
            ContainerBuilder::new("app")
                .command("cargo test")
                .env("RUST_LOG", "info")
                .depends_on("db")
                .build(),
        )
        .with_container(ContainerBuilder::new("db").build())
        .with_container(ContainerBuilder::new("extra").build())
        .with_task_definition(task)
        .build();

    let graph = DependencyGraph::for_task(&config, "test")?;
    let app = graph.task_container_node();

    assert_eq!(graph.project_name(), "shop");
    assert_eq!(app.container().command.as_deref(), Some("cargo test --all"));
    assert_eq!(app.container().environment.get("CI").map(String::as_str), Some("1"));
    assert_eq!(
        app.container().environment.get("RUST_LOG").map(String::as_str),
        Some("info")
    );
    assert_eq!(app.depends_on(), &names(&["db", "extra"]));
    assert_eq!(
        graph.node_for("extra").ok_or("extra missing")?.depended_on_by(),
        &names(&["app"])
    );
    Ok(())
}

#[test]
fn unknown_task_is_reported() {
    let config = ConfigFileBuilder::new()
        .with_container(ContainerBuilder::new("app").build())
        .build();

    let err = DependencyGraph::for_task(&config, "missing").unwrap_err();
    assert!(matches!(err, StevedoreError::TaskNotFound(name) if name == "missing"));
}

#[test]
fn startup_order_puts_dependencies_first() -> TestResult {
    let graph = graph_of(
        vec![
            ContainerBuilder::new("app").depends_on("api").build(),
            ContainerBuilder::new("api").depends_on("db").depends_on("cache").build(),
            ContainerBuilder::new("db").build(),
            ContainerBuilder::new("cache").build(),
        ],
        "app",
    );

    let order = graph.startup_order()?;
    let position = |name: &str| order.iter().position(|n| n == name).unwrap();

    assert_eq!(order.len(), 4);
    assert!(position("db") < position("api"));
    assert!(position("cache") < position("api"));
    assert!(position("api") < position("app"));
    assert_eq!(order.last().map(String::as_str), Some("app"));
    Ok(())
}
