#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use stevedore::config::{
    BuildImageSource, ConfigFile, Container, HealthCheckConfig, ImageSource, PullImageSource,
    SetupCommand, TaskDefinition,
};
use stevedore::dag::DependencyGraph;

/// Builder for `Container` to simplify test setup.
///
/// Containers pull `<name>-image` unless told otherwise.
pub struct ContainerBuilder {
    container: Container,
}

impl ContainerBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            container: Container::new(
                name,
                ImageSource::Pull(PullImageSource::new(format!("{name}-image"))),
            ),
        }
    }

    pub fn image(mut self, image: &str) -> Self {
        self.container.image_source = ImageSource::Pull(PullImageSource::new(image));
        self
    }

    pub fn build_directory(mut self, dir: &str) -> Self {
        self.container.image_source = ImageSource::Build(BuildImageSource {
            build_directory: PathBuf::from(dir),
            dockerfile: "Dockerfile".to_string(),
            build_args: BTreeMap::new(),
        });
        self
    }

    pub fn command(mut self, command: &str) -> Self {
        self.container.command = Some(command.to_string());
        self
    }

    pub fn env(mut self, name: &str, value: &str) -> Self {
        self.container
            .environment
            .insert(name.to_string(), value.to_string());
        self
    }

    pub fn depends_on(mut self, dep: &str) -> Self {
        self.container.dependencies.insert(dep.to_string());
        self
    }

    pub fn health_check(mut self, command: &str) -> Self {
        self.container.health_check = Some(HealthCheckConfig {
            command: Some(command.to_string()),
            interval: Some(Duration::from_millis(100)),
            retries: Some(3),
            start_period: None,
            timeout: None,
        });
        self
    }

    pub fn setup_command(mut self, command: &str) -> Self {
        self.container.setup_commands.push(SetupCommand::new(command));
        self
    }

    pub fn build(self) -> Container {
        self.container
    }
}

/// Builder for `ConfigFile`.
pub struct ConfigFileBuilder {
    project_name: String,
    containers: BTreeMap<String, Container>,
    tasks: BTreeMap<String, TaskDefinition>,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            project_name: "test-project".to_string(),
            containers: BTreeMap::new(),
            tasks: BTreeMap::new(),
        }
    }

    pub fn project_name(mut self, name: &str) -> Self {
        self.project_name = name.to_string();
        self
    }

    pub fn with_container(mut self, container: Container) -> Self {
        self.containers.insert(container.name.clone(), container);
        self
    }

    pub fn with_task(mut self, name: &str, container: &str) -> Self {
        self.tasks.insert(
            name.to_string(),
            TaskDefinition {
                name: name.to_string(),
                container: container.to_string(),
                command: None,
                environment: BTreeMap::new(),
                dependencies: BTreeSet::new(),
                prerequisites: Vec::new(),
            },
        );
        self
    }

    /// A task in `container` that runs `prerequisites` first.
    pub fn with_task_prerequisites(
        mut self,
        name: &str,
        container: &str,
        prerequisites: &[&str],
    ) -> Self {
        self = self.with_task(name, container);
        if let Some(task) = self.tasks.get_mut(name) {
            task.prerequisites = prerequisites.iter().map(|p| p.to_string()).collect();
        }
        self
    }

    pub fn with_task_definition(mut self, task: TaskDefinition) -> Self {
        self.tasks.insert(task.name.clone(), task);
        self
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::new_unchecked(self.project_name, self.containers, self.tasks)
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Containers keyed by name.
pub fn containers(list: impl IntoIterator<Item = Container>) -> BTreeMap<String, Container> {
    list.into_iter().map(|c| (c.name.clone(), c)).collect()
}

/// Graph for `task_container`, panicking on invalid input.
pub fn graph_of(list: impl IntoIterator<Item = Container>, task_container: &str) -> DependencyGraph {
    DependencyGraph::build(&containers(list), task_container)
        .expect("Failed to build dependency graph from test containers")
}

/// `db` and `cache` with no dependencies, `app` depending on both.
pub fn db_cache_app() -> Vec<Container> {
    vec![
        ContainerBuilder::new("db").health_check("pg_isready").build(),
        ContainerBuilder::new("cache").build(),
        ContainerBuilder::new("app")
            .build_directory("/src/app")
            .command("run-tests")
            .depends_on("db")
            .depends_on("cache")
            .build(),
    ]
}
