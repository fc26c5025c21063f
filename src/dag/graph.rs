// src/dag/graph.rs

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, Container, ContainerName};
use crate::config::validate::DEFAULT_PROJECT_NAME;
use crate::errors::{Result, StevedoreError};

/// One container taking part in a task, with its direct edges.
///
/// Edges are stored as names so nodes never own each other.
#[derive(Debug, Clone)]
pub struct DependencyGraphNode {
    container: Arc<Container>,
    is_task_container: bool,
    depends_on: BTreeSet<ContainerName>,
    depended_on_by: BTreeSet<ContainerName>,
}

impl DependencyGraphNode {
    pub fn name(&self) -> &str {
        &self.container.name
    }

    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    pub fn is_task_container(&self) -> bool {
        self.is_task_container
    }

    /// Containers that must be ready before this one starts.
    pub fn depends_on(&self) -> &BTreeSet<ContainerName> {
        &self.depends_on
    }

    /// Containers that list this one as a dependency.
    pub fn depended_on_by(&self) -> &BTreeSet<ContainerName> {
        &self.depended_on_by
    }
}

/// The containers needed to run one task, keyed by name.
///
/// Only containers reachable from the task container are present. The
/// dependency relation between them is guaranteed acyclic.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    project_name: String,
    task_container: ContainerName,
    nodes: BTreeMap<ContainerName, DependencyGraphNode>,
}

impl DependencyGraph {
    /// Build the graph for a task container from a set of container definitions.
    pub fn build(
        containers: &BTreeMap<ContainerName, Container>,
        task_container: &str,
    ) -> Result<Self> {
        let builder = GraphBuilder {
            containers,
            task_name: None,
            task_container,
            task_dependencies: &BTreeSet::new(),
        };
        builder.build(DEFAULT_PROJECT_NAME)
    }

    /// Build the graph for a named task.
    ///
    /// The task's command and environment are applied to the task container,
    /// and its extra dependencies become dependencies of the task container.
    pub fn for_task(config: &ConfigFile, task_name: &str) -> Result<Self> {
        let task = config
            .task(task_name)
            .ok_or_else(|| StevedoreError::TaskNotFound(task_name.to_string()))?;

        let mut containers = config.containers.clone();
        if let Some(container) = containers.get_mut(&task.container) {
            if task.command.is_some() {
                container.command = task.command.clone();
            }
            container
                .environment
                .extend(task.environment.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let builder = GraphBuilder {
            containers: &containers,
            task_name: Some(task_name),
            task_container: &task.container,
            task_dependencies: &task.dependencies,
        };
        builder.build(&config.project_name)
    }

    /// Replace the project name used to derive image tags.
    pub fn with_project_name(mut self, project_name: impl Into<String>) -> Self {
        self.project_name = project_name.into();
        self
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn node_for(&self, name: &str) -> Option<&DependencyGraphNode> {
        self.nodes.get(name)
    }

    /// All nodes, ordered by container name.
    pub fn all_nodes(&self) -> impl Iterator<Item = &DependencyGraphNode> {
        self.nodes.values()
    }

    pub fn task_container_node(&self) -> &DependencyGraphNode {
        // Present by construction.
        &self.nodes[&self.task_container]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Container names ordered so that every container appears after all of
    /// its dependencies. The task container is always last.
    pub fn startup_order(&self) -> Result<Vec<ContainerName>> {
        // Edge direction: dependency -> dependent.
        let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

        for name in self.nodes.keys() {
            graph.add_node(name.as_str());
        }

        for (name, node) in self.nodes.iter() {
            for dep in node.depends_on.iter() {
                graph.add_edge(dep.as_str(), name.as_str(), ());
            }
        }

        match toposort(&graph, None) {
            Ok(order) => Ok(order.into_iter().map(str::to_string).collect()),
            Err(cycle) => Err(StevedoreError::InternalError(format!(
                "dependency graph contains a cycle involving '{}'",
                cycle.node_id()
            ))),
        }
    }
}

/// Depth-first construction from the task container, tracking the current
/// path so cycles can be reported in full.
struct GraphBuilder<'a> {
    containers: &'a BTreeMap<ContainerName, Container>,
    task_name: Option<&'a str>,
    task_container: &'a str,
    task_dependencies: &'a BTreeSet<ContainerName>,
}

impl GraphBuilder<'_> {
    fn build(&self, project_name: &str) -> Result<DependencyGraph> {
        if self.task_dependencies.contains(self.task_container) {
            return Err(StevedoreError::TaskContainerIsDependency(format!(
                "The task '{}' cannot have the container '{}' as both the main task container and also a dependency.",
                self.task_name.unwrap_or("<unnamed>"),
                self.task_container
            )));
        }

        let task_container = self.find_container(self.task_container, &self.task_description())?;

        let mut root_dependencies = Vec::new();
        for name in self.task_dependencies {
            root_dependencies.push(self.find_container(name, &self.task_description())?.name.clone());
        }
        for name in task_container.dependencies.iter() {
            let parent = format!("container '{}'", task_container.name);
            root_dependencies.push(self.find_container(name, &parent)?.name.clone());
        }

        let mut resolved: BTreeMap<ContainerName, BTreeSet<ContainerName>> = BTreeMap::new();
        self.visit(task_container, &root_dependencies, &mut resolved, &mut Vec::new())?;

        // Second pass: reverse edges.
        let mut nodes: BTreeMap<ContainerName, DependencyGraphNode> = resolved
            .iter()
            .map(|(name, deps)| {
                let node = DependencyGraphNode {
                    container: Arc::new(self.containers[name].clone()),
                    is_task_container: name == self.task_container,
                    depends_on: deps.clone(),
                    depended_on_by: BTreeSet::new(),
                };
                (name.clone(), node)
            })
            .collect();

        for (name, deps) in resolved.iter() {
            for dep in deps {
                if let Some(dep_node) = nodes.get_mut(dep) {
                    dep_node.depended_on_by.insert(name.clone());
                }
            }
        }

        Ok(DependencyGraph {
            project_name: project_name.to_string(),
            task_container: self.task_container.to_string(),
            nodes,
        })
    }

    fn visit(
        &self,
        container: &Container,
        dependencies: &[ContainerName],
        resolved: &mut BTreeMap<ContainerName, BTreeSet<ContainerName>>,
        path: &mut Vec<ContainerName>,
    ) -> Result<()> {
        if resolved.contains_key(&container.name) {
            return Ok(());
        }

        if dependencies.contains(&container.name) {
            return Err(StevedoreError::SelfDependency(container.name.clone()));
        }

        if path.contains(&container.name) {
            path.push(container.name.clone());
            return Err(self.cycle_error(path));
        }

        path.push(container.name.clone());

        for dep_name in dependencies {
            let dep = &self.containers[dep_name];
            let parent = format!("container '{}'", dep.name);
            let mut dep_dependencies = Vec::with_capacity(dep.dependencies.len());
            for name in dep.dependencies.iter() {
                dep_dependencies.push(self.find_container(name, &parent)?.name.clone());
            }
            self.visit(dep, &dep_dependencies, resolved, path)?;
        }

        path.pop();
        resolved.insert(
            container.name.clone(),
            dependencies.iter().cloned().collect(),
        );

        Ok(())
    }

    fn find_container(&self, name: &str, parent_description: &str) -> Result<&'_ Container> {
        self.containers.get(name).ok_or_else(|| {
            StevedoreError::ContainerNotFound(format!(
                "The container '{}' referenced by {} does not exist.",
                name, parent_description
            ))
        })
    }

    fn task_description(&self) -> String {
        match self.task_name {
            Some(name) => format!("task '{}'", name),
            None => "the task".to_string(),
        }
    }

    fn cycle_error(&self, path: &[ContainerName]) -> StevedoreError {
        let introduction = match self.task_name {
            Some(name) => format!("There is a dependency cycle in task '{}'. ", name),
            None => String::new(),
        };

        let through_task_dependency = path
            .get(1)
            .is_some_and(|second| self.task_dependencies.contains(second));

        let description = if through_task_dependency {
            self.describe_task_dependency_cycle(path)
        } else {
            describe_container_cycle(path)
        };

        StevedoreError::DependencyCycle(introduction + &description)
    }

    /// The cycle was entered through one of the task's extra dependencies:
    /// describe it starting from that dependency.
    fn describe_task_dependency_cycle(&self, path: &[ContainerName]) -> String {
        let names: Vec<String> = path[1..].iter().map(|n| format!("'{}'", n)).collect();
        let last_is_task_container = path.last().is_some_and(|n| n == self.task_container);

        let mut outgoing = vec![format!(
            "Container {} (which is explicitly started by the task)",
            names[0]
        )];
        outgoing.extend(names[1..names.len() - 1].iter().cloned());

        let mut incoming: Vec<String> = names[1..names.len() - 1].to_vec();
        let last = &names[names.len() - 1];
        incoming.push(if last_is_task_container {
            format!("the task container {}", last)
        } else {
            last.clone()
        });

        let clauses: Vec<String> = outgoing
            .iter()
            .zip(incoming.iter())
            .map(|(from, to)| format!("{} depends on {}", from, to))
            .collect();

        clauses.join(", and ") + "."
    }
}

fn describe_container_cycle(path: &[ContainerName]) -> String {
    let names: Vec<String> = path.iter().map(|n| format!("'{}'", n)).collect();
    format!(
        "Container {} depends on {}.",
        names[0],
        names[1..].join(", which depends on ")
    )
}
