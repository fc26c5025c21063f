// src/dag/task_order.rs

//! Order in which a task and its prerequisite tasks run.
//!
//! Prerequisites are resolved depth first, in declaration order, so every
//! task runs after all of its prerequisites and each task runs once. A
//! prerequisite containing `*` expands to every matching task name, sorted.

use globset::{Glob, GlobMatcher};
use tracing::{debug, info};

use crate::config::model::{ConfigFile, TaskDefinition};
use crate::errors::{Result, StevedoreError};

/// Resolve the tasks to run for `task_name`, prerequisites first.
///
/// With `skip_prerequisites` only the named task is returned.
pub fn resolve_execution_order<'a>(
    config: &'a ConfigFile,
    task_name: &str,
    skip_prerequisites: bool,
) -> Result<Vec<&'a TaskDefinition>> {
    let task = config
        .task(task_name)
        .ok_or_else(|| StevedoreError::TaskNotFound(task_name.to_string()))?;

    let order = if skip_prerequisites {
        vec![task]
    } else {
        let mut order = Vec::new();
        let mut path = vec![task];
        visit(config, task, &mut path, &mut order)?;
        order
    };

    let names: Vec<&str> = order.iter().map(|t| t.name.as_str()).collect();
    info!(execution_order = ?names, skip_prerequisites, "resolved task execution order");

    Ok(order)
}

fn visit<'a>(
    config: &'a ConfigFile,
    task: &'a TaskDefinition,
    path: &mut Vec<&'a TaskDefinition>,
    order: &mut Vec<&'a TaskDefinition>,
) -> Result<()> {
    for name in expand_prerequisites(config, task)? {
        let prerequisite =
            config
                .task(&name)
                .ok_or_else(|| StevedoreError::PrerequisiteNotFound {
                    task: task.name.clone(),
                    prerequisite: name.clone(),
                })?;

        if path.iter().any(|t| t.name == prerequisite.name) {
            path.push(prerequisite);
            return Err(StevedoreError::DependencyCycle(format!(
                "There is a dependency cycle between tasks: {}.",
                describe_cycle(path)
            )));
        }

        if order.iter().any(|t| t.name == prerequisite.name) {
            continue;
        }

        path.push(prerequisite);
        visit(config, prerequisite, path, order)?;
        path.pop();
    }

    order.push(task);
    Ok(())
}

fn expand_prerequisites(config: &ConfigFile, task: &TaskDefinition) -> Result<Vec<String>> {
    let mut names = Vec::new();

    for entry in task.prerequisites.iter() {
        if !entry.contains('*') {
            names.push(entry.clone());
            continue;
        }

        let matcher = wildcard_matcher(entry)?;
        let matched: Vec<String> = config
            .tasks
            .keys()
            .filter(|name| matcher.is_match(name.as_str()))
            .cloned()
            .collect();

        debug!(task = %task.name, pattern = %entry, ?matched, "expanded prerequisite wildcard");
        names.extend(matched);
    }

    Ok(names)
}

/// Only `*` is special; everything else in `entry` matches literally.
fn wildcard_matcher(entry: &str) -> Result<GlobMatcher> {
    let pattern = entry
        .split('*')
        .map(globset::escape)
        .collect::<Vec<_>>()
        .join("*");

    let glob = Glob::new(&pattern).map_err(|e| {
        StevedoreError::ConfigError(format!("invalid prerequisite pattern '{entry}': {e}"))
    })?;

    Ok(glob.compile_matcher())
}

fn describe_cycle(path: &[&TaskDefinition]) -> String {
    let names: Vec<String> = path.iter().map(|t| format!("'{}'", t.name)).collect();

    let mut description = format!("task {} has {} as a prerequisite", names[0], names[1]);
    for name in names.iter().skip(2) {
        description.push_str(&format!(", which has {name} as a prerequisite"));
    }
    description
}
