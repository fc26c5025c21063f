// src/model/stages.rs

//! Run and cleanup stages: the rule sets the scheduler works through.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, info};

use crate::config::model::{BuildImageSource, ContainerName, ImageSource, PullImageSource};
use crate::dag::DependencyGraph;
use crate::model::events::{EventLog, TaskEvent};
use crate::model::rules::{CleanupStepRule, RuleEvaluation, RunStepRule, TaskStepRule};
use crate::model::steps::TaskStep;
use crate::types::CleanupOption;

/// A set of rules, each of which fires at most once.
#[derive(Debug, Clone)]
pub struct Stage<R> {
    pending: Vec<R>,
    fired: Vec<(R, TaskStep)>,
}

impl<R: TaskStepRule> Stage<R> {
    pub fn new(rules: Vec<R>) -> Self {
        Self {
            pending: rules,
            fired: Vec::new(),
        }
    }

    pub fn pending_rules(&self) -> &[R] {
        &self.pending
    }

    /// Rules that already produced a step, with that step.
    pub fn fired_rules(&self) -> &[(R, TaskStep)] {
        &self.fired
    }

    pub fn has_pending_rules(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Remove every rule that is ready against `events` and return its step.
    ///
    /// At most `limit` steps are returned; rules beyond the limit stay
    /// pending and are picked up on a later call.
    pub fn pop_ready_steps(&mut self, events: &EventLog, limit: Option<usize>) -> Vec<TaskStep> {
        let mut ready = Vec::new();
        let mut still_pending = Vec::with_capacity(self.pending.len());

        for rule in self.pending.drain(..) {
            if limit.is_some_and(|l| ready.len() >= l) {
                still_pending.push(rule);
                continue;
            }

            match rule.evaluate(events) {
                RuleEvaluation::Ready(step) => {
                    debug!(rule = %rule, step = %step, "rule is ready");
                    ready.push(step.clone());
                    self.fired.push((rule, step));
                }
                RuleEvaluation::NotReady => still_pending.push(rule),
            }
        }

        self.pending = still_pending;
        ready
    }

    /// Drop all pending rules, returning them.
    pub fn abandon_pending(&mut self) -> Vec<R> {
        std::mem::take(&mut self.pending)
    }

    /// The rule that produced `step`, if it has fired.
    pub fn rule_for_step(&self, step: &TaskStep) -> Option<&R> {
        self.fired
            .iter()
            .find(|(_, fired)| fired == step)
            .map(|(rule, _)| rule)
    }
}

pub type RunStage = Stage<RunStepRule>;

/// Cleanup rules plus the instructions a user would need if none of them ran.
#[derive(Debug, Clone)]
pub struct CleanupStage {
    pub rules: Stage<CleanupStepRule>,
    pub manual_cleanup_commands: Vec<String>,
}

pub struct RunStagePlanner;

impl RunStagePlanner {
    pub fn create_stage(graph: &DependencyGraph) -> RunStage {
        let mut builds: BTreeMap<BuildImageSource, BTreeSet<String>> = BTreeMap::new();
        let mut pulls: BTreeSet<PullImageSource> = BTreeSet::new();

        for node in graph.all_nodes() {
            match &node.container().image_source {
                ImageSource::Build(source) => {
                    builds
                        .entry(source.clone())
                        .or_default()
                        .insert(format!("{}-{}", graph.project_name(), node.name()));
                }
                ImageSource::Pull(source) => {
                    pulls.insert(source.clone());
                }
            }
        }

        let mut rules = vec![RunStepRule::CreateNetwork];

        rules.extend(
            builds
                .into_iter()
                .map(|(source, image_tags)| RunStepRule::BuildImage { source, image_tags }),
        );
        rules.extend(pulls.into_iter().map(|source| RunStepRule::PullImage { source }));

        for node in graph.all_nodes() {
            rules.push(RunStepRule::CreateContainer {
                container: node.container().clone(),
            });

            let container = node.name().to_string();
            let dependencies = node.depends_on().clone();

            if node.is_task_container() {
                rules.push(RunStepRule::RunContainer {
                    container,
                    dependencies,
                });
            } else {
                rules.push(RunStepRule::StartContainer {
                    container: container.clone(),
                    dependencies,
                });
                rules.push(RunStepRule::WaitForContainerHealthy {
                    container: container.clone(),
                });
                rules.push(RunStepRule::RunContainerSetupCommands {
                    container: node.container().clone(),
                });
            }
        }

        info!(rules = rules.len(), "created run stage");
        debug!(rules = %to_json(&rules), "run stage rules");

        Stage::new(rules)
    }
}

pub struct CleanupStagePlanner;

impl CleanupStagePlanner {
    /// Derive cleanup rules from what the run stage actually created.
    ///
    /// With [`CleanupOption::DontCleanup`] only the stop rules are kept; the
    /// full set of manual instructions is still computed.
    pub fn create_stage(
        graph: &DependencyGraph,
        events: &EventLog,
        cleanup: CleanupOption,
    ) -> CleanupStage {
        let created: BTreeMap<ContainerName, String> = graph
            .all_nodes()
            .filter_map(|node| {
                events
                    .container_runtime_id(node.name())
                    .map(|id| (node.name().to_string(), id.to_string()))
            })
            .collect();

        let started: BTreeSet<ContainerName> = created
            .keys()
            .filter(|name| events.container_started(name))
            .cloned()
            .collect();

        let stop_rules: Vec<CleanupStepRule> = started
            .iter()
            .filter_map(|name| {
                let node = graph.node_for(name)?;
                let must_stop_first = node
                    .depended_on_by()
                    .iter()
                    .filter(|d| started.contains(*d))
                    .cloned()
                    .collect();

                Some(CleanupStepRule::StopContainer {
                    container: name.clone(),
                    runtime_id: created[name].clone(),
                    must_stop_first,
                })
            })
            .collect();

        let mut all_rules = Vec::new();

        if let Some(network_id) = events.network_id() {
            all_rules.push(CleanupStepRule::DeleteNetwork {
                network_id: network_id.to_string(),
                must_remove_first: created.keys().cloned().collect(),
            });
        }

        all_rules.extend(stop_rules.iter().cloned());

        all_rules.extend(created.iter().map(|(name, runtime_id)| {
            CleanupStepRule::RemoveContainer {
                container: name.clone(),
                runtime_id: runtime_id.clone(),
                was_started: started.contains(name),
            }
        }));

        all_rules.extend(temporary_path_rules(events, &created));

        let manual_cleanup_commands = manual_cleanup_commands(&all_rules);

        let rules = match cleanup {
            CleanupOption::Cleanup => all_rules,
            CleanupOption::DontCleanup => stop_rules,
        };

        info!(
            rules = rules.len(),
            manual_cleanup_commands = manual_cleanup_commands.len(),
            ?cleanup,
            "created cleanup stage"
        );
        debug!(rules = %to_json(&rules), "cleanup stage rules");

        CleanupStage {
            rules: Stage::new(rules),
            manual_cleanup_commands,
        }
    }
}

fn temporary_path_rules(
    events: &EventLog,
    created: &BTreeMap<ContainerName, String>,
) -> Vec<CleanupStepRule> {
    let owner_if_created =
        |container: &ContainerName| created.contains_key(container).then(|| container.clone());

    events
        .iter()
        .filter_map(|event| match event {
            TaskEvent::TemporaryFileCreated { container, path } => {
                Some(CleanupStepRule::DeleteTemporaryFile {
                    path: path.clone(),
                    owner: owner_if_created(container),
                })
            }
            TaskEvent::TemporaryDirectoryCreated { container, path } => {
                Some(CleanupStepRule::DeleteTemporaryDirectory {
                    path: path.clone(),
                    owner: owner_if_created(container),
                })
            }
            _ => None,
        })
        .collect()
}

/// Instructions for `rules`, in presentation order.
pub fn manual_cleanup_commands<'a>(
    rules: impl IntoIterator<Item = &'a CleanupStepRule>,
) -> Vec<String> {
    let mut commands: Vec<_> = rules
        .into_iter()
        .filter_map(|rule| {
            rule.manual_cleanup_instruction()
                .map(|command| (rule.manual_cleanup_sort_order(), command))
        })
        .collect();

    commands.sort_by(|a, b| a.0.cmp(&b.0));
    commands.into_iter().map(|(_, command)| command).collect()
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("<unserializable: {e}>"))
}
