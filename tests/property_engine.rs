// tests/property_engine.rs

mod common;
use crate::common::builders::{graph_of, ContainerBuilder};
use crate::common::{drive, flatten, successful_outcome};

use std::collections::HashSet;

use proptest::prelude::*;
use stevedore::config::Container;
use stevedore::engine::{RunOptions, TaskStateMachine};
use stevedore::model::{
    CleanupStagePlanner, CleanupStep, EventLog, RuleEvaluation, RunStagePlanner, RunStep,
    TaskEvent, TaskStep, TaskStepRule,
};
use stevedore::types::CleanupOption;

/// Containers `c0..cN` where each container may only depend on higher
/// numbered ones, so the graph is acyclic. `c0` is the task container and
/// depends on every container nothing else depends on, so all are reachable.
fn arb_containers() -> impl Strategy<Value = Vec<Container>> {
    (2usize..8)
        .prop_flat_map(|n| {
            let edges = proptest::collection::vec(any::<bool>(), n * n);
            (Just(n), edges)
        })
        .prop_map(|(n, edges)| {
            let mut deps: Vec<Vec<usize>> = vec![Vec::new(); n];
            for i in 1..n {
                for j in (i + 1)..n {
                    if edges[i * n + j] {
                        deps[i].push(j);
                    }
                }
            }

            let depended_on: HashSet<usize> = deps.iter().flatten().copied().collect();
            deps[0] = (1..n).filter(|i| !depended_on.contains(i)).collect();

            (0..n)
                .map(|i| {
                    let mut builder = ContainerBuilder::new(&format!("c{i}"));
                    if i % 2 == 1 {
                        builder = builder.health_check("true").setup_command("init");
                    }
                    for dep in deps[i].iter() {
                        builder = builder.depends_on(&format!("c{dep}"));
                    }
                    builder.build()
                })
                .collect()
        })
}

fn container_of(step: &TaskStep) -> Option<&str> {
    step.container_name()
}

/// Logs holding the first 0, 1, .. n events of `events`.
fn prefixes(events: &[TaskEvent]) -> Vec<EventLog> {
    (0..=events.len())
        .map(|len| EventLog::from_events(events[..len].iter().cloned()))
        .collect()
}

/// The answer must not depend on when it is asked, and once ready the rule
/// must stay ready with the same step.
fn check_rule_over_prefixes<R: TaskStepRule>(
    rule: &R,
    prefixes: &[EventLog],
) -> Result<(), TestCaseError> {
    let mut ready_with: Option<TaskStep> = None;

    for (len, log) in prefixes.iter().enumerate() {
        let first = rule.evaluate(log);
        let second = rule.evaluate(log);
        prop_assert_eq!(&first, &second, "{} gave different answers for one log", rule);

        match (&ready_with, first) {
            (Some(step), evaluation) => {
                let still_ready = evaluation == RuleEvaluation::Ready(step.clone());
                prop_assert!(still_ready, "{} stopped being ready after {} events", rule, len);
            }
            (None, RuleEvaluation::Ready(step)) => ready_with = Some(step),
            (None, RuleEvaluation::NotReady) => {}
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn every_run_finishes_without_repeating_steps(
        containers in arb_containers(),
        max_parallelism in proptest::option::of(1usize..4),
    ) {
        let graph = graph_of(containers.clone(), "c0");
        let options = RunOptions { max_parallelism, ..RunOptions::default() };
        let mut machine = TaskStateMachine::new(graph, options);

        let batches = drive(&mut machine, successful_outcome);
        let steps = flatten(&batches);

        let unique: HashSet<&TaskStep> = steps.iter().collect();
        prop_assert_eq!(unique.len(), steps.len());

        if let Some(limit) = max_parallelism {
            prop_assert!(batches.iter().all(|b| b.len() <= limit));
        }

        let result = machine.result();
        prop_assert_eq!(result.exit_code, 0);
        prop_assert!(result.manual_cleanup.is_none());

        // Every container was created, removed, and the network deleted last.
        for container in containers.iter() {
            let name = container.name.as_str();
            let removed = steps.iter().any(|s| {
                matches!(s, TaskStep::Cleanup(CleanupStep::RemoveContainer { .. }))
                    && container_of(s) == Some(name)
            });
            prop_assert!(removed, "{} was not removed", name);
        }
        let last_is_network = matches!(
            steps.last(),
            Some(TaskStep::Cleanup(CleanupStep::DeleteNetwork { .. }))
        );
        prop_assert!(last_is_network, "last step was {:?}", steps.last());
    }

    #[test]
    fn dependencies_are_ready_before_dependents_start(containers in arb_containers()) {
        let graph = graph_of(containers, "c0");
        let mut machine = TaskStateMachine::new(graph.clone(), RunOptions::default());

        let mut ready: HashSet<String> = HashSet::new();
        let batches = drive(&mut machine, |step| {
            let events = successful_outcome(step);
            for event in events.iter() {
                if let TaskEvent::ContainerBecameReady { container } = event {
                    ready.insert(container.clone());
                }
            }
            events
        });

        // Replay in dispatch order, checking readiness at each start.
        let mut seen_ready: HashSet<String> = HashSet::new();
        for batch in batches.iter() {
            for step in batch.iter() {
                let starting = match step {
                    TaskStep::Run(RunStep::StartContainer { container, .. })
                    | TaskStep::Run(RunStep::RunContainer { container, .. }) => Some(container),
                    _ => None,
                };
                if let Some(name) = starting {
                    let node = graph.node_for(name).expect("node exists");
                    for dep in node.depends_on() {
                        prop_assert!(seen_ready.contains(dep), "{} started before {} was ready", name, dep);
                    }
                }
            }
            for step in batch.iter() {
                if let TaskStep::Run(RunStep::RunContainerSetupCommands { container, .. }) = step {
                    seen_ready.insert(container.name.clone());
                }
            }
        }

        prop_assert_eq!(seen_ready.len() + 1, graph.len());
        prop_assert_eq!(ready, seen_ready);
    }

    #[test]
    fn rules_are_pure_and_monotonic_over_event_log_prefixes(
        containers in arb_containers(),
        fail_at in proptest::option::of(0usize..40),
    ) {
        let graph = graph_of(containers, "c0");
        let mut machine = TaskStateMachine::new(graph.clone(), RunOptions::default());

        let mut dispatched = 0usize;
        let mut outcomes: Vec<Vec<TaskEvent>> = Vec::new();
        let batches = drive(&mut machine, |step| {
            let events = if fail_at == Some(dispatched) {
                vec![TaskEvent::StepFailed {
                    step: step.clone(),
                    message: "failed on purpose".to_string(),
                }]
            } else {
                successful_outcome(step)
            };
            dispatched += 1;
            outcomes.push(events.clone());
            events
        });

        let log: Vec<TaskEvent> = machine.events().iter().cloned().collect();
        let logs = prefixes(&log);

        let run_stage = RunStagePlanner::create_stage(&graph);
        for rule in run_stage.pending_rules() {
            check_rule_over_prefixes(rule, &logs)?;
        }

        let cleanup_stage =
            CleanupStagePlanner::create_stage(&graph, machine.events(), CleanupOption::Cleanup);
        for rule in cleanup_stage.rules.pending_rules() {
            check_rule_over_prefixes(rule, &logs)?;
        }

        // Replay batch by batch: a stop is only dispatched once every
        // started dependent has stopped.
        let mut seen = EventLog::new();
        let mut outcomes = outcomes.into_iter();
        for batch in batches.iter() {
            for step in batch.iter() {
                if let TaskStep::Cleanup(CleanupStep::StopContainer { container, .. }) = step {
                    let node = graph.node_for(container).expect("node exists");
                    for dependent in node.depended_on_by() {
                        let blocked =
                            seen.container_started(dependent) && !seen.container_stopped(dependent);
                        prop_assert!(
                            !blocked,
                            "{} stopped while dependent {} was still running",
                            container,
                            dependent
                        );
                    }
                }
            }
            for _ in batch.iter() {
                for event in outcomes.next().unwrap_or_default() {
                    seen.append(event);
                }
            }
        }
    }
}
