// src/exec/step_runner.rs

//! Maps each step to container runtime calls and reports the outcome as events.

use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::exec::backend::{ContainerRuntime, CreateContainerRequest};
use crate::model::events::{TaskEvent, TaskEventSink};
use crate::model::steps::{CleanupStep, RunStep, TaskStep};
use crate::types::HealthStatus;

/// Runs one step at a time against a [`ContainerRuntime`].
///
/// A step never returns an error to its caller: failures are posted as
/// [`TaskEvent::StepFailed`]. Failures caused by cancellation are not
/// reported, since `UserInterrupted` already explains them.
#[derive(Clone)]
pub struct TaskStepRunner {
    runtime: Arc<dyn ContainerRuntime>,
}

impl TaskStepRunner {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    pub async fn run(&self, step: TaskStep, sink: &dyn TaskEventSink, cancel: &CancellationToken) {
        sink.post_event(TaskEvent::StepStarting { step: step.clone() });

        let result = match &step {
            TaskStep::Run(run_step) => self.run_step(run_step, sink, cancel).await,
            TaskStep::Cleanup(cleanup_step) => self.cleanup_step(cleanup_step, sink).await,
        };

        if let Err(err) = result {
            if cancel.is_cancelled() && !step.is_cleanup() {
                debug!(step = %step, error = %err, "step ended after cancellation");
                return;
            }

            sink.post_event(TaskEvent::StepFailed {
                step,
                message: format!("{err:#}"),
            });
        }
    }

    async fn run_step(
        &self,
        step: &RunStep,
        sink: &dyn TaskEventSink,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match step {
            RunStep::CreateNetwork => {
                let network_id = self.runtime.create_network().await?;
                sink.post_event(TaskEvent::NetworkCreated { network_id });
            }
            RunStep::BuildImage { source, image_tags } => {
                let image_id = self.runtime.build_image(source, image_tags, cancel).await?;
                sink.post_event(TaskEvent::ImageBuilt {
                    source: source.clone(),
                    image_id,
                });
            }
            RunStep::PullImage { source } => {
                let image_id = self.runtime.pull_image(source, cancel).await?;
                sink.post_event(TaskEvent::ImagePulled {
                    source: source.clone(),
                    image_id,
                });
            }
            RunStep::CreateContainer {
                container,
                image_id,
                network_id,
            } => {
                let request = CreateContainerRequest {
                    container: Arc::clone(container),
                    image_id: image_id.clone(),
                    network_id: network_id.clone(),
                };
                let created = self.runtime.create_container(&request).await?;

                for path in created.temporary_files {
                    sink.post_event(TaskEvent::TemporaryFileCreated {
                        container: container.name.clone(),
                        path,
                    });
                }
                for path in created.temporary_directories {
                    sink.post_event(TaskEvent::TemporaryDirectoryCreated {
                        container: container.name.clone(),
                        path,
                    });
                }

                sink.post_event(TaskEvent::ContainerCreated {
                    container: container.name.clone(),
                    runtime_id: created.id,
                });
            }
            RunStep::StartContainer {
                container,
                runtime_id,
            } => {
                self.runtime.start_container(runtime_id).await?;
                sink.post_event(TaskEvent::ContainerStarted {
                    container: container.clone(),
                });
            }
            RunStep::WaitForContainerHealthy {
                container,
                runtime_id,
            } => match self.runtime.wait_for_healthy(runtime_id, cancel).await? {
                HealthStatus::NoHealthCheck | HealthStatus::BecameHealthy => {
                    sink.post_event(TaskEvent::ContainerBecameHealthy {
                        container: container.clone(),
                    });
                }
                HealthStatus::BecameUnhealthy { message } => {
                    bail!("container '{container}' did not become healthy: {message}");
                }
                HealthStatus::Exited { exit_code } => {
                    bail!(
                        "container '{container}' exited with code {exit_code} before becoming healthy"
                    );
                }
            },
            RunStep::RunContainerSetupCommands {
                container,
                runtime_id,
            } => {
                let total = container.setup_commands.len();

                for (index, command) in container.setup_commands.iter().enumerate() {
                    sink.post_event(TaskEvent::RunningSetupCommand {
                        container: container.name.clone(),
                        command: command.command.clone(),
                        index,
                        total,
                    });

                    let result = self
                        .runtime
                        .exec_setup_command(runtime_id, command, cancel)
                        .await
                        .with_context(|| {
                            format!("running setup command '{}'", command.command)
                        })?;

                    if result.exit_code != 0 {
                        return Err(anyhow!(
                            "setup command '{}' ({} of {}) exited with code {}: {}",
                            command.command,
                            index + 1,
                            total,
                            result.exit_code,
                            result.output.trim()
                        ));
                    }
                }

                sink.post_event(TaskEvent::ContainerBecameReady {
                    container: container.name.clone(),
                });
            }
            RunStep::RunContainer {
                container,
                runtime_id,
            } => {
                sink.post_event(TaskEvent::ContainerStarted {
                    container: container.clone(),
                });

                let exit_code = self.runtime.run_container(runtime_id, cancel).await?;
                info!(container = %container, exit_code, "task container exited");

                sink.post_event(TaskEvent::ContainerExited {
                    container: container.clone(),
                    exit_code,
                });
            }
        }

        Ok(())
    }

    async fn cleanup_step(&self, step: &CleanupStep, sink: &dyn TaskEventSink) -> Result<()> {
        match step {
            CleanupStep::StopContainer {
                container,
                runtime_id,
            } => {
                self.runtime.stop_container(runtime_id).await?;
                sink.post_event(TaskEvent::ContainerStopped {
                    container: container.clone(),
                });
            }
            CleanupStep::RemoveContainer {
                container,
                runtime_id,
            } => {
                self.runtime.remove_container(runtime_id).await?;
                sink.post_event(TaskEvent::ContainerRemoved {
                    container: container.clone(),
                });
            }
            CleanupStep::DeleteNetwork { network_id } => {
                self.runtime.delete_network(network_id).await?;
                sink.post_event(TaskEvent::NetworkDeleted {
                    network_id: network_id.clone(),
                });
            }
            CleanupStep::DeleteTemporaryFile { path } => {
                tokio::fs::remove_file(path)
                    .await
                    .with_context(|| format!("deleting temporary file {}", path.display()))?;
                sink.post_event(TaskEvent::TemporaryFileDeleted { path: path.clone() });
            }
            CleanupStep::DeleteTemporaryDirectory { path } => {
                tokio::fs::remove_dir_all(path)
                    .await
                    .with_context(|| format!("deleting temporary directory {}", path.display()))?;
                sink.post_event(TaskEvent::TemporaryDirectoryDeleted { path: path.clone() });
            }
        }

        Ok(())
    }
}
