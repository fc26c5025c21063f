use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use tokio_util::sync::CancellationToken;

use stevedore::config::{BuildImageSource, PullImageSource, SetupCommand};
use stevedore::exec::{
    BoxFuture, ContainerRuntime, CreateContainerRequest, CreatedContainer, ExecResult,
};
use stevedore::types::HealthStatus;

pub const FAKE_NETWORK_ID: &str = "fake-network";

/// Runtime id the fake assigns to a container.
pub fn fake_container_id(container: &str) -> String {
    format!("{container}-id")
}

/// Image id the fake returns for a build source.
pub fn fake_built_image_id(source: &BuildImageSource) -> String {
    format!("built:{}", source.build_directory.display())
}

/// Image id the fake returns for a pull source.
pub fn fake_pulled_image_id(source: &PullImageSource) -> String {
    format!("pulled:{}", source.image_name)
}

/// One call made against the fake, in the order it was made.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RuntimeCall {
    BuildImage { tags: BTreeSet<String> },
    PullImage { image: String },
    CreateNetwork,
    DeleteNetwork { network_id: String },
    CreateContainer { container: String },
    StartContainer { container_id: String },
    RunContainer { container_id: String },
    WaitForHealthy { container_id: String },
    ExecSetupCommand { container_id: String, command: String },
    StopContainer { container_id: String },
    RemoveContainer { container_id: String },
}

#[derive(Default)]
struct Behaviour {
    failing: HashSet<RuntimeCall>,
    exit_codes: HashMap<String, i64>,
    health: HashMap<String, HealthStatus>,
    setup_exit_codes: HashMap<String, i64>,
    temporary_files: HashMap<String, Vec<PathBuf>>,
    temporary_directories: HashMap<String, Vec<PathBuf>>,
    delay: Option<Duration>,
    hang_on_run: bool,
    panic_on: Option<RuntimeCall>,
}

/// A fake container runtime that:
/// - records every call
/// - succeeds unless a call was marked as failing
/// - returns deterministic ids (see [`fake_container_id`], [`FAKE_NETWORK_ID`]).
#[derive(Clone, Default)]
pub struct FakeContainerRuntime {
    behaviour: Arc<Mutex<Behaviour>>,
    calls: Arc<Mutex<Vec<RuntimeCall>>>,
}

impl FakeContainerRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make this exact call return an error.
    pub fn failing(self, call: RuntimeCall) -> Self {
        self.behaviour.lock().unwrap().failing.insert(call);
        self
    }

    /// Panic (inside the step task) when this call is made.
    pub fn panicking(self, call: RuntimeCall) -> Self {
        self.behaviour.lock().unwrap().panic_on = Some(call);
        self
    }

    pub fn with_exit_code(self, container: &str, exit_code: i64) -> Self {
        self.behaviour
            .lock()
            .unwrap()
            .exit_codes
            .insert(fake_container_id(container), exit_code);
        self
    }

    pub fn with_health(self, container: &str, status: HealthStatus) -> Self {
        self.behaviour
            .lock()
            .unwrap()
            .health
            .insert(fake_container_id(container), status);
        self
    }

    pub fn with_setup_command_exit_code(self, command: &str, exit_code: i64) -> Self {
        self.behaviour
            .lock()
            .unwrap()
            .setup_exit_codes
            .insert(command.to_string(), exit_code);
        self
    }

    pub fn with_temporary_file(self, container: &str, path: PathBuf) -> Self {
        self.behaviour
            .lock()
            .unwrap()
            .temporary_files
            .entry(container.to_string())
            .or_default()
            .push(path);
        self
    }

    pub fn with_temporary_directory(self, container: &str, path: PathBuf) -> Self {
        self.behaviour
            .lock()
            .unwrap()
            .temporary_directories
            .entry(container.to_string())
            .or_default()
            .push(path);
        self
    }

    /// Sleep this long in every call.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.behaviour.lock().unwrap().delay = Some(delay);
        self
    }

    /// `run_container` only returns once cancelled.
    pub fn hanging_on_run(self) -> Self {
        self.behaviour.lock().unwrap().hang_on_run = true;
        self
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn was_called(&self, call: &RuntimeCall) -> bool {
        self.calls.lock().unwrap().contains(call)
    }

    /// Position of `call` in the call list.
    pub fn index_of(&self, call: &RuntimeCall) -> Option<usize> {
        self.calls.lock().unwrap().iter().position(|c| c == call)
    }

    async fn record(&self, call: RuntimeCall) -> Result<()> {
        let (delay, fails, panics) = {
            let behaviour = self.behaviour.lock().unwrap();
            (
                behaviour.delay,
                behaviour.failing.contains(&call),
                behaviour.panic_on.as_ref() == Some(&call),
            )
        };

        self.calls.lock().unwrap().push(call.clone());

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if panics {
            panic!("fake runtime told to panic on {call:?}");
        }

        if fails {
            bail!("fake runtime failure for {call:?}");
        }

        Ok(())
    }
}

impl ContainerRuntime for FakeContainerRuntime {
    fn build_image<'a>(
        &'a self,
        source: &'a BuildImageSource,
        tags: &'a BTreeSet<String>,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            self.record(RuntimeCall::BuildImage { tags: tags.clone() })
                .await?;
            Ok(fake_built_image_id(source))
        })
    }

    fn pull_image<'a>(
        &'a self,
        source: &'a PullImageSource,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            self.record(RuntimeCall::PullImage {
                image: source.image_name.clone(),
            })
            .await?;
            Ok(fake_pulled_image_id(source))
        })
    }

    fn create_network(&self) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            self.record(RuntimeCall::CreateNetwork).await?;
            Ok(FAKE_NETWORK_ID.to_string())
        })
    }

    fn delete_network<'a>(&'a self, network_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.record(RuntimeCall::DeleteNetwork {
            network_id: network_id.to_string(),
        }))
    }

    fn create_container<'a>(
        &'a self,
        request: &'a CreateContainerRequest,
    ) -> BoxFuture<'a, Result<CreatedContainer>> {
        Box::pin(async move {
            let name = request.container.name.clone();
            self.record(RuntimeCall::CreateContainer {
                container: name.clone(),
            })
            .await?;

            let behaviour = self.behaviour.lock().unwrap();
            Ok(CreatedContainer {
                id: fake_container_id(&name),
                temporary_files: behaviour
                    .temporary_files
                    .get(&name)
                    .cloned()
                    .unwrap_or_default(),
                temporary_directories: behaviour
                    .temporary_directories
                    .get(&name)
                    .cloned()
                    .unwrap_or_default(),
            })
        })
    }

    fn start_container<'a>(&'a self, container_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.record(RuntimeCall::StartContainer {
            container_id: container_id.to_string(),
        }))
    }

    fn run_container<'a>(
        &'a self,
        container_id: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<i64>> {
        Box::pin(async move {
            self.record(RuntimeCall::RunContainer {
                container_id: container_id.to_string(),
            })
            .await?;

            let (hang, exit_code) = {
                let behaviour = self.behaviour.lock().unwrap();
                (
                    behaviour.hang_on_run,
                    behaviour.exit_codes.get(container_id).copied().unwrap_or(0),
                )
            };

            if hang {
                cancel.cancelled().await;
                return Err(anyhow!("run of '{container_id}' cancelled"));
            }

            Ok(exit_code)
        })
    }

    fn wait_for_healthy<'a>(
        &'a self,
        container_id: &'a str,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<HealthStatus>> {
        Box::pin(async move {
            self.record(RuntimeCall::WaitForHealthy {
                container_id: container_id.to_string(),
            })
            .await?;

            let behaviour = self.behaviour.lock().unwrap();
            Ok(behaviour
                .health
                .get(container_id)
                .cloned()
                .unwrap_or(HealthStatus::BecameHealthy))
        })
    }

    fn exec_setup_command<'a>(
        &'a self,
        container_id: &'a str,
        command: &'a SetupCommand,
        _cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<ExecResult>> {
        Box::pin(async move {
            self.record(RuntimeCall::ExecSetupCommand {
                container_id: container_id.to_string(),
                command: command.command.clone(),
            })
            .await?;

            let behaviour = self.behaviour.lock().unwrap();
            let exit_code = behaviour
                .setup_exit_codes
                .get(&command.command)
                .copied()
                .unwrap_or(0);
            Ok(ExecResult {
                exit_code,
                output: format!("output of {}", command.command),
            })
        })
    }

    fn stop_container<'a>(&'a self, container_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.record(RuntimeCall::StopContainer {
            container_id: container_id.to_string(),
        }))
    }

    fn remove_container<'a>(&'a self, container_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.record(RuntimeCall::RemoveContainer {
            container_id: container_id.to_string(),
        }))
    }
}
