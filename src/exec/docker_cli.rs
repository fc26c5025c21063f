// src/exec/docker_cli.rs

//! Production [`ContainerRuntime`] that drives the `docker` CLI.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::model::{BuildImageSource, Container, PullImageSource, SetupCommand};
use crate::exec::backend::{
    BoxFuture, ContainerRuntime, CreateContainerRequest, CreatedContainer, ExecResult,
};
use crate::types::HealthStatus;

const DEFAULT_HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Shells out to `docker` for every operation.
#[derive(Debug, Clone)]
pub struct DockerCli {
    executable: String,
    project_name: String,
    health_poll_interval: Duration,
}

impl DockerCli {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            executable: "docker".to_string(),
            project_name: project_name.into(),
            health_poll_interval: DEFAULT_HEALTH_POLL_INTERVAL,
        }
    }

    /// Use a different client binary (for example `podman`).
    pub fn with_executable(mut self, executable: impl Into<String>) -> Self {
        self.executable = executable.into();
        self
    }

    pub fn with_health_poll_interval(mut self, interval: Duration) -> Self {
        self.health_poll_interval = interval;
        self
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.executable);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn describe(&self, args: &[String]) -> String {
        format!("{} {}", self.executable, args.join(" "))
    }

    /// Run to completion, capturing output. Killed if `cancel` fires first.
    async fn output(&self, args: Vec<String>, cancel: Option<&CancellationToken>) -> Result<Output> {
        let description = self.describe(&args);
        debug!(command = %description, "running container runtime command");

        let child = self
            .command(&args)
            .spawn()
            .with_context(|| format!("spawning '{description}'"))?;

        let output = match cancel {
            Some(token) => tokio::select! {
                output = child.wait_with_output() => output,
                _ = token.cancelled() => bail!("'{description}' was cancelled"),
            },
            None => child.wait_with_output().await,
        };

        output.with_context(|| format!("waiting for '{description}'"))
    }

    /// Run to completion and fail on a non-zero exit status. Returns trimmed stdout.
    async fn checked(&self, args: Vec<String>, cancel: Option<&CancellationToken>) -> Result<String> {
        let description = self.describe(&args);
        let output = self.output(args, cancel).await?;

        if !output.status.success() {
            bail!(
                "'{}' failed with exit code {}: {}",
                description,
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn inspect_state(&self, container_id: &str) -> Result<ContainerState> {
        let json = self
            .checked(
                args(["inspect", "--format", "{{json .State}}", container_id]),
                None,
            )
            .await?;

        serde_json::from_str(&json)
            .with_context(|| format!("parsing state of container '{container_id}'"))
    }

    async fn build(
        &self,
        source: &BuildImageSource,
        tags: &BTreeSet<String>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let dockerfile = source.build_directory.join(&source.dockerfile);

        let mut build_args = args(["build", "--quiet", "--file"]);
        build_args.push(path_arg(&dockerfile));
        for tag in tags {
            build_args.push("--tag".to_string());
            build_args.push(tag.clone());
        }
        for (name, value) in source.build_args.iter() {
            build_args.push("--build-arg".to_string());
            build_args.push(format!("{name}={value}"));
        }
        build_args.push(path_arg(&source.build_directory));

        info!(source = %source, ?tags, "building image");
        let image_id = self.checked(build_args, Some(cancel)).await?;
        Ok(image_id)
    }

    async fn pull(&self, source: &PullImageSource, cancel: &CancellationToken) -> Result<String> {
        let image = source.image_name.as_str();

        info!(image, "pulling image");
        self.checked(args(["pull", "--quiet", image]), Some(cancel))
            .await?;

        self.checked(
            args(["image", "inspect", "--format", "{{.Id}}", image]),
            Some(cancel),
        )
        .await
    }

    async fn create(&self, request: &CreateContainerRequest) -> Result<CreatedContainer> {
        let container = &request.container;
        let env_file = write_env_file(container).await?;

        let mut create_args = args(["create", "--network", request.network_id.as_str()]);
        create_args.extend(args(["--network-alias", container.name.as_str()]));
        create_args.extend(args(["--hostname", container.name.as_str()]));
        create_args.push("--env-file".to_string());
        create_args.push(path_arg(&env_file));
        create_args.extend(container_options(container));
        create_args.push(request.image_id.clone());
        if let Some(command) = &container.command {
            create_args.extend(args(["sh", "-c", command.as_str()]));
        }

        match self.checked(create_args, None).await {
            Ok(id) => {
                info!(container = %container.name, id = %id, "container created");
                Ok(CreatedContainer {
                    id,
                    temporary_files: vec![env_file],
                    temporary_directories: Vec::new(),
                })
            }
            Err(err) => {
                if let Err(e) = tokio::fs::remove_file(&env_file).await {
                    warn!(path = %env_file.display(), error = %e, "failed to remove environment file");
                }
                Err(err)
            }
        }
    }

    async fn run_attached(&self, container_id: &str, cancel: &CancellationToken) -> Result<i64> {
        let run_args = args(["start", "--attach", container_id]);
        let description = self.describe(&run_args);

        let mut cmd = Command::new(&self.executable);
        cmd.args(&run_args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning '{description}'"))?;

        tokio::select! {
            status = child.wait() => {
                status.with_context(|| format!("waiting for '{description}'"))?;
            }
            _ = cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    warn!(container = %container_id, error = %e, "failed to detach from container on cancellation");
                }
                bail!("'{description}' was cancelled");
            }
        }

        let state = self.inspect_state(container_id).await?;
        Ok(state.exit_code)
    }

    async fn poll_health(&self, container_id: &str, cancel: &CancellationToken) -> Result<HealthStatus> {
        loop {
            let state = self.inspect_state(container_id).await?;

            let Some(health) = &state.health else {
                return Ok(HealthStatus::NoHealthCheck);
            };

            match health.status.as_str() {
                "healthy" => return Ok(HealthStatus::BecameHealthy),
                "unhealthy" => {
                    let message = health
                        .log
                        .last()
                        .map(|entry| {
                            format!(
                                "last health check exited with code {}: {}",
                                entry.exit_code,
                                entry.output.trim()
                            )
                        })
                        .unwrap_or_else(|| "health check reported unhealthy".to_string());
                    return Ok(HealthStatus::BecameUnhealthy { message });
                }
                _ if !state.running => {
                    return Ok(HealthStatus::Exited {
                        exit_code: state.exit_code,
                    });
                }
                _ => {}
            }

            tokio::select! {
                _ = tokio::time::sleep(self.health_poll_interval) => {}
                _ = cancel.cancelled() => bail!("waiting for container '{container_id}' to become healthy was cancelled"),
            }
        }
    }

    async fn exec(
        &self,
        container_id: &str,
        command: &SetupCommand,
        cancel: &CancellationToken,
    ) -> Result<ExecResult> {
        let mut exec_args = args(["exec"]);
        if let Some(dir) = &command.working_directory {
            exec_args.extend(args(["--workdir", dir.as_str()]));
        }
        exec_args.extend(args([container_id, "sh", "-c", command.command.as_str()]));

        let output = self.output(exec_args, Some(cancel)).await?;

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(ExecResult {
            exit_code: output.status.code().map(i64::from).unwrap_or(-1),
            output: text,
        })
    }
}

impl ContainerRuntime for DockerCli {
    fn build_image<'a>(
        &'a self,
        source: &'a BuildImageSource,
        tags: &'a BTreeSet<String>,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(self.build(source, tags, cancel))
    }

    fn pull_image<'a>(
        &'a self,
        source: &'a PullImageSource,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(self.pull(source, cancel))
    }

    fn create_network(&self) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let name = format!(
                "{}-{}-{}",
                self.project_name,
                std::process::id(),
                chrono::Utc::now().timestamp_millis()
            );
            self.checked(args(["network", "create", "--driver", "bridge", name.as_str()]), None)
                .await
        })
    }

    fn delete_network<'a>(&'a self, network_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.checked(args(["network", "rm", network_id]), None)
                .await
                .map(|_| ())
        })
    }

    fn create_container<'a>(
        &'a self,
        request: &'a CreateContainerRequest,
    ) -> BoxFuture<'a, Result<CreatedContainer>> {
        Box::pin(self.create(request))
    }

    fn start_container<'a>(&'a self, container_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.checked(args(["start", container_id]), None)
                .await
                .map(|_| ())
        })
    }

    fn run_container<'a>(
        &'a self,
        container_id: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<i64>> {
        Box::pin(self.run_attached(container_id, cancel))
    }

    fn wait_for_healthy<'a>(
        &'a self,
        container_id: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<HealthStatus>> {
        Box::pin(self.poll_health(container_id, cancel))
    }

    fn exec_setup_command<'a>(
        &'a self,
        container_id: &'a str,
        command: &'a SetupCommand,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<ExecResult>> {
        Box::pin(self.exec(container_id, command, cancel))
    }

    fn stop_container<'a>(&'a self, container_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.checked(args(["stop", container_id]), None)
                .await
                .map(|_| ())
        })
    }

    fn remove_container<'a>(&'a self, container_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.checked(args(["rm", "--force", "--volumes", container_id]), None)
                .await
                .map(|_| ())
        })
    }
}

/// Subset of `docker inspect --format '{{json .State}}'`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerState {
    running: bool,
    exit_code: i64,
    #[serde(default)]
    health: Option<ContainerHealth>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerHealth {
    status: String,
    #[serde(default)]
    log: Vec<HealthLogEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthLogEntry {
    exit_code: i64,
    #[serde(default)]
    output: String,
}

fn args<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Everything on `docker create` that comes straight from the container definition.
fn container_options(container: &Container) -> Vec<String> {
    let mut options = Vec::new();

    if let Some(dir) = &container.working_directory {
        options.extend(args(["--workdir", dir.as_str()]));
    }

    for mount in container.volume_mounts.iter() {
        options.push("--volume".to_string());
        options.push(mount.to_string());
    }

    for port in container.port_mappings.iter() {
        options.push("--publish".to_string());
        options.push(port.to_string());
    }

    if let Some(health) = &container.health_check {
        if let Some(command) = &health.command {
            options.extend(args(["--health-cmd", command.as_str()]));
        }
        let durations = [
            ("--health-interval", health.interval),
            ("--health-start-period", health.start_period),
            ("--health-timeout", health.timeout),
        ];
        for (flag, value) in durations {
            if let Some(value) = value {
                options.push(flag.to_string());
                options.push(format!("{}ms", value.as_millis()));
            }
        }
        if let Some(retries) = health.retries {
            options.push("--health-retries".to_string());
            options.push(retries.to_string());
        }
    }

    options
}

/// Write the container's environment to a file that outlives this call.
///
/// The caller reports the path as a temporary file so cleanup removes it.
async fn write_env_file(container: &Container) -> Result<PathBuf> {
    let contents = env_file_contents(&container.name, &container.environment)?;
    let prefix = format!("stevedore-{}-", container.name);

    tokio::task::spawn_blocking(move || -> Result<PathBuf> {
        let mut file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(".env")
            .tempfile()
            .context("creating environment file")?;

        file.write_all(contents.as_bytes())
            .context("writing environment file")?;

        let (_, path) = file.keep().context("persisting environment file")?;
        Ok(path)
    })
    .await
    .context("environment file writer did not complete")?
}

/// `NAME=value` lines in the format `docker --env-file` reads.
///
/// The format has no quoting, so names containing `=` and names or values
/// spanning lines are rejected.
pub fn env_file_contents(
    container: &str,
    environment: &BTreeMap<String, String>,
) -> Result<String> {
    let mut contents = String::new();

    for (name, value) in environment.iter() {
        if name.is_empty() || name.contains(['=', '\n', '\r']) {
            bail!("container '{container}' has an invalid environment variable name '{name}'");
        }
        if value.contains(['\n', '\r']) {
            bail!(
                "environment variable '{name}' of container '{container}' contains a line break"
            );
        }
        contents.push_str(&format!("{name}={value}\n"));
    }

    Ok(contents)
}
