// src/exec/backend.rs

//! Pluggable container runtime abstraction.
//!
//! The step runner talks to a `ContainerRuntime` instead of a concrete
//! client. Production code uses [`DockerCli`](super::docker_cli::DockerCli);
//! tests provide a fake that records calls and returns canned results.

use std::collections::BTreeSet;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::config::model::{BuildImageSource, Container, PullImageSource, SetupCommand};
use crate::types::HealthStatus;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Everything needed to create one container.
#[derive(Debug, Clone)]
pub struct CreateContainerRequest {
    pub container: Arc<Container>,
    pub image_id: String,
    pub network_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreatedContainer {
    pub id: String,
    /// Host files created for this container; removed during cleanup.
    pub temporary_files: Vec<PathBuf>,
    pub temporary_directories: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    pub exit_code: i64,
    pub output: String,
}

/// Operations the engine needs from a container runtime.
///
/// Every method returns a boxed `Send` future so the trait stays object
/// safe. Long-running operations take a cancellation token and should
/// return promptly once it is cancelled.
pub trait ContainerRuntime: Send + Sync {
    /// Build an image and tag it with every tag in `tags`. Returns the image id.
    fn build_image<'a>(
        &'a self,
        source: &'a BuildImageSource,
        tags: &'a BTreeSet<String>,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<String>>;

    /// Pull an image. Returns the image id.
    fn pull_image<'a>(
        &'a self,
        source: &'a PullImageSource,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<String>>;

    /// Create the network shared by all containers in the task. Returns its id.
    fn create_network(&self) -> BoxFuture<'_, Result<String>>;

    fn delete_network<'a>(&'a self, network_id: &'a str) -> BoxFuture<'a, Result<()>>;

    fn create_container<'a>(
        &'a self,
        request: &'a CreateContainerRequest,
    ) -> BoxFuture<'a, Result<CreatedContainer>>;

    fn start_container<'a>(&'a self, container_id: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Start a container attached to its output and wait for it to exit.
    /// Returns the exit code.
    fn run_container<'a>(
        &'a self,
        container_id: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<i64>>;

    fn wait_for_healthy<'a>(
        &'a self,
        container_id: &'a str,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<HealthStatus>>;

    fn exec_setup_command<'a>(
        &'a self,
        container_id: &'a str,
        command: &'a SetupCommand,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<ExecResult>>;

    fn stop_container<'a>(&'a self, container_id: &'a str) -> BoxFuture<'a, Result<()>>;

    fn remove_container<'a>(&'a self, container_id: &'a str) -> BoxFuture<'a, Result<()>>;
}
