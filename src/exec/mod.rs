// src/exec/mod.rs

//! Step execution layer.
//!
//! - [`backend`] provides the `ContainerRuntime` trait the engine depends on.
//! - [`docker_cli`] is the production runtime, driving the `docker` CLI
//!   through `tokio::process::Command`.
//! - [`step_runner`] maps each step to runtime calls and turns the outcome
//!   into events.

pub mod backend;
pub mod docker_cli;
pub mod step_runner;

pub use backend::{
    BoxFuture, ContainerRuntime, CreateContainerRequest, CreatedContainer, ExecResult,
};
pub use docker_cli::DockerCli;
pub use step_runner::TaskStepRunner;
