// src/config/mod.rs

//! Configuration loading and validation for stevedore.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate and convert it into the domain model (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path};
pub use model::{
    BuildImageSource, ConfigFile, Container, ContainerName, HealthCheckConfig, ImageSource,
    PortMapping, PullImageSource, SetupCommand, TaskDefinition, VolumeMount,
};
pub use validate::{parse_duration, validate_config};
