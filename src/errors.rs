// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StevedoreError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("The task '{prerequisite}' given as a prerequisite of '{task}' does not exist.")]
    PrerequisiteNotFound { task: String, prerequisite: String },

    #[error("{0}")]
    ContainerNotFound(String),

    #[error("The container '{0}' cannot depend on itself.")]
    SelfDependency(String),

    #[error("{0}")]
    TaskContainerIsDependency(String),

    #[error("{0}")]
    DependencyCycle(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, StevedoreError>;
