// src/config/validate.rs

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::config::model::{
    BuildImageSource, ConfigFile, Container, HealthCheckConfig, ImageSource, PortMapping,
    PullImageSource, RawConfigFile, RawContainerConfig, RawHealthCheckConfig, RawTaskConfig,
    SetupCommand, TaskDefinition, VolumeMount,
};
use crate::errors::{Result, StevedoreError};

pub const DEFAULT_PROJECT_NAME: &str = "stevedore";
pub const DEFAULT_DOCKERFILE: &str = "Dockerfile";

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::StevedoreError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;

        let project_name = raw
            .project_name
            .clone()
            .unwrap_or_else(|| DEFAULT_PROJECT_NAME.to_string());

        let mut containers = BTreeMap::new();
        for (name, section) in raw.container {
            let container = convert_container(&name, section)?;
            containers.insert(name, container);
        }

        let tasks = raw
            .task
            .into_iter()
            .map(|(name, section)| {
                let task = convert_task(&name, section);
                (name, task)
            })
            .collect();

        Ok(ConfigFile::new_unchecked(project_name, containers, tasks))
    }
}

/// Structural checks that only need the raw TOML shape.
///
/// Per-field parsing (volumes, ports, durations) happens during conversion.
pub fn validate_config(cfg: &RawConfigFile) -> Result<()> {
    validate_raw_config(cfg)
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_containers(cfg)?;
    validate_project_name(cfg)?;
    validate_image_sources(cfg)?;
    validate_container_dependencies(cfg)?;
    validate_tasks(cfg)?;
    validate_environments(cfg)?;
    Ok(())
}

fn ensure_has_containers(cfg: &RawConfigFile) -> Result<()> {
    if cfg.container.is_empty() {
        return Err(StevedoreError::ConfigError(
            "config must contain at least one [container.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_project_name(cfg: &RawConfigFile) -> Result<()> {
    if let Some(name) = &cfg.project_name {
        if name.trim().is_empty() {
            return Err(StevedoreError::ConfigError(
                "project_name must not be empty".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_image_sources(cfg: &RawConfigFile) -> Result<()> {
    for (name, container) in cfg.container.iter() {
        match (&container.image, &container.build_directory) {
            (Some(_), Some(_)) => {
                return Err(StevedoreError::ConfigError(format!(
                    "container '{}' must not set both `image` and `build_directory`",
                    name
                )));
            }
            (None, None) => {
                return Err(StevedoreError::ConfigError(format!(
                    "container '{}' must set one of `image` or `build_directory`",
                    name
                )));
            }
            (Some(_), None) if container.dockerfile.is_some() || !container.build_args.is_empty() => {
                return Err(StevedoreError::ConfigError(format!(
                    "container '{}' sets `dockerfile` or `build_args` but pulls `image`",
                    name
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

fn validate_container_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (name, container) in cfg.container.iter() {
        for dep in container.dependencies.iter() {
            if !cfg.container.contains_key(dep) {
                return Err(StevedoreError::ConfigError(format!(
                    "container '{}' has unknown dependency '{}'",
                    name, dep
                )));
            }
        }
    }
    Ok(())
}

fn validate_tasks(cfg: &RawConfigFile) -> Result<()> {
    for (name, task) in cfg.task.iter() {
        if !cfg.container.contains_key(&task.container) {
            return Err(StevedoreError::ConfigError(format!(
                "task '{}' runs in unknown container '{}'",
                name, task.container
            )));
        }
        for dep in task.dependencies.iter() {
            if !cfg.container.contains_key(dep) {
                return Err(StevedoreError::ConfigError(format!(
                    "task '{}' has unknown dependency '{}'",
                    name, dep
                )));
            }
        }
    }
    Ok(())
}

/// Environments are passed to docker through an env file, one `NAME=value`
/// per line, so neither part may span lines.
fn validate_environments(cfg: &RawConfigFile) -> Result<()> {
    let sections = cfg
        .container
        .iter()
        .map(|(name, c)| (format!("container '{}'", name), &c.environment))
        .chain(
            cfg.task
                .iter()
                .map(|(name, t)| (format!("task '{}'", name), &t.environment)),
        );

    for (owner, environment) in sections {
        for (key, value) in environment.iter() {
            if key.is_empty() || key.contains(['=', '\n', '\r']) {
                return Err(StevedoreError::ConfigError(format!(
                    "{} has an invalid environment variable name '{}'",
                    owner, key
                )));
            }
            if value.contains(['\n', '\r']) {
                return Err(StevedoreError::ConfigError(format!(
                    "{} sets environment variable '{}' to a value containing a line break",
                    owner, key
                )));
            }
        }
    }
    Ok(())
}

fn convert_container(name: &str, raw: RawContainerConfig) -> Result<Container> {
    let image_source = match (raw.image, raw.build_directory) {
        (Some(image_name), None) => ImageSource::Pull(PullImageSource { image_name }),
        (None, Some(build_directory)) => ImageSource::Build(BuildImageSource {
            build_directory,
            dockerfile: raw
                .dockerfile
                .unwrap_or_else(|| DEFAULT_DOCKERFILE.to_string()),
            build_args: raw.build_args,
        }),
        _ => {
            return Err(StevedoreError::ConfigError(format!(
                "container '{}' has no usable image source",
                name
            )));
        }
    };

    let volume_mounts = raw
        .volumes
        .iter()
        .map(|s| s.parse::<VolumeMount>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| container_error(name, e))?;

    let port_mappings = raw
        .ports
        .iter()
        .map(|s| s.parse::<PortMapping>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| container_error(name, e))?;

    let health_check = raw
        .health_check
        .map(|hc| convert_health_check(hc).map_err(|e| container_error(name, e)))
        .transpose()?;

    let setup_commands = raw
        .setup_commands
        .into_iter()
        .map(|c| SetupCommand {
            command: c.command,
            working_directory: c.working_directory,
        })
        .collect();

    Ok(Container {
        name: name.to_string(),
        image_source,
        command: raw.command,
        environment: raw.environment,
        working_directory: raw.working_directory,
        volume_mounts,
        port_mappings,
        dependencies: raw.dependencies.into_iter().collect(),
        health_check,
        setup_commands,
    })
}

fn convert_health_check(raw: RawHealthCheckConfig) -> std::result::Result<HealthCheckConfig, String> {
    let parse = |value: Option<String>| value.as_deref().map(parse_duration).transpose();

    Ok(HealthCheckConfig {
        command: raw.command,
        interval: parse(raw.interval)?,
        retries: raw.retries,
        start_period: parse(raw.start_period)?,
        timeout: parse(raw.timeout)?,
    })
}

fn convert_task(name: &str, raw: RawTaskConfig) -> TaskDefinition {
    TaskDefinition {
        name: name.to_string(),
        container: raw.container,
        command: raw.command,
        environment: raw.environment,
        dependencies: raw.dependencies.into_iter().collect::<BTreeSet<_>>(),
        prerequisites: raw.prerequisites,
    }
}

fn container_error(name: &str, message: String) -> StevedoreError {
    StevedoreError::ConfigError(format!("container '{}': {}", name, message))
}

/// Parse `"500ms"`, `"2s"`, `"1m"` or `"1h"` into a [`Duration`].
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration '{}' is missing a unit suffix", s))?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;

    let seconds = |factor: u64| {
        value
            .checked_mul(factor)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration '{}' is too large", s))
    };

    match unit_part.trim().to_lowercase().as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => seconds(60),
        "h" => seconds(60 * 60),
        unit => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}
