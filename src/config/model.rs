// src/config/model.rs

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Canonical container name type used throughout the engine.
pub type ContainerName = String;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// project_name = "my-project"
///
/// [container.db]
/// image = "postgres:16"
///
/// [container.app]
/// build_directory = "app"
/// command = "cargo test"
/// dependencies = ["db"]
///
/// [task.test]
/// container = "app"
/// ```
///
/// This is the unvalidated shape; [`ConfigFile`] is produced from it through
/// `TryFrom` (see `config::validate`).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    /// Used to derive image tags (`<project>-<container>`).
    #[serde(default)]
    pub project_name: Option<String>,

    /// All containers from `[container.<name>]`.
    #[serde(default)]
    pub container: BTreeMap<String, RawContainerConfig>,

    /// All tasks from `[task.<name>]`.
    #[serde(default)]
    pub task: BTreeMap<String, RawTaskConfig>,
}

/// `[container.<name>]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawContainerConfig {
    /// Existing image to pull. Mutually exclusive with `build_directory`.
    #[serde(default)]
    pub image: Option<String>,

    /// Directory containing the build context.
    #[serde(default)]
    pub build_directory: Option<PathBuf>,

    /// Dockerfile path relative to the build directory.
    #[serde(default)]
    pub dockerfile: Option<String>,

    #[serde(default)]
    pub build_args: BTreeMap<String, String>,

    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    #[serde(default)]
    pub working_directory: Option<String>,

    /// `"local:container[:options]"` strings.
    #[serde(default)]
    pub volumes: Vec<String>,

    /// `"local:container"` strings.
    #[serde(default)]
    pub ports: Vec<String>,

    #[serde(default)]
    pub dependencies: Vec<String>,

    #[serde(default)]
    pub health_check: Option<RawHealthCheckConfig>,

    #[serde(default)]
    pub setup_commands: Vec<RawSetupCommand>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawHealthCheckConfig {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default)]
    pub start_period: Option<String>,
    #[serde(default)]
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawSetupCommand {
    pub command: String,
    #[serde(default)]
    pub working_directory: Option<String>,
}

/// `[task.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTaskConfig {
    /// Name of the task container.
    pub container: String,

    /// Overrides the task container's own command.
    #[serde(default)]
    pub command: Option<String>,

    /// Added to (and overriding) the task container's environment.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// Extra containers started only for this task.
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Tasks run to completion before this one. `*` matches any run of
    /// characters in a task name.
    #[serde(default)]
    pub prerequisites: Vec<String>,
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub project_name: String,
    pub containers: BTreeMap<ContainerName, Container>,
    pub tasks: BTreeMap<String, TaskDefinition>,
}

impl ConfigFile {
    pub fn new_unchecked(
        project_name: String,
        containers: BTreeMap<ContainerName, Container>,
        tasks: BTreeMap<String, TaskDefinition>,
    ) -> Self {
        Self {
            project_name,
            containers,
            tasks,
        }
    }

    pub fn task(&self, name: &str) -> Option<&TaskDefinition> {
        self.tasks.get(name)
    }
}

/// A container that may take part in a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Container {
    pub name: ContainerName,
    pub image_source: ImageSource,
    pub command: Option<String>,
    pub environment: BTreeMap<String, String>,
    pub working_directory: Option<String>,
    pub volume_mounts: Vec<VolumeMount>,
    pub port_mappings: Vec<PortMapping>,
    pub dependencies: BTreeSet<ContainerName>,
    pub health_check: Option<HealthCheckConfig>,
    pub setup_commands: Vec<SetupCommand>,
}

impl Container {
    /// A container with only a name and an image source; everything else empty.
    pub fn new(name: impl Into<ContainerName>, image_source: ImageSource) -> Self {
        Self {
            name: name.into(),
            image_source,
            command: None,
            environment: BTreeMap::new(),
            working_directory: None,
            volume_mounts: Vec::new(),
            port_mappings: Vec::new(),
            dependencies: BTreeSet::new(),
            health_check: None,
            setup_commands: Vec::new(),
        }
    }
}

/// Where a container's image comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "type")]
pub enum ImageSource {
    Build(BuildImageSource),
    Pull(PullImageSource),
}

/// Build an image from a local build context.
///
/// Two containers with equal sources share a single build.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BuildImageSource {
    pub build_directory: PathBuf,
    pub dockerfile: String,
    pub build_args: BTreeMap<String, String>,
}

impl fmt::Display for BuildImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (Dockerfile: {})",
            self.build_directory.display(),
            self.dockerfile
        )
    }
}

/// Pull an existing image by reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PullImageSource {
    pub image_name: String,
}

impl PullImageSource {
    pub fn new(image_name: impl Into<String>) -> Self {
        Self {
            image_name: image_name.into(),
        }
    }
}

impl fmt::Display for PullImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.image_name)
    }
}

/// `local:container[:options]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct VolumeMount {
    pub local_path: PathBuf,
    pub container_path: String,
    pub options: Option<String>,
}

impl FromStr for VolumeMount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [local, container] if !local.is_empty() && !container.is_empty() => Ok(Self {
                local_path: PathBuf::from(local),
                container_path: container.to_string(),
                options: None,
            }),
            [local, container, options]
                if !local.is_empty() && !container.is_empty() && !options.is_empty() =>
            {
                Ok(Self {
                    local_path: PathBuf::from(local),
                    container_path: container.to_string(),
                    options: Some(options.to_string()),
                })
            }
            _ => Err(format!(
                "invalid volume mount '{s}' (expected \"local:container\" or \"local:container:options\")"
            )),
        }
    }
}

impl fmt::Display for VolumeMount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.local_path.display(), self.container_path)?;
        if let Some(options) = &self.options {
            write!(f, ":{options}")?;
        }
        Ok(())
    }
}

/// `local:container`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PortMapping {
    pub local: u16,
    pub container: u16,
}

impl FromStr for PortMapping {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (local, container) = s
            .split_once(':')
            .ok_or_else(|| format!("invalid port mapping '{s}' (expected \"local:container\")"))?;

        let parse = |part: &str| {
            part.trim()
                .parse::<u16>()
                .map_err(|e| format!("invalid port '{part}' in mapping '{s}': {e}"))
        };

        Ok(Self {
            local: parse(local)?,
            container: parse(container)?,
        })
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.local, self.container)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize)]
pub struct HealthCheckConfig {
    pub command: Option<String>,
    pub interval: Option<Duration>,
    pub retries: Option<u32>,
    pub start_period: Option<Duration>,
    pub timeout: Option<Duration>,
}

/// A command run inside a container once it is healthy, before any
/// dependent container starts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SetupCommand {
    pub command: String,
    pub working_directory: Option<String>,
}

impl SetupCommand {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            working_directory: None,
        }
    }
}

/// A validated `[task.<name>]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDefinition {
    pub name: String,
    pub container: ContainerName,
    pub command: Option<String>,
    pub environment: BTreeMap<String, String>,
    pub dependencies: BTreeSet<ContainerName>,
    /// Task names or wildcard patterns, in declaration order.
    pub prerequisites: Vec<String>,
}
