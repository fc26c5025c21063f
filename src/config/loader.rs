// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigFile, ImageSource, RawConfigFile};
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization. Use [`load_and_validate`] for
/// the checked domain model.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path, validate it and resolve relative
/// paths against the directory the file lives in.
///
/// When `project_name` is absent, the name of that directory is used.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    let mut raw_config = load_from_path(path)?;
    let base_dir = config_root_dir(path);

    if raw_config.project_name.is_none() {
        raw_config.project_name = project_name_from_dir(&base_dir);
    }

    let mut config = ConfigFile::try_from(raw_config)?;
    resolve_relative_paths(&mut config, &base_dir);

    debug!(
        path = %path.display(),
        project = %config.project_name,
        containers = config.containers.len(),
        tasks = config.tasks.len(),
        "configuration loaded"
    );

    Ok(config)
}

/// `stevedore.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("stevedore.toml")
}

/// Directory containing the config file; the working directory for a bare
/// file name like `stevedore.toml`.
fn config_root_dir(config_path: &Path) -> PathBuf {
    let dir = match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    };
    dir.canonicalize().unwrap_or(dir)
}

fn project_name_from_dir(dir: &Path) -> Option<String> {
    dir.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_lowercase())
        .filter(|n| !n.is_empty())
}

fn resolve_relative_paths(config: &mut ConfigFile, base_dir: &Path) {
    for container in config.containers.values_mut() {
        if let ImageSource::Build(source) = &mut container.image_source {
            if source.build_directory.is_relative() {
                source.build_directory = base_dir.join(&source.build_directory);
            }
        }

        for mount in container.volume_mounts.iter_mut() {
            if mount.local_path.is_relative() {
                mount.local_path = base_dir.join(&mount.local_path);
            }
        }
    }
}
