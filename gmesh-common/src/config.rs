//! Configuration file resolution and TOML loading
//!
//! Config file lookup follows this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. User config directory (`~/.config/graph-mesh/<file>`)
//! 4. System config directory (`/etc/graph-mesh/<file>`, Linux only)
//!
//! When nothing is found the caller falls back to built-in defaults.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Directory name used under the platform config directory
pub const CONFIG_DIR_NAME: &str = "graph-mesh";

/// Where a resolved config path came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    CommandLine,
    Environment,
    UserConfigDir,
    SystemConfigDir,
}

/// Resolve the configuration file path for a tool
///
/// Returns `Ok(None)` when no explicit path was given and no config file
/// exists at the well-known locations. An explicit path (CLI or ENV) that
/// does not exist is an error, since the user asked for it by name.
pub fn resolve_config_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    file_name: &str,
) -> Result<Option<(PathBuf, ConfigSource)>> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return require_exists(path.to_path_buf(), ConfigSource::CommandLine).map(Some);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return require_exists(PathBuf::from(path), ConfigSource::Environment).map(Some);
        }
    }

    // Priority 3: User config directory
    if let Some(path) = dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join(file_name)) {
        if path.exists() {
            return Ok(Some((path, ConfigSource::UserConfigDir)));
        }
    }

    // Priority 4: System config directory
    if cfg!(target_os = "linux") {
        let path = PathBuf::from("/etc").join(CONFIG_DIR_NAME).join(file_name);
        if path.exists() {
            return Ok(Some((path, ConfigSource::SystemConfigDir)));
        }
    }

    debug!(file_name, "No config file found, using built-in defaults");
    Ok(None)
}

fn require_exists(path: PathBuf, source: ConfigSource) -> Result<(PathBuf, ConfigSource)> {
    if path.exists() {
        Ok((path, source))
    } else {
        Err(Error::Config(format!(
            "Config file not found: {} (from {:?})",
            path.display(),
            source
        )))
    }
}

/// Read and deserialize a TOML file
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;
    let value = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))?;
    info!("Loaded configuration from {}", path.display());
    Ok(value)
}
