//! Environment handling for configuration
//!
//! Two mechanisms live here:
//!
//! - `${VAR_NAME}` references inside the YAML file are substituted before
//!   parsing, so secrets such as the API password can stay out of the file.
//! - `QUOBYTE_*` variables override (or, without a file, provide) individual
//!   settings.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::config::{ConfigError, RawConfig};

/// Regex pattern for matching environment variable references: ${VAR_NAME}
static ENV_VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

pub const ENV_API_URL: &str = "QUOBYTE_API_URL";
pub const ENV_API_USER: &str = "QUOBYTE_API_USER";
pub const ENV_API_PASSWORD: &str = "QUOBYTE_API_PASSWORD";
pub const ENV_REGISTRY: &str = "QUOBYTE_REGISTRY";
pub const ENV_MOUNT_PATH: &str = "QUOBYTE_MOUNT_PATH";
pub const ENV_MOUNT_OPTIONS: &str = "QUOBYTE_MOUNT_OPTIONS";
pub const ENV_MOUNT_TIMEOUT: &str = "QUOBYTE_MOUNT_TIMEOUT";
pub const ENV_QMGMT_PATH: &str = "QUOBYTE_QMGMT_PATH";
pub const ENV_MOUNT_QUOBYTE_PATH: &str = "QUOBYTE_MOUNT_QUOBYTE_PATH";
pub const ENV_DEFAULT_VOLUME_CONFIGURATION: &str = "QUOBYTE_DEFAULT_VOLUME_CONFIGURATION";
pub const ENV_PLUGIN_SOCKET: &str = "QUOBYTE_PLUGIN_SOCKET";
pub const ENV_SOCKET_GID: &str = "QUOBYTE_SOCKET_GID";
pub const ENV_LOG_LEVEL: &str = "QUOBYTE_LOG_LEVEL";

/// Substitute environment variable references in a string.
///
/// Returns an error listing all missing variables if any are not set.
pub fn substitute_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut missing_vars: Vec<String> = Vec::new();

    let result = ENV_VAR_PATTERN.replace_all(input, |caps: &Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                if !missing_vars.iter().any(|m| m == var_name) {
                    missing_vars.push(var_name.to_string());
                }
                String::new()
            }
        }
    });

    if !missing_vars.is_empty() {
        return Err(ConfigError::ValidationError(format!(
            "Missing environment variables: {}",
            missing_vars.join(", ")
        )));
    }

    Ok(result.into_owned())
}

/// Apply `QUOBYTE_*` variables from the process environment on top of `raw`.
pub fn apply_env_overrides(raw: &mut RawConfig) -> Result<(), ConfigError> {
    apply_overrides_from(raw, |key| env::var(key).ok())
}

/// Apply overrides using `lookup` as the variable source. Empty values are
/// treated as unset.
pub fn apply_overrides_from<F>(raw: &mut RawConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

    if let Some(v) = get(ENV_API_URL) {
        raw.api.url = Some(v);
    }
    if let Some(v) = get(ENV_API_USER) {
        raw.api.user = Some(v);
    }
    if let Some(v) = get(ENV_API_PASSWORD) {
        raw.api.password = Some(v);
    }
    if let Some(v) = get(ENV_REGISTRY) {
        raw.registry = Some(v);
    }
    if let Some(v) = get(ENV_MOUNT_PATH) {
        raw.mount.path = Some(PathBuf::from(v));
    }
    if let Some(v) = get(ENV_MOUNT_OPTIONS) {
        raw.mount.options = Some(v);
    }
    if let Some(v) = get(ENV_MOUNT_TIMEOUT) {
        raw.mount.timeout = Some(parse_duration(ENV_MOUNT_TIMEOUT, &v)?);
    }
    if let Some(v) = get(ENV_QMGMT_PATH) {
        raw.binaries.qmgmt_path = Some(PathBuf::from(v));
    }
    if let Some(v) = get(ENV_MOUNT_QUOBYTE_PATH) {
        raw.binaries.mount_path = Some(PathBuf::from(v));
    }
    if let Some(v) = get(ENV_DEFAULT_VOLUME_CONFIGURATION) {
        raw.volumes.default_configuration = Some(v);
    }
    if let Some(v) = get(ENV_PLUGIN_SOCKET) {
        raw.socket.path = Some(PathBuf::from(v));
    }
    if let Some(v) = get(ENV_SOCKET_GID) {
        let gid = v.trim().parse::<u32>().map_err(|_| {
            ConfigError::ValidationError(format!("{} is not a numeric group id: {}", ENV_SOCKET_GID, v))
        })?;
        raw.socket.gid = Some(gid);
    }
    if let Some(v) = get(ENV_LOG_LEVEL) {
        raw.logging.level = Some(v);
    }

    Ok(())
}

fn parse_duration(key: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime_serde::re::humantime::parse_duration(value.trim()).map_err(|e| {
        ConfigError::ValidationError(format!("{} is not a duration ({}): {}", key, e, value))
    })
}
