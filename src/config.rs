//! Configuration parsing and structures

use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::env::{apply_env_overrides, substitute_env_vars};

/// Directory the whole Quobyte namespace is mounted into
pub const DEFAULT_MOUNT_PATH: &str = "/run/docker/quobyte/mnt";
/// Socket the engine connects to
pub const DEFAULT_PLUGIN_SOCKET: &str = "/run/docker/plugins/quobyte.sock";
/// Storage policy used when a create request names none
pub const DEFAULT_VOLUME_CONFIGURATION: &str = "BASE";
/// Upper bound on how long a create waits for its mount point
pub const DEFAULT_MOUNT_TIMEOUT: Duration = Duration::from_secs(120);
/// Mount point polling granularity
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Longest accepted `mount.timeout`
pub const MAX_MOUNT_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// `scheme://` prefix required on API URLs
static URL_SCHEME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://").unwrap());

// =============================================================================
// Raw Config (Deserialized from YAML, overridden from the environment)
// =============================================================================

/// Raw configuration as deserialized from YAML.
/// Every field is optional here; `resolve()` applies defaults and rejects
/// missing mandatory values.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfig {
    /// Logging configuration
    #[serde(default)]
    pub logging: RawLoggingConfig,

    /// Management API access
    #[serde(default)]
    pub api: RawApiConfig,

    /// Registry address(es): host[:port][,host:port] or an SRV record name
    pub registry: Option<String>,

    /// Namespace mount settings
    #[serde(default)]
    pub mount: RawMountConfig,

    /// Override directories for the external binaries
    #[serde(default)]
    pub binaries: BinariesConfig,

    /// Volume creation defaults
    #[serde(default)]
    pub volumes: RawVolumesConfig,

    /// Plugin socket settings
    #[serde(default)]
    pub socket: RawSocketConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawLoggingConfig {
    pub level: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawApiConfig {
    /// http(s)://host[:port][,host:port] or an SRV record name
    pub url: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawMountConfig {
    pub path: Option<PathBuf>,

    /// Extra options handed to the mount utility (e.g. "-o user_xattr")
    pub options: Option<String>,

    /// How long a create waits for its mount point (e.g. "2m")
    #[serde(default)]
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,

    /// How often the mount point is checked while waiting (e.g. "1s")
    #[serde(default)]
    #[serde(with = "humantime_serde")]
    pub poll_interval: Option<Duration>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawVolumesConfig {
    pub default_configuration: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawSocketConfig {
    pub path: Option<PathBuf>,

    /// Numeric group given ownership of the socket file
    pub gid: Option<u32>,
}

// =============================================================================
// Resolved Config (Ready for use)
// =============================================================================

/// Top-level configuration (resolved from RawConfig).
///
/// Built once at startup and shared read-only by every component.
#[derive(Debug, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub api: ApiConfig,
    pub registry: String,
    pub mount: MountConfig,
    pub binaries: BinariesConfig,
    pub volumes: VolumesConfig,
    pub socket: SocketConfig,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Management API credentials, passed through to the management CLI
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub url: String,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Mount root: every volume appears as a directory directly below it
    pub path: PathBuf,
    pub options: Option<String>,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

/// Directories holding `qmgmt` and `mount.quobyte`. `None` means `$PATH`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BinariesConfig {
    pub qmgmt_path: Option<PathBuf>,
    pub mount_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct VolumesConfig {
    pub default_configuration: String,
}

#[derive(Debug, Clone)]
pub struct SocketConfig {
    pub path: PathBuf,
    pub gid: Option<u32>,
}

// =============================================================================
// Resolution Logic
// =============================================================================

impl RawConfig {
    /// Resolve raw config into final config, applying defaults
    pub fn resolve(self) -> Result<Config, ConfigError> {
        let RawConfig {
            logging,
            api,
            registry,
            mount,
            binaries,
            volumes,
            socket,
        } = self;

        let api = ApiConfig {
            url: required(api.url, "api.url", "QUOBYTE_API_URL")?,
            user: required(api.user, "api.user", "QUOBYTE_API_USER")?,
            password: required(api.password, "api.password", "QUOBYTE_API_PASSWORD")?,
        };
        let registry = required(registry, "registry", "QUOBYTE_REGISTRY")?;

        Ok(Config {
            logging: LoggingConfig {
                level: logging
                    .level
                    .unwrap_or_else(|| LoggingConfig::default().level),
            },
            api,
            registry,
            mount: MountConfig {
                path: mount
                    .path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MOUNT_PATH)),
                options: mount.options.filter(|o| !o.trim().is_empty()),
                timeout: mount.timeout.unwrap_or(DEFAULT_MOUNT_TIMEOUT),
                poll_interval: mount.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL),
            },
            binaries,
            volumes: VolumesConfig {
                default_configuration: volumes
                    .default_configuration
                    .unwrap_or_else(|| DEFAULT_VOLUME_CONFIGURATION.to_string()),
            },
            socket: SocketConfig {
                path: socket
                    .path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_PLUGIN_SOCKET)),
                gid: socket.gid,
            },
        })
    }
}

fn required(value: Option<String>, key: &str, env_var: &str) -> Result<String, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::ValidationError(format!(
            "Missing mandatory setting {} (or {})",
            key, env_var
        ))),
    }
}

impl Config {
    /// Load configuration from a YAML file, then apply environment overrides
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;

        Self::from_str(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let content = substitute_env_vars(content)?;
        let mut raw: RawConfig =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        apply_env_overrides(&mut raw)?;
        raw.resolve()
    }

    /// Build configuration from `QUOBYTE_*` environment variables alone
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut raw = RawConfig::default();
        apply_env_overrides(&mut raw)?;
        raw.resolve()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_api_url(&self.api.url)?;

        if self.mount.poll_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "mount.poll_interval must be greater than zero".to_string(),
            ));
        }

        if self.mount.timeout > MAX_MOUNT_TIMEOUT {
            return Err(ConfigError::ValidationError(format!(
                "mount.timeout ({:?}) exceeds the maximum of {:?}",
                self.mount.timeout, MAX_MOUNT_TIMEOUT
            )));
        }

        if self.mount.timeout < self.mount.poll_interval {
            return Err(ConfigError::ValidationError(format!(
                "mount.timeout ({:?}) is shorter than mount.poll_interval ({:?})",
                self.mount.timeout, self.mount.poll_interval
            )));
        }

        if !self.mount.path.is_absolute() {
            return Err(ConfigError::ValidationError(format!(
                "mount.path must be absolute: {:?}",
                self.mount.path
            )));
        }

        if self.volumes.default_configuration.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "volumes.default_configuration cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Reject API URLs without an explicit scheme
pub fn validate_api_url(url: &str) -> Result<(), ConfigError> {
    if URL_SCHEME_PATTERN.is_match(url.trim()) {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!(
            "Scheme is not set in URL: {}",
            url
        )))
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
api:
  url: http://localhost:7860
  user: docker
  password: secret
registry: localhost:7861
"#;

    #[test]
    fn test_minimal_config_defaults() {
        let config = Config::from_str(MINIMAL).unwrap();
        assert_eq!(config.api.url, "http://localhost:7860");
        assert_eq!(config.registry, "localhost:7861");
        assert_eq!(config.mount.path, PathBuf::from(DEFAULT_MOUNT_PATH));
        assert_eq!(config.mount.timeout, DEFAULT_MOUNT_TIMEOUT);
        assert_eq!(config.mount.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(config.volumes.default_configuration, "BASE");
        assert_eq!(config.socket.path, PathBuf::from(DEFAULT_PLUGIN_SOCKET));
        assert_eq!(config.logging.level, "info");
        assert!(config.binaries.qmgmt_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
logging:
  level: debug
api:
  url: https://api-1:7860,api-2:7860
  user: admin
  password: hunter2
registry: reg-1:7861,reg-2:7861
mount:
  path: /srv/quobyte
  options: "-o user_xattr"
  timeout: 30s
  poll_interval: 500ms
binaries:
  qmgmt_path: /opt/quobyte/bin
  mount_path: /opt/quobyte/sbin
volumes:
  default_configuration: REPLICATED
socket:
  path: /tmp/quobyte.sock
  gid: 999
"#;

        let config = Config::from_str(yaml).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.mount.path, PathBuf::from("/srv/quobyte"));
        assert_eq!(config.mount.options.as_deref(), Some("-o user_xattr"));
        assert_eq!(config.mount.timeout, Duration::from_secs(30));
        assert_eq!(config.mount.poll_interval, Duration::from_millis(500));
        assert_eq!(
            config.binaries.qmgmt_path,
            Some(PathBuf::from("/opt/quobyte/bin"))
        );
        assert_eq!(config.volumes.default_configuration, "REPLICATED");
        assert_eq!(config.socket.gid, Some(999));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_mandatory_value() {
        let yaml = r#"
api:
  url: http://localhost:7860
  user: docker
registry: localhost:7861
"#;

        let err = Config::from_str(yaml).unwrap_err();
        assert!(
            err.to_string().contains("api.password"),
            "Error should name the missing key: {}",
            err
        );
    }

    #[test]
    fn test_validate_api_url() {
        assert!(validate_api_url("http://localhost:7860").is_ok());
        assert!(validate_api_url("https://a:7860,b:7860").is_ok());

        let err = validate_api_url("localhost:7860").unwrap_err();
        assert!(err
            .to_string()
            .contains("Scheme is not set in URL: localhost:7860"));
    }

    #[test]
    fn test_validate_timeout_shorter_than_interval() {
        let mut config = Config::from_str(MINIMAL).unwrap();
        config.mount.timeout = Duration::from_millis(100);
        config.mount.poll_interval = Duration::from_secs(1);
        assert!(config.validate().is_err());

        config.mount.poll_interval = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_timeout_upper_bound() {
        let yaml = format!("{}mount:\n  timeout: 550000000000years\n", MINIMAL);
        let mut config = Config::from_str(&yaml).unwrap();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("mount.timeout"), "{}", err);

        config.mount.timeout = MAX_MOUNT_TIMEOUT;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_blank_mount_options_dropped() {
        let yaml = format!("{}mount:\n  options: \"  \"\n", MINIMAL);
        let config = Config::from_str(&yaml).unwrap();
        assert!(config.mount.options.is_none());
    }
}
