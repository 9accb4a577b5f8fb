//! Host configuration loaded from YAML

use crate::log::DEFAULT_LOG_CAPACITY;
use crate::registry::InstalledBinary;
use process_supervisor::{BinaryLocation, OverflowPolicy, StopPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse YAML
    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Settings of the host
///
/// Every field has a default, so an empty file is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Directory holding the client binary
    pub library_dir: PathBuf,
    /// File name of the client binary
    pub binary_name: String,
    /// Working directory of spawned processes; the data directory when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Grace period between SIGTERM and SIGKILL
    pub stop_timeout_ms: u64,
    /// How long output may keep flowing after a process is gone
    pub drain_timeout_ms: u64,
    /// Lines kept in the log
    pub log_capacity: usize,
    /// Lines buffered between process readers and the log
    pub log_channel_capacity: usize,
    /// Behaviour when that buffer is full
    pub log_overflow: OverflowPolicy,
}

impl Default for HostConfig {
    fn default() -> Self {
        let stop = StopPolicy::default();
        Self {
            library_dir: default_library_dir(),
            binary_name: "npc".to_string(),
            working_dir: None,
            stop_timeout_ms: stop.stop_timeout.as_millis() as u64,
            drain_timeout_ms: stop.drain_timeout.as_millis() as u64,
            log_capacity: DEFAULT_LOG_CAPACITY,
            log_channel_capacity: 256,
            log_overflow: OverflowPolicy::Block,
        }
    }
}

/// Directory of the running executable, falling back to the current directory
fn default_library_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

impl HostConfig {
    /// Parse a YAML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse YAML configuration from a string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.binary_name.is_empty() {
            return Err(ConfigError::ValidationError("binary_name must not be empty".to_string()));
        }
        if self.binary_name.contains('/') {
            return Err(ConfigError::ValidationError(format!(
                "binary_name '{}' must be a file name, not a path",
                self.binary_name
            )));
        }
        if self.stop_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "stop_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.log_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "log_capacity must be greater than zero".to_string(),
            ));
        }
        if self.log_channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "log_channel_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Location of the client binary
    pub fn binary_location(&self) -> BinaryLocation {
        BinaryLocation::new(&self.library_dir, &self.binary_name)
    }

    /// Termination deadlines
    pub fn stop_policy(&self) -> StopPolicy {
        StopPolicy {
            stop_timeout: Duration::from_millis(self.stop_timeout_ms),
            drain_timeout: Duration::from_millis(self.drain_timeout_ms),
        }
    }

    /// Resolver for command strings
    pub fn resolver(&self) -> InstalledBinary {
        InstalledBinary::new(self.binary_location(), self.working_dir.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_default() {
        let config = HostConfig::from_str("").unwrap();
        assert_eq!(config, HostConfig::default());
        assert_eq!(config.stop_policy(), StopPolicy::default());
        assert_eq!(config.log_capacity, 1000);
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
library_dir: /opt/npc
binary_name: libnpc.so
working_dir: /var/lib/npc
stop_timeout_ms: 500
log_overflow: drop_newest
"#;
        let config = HostConfig::from_str(yaml).unwrap();

        assert_eq!(
            config.binary_location().executable_path(),
            PathBuf::from("/opt/npc/libnpc.so")
        );
        assert_eq!(config.stop_policy().stop_timeout, Duration::from_millis(500));
        assert_eq!(config.stop_policy().drain_timeout, Duration::from_secs(1));
        assert_eq!(config.log_overflow, OverflowPolicy::DropNewest);
        assert_eq!(config.resolver().working_dir, Some(PathBuf::from("/var/lib/npc")));
    }

    #[test]
    fn test_validation_errors() {
        let err = HostConfig::from_str("binary_name: bin/npc").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));

        let err = HostConfig::from_str("log_capacity: 0").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));

        let err = HostConfig::from_str("stop_timeout_ms: [1]").unwrap_err();
        assert!(matches!(err, ConfigError::YamlError(_)));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = HostConfig::from_file("/definitely/not/here.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::ReadError(_)));
    }
}
