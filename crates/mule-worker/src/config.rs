//! Worker configuration.
//!
//! Loaded from a TOML file (`mule-worker --config worker.toml`); every
//! field has a default so an empty file is a valid configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Worker configuration settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Minimum supported protocol version.
    pub protocol_min: i32,
    /// Maximum supported protocol version.
    pub protocol_max: i32,
    /// Name of the shared queue idle workers consume from.
    pub default_queue: String,
    /// Prefix of exclusive build queues (`<prefix>-<build_id>`).
    pub build_queue_prefix: String,
    /// Script execution settings.
    pub executor: ExecutorSettings,
}

/// Script execution settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Root directory; workspaces live under `<root>/workspaces/<name>`.
    pub workspace_root: Option<PathBuf>,
    /// Shell interpreter scripts are run through.
    pub interpreter: PathBuf,
    /// Grace period in seconds for SIGTERM before SIGKILL.
    pub termination_grace_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            protocol_min: mule_protocol::PROTOCOL_MIN,
            protocol_max: mule_protocol::PROTOCOL_MAX,
            default_queue: "default".to_string(),
            build_queue_prefix: "mule".to_string(),
            executor: ExecutorSettings::default(),
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            workspace_root: None,
            interpreter: PathBuf::from("/bin/bash"),
            termination_grace_seconds: 10,
        }
    }
}

/// Errors that can occur when loading or validating worker configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl WorkerConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text and validate it.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: WorkerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_queue.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "default_queue",
                reason: "must not be empty".to_string(),
            });
        }
        if self.build_queue_prefix.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "build_queue_prefix",
                reason: "must not be empty".to_string(),
            });
        }
        if self.protocol_min > self.protocol_max {
            return Err(ConfigError::InvalidValue {
                field: "protocol_min",
                reason: format!(
                    "{} is greater than protocol_max {}",
                    self.protocol_min, self.protocol_max
                ),
            });
        }
        if self.executor.interpreter.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "executor.interpreter",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Name of the exclusive queue for `build_id`.
    pub fn build_queue(&self, build_id: &str) -> String {
        mule_protocol::build_queue_name(&self.build_queue_prefix, build_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_default() {
        let config = WorkerConfig::parse("").unwrap();
        assert_eq!(config, WorkerConfig::default());
        assert_eq!(config.executor.interpreter, PathBuf::from("/bin/bash"));
        assert!(config.executor.workspace_root.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let config = WorkerConfig::parse(
            r#"
default_queue = "pool"
build_queue_prefix = "ci"

[executor]
workspace_root = "/srv/mule"
interpreter = "/bin/sh"
termination_grace_seconds = 3
"#,
        )
        .unwrap();

        assert_eq!(config.default_queue, "pool");
        assert_eq!(config.build_queue("b1"), "ci-b1");
        assert_eq!(config.executor.workspace_root, Some(PathBuf::from("/srv/mule")));
        assert_eq!(config.executor.interpreter, PathBuf::from("/bin/sh"));
        assert_eq!(config.executor.termination_grace_seconds, 3);
    }

    #[test]
    fn test_rejects_empty_queue_name() {
        let err = WorkerConfig::parse("default_queue = \"  \"").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "default_queue", .. }));
    }

    #[test]
    fn test_rejects_inverted_protocol_range() {
        let err = WorkerConfig::parse("protocol_min = 2\nprotocol_max = 1").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "protocol_min", .. }));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let err = WorkerConfig::parse("default_queue = [").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
