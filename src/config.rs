//! Client configuration.
//!
//! `mule --config client.toml` layers a TOML file over built-in defaults;
//! CLI flags are applied on top by the binary.
//!
//! ```toml
//! [poll]
//! global_retries = 3
//! fetch_retries = 3
//! poll_timeout_ms = 2500
//!
//! [executor]
//! workspace_root = "/srv/mule"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use mule_worker::ExecutorSettings;

/// Client configuration settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub poll: PollSettings,
    /// How polled jobs are run locally.
    pub executor: ExecutorSettings,
}

/// Retry budgets and timeouts for the poll client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    /// Outer retry rounds (default: 3)
    pub global_retries: u32,
    /// Requests per round (default: 3)
    pub fetch_retries: u32,
    /// Bounded wait for each reply in milliseconds (default: 2500)
    pub poll_timeout_ms: u64,
    /// TCP connect timeout in milliseconds (default: 5000)
    pub connect_timeout_ms: u64,
    /// Delay before the second round in milliseconds (default: 500)
    pub retry_initial_delay_ms: u64,
    /// Cap on the delay between rounds in milliseconds (default: 5000)
    pub retry_max_delay_ms: u64,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            global_retries: 3,
            fetch_retries: 3,
            poll_timeout_ms: 2500,
            connect_timeout_ms: 5000,
            retry_initial_delay_ms: 500,
            retry_max_delay_ms: 5000,
        }
    }
}

/// Errors that can occur when loading client configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ClientConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text and validate it.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let poll = &self.poll;
        if poll.global_retries == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll.global_retries",
                reason: "must be at least 1".to_string(),
            });
        }
        if poll.fetch_retries == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll.fetch_retries",
                reason: "must be at least 1".to_string(),
            });
        }
        if poll.poll_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll.poll_timeout_ms",
                reason: "must be greater than 0".to_string(),
            });
        }
        if poll.connect_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "poll.connect_timeout_ms",
                reason: "must be greater than 0".to_string(),
            });
        }
        if poll.retry_initial_delay_ms > poll.retry_max_delay_ms {
            return Err(ConfigError::InvalidValue {
                field: "poll.retry_initial_delay_ms",
                reason: format!(
                    "{} is greater than retry_max_delay_ms {}",
                    poll.retry_initial_delay_ms, poll.retry_max_delay_ms
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
}
