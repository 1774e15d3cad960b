//! Configuration loading and management.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default directory for pinned namespace bind mounts.
pub const DEFAULT_NETNS_DIR: &str = "/run/netward/netns";

/// Default broker control-channel socket path.
pub const DEFAULT_SOCKET_PATH: &str = "/run/netward/broker.sock";

/// Main netward configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Namespace provisioning settings.
    #[serde(default)]
    pub netns: NetnsConfig,

    /// Plugin invocation settings.
    #[serde(default)]
    pub plugin: PluginConfig,

    /// Access broker settings.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// Namespace consumer settings.
    #[serde(default)]
    pub consumer: ConsumerConfig,
}

/// Namespace provisioning section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetnsConfig {
    /// Directory holding pinned namespace bind mounts.
    pub dir: PathBuf,
}

impl Default for NetnsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_NETNS_DIR),
        }
    }
}

/// Plugin invocation section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Deadline for one `setup` call, in seconds.
    pub setup_timeout_secs: u64,

    /// Deadline for one `remove` call, in seconds.
    pub remove_timeout_secs: u64,

    /// Total `remove` attempts during teardown before forced release.
    pub remove_attempts: u32,

    /// Initial backoff between `remove` retries, in milliseconds.
    /// Doubles after each failed attempt.
    pub retry_backoff_ms: u64,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            setup_timeout_secs: 30,
            remove_timeout_secs: 30,
            remove_attempts: 3,
            retry_backoff_ms: 250,
        }
    }
}

impl PluginConfig {
    /// Deadline for one `setup` call.
    pub fn setup_timeout(&self) -> Duration {
        Duration::from_secs(self.setup_timeout_secs)
    }

    /// Deadline for one `remove` call.
    pub fn remove_timeout(&self) -> Duration {
        Duration::from_secs(self.remove_timeout_secs)
    }

    /// Initial backoff between `remove` retries.
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Access broker section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Control-channel socket path.
    pub socket_path: PathBuf,

    /// Per-request send/receive deadline, in milliseconds. Expiry surfaces
    /// as a retryable failure to the requester.
    pub handoff_timeout_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            handoff_timeout_ms: 2_000,
        }
    }
}

impl BrokerConfig {
    /// Per-request send/receive deadline.
    pub fn handoff_timeout(&self) -> Duration {
        Duration::from_millis(self.handoff_timeout_ms)
    }
}

/// Namespace consumer section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Execution budget for one in-namespace work unit, in milliseconds.
    /// A worker that exceeds it is retired, never pooled again.
    pub work_budget_ms: u64,

    /// Maximum idle pinned workers kept for reuse.
    pub max_idle_workers: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            work_budget_ms: 5_000,
            max_idle_workers: 4,
        }
    }
}

impl ConsumerConfig {
    /// Execution budget for one in-namespace work unit.
    pub fn work_budget(&self) -> Duration {
        Duration::from_millis(self.work_budget_ms)
    }
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        json5::from_str(content).map_err(|e| ConfigError::Json5(e.to_string()))
    }

    /// Save configuration to a file path.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write atomically
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &content)?;
        fs::rename(&temp_path, path)?;

        Ok(())
    }

    /// Validate the configuration, collecting all errors before returning.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.netns.dir.as_os_str().is_empty() {
            errors.push("netns.dir cannot be empty".to_string());
        }

        if self.broker.socket_path.as_os_str().is_empty() {
            errors.push("broker.socket_path cannot be empty".to_string());
        }

        if self.plugin.remove_attempts == 0 {
            errors.push("plugin.remove_attempts must be at least 1".to_string());
        }

        if self.broker.handoff_timeout_ms == 0 {
            errors.push("broker.handoff_timeout_ms cannot be 0".to_string());
        }

        if self.consumer.work_budget_ms == 0 {
            errors.push("consumer.work_budget_ms cannot be 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors.join("; ")))
        }
    }
}
