//! Configuration parsing and management.
//!
//! This module handles parsing of the kernel configuration file
//! (`corral.toml`) that defines the project name, the claim store location,
//! the admission bound, and the lease durations for each resource class.
//! Every field has a default so an empty file (or no file) is a valid
//! configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backoff::BackoffConfig;

/// Configuration error type.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// IO error reading the configuration file.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value failed validation.
    #[error("invalid config value for {field}: {reason}")]
    Validation {
        /// The field that failed.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// Top-level kernel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Project namespace all claims are scoped to.
    #[serde(default = "default_project")]
    pub project: String,

    /// Path to the SQLite claim store.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Maximum number of concurrently admitted orchestrator processes.
    #[serde(default = "default_max_leads")]
    pub max_leads: u32,

    /// Lease durations per resource class.
    #[serde(default)]
    pub ttl: TtlConfig,

    /// Merge mutex protocol settings.
    #[serde(default)]
    pub merge: MergeConfig,

    /// Grace window before an unpaired task/workspace claim is reported by
    /// the auditor. Covers the normal gap between staking the two halves
    /// of a pair.
    #[serde(default = "default_pair_grace")]
    #[serde(with = "humantime_serde")]
    pub pair_grace: Duration,
}

fn default_project() -> String {
    "default".to_string()
}

fn default_store_path() -> PathBuf {
    PathBuf::from("corral.db")
}

const fn default_max_leads() -> u32 {
    4
}

const fn default_pair_grace() -> Duration {
    Duration::from_secs(300)
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            project: default_project(),
            store_path: default_store_path(),
            max_leads: default_max_leads(),
            ttl: TtlConfig::default(),
            merge: MergeConfig::default(),
            pair_grace: default_pair_grace(),
        }
    }
}

impl KernelConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or a value fails
    /// validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.project.is_empty() || self.project.contains('/') {
            return Err(ConfigError::Validation {
                field: "project",
                reason: "must be a non-empty name without '/'".to_string(),
            });
        }
        if self.max_leads == 0 {
            return Err(ConfigError::Validation {
                field: "max_leads",
                reason: "must admit at least one orchestrator".to_string(),
            });
        }
        if self.merge.ttl.as_secs() == 0 {
            return Err(ConfigError::Validation {
                field: "merge.ttl",
                reason: "must be at least one second".to_string(),
            });
        }
        Ok(())
    }
}

/// Lease durations per resource class.
///
/// There is no refresh operation, so each TTL must be generous enough to
/// cover the expected critical-section duration; crashes are recovered via
/// expiry, not heartbeats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtlConfig {
    /// Task ownership (long: one working session).
    #[serde(default = "default_task_ttl")]
    #[serde(with = "humantime_serde")]
    pub task: Duration,

    /// Per-task workspace ownership (long: one working session).
    #[serde(default = "default_workspace_ttl")]
    #[serde(with = "humantime_serde")]
    pub workspace: Duration,

    /// Orchestrator slot occupancy (session length).
    #[serde(default = "default_slot_ttl")]
    #[serde(with = "humantime_serde")]
    pub slot: Duration,

    /// Processed-event markers (just long enough to outlast plausible
    /// at-least-once redelivery).
    #[serde(default = "default_message_ttl")]
    #[serde(with = "humantime_serde")]
    pub message: Duration,
}

const fn default_task_ttl() -> Duration {
    Duration::from_secs(4 * 3600)
}

const fn default_workspace_ttl() -> Duration {
    Duration::from_secs(4 * 3600)
}

const fn default_slot_ttl() -> Duration {
    Duration::from_secs(8 * 3600)
}

const fn default_message_ttl() -> Duration {
    Duration::from_secs(600)
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            task: default_task_ttl(),
            workspace: default_workspace_ttl(),
            slot: default_slot_ttl(),
            message: default_message_ttl(),
        }
    }
}

/// Merge mutex protocol settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Lease on the trunk lock (short: one merge).
    #[serde(default = "default_merge_ttl")]
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Total time a waiter spends retrying before abandoning the merge.
    #[serde(default = "default_wait_timeout")]
    #[serde(with = "humantime_serde")]
    pub wait_timeout: Duration,

    /// Delay schedule between stake retries.
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Symmetric jitter fraction applied to each backoff delay.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

const fn default_merge_ttl() -> Duration {
    Duration::from_secs(120)
}

const fn default_wait_timeout() -> Duration {
    Duration::from_secs(600)
}

const fn default_jitter() -> f64 {
    0.3
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            ttl: default_merge_ttl(),
            wait_timeout: default_wait_timeout(),
            backoff: BackoffConfig::default(),
            jitter: default_jitter(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_yields_defaults() {
        let config = KernelConfig::from_toml("").unwrap();
        assert_eq!(config.project, "default");
        assert_eq!(config.max_leads, 4);
        assert_eq!(config.merge.ttl, Duration::from_secs(120));
        assert_eq!(config.ttl.message, Duration::from_secs(600));
        assert_eq!(config.pair_grace, Duration::from_secs(300));
    }

    #[test]
    fn test_full_config_parses() {
        let config = KernelConfig::from_toml(
            r#"
            project = "atlas"
            store_path = "/var/lib/corral/claims.db"
            max_leads = 2
            pair_grace = "2m"

            [ttl]
            task = "2h"
            workspace = "2h"
            slot = "6h"
            message = "15m"

            [merge]
            ttl = "90s"
            wait_timeout = "5m"
            jitter = 0.2

            [merge.backoff]
            type = "exponential"
            initial_delay = "1s"
            max_delay = "10s"
            multiplier = 2.0
            "#,
        )
        .unwrap();

        assert_eq!(config.project, "atlas");
        assert_eq!(config.max_leads, 2);
        assert_eq!(config.ttl.task, Duration::from_secs(7200));
        assert_eq!(config.merge.ttl, Duration::from_secs(90));
        assert_eq!(config.merge.wait_timeout, Duration::from_secs(300));
        assert!(
            matches!(config.merge.backoff, BackoffConfig::Exponential { initial_delay, .. }
                if initial_delay == Duration::from_secs(1))
        );
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(KernelConfig::from_toml("project = \"\"").is_err());
        assert!(KernelConfig::from_toml("project = \"a/b\"").is_err());
        assert!(KernelConfig::from_toml("max_leads = 0").is_err());
        assert!(KernelConfig::from_toml("[merge]\nttl = \"0s\"").is_err());
    }

    #[test]
    fn test_round_trips_through_toml() {
        let config = KernelConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back = KernelConfig::from_toml(&text).unwrap();
        assert_eq!(back.project, config.project);
        assert_eq!(back.merge.wait_timeout, config.merge.wait_timeout);
    }
}
