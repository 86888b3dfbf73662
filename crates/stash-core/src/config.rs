//! Config - stash の設定
//!
//! YAML ファイルから読み込み、`validate()` で起動前に検証します。
//! 省略したフィールドはデフォルト値になります。

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app::{RepublisherConfig, SchedulerConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Which `TaskQueue` implementation backs the primary and dead-letter queues.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    File,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterConfig {
    /// Tasks retried more than this many times move to the dead-letter queue.
    pub threshold: u32,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self { threshold: 5 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StashConfig {
    /// Queue name; also the file stem under `data_dir`.
    pub name: String,
    pub data_dir: PathBuf,
    pub backend: BackendKind,
    /// fsync after every mutating queue operation.
    pub sync_writes: bool,
    /// `None` disables escalation.
    pub dead_letter: Option<DeadLetterConfig>,
    pub republisher: RepublisherConfig,
    pub scheduler: SchedulerConfig,
}

impl Default for StashConfig {
    fn default() -> Self {
        Self {
            name: "stash".to_string(),
            data_dir: PathBuf::from("./data"),
            backend: BackendKind::File,
            sync_writes: true,
            dead_letter: Some(DeadLetterConfig::default()),
            republisher: RepublisherConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl StashConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::Invalid("name must not be empty".to_string()));
        }
        if self.name.contains(['/', '\\']) {
            return Err(ConfigError::Invalid(format!(
                "name {:?} must not contain path separators",
                self.name
            )));
        }
        if self.republisher.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "republisher.batch_size must be at least 1".to_string(),
            ));
        }
        if self.republisher.publish_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "republisher.publish_timeout_ms must be at least 1".to_string(),
            ));
        }
        if self.scheduler.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.scheduler.cycle_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.cycle_timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn primary_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.queue", self.name))
    }

    pub fn dead_letter_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}.dlq.queue", self.name))
    }
}
