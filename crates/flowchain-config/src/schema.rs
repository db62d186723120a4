//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Chain executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Timeout applied to steps that carry none of their own.
    #[serde(default)]
    pub default_step_timeout_secs: Option<u64>,

    /// Persist execution records through the configured store.
    #[serde(default = "default_persist")]
    pub persist: bool,
}

impl EngineConfig {
    pub fn default_step_timeout(&self) -> Option<Duration> {
        self.default_step_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_step_timeout_secs: None,
            persist: default_persist(),
        }
    }
}

fn default_persist() -> bool {
    true
}

/// Where execution records live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    File,
    Memory,
}

/// Execution store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Finished records kept per workflow; 0 keeps everything.
    #[serde(default = "default_max_records")]
    pub max_records_per_workflow: usize,
}

impl StoreConfig {
    /// The configured backend, or `None` when the name is not recognised.
    pub fn backend(&self) -> Option<StoreBackend> {
        match self.backend.as_str() {
            "file" => Some(StoreBackend::File),
            "memory" => Some(StoreBackend::Memory),
            _ => None,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_store_path(),
            max_records_per_workflow: default_max_records(),
        }
    }
}

fn default_backend() -> String {
    "file".to_string()
}

fn default_store_path() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".flowchain").join("executions"))
        .unwrap_or_else(|| PathBuf::from("/tmp/flowchain/executions"))
}

fn default_max_records() -> usize {
    100
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    pub level: String,

    /// Directory for daily-rotated log files.
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,

    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            dir: default_log_dir(),
            json: false,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".flowchain").join("logs"))
        .unwrap_or_else(|| PathBuf::from("/tmp/flowchain/logs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.engine.persist);
        assert_eq!(config.engine.default_step_timeout(), None);
        assert_eq!(config.store.backend(), Some(StoreBackend::File));
        assert_eq!(config.store.max_records_per_workflow, 100);
        assert!(config.store.path.ends_with("executions"));
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn test_step_timeout() {
        let engine = EngineConfig {
            default_step_timeout_secs: Some(30),
            persist: true,
        };
        assert_eq!(engine.default_step_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_unknown_backend() {
        let store = StoreConfig {
            backend: "sqlite".to_string(),
            ..Default::default()
        };
        assert_eq!(store.backend(), None);
    }
}
