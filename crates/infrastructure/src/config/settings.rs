use common::LoggingConfig;
use orchestrator::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Everything the front-ends read from configuration files and the environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub primitive: PrimitiveConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// One JSON object per line instead of human-readable output
    #[serde(default)]
    pub json: bool,

    #[serde(default = "default_true")]
    pub color: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            color: true,
        }
    }
}

impl LoggingSettings {
    pub fn to_logging_config(&self) -> LoggingConfig {
        LoggingConfig {
            color_output: self.color,
            ..LoggingConfig::default()
        }
        .with_level_str(&self.level)
        .json(self.json)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Lost on exit
    Memory,
    /// `<data_dir>/<kind>.json`
    #[default]
    Json,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Configured directory, else the platform data directory, else `./.execq`.
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|dir| dir.join("execq")))
            .unwrap_or_else(|| PathBuf::from(".execq"))
    }
}

/// The subprocess that runs snippets: `<interpreter> <args...> <code>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimitiveConfig {
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    #[serde(default = "default_interpreter_args")]
    pub args: Vec<String>,
}

impl Default for PrimitiveConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            args: default_interpreter_args(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_interpreter() -> String {
    "node".to_string()
}

fn default_interpreter_args() -> Vec<String> {
    vec!["-e".to_string()]
}
