use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::classifier::ErrorType;
use crate::policy::{ExecutionPolicy, RetryPolicy, DEFAULT_POLICY};
use crate::results::DEFAULT_WINDOW_SIZE;

/// Engine settings. Policy tables here are merged over the built-in catalogue:
/// entries with a built-in name replace it, new names are added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub current_policy: String,
    pub policies: BTreeMap<String, ExecutionPolicy>,
    pub retry_policies: BTreeMap<String, RetryPolicy>,
    pub error_retry_map: BTreeMap<ErrorType, String>,
    pub attempt_ceilings: BTreeMap<ErrorType, u32>,
    pub runner: RunnerConfig,
    pub results: ResultsConfig,
    pub snapshot: SnapshotConfig,
    /// Consecutive identical unclassified failures before the pipeline pauses; 0 disables
    pub unclassified_pause_threshold: u32,
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            current_policy: DEFAULT_POLICY.to_string(),
            policies: BTreeMap::new(),
            retry_policies: BTreeMap::new(),
            error_retry_map: BTreeMap::new(),
            attempt_ceilings: BTreeMap::new(),
            runner: RunnerConfig::default(),
            results: ResultsConfig::default(),
            snapshot: SnapshotConfig::default(),
            unclassified_pause_threshold: 3,
            event_buffer: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Used when neither the request nor the policy sets a timeout
    pub default_timeout_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsConfig {
    pub window_size: usize,
    pub log_intermediate_attempts: bool,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            log_intermediate_attempts: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub enabled: bool,
    /// Stores holding more records than this are not snapshotted
    pub max_records_per_store: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_records_per_store: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: EngineConfig = serde_json::from_value(serde_json::json!({
            "current_policy": "aggressive",
            "attempt_ceilings": { "network": 3 },
            "snapshot": { "max_records_per_store": 50 }
        }))
        .unwrap();

        assert_eq!(config.current_policy, "aggressive");
        assert_eq!(config.attempt_ceilings[&ErrorType::NETWORK], 3);
        assert_eq!(config.snapshot.max_records_per_store, 50);
        assert!(config.snapshot.enabled);
        assert_eq!(config.unclassified_pause_threshold, 3);
        assert_eq!(config.results.window_size, 100);
    }
}
