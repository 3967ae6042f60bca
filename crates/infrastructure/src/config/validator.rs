use anyhow::{bail, Context, Result};
use orchestrator::policy::{default_execution_policies, default_retry_policies};
use orchestrator::EngineConfig;
use tracing::warn;

use super::settings::{AppConfig, LoggingSettings, PrimitiveConfig, StorageBackend, StorageConfig};

const VALID_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

pub struct ConfigValidator;

impl ConfigValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, config: &AppConfig) -> Result<()> {
        self.validate_engine_config(&config.engine)?;
        self.validate_logging_config(&config.logging)?;
        self.validate_storage_config(&config.storage)?;
        self.validate_primitive_config(&config.primitive)?;
        Ok(())
    }

    fn validate_engine_config(&self, config: &EngineConfig) -> Result<()> {
        let mut policies = default_execution_policies();
        policies.extend(config.policies.clone());

        if !policies.contains_key(&config.current_policy) {
            bail!(
                "Current policy '{}' is not defined. Known policies: {:?}",
                config.current_policy,
                policies.keys().collect::<Vec<_>>()
            );
        }

        for (name, policy) in &config.policies {
            policy.validate(name)?;
            if policy.max_retries > 10 {
                warn!(
                    "Policy '{}' allows {} retries, each one re-runs the snippet",
                    name, policy.max_retries
                );
            }
            if policy.timeout_ms.is_some_and(|ms| ms > 300_000) {
                warn!("Policy '{}' has a timeout above five minutes", name);
            }
        }

        let mut retry_policies = default_retry_policies();
        retry_policies.extend(config.retry_policies.clone());

        for (name, policy) in &config.retry_policies {
            policy.validate(name)?;
        }

        for (error_type, policy_name) in &config.error_retry_map {
            if !retry_policies.contains_key(policy_name) {
                bail!(
                    "Error type '{}' maps to unknown retry policy '{}'",
                    error_type,
                    policy_name
                );
            }
        }

        for (error_type, ceiling) in &config.attempt_ceilings {
            if *ceiling == 0 {
                bail!("Attempt ceiling for '{}' must be greater than 0", error_type);
            }
        }

        if config.runner.default_timeout_ms == 0 {
            bail!("runner.default_timeout_ms must be greater than 0");
        }

        if config.results.window_size == 0 {
            bail!("results.window_size must be greater than 0");
        }

        if config.event_buffer == 0 {
            bail!("event_buffer must be greater than 0");
        } else if config.event_buffer < 16 {
            warn!(
                "event_buffer of {} will make slow subscribers lag",
                config.event_buffer
            );
        }

        if config.unclassified_pause_threshold == 0 {
            warn!("Unclassified failure pause is disabled");
        }

        if config.snapshot.enabled && config.snapshot.max_records_per_store == 0 {
            warn!("Snapshots are enabled but every non-empty store will be skipped");
        }

        Ok(())
    }

    fn validate_logging_config(&self, config: &LoggingSettings) -> Result<()> {
        let level = config.level.to_lowercase();
        if !VALID_LEVELS.contains(&level.as_str()) {
            bail!(
                "Invalid log level: {}. Must be one of: {:?}",
                config.level,
                VALID_LEVELS
            );
        }
        if config.json && config.color {
            warn!("Color output is ignored with JSON logging");
        }
        Ok(())
    }

    fn validate_storage_config(&self, config: &StorageConfig) -> Result<()> {
        match config.backend {
            StorageBackend::Memory => {
                if config.data_dir.is_some() {
                    warn!("storage.data_dir is ignored by the memory backend");
                }
            }
            StorageBackend::Json => {
                let dir = config.resolved_data_dir();
                if dir.exists() && !dir.is_dir() {
                    bail!("Data directory is not a directory: {}", dir.display());
                }
            }
        }
        Ok(())
    }

    fn validate_primitive_config(&self, config: &PrimitiveConfig) -> Result<()> {
        if config.interpreter.trim().is_empty() {
            bail!("primitive.interpreter must not be empty");
        }
        if config.args.iter().any(|arg| arg.trim().is_empty()) {
            warn!("primitive.args contains empty arguments");
        }
        Ok(())
    }
}

impl Default for ConfigValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Load-then-validate helper for front-ends.
pub fn validated(config: AppConfig) -> Result<AppConfig> {
    ConfigValidator::new()
        .validate(&config)
        .context("Invalid configuration")?;
    Ok(config)
}
