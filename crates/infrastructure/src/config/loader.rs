use anyhow::{bail, Context, Result};
use orchestrator::policy::default_execution_policies;
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use super::settings::AppConfig;

pub const ENV_PREFIX: &str = "EXECQ_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Environment,
    Default,
}

pub struct ConfigLoader {
    config_paths: Vec<PathBuf>,
    explicit_path: Option<PathBuf>,
    env_prefix: String,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            config_paths: Self::default_config_paths(),
            explicit_path: None,
            env_prefix: ENV_PREFIX.to_string(),
        }
    }

    /// Use exactly this file. Unlike the search path, a missing file is an error.
    pub fn with_path(mut self, path: PathBuf) -> Self {
        self.explicit_path = Some(path);
        self
    }

    /// Replace the search path, mostly for tests.
    pub fn with_search_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.config_paths = paths;
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    fn default_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from("execq.toml"),
            PathBuf::from(".execqrc"),
            PathBuf::from("execq.json"),
        ];

        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".config").join("execq").join("config.toml"));
        }

        if let Some(config_dir) = dirs::config_dir() {
            let system = config_dir.join("execq").join("config.toml");
            if !paths.contains(&system) {
                paths.push(system);
            }
        }

        paths
    }

    pub async fn load(&self) -> Result<AppConfig> {
        let (config, _) = self.load_with_source().await?;
        Ok(config)
    }

    /// Load and report where the values came from. Environment wins over files
    /// when at least one override applied.
    pub async fn load_with_source(&self) -> Result<(AppConfig, ConfigSource)> {
        let (config, mut source) = match &self.explicit_path {
            Some(path) => {
                if !path.exists() {
                    bail!("Config file not found: {}", path.display());
                }
                let config = self
                    .load_file(path)
                    .await
                    .with_context(|| format!("Failed to load {}", path.display()))?;
                info!("Loaded configuration from: {}", path.display());
                (config, ConfigSource::File(path.clone()))
            }
            None => self.load_first_found().await,
        };

        let (config, overridden) = self.apply_env_overrides(config)?;
        if overridden > 0 {
            debug!(overridden, "Applied environment overrides");
            source = ConfigSource::Environment;
        }

        Ok((config, source))
    }

    async fn load_first_found(&self) -> (AppConfig, ConfigSource) {
        for path in &self.config_paths {
            if !path.exists() {
                continue;
            }
            match self.load_file(path).await {
                Ok(config) => {
                    info!("Loaded configuration from: {}", path.display());
                    return (config, ConfigSource::File(path.clone()));
                }
                Err(e) => {
                    warn!("Failed to load config from {}: {:#}", path.display(), e);
                }
            }
        }
        debug!("No config file found, using defaults");
        (AppConfig::default(), ConfigSource::Default)
    }

    async fn load_file(&self, path: &Path) -> Result<AppConfig> {
        let content = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&content).context("Failed to parse TOML config"),
            "json" => serde_json::from_str(&content).context("Failed to parse JSON config"),
            _ => toml::from_str(&content)
                .or_else(|_| serde_json::from_str(&content))
                .context("Failed to parse config file"),
        }
    }

    fn var(&self, name: &str) -> Option<String> {
        env::var(format!("{}{}", self.env_prefix, name)).ok()
    }

    fn apply_env_overrides(&self, mut config: AppConfig) -> Result<(AppConfig, usize)> {
        let mut applied = 0;

        if let Some(policy) = self.var("POLICY") {
            config.engine.current_policy = policy;
            applied += 1;
        }

        if let Some(raw) = self.var("TIMEOUT_MS") {
            let timeout_ms: u64 = raw
                .parse()
                .with_context(|| format!("{}TIMEOUT_MS is not a number: {raw}", self.env_prefix))?;
            config.engine.runner.default_timeout_ms = timeout_ms;

            // A current policy with its own timeout would shadow the runner default.
            let current = config.engine.current_policy.clone();
            let policy = config
                .engine
                .policies
                .get(&current)
                .cloned()
                .or_else(|| default_execution_policies().remove(&current));
            if let Some(mut policy) = policy.filter(|p| p.timeout_ms.is_some()) {
                policy.timeout_ms = Some(timeout_ms);
                config.engine.policies.insert(current, policy);
            }
            applied += 1;
        }

        if let Some(level) = self.var("LOG_LEVEL") {
            config.logging.level = level;
            applied += 1;
        }

        if let Some(json) = self.var("LOG_JSON") {
            config.logging.json = matches!(json.to_lowercase().as_str(), "true" | "1" | "yes");
            applied += 1;
        }

        if let Some(data_dir) = self.var("DATA_DIR") {
            config.storage.data_dir = Some(PathBuf::from(data_dir));
            applied += 1;
        }

        if let Some(interpreter) = self.var("INTERPRETER") {
            config.primitive.interpreter = interpreter;
            applied += 1;
        }

        Ok((config, applied))
    }

    pub async fn save_config(&self, config: &AppConfig, path: &Path) -> Result<()> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("toml");

        let content = match extension {
            "json" => serde_json::to_string_pretty(config)?,
            _ => toml::to_string_pretty(config)?,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::write(path, content).await?;
        info!("Configuration saved to: {}", path.display());

        Ok(())
    }

    /// A TOML document with the built-in policy catalogue spelled out.
    pub fn generate_example_config() -> String {
        let mut config = AppConfig::default();
        config.engine.policies = default_execution_policies();
        config.engine.retry_policies = orchestrator::policy::default_retry_policies();
        config.engine.error_retry_map = orchestrator::policy::default_error_retry_map();
        config.engine.attempt_ceilings = orchestrator::policy::default_attempt_ceilings();
        config.storage.data_dir = Some(PathBuf::from("./data"));

        toml::to_string_pretty(&config)
            .unwrap_or_else(|e| format!("# Failed to generate example config: {e}\n"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
