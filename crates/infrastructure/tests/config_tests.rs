#[cfg(test)]
mod tests {
    use infrastructure::config::{
        AppConfig, ConfigLoader, ConfigSource, ConfigValidator, StorageBackend,
    };
    use orchestrator::{ErrorType, ExecutionPolicy};
    use serial_test::serial;
    use std::env;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tokio::fs;

    fn isolated_loader(prefix: &str) -> ConfigLoader {
        ConfigLoader::new()
            .with_search_paths(Vec::new())
            .with_env_prefix(prefix)
    }

    #[tokio::test]
    async fn test_defaults_without_any_file() -> anyhow::Result<()> {
        let (config, source) = isolated_loader("EXECQ_TEST_NONE_")
            .load_with_source()
            .await?;

        assert_eq!(source, ConfigSource::Default);
        assert_eq!(config, AppConfig::default());
        ConfigValidator::new().validate(&config)?;
        Ok(())
    }

    #[tokio::test]
    async fn test_config_loader_from_toml() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("execq.toml");

        let toml_content = r#"
[engine]
current_policy = "aggressive"
unclassified_pause_threshold = 5

[engine.attempt_ceilings]
network = 3

[engine.runner]
default_timeout_ms = 2500

[logging]
level = "debug"

[storage]
backend = "memory"
"#;

        fs::write(&config_path, toml_content).await?;

        let (config, source) = isolated_loader("EXECQ_TEST_TOML_")
            .with_path(config_path.clone())
            .load_with_source()
            .await?;

        assert_eq!(source, ConfigSource::File(config_path));
        assert_eq!(config.engine.current_policy, "aggressive");
        assert_eq!(config.engine.unclassified_pause_threshold, 5);
        assert_eq!(config.engine.attempt_ceilings[&ErrorType::NETWORK], 3);
        assert_eq!(config.engine.runner.default_timeout_ms, 2500);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        // untouched sections keep their defaults
        assert_eq!(config.primitive.interpreter, "node");
        assert!(config.engine.snapshot.enabled);

        Ok(())
    }

    #[tokio::test]
    async fn test_config_loader_from_json() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("execq.json");

        let json_content = r#"{
  "engine": {
    "retry_policies": {
      "patient": { "max_attempts": 4, "base_delay_ms": 250 }
    },
    "error_retry_map": { "timeout": "patient" }
  },
  "primitive": { "interpreter": "python3", "args": ["-c"] }
}"#;

        fs::write(&config_path, json_content).await?;

        let config = isolated_loader("EXECQ_TEST_JSON_")
            .with_path(config_path)
            .load()
            .await?;

        let patient = &config.engine.retry_policies["patient"];
        assert_eq!(patient.max_attempts, 4);
        assert_eq!(patient.base_delay_ms, 250);
        assert_eq!(patient.backoff_multiplier, 2.0);
        assert_eq!(config.engine.error_retry_map[&ErrorType::TIMEOUT], "patient");
        assert_eq!(config.primitive.interpreter, "python3");
        assert_eq!(config.primitive.args, vec!["-c"]);
        ConfigValidator::new().validate(&config)?;

        Ok(())
    }

    #[tokio::test]
    async fn test_search_path_uses_first_existing_file() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let missing = temp_dir.path().join("execq.toml");
        let present = temp_dir.path().join(".execqrc");
        let later = temp_dir.path().join("execq.json");

        fs::write(&present, "[logging]\nlevel = \"warn\"\n").await?;
        fs::write(&later, r#"{"logging": {"level": "trace"}}"#).await?;

        let (config, source) = ConfigLoader::new()
            .with_search_paths(vec![missing, present.clone(), later])
            .with_env_prefix("EXECQ_TEST_SEARCH_")
            .load_with_source()
            .await?;

        assert_eq!(source, ConfigSource::File(present));
        assert_eq!(config.logging.level, "warn");
        Ok(())
    }

    #[tokio::test]
    async fn test_broken_file_in_search_path_is_skipped() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let broken = temp_dir.path().join("execq.toml");
        fs::write(&broken, "[engine\ncurrent_policy = ").await?;

        let (config, source) = ConfigLoader::new()
            .with_search_paths(vec![broken])
            .with_env_prefix("EXECQ_TEST_BROKEN_")
            .load_with_source()
            .await?;

        assert_eq!(source, ConfigSource::Default);
        assert_eq!(config, AppConfig::default());
        Ok(())
    }

    #[tokio::test]
    async fn test_explicit_missing_path_is_an_error() {
        let result = isolated_loader("EXECQ_TEST_MISSING_")
            .with_path(PathBuf::from("/definitely/not/here/execq.toml"))
            .load()
            .await;

        let message = format!("{:#}", result.unwrap_err());
        assert!(message.contains("not found"), "{message}");
    }

    #[tokio::test]
    #[serial]
    async fn test_env_overrides() -> anyhow::Result<()> {
        let prefix = "EXECQ_TEST_ENV_";
        env::set_var(format!("{prefix}POLICY"), "aggressive");
        env::set_var(format!("{prefix}TIMEOUT_MS"), "1500");
        env::set_var(format!("{prefix}LOG_LEVEL"), "trace");
        env::set_var(format!("{prefix}LOG_JSON"), "yes");
        env::set_var(format!("{prefix}DATA_DIR"), "/tmp/execq-env");
        env::set_var(format!("{prefix}INTERPRETER"), "deno");

        let result = isolated_loader(prefix).load_with_source().await;

        for name in ["POLICY", "TIMEOUT_MS", "LOG_LEVEL", "LOG_JSON", "DATA_DIR", "INTERPRETER"] {
            env::remove_var(format!("{prefix}{name}"));
        }

        let (config, source) = result?;
        assert_eq!(source, ConfigSource::Environment);
        assert_eq!(config.engine.current_policy, "aggressive");
        assert_eq!(config.engine.runner.default_timeout_ms, 1500);
        // the built-in policy is copied in with the overridden timeout
        let aggressive = &config.engine.policies["aggressive"];
        assert_eq!(aggressive.timeout_ms, Some(1500));
        assert_eq!(aggressive.max_retries, 5);
        assert_eq!(config.logging.level, "trace");
        assert!(config.logging.json);
        assert_eq!(config.storage.data_dir, Some(PathBuf::from("/tmp/execq-env")));
        assert_eq!(config.primitive.interpreter, "deno");

        Ok(())
    }

    #[tokio::test]
    #[serial]
    async fn test_invalid_timeout_override_is_rejected() {
        let prefix = "EXECQ_TEST_BADENV_";
        env::set_var(format!("{prefix}TIMEOUT_MS"), "soon");

        let result = isolated_loader(prefix).load().await;
        env::remove_var(format!("{prefix}TIMEOUT_MS"));

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_save_and_reload() -> anyhow::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("nested").join("execq.json");

        let mut config = AppConfig::default();
        config.engine.current_policy = "conservative".into();
        config.logging.json = true;

        let loader = isolated_loader("EXECQ_TEST_SAVE_");
        loader.save_config(&config, &path).await?;

        let reloaded = isolated_loader("EXECQ_TEST_SAVE_")
            .with_path(path)
            .load()
            .await?;
        assert_eq!(reloaded, config);
        Ok(())
    }

    #[test]
    fn test_example_config_parses_and_validates() -> anyhow::Result<()> {
        let example = ConfigLoader::generate_example_config();
        let config: AppConfig = toml::from_str(&example)?;

        assert!(config.engine.policies.contains_key("conservative"));
        assert_eq!(config.engine.retry_policies["network"].max_attempts, 5);
        assert_eq!(config.engine.attempt_ceilings[&ErrorType::SYNTAX], 1);
        ConfigValidator::new().validate(&config)?;
        Ok(())
    }

    #[test]
    fn test_validator_rejects_unknown_current_policy() {
        let mut config = AppConfig::default();
        config.engine.current_policy = "reckless".into();

        let err = ConfigValidator::new().validate(&config).unwrap_err();
        assert!(err.to_string().contains("reckless"));
    }

    #[test]
    fn test_validator_accepts_policies_defined_in_config() {
        let mut config = AppConfig::default();
        config
            .engine
            .policies
            .insert("patient".into(), ExecutionPolicy::default());
        config.engine.current_policy = "patient".into();

        assert!(ConfigValidator::new().validate(&config).is_ok());
    }

    #[test]
    fn test_validator_rejects_unknown_retry_policy_in_map() {
        let mut config = AppConfig::default();
        config
            .engine
            .error_retry_map
            .insert(ErrorType::NETWORK, "hopeful".into());

        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_validator_rejects_invalid_retry_policy() {
        let mut config = AppConfig::default();
        let policy = config
            .engine
            .retry_policies
            .entry("shrinking".into())
            .or_default();
        policy.backoff_multiplier = 0.5;

        assert!(ConfigValidator::new().validate(&config).is_err());
    }

    #[test]
    fn test_validator_rejects_zero_values() {
        let validator = ConfigValidator::new();

        let mut config = AppConfig::default();
        config.engine.runner.default_timeout_ms = 0;
        assert!(validator.validate(&config).is_err());

        let mut config = AppConfig::default();
        config.engine.results.window_size = 0;
        assert!(validator.validate(&config).is_err());

        let mut config = AppConfig::default();
        config.engine.policies.insert(
            "instant".into(),
            ExecutionPolicy {
                timeout_ms: Some(0),
                ..ExecutionPolicy::default()
            },
        );
        assert!(validator.validate(&config).is_err());
    }

    #[test]
    fn test_validator_rejects_bad_logging_and_primitive() {
        let validator = ConfigValidator::new();

        let mut config = AppConfig::default();
        config.logging.level = "chatty".into();
        assert!(validator.validate(&config).is_err());

        let mut config = AppConfig::default();
        config.logging.level = "DEBUG".into();
        assert!(validator.validate(&config).is_ok());

        let mut config = AppConfig::default();
        config.primitive.interpreter = "  ".into();
        assert!(validator.validate(&config).is_err());
    }
}
