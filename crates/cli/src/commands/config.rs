use anyhow::{bail, Result};
use clap::Args;
use infrastructure::config::{AppConfig, ConfigLoader};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Args)]
pub struct ConfigCommand {
    /// Print a documented example instead of the effective configuration
    #[arg(long)]
    pub example: bool,

    /// Write to this file (TOML or JSON by extension) instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Overwrite an existing output file
    #[arg(long, requires = "output")]
    pub force: bool,
}

impl ConfigCommand {
    pub async fn execute(&self, config: &AppConfig) -> Result<()> {
        let example;
        let config = if self.example {
            example = toml::from_str::<AppConfig>(&ConfigLoader::generate_example_config())?;
            &example
        } else {
            config
        };

        match &self.output {
            Some(path) => {
                if path.exists() && !self.force {
                    bail!(
                        "{} already exists, use --force to overwrite",
                        path.display()
                    );
                }
                ConfigLoader::new().save_config(config, path).await?;
                info!("Configuration written to {}", path.display());
                println!("✅ Wrote {}", path.display());
            }
            None => print!("{}", toml::to_string_pretty(config)?),
        }
        Ok(())
    }
}
