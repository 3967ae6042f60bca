use ::entities::{EntityKind, EntityStore};
use anyhow::{Context, Result};
use clap::Args;
use console::style;
use infrastructure::config::AppConfig;

use super::build_stores;

#[derive(Debug, Args)]
pub struct EntitiesCommand {
    /// memory, task, goal or vault; all kinds when omitted
    pub kind: Option<String>,
}

impl EntitiesCommand {
    pub async fn execute(&self, config: &AppConfig) -> Result<()> {
        let stores = build_stores(&config.storage);
        let kinds = match &self.kind {
            Some(kind) => vec![kind.parse::<EntityKind>()?],
            None => stores.kinds(),
        };

        for kind in kinds {
            let store = stores.require(kind)?;
            let ids = store
                .ids()
                .await
                .with_context(|| format!("Failed to load {kind} store"))?;
            println!("{} ({})", style(kind).cyan().bold(), ids.len());
            for id in ids {
                println!("  {id}");
            }
        }
        Ok(())
    }
}
