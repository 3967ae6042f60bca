pub mod classify;
pub mod config;
pub mod entities;
pub mod policies;
pub mod run;

pub use classify::ClassifyCommand;
pub use config::ConfigCommand;
pub use entities::EntitiesCommand;
pub use policies::PoliciesCommand;
pub use run::RunCommand;

use anyhow::{Context, Result};
use ::entities::StoreSet;
use infrastructure::config::{AppConfig, StorageBackend, StorageConfig};
use orchestrator::ExecutionManager;
use std::sync::Arc;
use tracing::debug;

use crate::primitive::ProcessPrimitive;

pub fn build_stores(storage: &StorageConfig) -> StoreSet {
    match storage.backend {
        StorageBackend::Memory => StoreSet::in_memory(),
        StorageBackend::Json => {
            let data_dir = storage.resolved_data_dir();
            debug!("Entity stores under {}", data_dir.display());
            StoreSet::json_files(data_dir)
        }
    }
}

/// An engine wired to the configured interpreter and stores.
pub fn build_manager(config: &AppConfig) -> Result<ExecutionManager> {
    let primitive =
        ProcessPrimitive::from_config(&config.primitive).context("Invalid error pattern")?;
    let manager = ExecutionManager::builder(Arc::new(primitive))
        .config(config.engine.clone())
        .stores(build_stores(&config.storage))
        .build()
        .context("Failed to build execution engine")?;
    Ok(manager)
}
