use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::{EntityKind, EntityRecord, EntityStore, StoreError, StoreResult};

/// One pretty-printed JSON array per kind at `<data_dir>/<kind>.json`.
pub struct JsonFileStore {
    kind: EntityKind,
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(data_dir: impl AsRef<Path>, kind: EntityKind) -> Self {
        Self {
            kind,
            path: data_dir.as_ref().join(format!("{}.json", kind.as_str())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl EntityStore for JsonFileStore {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    async fn load(&self) -> StoreResult<Vec<EntityRecord>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error(e)),
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    async fn save(&self, records: Vec<EntityRecord>) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }
        let json = serde_json::to_string_pretty(&records)?;

        // Readers never observe a half-written file.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        debug!(kind = %self.kind, count = records.len(), path = %self.path.display(), "store saved");
        Ok(())
    }
}
