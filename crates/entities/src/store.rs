use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

use crate::{EntityKind, EntityRecord};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed store content: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unknown entity kind: {0}")]
    UnknownKind(String),

    #[error("no store registered for {0}")]
    NotRegistered(EntityKind),

    #[error("store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Whole-collection store for one entity kind.
///
/// Only `load` and `save` are required; the helpers are expressed through them and
/// inherit whatever atomicity the backend gives `save`.
#[async_trait]
pub trait EntityStore: Send + Sync {
    fn kind(&self) -> EntityKind;

    async fn load(&self) -> StoreResult<Vec<EntityRecord>>;

    /// Replace the whole collection.
    async fn save(&self, records: Vec<EntityRecord>) -> StoreResult<()>;

    async fn get(&self, id: &str) -> StoreResult<Option<EntityRecord>> {
        Ok(self.load().await?.into_iter().find(|r| r.id == id))
    }

    async fn ids(&self) -> StoreResult<Vec<String>> {
        Ok(self.load().await?.into_iter().map(|r| r.id).collect())
    }

    /// Insert or replace by id.
    async fn upsert(&self, record: EntityRecord) -> StoreResult<()> {
        let mut records = self.load().await?;
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        self.save(records).await
    }

    /// Delete the given ids, returning how many were present. Absent ids are ignored.
    async fn delete(&self, ids: &[String]) -> StoreResult<usize> {
        let records = self.load().await?;
        let before = records.len();
        let kept: Vec<EntityRecord> = records
            .into_iter()
            .filter(|r| !ids.contains(&r.id))
            .collect();
        let removed = before - kept.len();
        if removed > 0 {
            self.save(kept).await?;
        }
        Ok(removed)
    }
}
