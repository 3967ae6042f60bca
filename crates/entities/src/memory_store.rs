use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{EntityKind, EntityRecord, EntityStore, StoreResult};

/// Process-local store, mostly for tests and dry runs.
pub struct InMemoryStore {
    kind: EntityKind,
    records: RwLock<Vec<EntityRecord>>,
}

impl InMemoryStore {
    pub fn new(kind: EntityKind) -> Self {
        Self::with_records(kind, Vec::new())
    }

    pub fn with_records(kind: EntityKind, records: Vec<EntityRecord>) -> Self {
        Self {
            kind,
            records: RwLock::new(records),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl EntityStore for InMemoryStore {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    async fn load(&self) -> StoreResult<Vec<EntityRecord>> {
        Ok(self.records.read().clone())
    }

    async fn save(&self, records: Vec<EntityRecord>) -> StoreResult<()> {
        *self.records.write() = records;
        Ok(())
    }
}
