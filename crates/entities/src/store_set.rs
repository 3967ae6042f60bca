use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{
    EntityKind, EntityRecord, EntityStore, InMemoryStore, InstrumentedStore, JsonFileStore,
    StoreError, StoreResult,
};

/// Point-in-time copy of some stores.
#[derive(Debug, Clone, Serialize)]
pub struct StoreSnapshot {
    pub taken_at: DateTime<Utc>,
    pub stores: BTreeMap<EntityKind, Vec<EntityRecord>>,
    /// Kinds left out because they exceeded the record cap or failed to load.
    pub skipped: Vec<EntityKind>,
}

impl StoreSnapshot {
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    pub fn record_count(&self) -> usize {
        self.stores.values().map(Vec::len).sum()
    }
}

/// Differences between a snapshot and the live stores, per kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SnapshotDiff {
    pub added: BTreeMap<EntityKind, Vec<String>>,
    pub removed: BTreeMap<EntityKind, Vec<String>>,
    pub modified: BTreeMap<EntityKind, Vec<String>>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// Journal position of every store at one instant.
#[derive(Debug, Clone, Default)]
pub struct JournalMark(BTreeMap<EntityKind, u64>);

impl JournalMark {
    pub fn get(&self, kind: EntityKind) -> u64 {
        self.0.get(&kind).copied().unwrap_or(0)
    }
}

/// Registry of the entity stores injected into executions.
///
/// Every registered store is wrapped in an [`InstrumentedStore`].
#[derive(Clone, Default)]
pub struct StoreSet {
    stores: BTreeMap<EntityKind, Arc<InstrumentedStore>>,
}

impl StoreSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty in-memory stores for every kind.
    pub fn in_memory() -> Self {
        let mut set = Self::new();
        for kind in EntityKind::all() {
            set.register(Arc::new(InMemoryStore::new(kind)));
        }
        set
    }

    /// JSON file stores for every kind under `data_dir`.
    pub fn json_files(data_dir: impl AsRef<Path>) -> Self {
        let mut set = Self::new();
        for kind in EntityKind::all() {
            set.register(Arc::new(JsonFileStore::new(data_dir.as_ref(), kind)));
        }
        set
    }

    pub fn register(&mut self, store: Arc<dyn EntityStore>) -> &mut Self {
        let kind = store.kind();
        if self
            .stores
            .insert(kind, Arc::new(InstrumentedStore::new(store)))
            .is_some()
        {
            debug!(%kind, "replaced entity store");
        }
        self
    }

    pub fn get(&self, kind: EntityKind) -> Option<Arc<InstrumentedStore>> {
        self.stores.get(&kind).cloned()
    }

    pub fn require(&self, kind: EntityKind) -> StoreResult<Arc<InstrumentedStore>> {
        self.get(kind).ok_or(StoreError::NotRegistered(kind))
    }

    pub fn kinds(&self) -> Vec<EntityKind> {
        self.stores.keys().copied().collect()
    }

    pub fn mark(&self) -> JournalMark {
        JournalMark(
            self.stores
                .iter()
                .map(|(kind, store)| (*kind, store.mark()))
                .collect(),
        )
    }

    /// Ids inserted into each store after `mark`. Kinds with nothing new are omitted.
    pub fn inserted_since(&self, mark: &JournalMark) -> BTreeMap<EntityKind, Vec<String>> {
        self.stores
            .iter()
            .filter_map(|(kind, store)| {
                let ids = store.inserted_since(mark.get(*kind));
                (!ids.is_empty()).then_some((*kind, ids))
            })
            .collect()
    }

    /// Copy the given kinds, skipping any store holding more than `max_records`.
    pub async fn snapshot(&self, kinds: &[EntityKind], max_records: usize) -> StoreSnapshot {
        let mut snapshot = StoreSnapshot {
            taken_at: Utc::now(),
            stores: BTreeMap::new(),
            skipped: Vec::new(),
        };

        for kind in kinds {
            let Some(store) = self.stores.get(kind) else {
                continue;
            };
            match store.load().await {
                Ok(records) if records.len() > max_records => {
                    debug!(%kind, count = records.len(), max_records, "store too large to snapshot");
                    snapshot.skipped.push(*kind);
                }
                Ok(records) => {
                    snapshot.stores.insert(*kind, records);
                }
                Err(e) => {
                    warn!(%kind, error = %e, "snapshot load failed");
                    snapshot.skipped.push(*kind);
                }
            }
        }
        snapshot
    }

    /// Put every snapshotted store back to its captured content.
    pub async fn restore(&self, snapshot: &StoreSnapshot) -> StoreResult<()> {
        for (kind, records) in &snapshot.stores {
            self.require(*kind)?.restore(records.clone()).await?;
        }
        Ok(())
    }

    pub async fn diff(&self, snapshot: &StoreSnapshot) -> StoreResult<SnapshotDiff> {
        let mut diff = SnapshotDiff::default();

        for (kind, before) in &snapshot.stores {
            let after = self.require(*kind)?.load().await?;
            let previous: HashMap<&str, &EntityRecord> =
                before.iter().map(|r| (r.id.as_str(), r)).collect();
            let current: HashMap<&str, &EntityRecord> =
                after.iter().map(|r| (r.id.as_str(), r)).collect();

            let added: Vec<String> = after
                .iter()
                .filter(|r| !previous.contains_key(r.id.as_str()))
                .map(|r| r.id.clone())
                .collect();
            let removed: Vec<String> = before
                .iter()
                .filter(|r| !current.contains_key(r.id.as_str()))
                .map(|r| r.id.clone())
                .collect();
            let modified: Vec<String> = after
                .iter()
                .filter(|r| matches!(previous.get(r.id.as_str()), Some(old) if *old != *r))
                .map(|r| r.id.clone())
                .collect();

            if !added.is_empty() {
                diff.added.insert(*kind, added);
            }
            if !removed.is_empty() {
                diff.removed.insert(*kind, removed);
            }
            if !modified.is_empty() {
                diff.modified.insert(*kind, modified);
            }
        }
        Ok(diff)
    }

    /// Current identifiers of every store. Stores that fail to load are logged and left out.
    pub async fn valid_ids(&self) -> BTreeMap<EntityKind, Vec<String>> {
        let mut out = BTreeMap::new();
        for (kind, store) in &self.stores {
            match store.ids().await {
                Ok(ids) => {
                    out.insert(*kind, ids);
                }
                Err(e) => warn!(%kind, error = %e, "could not list identifiers"),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> StoreSet {
        let set = StoreSet::in_memory();
        let tasks = set.require(EntityKind::Task).unwrap();
        tasks.upsert(EntityRecord::new("t-1")).await.unwrap();
        tasks.upsert(EntityRecord::new("t-2")).await.unwrap();
        set
    }

    #[tokio::test]
    async fn snapshot_respects_record_cap() {
        let set = seeded().await;
        let snapshot = set
            .snapshot(&[EntityKind::Task, EntityKind::Goal], 1)
            .await;
        assert_eq!(snapshot.skipped, vec![EntityKind::Task]);
        assert!(snapshot.stores.contains_key(&EntityKind::Goal));
    }

    #[tokio::test]
    async fn unregistered_kinds_are_ignored_by_snapshot() {
        let set = StoreSet::new();
        let snapshot = set.snapshot(&EntityKind::all(), 100).await;
        assert!(snapshot.is_empty());
        assert!(snapshot.skipped.is_empty());
    }

    #[tokio::test]
    async fn valid_ids_lists_every_kind() {
        let set = seeded().await;
        let ids = set.valid_ids().await;
        assert_eq!(ids.len(), 4);
        assert_eq!(ids[&EntityKind::Task], vec!["t-1", "t-2"]);
        assert!(ids[&EntityKind::Vault].is_empty());
    }

    #[tokio::test]
    async fn inserted_since_omits_quiet_kinds() {
        let set = seeded().await;
        let mark = set.mark();
        set.require(EntityKind::Goal)
            .unwrap()
            .upsert(EntityRecord::new("g-1"))
            .await
            .unwrap();

        let inserted = set.inserted_since(&mark);
        assert_eq!(inserted.len(), 1);
        assert_eq!(inserted[&EntityKind::Goal], vec!["g-1"]);
    }
}
