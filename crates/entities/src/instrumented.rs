use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::{EntityKind, EntityRecord, EntityStore, StoreResult};

const DEFAULT_JOURNAL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessKind {
    Load,
    Save,
    /// Collection rewritten from a snapshot. Never counts as an insertion.
    Restore,
}

/// One journaled call on the wrapped store.
#[derive(Debug, Clone, Serialize)]
pub struct AccessEntry {
    /// Monotonic per-store sequence number
    pub seq: u64,
    pub kind: AccessKind,
    pub at: DateTime<Utc>,
    pub record_count: usize,
    pub inserted: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
}

/// Reads and writes are kept in separate bounded queues so a burst of loads can
/// never push a write out of the journal.
struct Journal {
    next_seq: u64,
    reads: VecDeque<AccessEntry>,
    writes: VecDeque<AccessEntry>,
    capacity: usize,
    /// Highest sequence number dropped from `writes`
    evicted_write: u64,
}

impl Journal {
    fn push(&mut self, mut entry: AccessEntry) {
        self.next_seq += 1;
        entry.seq = self.next_seq;
        let queue = match entry.kind {
            AccessKind::Load => &mut self.reads,
            AccessKind::Save | AccessKind::Restore => &mut self.writes,
        };
        if queue.len() >= self.capacity {
            if let Some(dropped) = queue.pop_front() {
                if dropped.kind != AccessKind::Load {
                    self.evicted_write = dropped.seq;
                }
            }
        }
        queue.push_back(entry);
    }
}

/// Decorator recording every load and save before delegating to the inner store.
///
/// Saves are diffed against the collection as it was just before the write, so the
/// journal can answer "which records did the current attempt create" without the
/// inner store knowing anything about attempts.
pub struct InstrumentedStore {
    inner: Arc<dyn EntityStore>,
    journal: Mutex<Journal>,
}

impl InstrumentedStore {
    pub fn new(inner: Arc<dyn EntityStore>) -> Self {
        Self::with_capacity(inner, DEFAULT_JOURNAL_CAPACITY)
    }

    pub fn with_capacity(inner: Arc<dyn EntityStore>, capacity: usize) -> Self {
        Self {
            inner,
            journal: Mutex::new(Journal {
                next_seq: 0,
                reads: VecDeque::new(),
                writes: VecDeque::new(),
                capacity: capacity.max(1),
                evicted_write: 0,
            }),
        }
    }

    /// Sequence number of the latest journal entry. Pass it to
    /// [`inserted_since`](Self::inserted_since) later.
    pub fn mark(&self) -> u64 {
        self.journal.lock().next_seq
    }

    /// Ids created by saves journaled after `mark`, in insertion order.
    ///
    /// Loads never displace writes. Writes that fell out of the bounded journal are
    /// not reported; that case is logged.
    pub fn inserted_since(&self, mark: u64) -> Vec<String> {
        let journal = self.journal.lock();
        if journal.evicted_write > mark {
            warn!(
                kind = %self.kind(),
                mark,
                evicted_through = journal.evicted_write,
                "journal overflowed since mark, insertions may be missed"
            );
        }
        let mut seen = HashSet::new();
        journal
            .writes
            .iter()
            .filter(|e| e.seq > mark && e.kind == AccessKind::Save)
            .flat_map(|e| e.inserted.iter())
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect()
    }

    /// Journaled reads and writes in sequence order.
    pub fn access_log(&self) -> Vec<AccessEntry> {
        let journal = self.journal.lock();
        let mut log: Vec<AccessEntry> = journal
            .reads
            .iter()
            .chain(journal.writes.iter())
            .cloned()
            .collect();
        log.sort_by_key(|e| e.seq);
        log
    }

    /// Overwrite the collection with snapshot content, journaled as a restore.
    pub async fn restore(&self, records: Vec<EntityRecord>) -> StoreResult<()> {
        let before = self.inner.load().await?;
        let (inserted, updated, removed) = diff_ids(&before, &records);
        let count = records.len();
        self.inner.save(records).await?;

        debug!(
            kind = %self.kind(),
            reinstated = inserted.len(),
            reverted = updated.len(),
            dropped = removed.len(),
            "store restored"
        );
        self.record(AccessKind::Restore, count, Vec::new(), updated, removed);
        Ok(())
    }

    fn record(
        &self,
        kind: AccessKind,
        record_count: usize,
        inserted: Vec<String>,
        updated: Vec<String>,
        removed: Vec<String>,
    ) {
        self.journal.lock().push(AccessEntry {
            seq: 0,
            kind,
            at: Utc::now(),
            record_count,
            inserted,
            updated,
            removed,
        });
    }
}

/// (inserted, updated, removed) going from `before` to `after`.
fn diff_ids(
    before: &[EntityRecord],
    after: &[EntityRecord],
) -> (Vec<String>, Vec<String>, Vec<String>) {
    let previous: HashMap<&str, &EntityRecord> =
        before.iter().map(|r| (r.id.as_str(), r)).collect();
    let current: HashSet<&str> = after.iter().map(|r| r.id.as_str()).collect();

    let mut inserted = Vec::new();
    let mut updated = Vec::new();
    for record in after {
        match previous.get(record.id.as_str()) {
            None => inserted.push(record.id.clone()),
            Some(old) if *old != record => updated.push(record.id.clone()),
            Some(_) => {}
        }
    }
    let removed = before
        .iter()
        .filter(|r| !current.contains(r.id.as_str()))
        .map(|r| r.id.clone())
        .collect();

    (inserted, updated, removed)
}

#[async_trait]
impl EntityStore for InstrumentedStore {
    fn kind(&self) -> EntityKind {
        self.inner.kind()
    }

    async fn load(&self) -> StoreResult<Vec<EntityRecord>> {
        let records = self.inner.load().await?;
        trace!(kind = %self.kind(), count = records.len(), "store load");
        self.record(AccessKind::Load, records.len(), Vec::new(), Vec::new(), Vec::new());
        Ok(records)
    }

    async fn save(&self, records: Vec<EntityRecord>) -> StoreResult<()> {
        let before = self.inner.load().await?;
        let (inserted, updated, removed) = diff_ids(&before, &records);
        let count = records.len();
        self.inner.save(records).await?;

        trace!(
            kind = %self.kind(),
            inserted = inserted.len(),
            updated = updated.len(),
            removed = removed.len(),
            "store save"
        );
        self.record(AccessKind::Save, count, inserted, updated, removed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryStore;

    fn store() -> InstrumentedStore {
        InstrumentedStore::new(Arc::new(InMemoryStore::with_records(
            EntityKind::Memory,
            vec![EntityRecord::new("m-0")],
        )))
    }

    #[tokio::test]
    async fn journals_inserted_ids_after_mark() {
        let store = store();
        store.upsert(EntityRecord::new("m-1")).await.unwrap();
        let mark = store.mark();
        store.upsert(EntityRecord::new("m-2")).await.unwrap();
        store
            .upsert(EntityRecord::new("m-0").with_field("x", 1))
            .await
            .unwrap();

        assert_eq!(store.inserted_since(mark), vec!["m-2".to_string()]);
        assert_eq!(store.inserted_since(0).len(), 2);
    }

    #[tokio::test]
    async fn save_entry_carries_diff() {
        let store = store();
        store
            .save(vec![EntityRecord::new("m-1")])
            .await
            .unwrap();

        let save = store
            .access_log()
            .into_iter()
            .find(|e| e.kind == AccessKind::Save)
            .unwrap();
        assert_eq!(save.inserted, vec!["m-1".to_string()]);
        assert_eq!(save.removed, vec!["m-0".to_string()]);
    }

    #[tokio::test]
    async fn restore_is_not_an_insertion() {
        let store = store();
        let original = store.load().await.unwrap();
        let mark = store.mark();
        store.save(Vec::new()).await.unwrap();
        store.restore(original).await.unwrap();

        assert!(store.inserted_since(mark).is_empty());
        assert_eq!(store.ids().await.unwrap(), vec!["m-0".to_string()]);
    }

    #[tokio::test]
    async fn journal_is_bounded() {
        let store = InstrumentedStore::with_capacity(
            Arc::new(InMemoryStore::new(EntityKind::Task)),
            4,
        );
        for _ in 0..10 {
            store.load().await.unwrap();
        }
        let log = store.access_log();
        assert_eq!(log.len(), 4);
        assert_eq!(log.last().unwrap().seq, 10);
    }

    #[tokio::test]
    async fn reads_never_evict_writes() {
        let store = InstrumentedStore::with_capacity(
            Arc::new(InMemoryStore::new(EntityKind::Memory)),
            8,
        );
        let mark = store.mark();
        store.upsert(EntityRecord::new("trace")).await.unwrap();
        for _ in 0..300 {
            store.get("trace").await.unwrap();
        }

        assert_eq!(store.inserted_since(mark), vec!["trace".to_string()]);
        let log = store.access_log();
        assert!(log.iter().any(|e| e.kind == AccessKind::Save));
        assert!(log.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[tokio::test]
    async fn evicted_writes_are_not_reported() {
        let store = InstrumentedStore::with_capacity(
            Arc::new(InMemoryStore::new(EntityKind::Goal)),
            2,
        );
        let mark = store.mark();
        for i in 0..4 {
            store.upsert(EntityRecord::new(format!("g-{i}"))).await.unwrap();
        }

        assert_eq!(
            store.inserted_since(mark),
            vec!["g-2".to_string(), "g-3".to_string()]
        );
    }
}
