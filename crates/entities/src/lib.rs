//! Entity records and the stores executions read and write.
//!
//! The engine only relies on whole-collection `load`/`save`; everything else
//! (instrumentation, snapshots, identifier listings) is layered on top here.

mod file_store;
mod instrumented;
mod memory_store;
mod record;
mod store;
mod store_set;

pub use file_store::JsonFileStore;
pub use instrumented::{AccessEntry, AccessKind, InstrumentedStore};
pub use memory_store::InMemoryStore;
pub use record::{EntityKind, EntityRecord};
pub use store::{EntityStore, StoreError, StoreResult};
pub use store_set::{JournalMark, SnapshotDiff, StoreSet, StoreSnapshot};
