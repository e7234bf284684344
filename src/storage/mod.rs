//! Storage traits and the in-memory backend for assetlink.
//!
//! The host system owns persistence; the engine only needs the traits
//! defined in [`traits`].

use std::sync::Arc;

/// In-memory storage backend.
pub mod memory;
mod traits;

pub use memory::{
    InMemoryAuditStore, InMemoryBatchStore, InMemoryEntityStore, InMemoryRecordStore,
    InMemoryRelationshipStore, InMemoryStores, InMemoryViewStore,
};
pub use traits::{
    AuditStore, BatchStore, EntityStore, RecordStore, RelationshipStore, StorageError, ViewStore,
};

/// Shared handles to every store the pipeline touches.
#[derive(Clone)]
pub struct Stores {
    pub batches: Arc<dyn BatchStore>,
    pub records: Arc<dyn RecordStore>,
    pub entities: Arc<dyn EntityStore>,
    pub views: Arc<dyn ViewStore>,
    pub relationships: Arc<dyn RelationshipStore>,
    pub audit: Arc<dyn AuditStore>,
}

impl Stores {
    /// Fresh in-memory stores.
    #[must_use]
    pub fn in_memory() -> Self {
        InMemoryStores::new().into()
    }
}

impl From<InMemoryStores> for Stores {
    fn from(stores: InMemoryStores) -> Self {
        Self {
            batches: Arc::new(stores.batches),
            records: Arc::new(stores.records),
            entities: Arc::new(stores.entities),
            views: Arc::new(stores.views),
            relationships: Arc::new(stores.relationships),
            audit: Arc::new(stores.audit),
        }
    }
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}
