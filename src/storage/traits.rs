//! Abstract storage traits for assetlink.
//!
//! The engine only talks to canonical state through these traits, so the
//! host decides the persistence technology. Every trait is object-safe and
//! `Send + Sync`; the in-memory backend in [`crate::storage::memory`] is the
//! reference implementation.

use thiserror::Error;

use crate::audit::AuditEntry;
use crate::batch::Batch;
use crate::entity::{CanonicalEntity, Relationship, View};
use crate::field::RecordKind;
use crate::id::{BatchId, CycleId, EntityId, OrgId, ViewId};
use crate::record::{Record, RecordId};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Record not found.
    #[error("Record not found: {0}")]
    RecordNotFound(RecordId),

    /// Entity not found.
    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    /// View not found.
    #[error("View not found: {0}")]
    ViewNotFound(ViewId),

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),
}

/// Storage trait for import batches.
pub trait BatchStore: Send + Sync {
    /// Register a batch. Returns error if ID already exists.
    fn insert(&self, batch: Batch) -> Result<(), StorageError>;

    /// Get a batch by ID.
    fn get(&self, id: BatchId) -> Result<Option<Batch>, StorageError>;
}

/// Storage trait for imported and merged records.
pub trait RecordStore: Send + Sync {
    /// Insert a new record. Returns error if ID already exists.
    fn insert(&self, record: Record) -> Result<(), StorageError>;

    /// Get a record by ID.
    fn get(&self, id: RecordId) -> Result<Option<Record>, StorageError>;

    /// Replace an existing record. Returns error if not found.
    fn update(&self, record: Record) -> Result<(), StorageError>;

    /// All records of a batch, in insertion order.
    fn list_by_batch(&self, batch: BatchId) -> Result<Vec<Record>, StorageError>;
}

/// Storage trait for canonical entities.
pub trait EntityStore: Send + Sync {
    /// Insert a new entity. Returns error if ID already exists.
    fn insert(&self, entity: CanonicalEntity) -> Result<(), StorageError>;

    /// Get an entity by ID.
    fn get(&self, id: EntityId) -> Result<Option<CanonicalEntity>, StorageError>;

    /// Delete an entity by ID. Returns error if not found.
    fn delete(&self, id: EntityId) -> Result<(), StorageError>;

    /// Entities of one kind for an organization, in insertion order.
    fn list_by_org(&self, org: OrgId, kind: RecordKind)
        -> Result<Vec<CanonicalEntity>, StorageError>;
}

/// Storage trait for per-cycle views.
///
/// # Invariant
/// An entity has at most one view per cycle. `insert` rejects a second view
/// for the same `(entity, cycle)` with [`StorageError::DuplicateKey`].
pub trait ViewStore: Send + Sync {
    /// Insert a new view.
    fn insert(&self, view: View) -> Result<(), StorageError>;

    /// Get a view by ID.
    fn get(&self, id: ViewId) -> Result<Option<View>, StorageError>;

    /// Point the view at a different record.
    fn update(&self, view: View) -> Result<(), StorageError>;

    /// Delete a view. Returns error if not found.
    fn delete(&self, id: ViewId) -> Result<(), StorageError>;

    /// The view of `entity` in `cycle`, if any.
    fn find(&self, entity: EntityId, cycle: CycleId) -> Result<Option<View>, StorageError>;

    /// The view bound to `record`, if any.
    fn find_by_record(&self, record: RecordId) -> Result<Option<View>, StorageError>;

    /// Every view of an entity, oldest first.
    fn list_by_entity(&self, entity: EntityId) -> Result<Vec<View>, StorageError>;

    /// Views of one kind for an organization across all cycles, in insertion
    /// order.
    fn list_by_org(&self, org: OrgId, kind: RecordKind) -> Result<Vec<View>, StorageError>;

    /// Views of one kind for an organization in one cycle, in insertion order.
    fn list_by_cycle(
        &self,
        org: OrgId,
        cycle: CycleId,
        kind: RecordKind,
    ) -> Result<Vec<View>, StorageError>;
}

/// Storage trait for building/parcel relationships.
pub trait RelationshipStore: Send + Sync {
    /// Insert-if-absent. Returns true if a row was created.
    fn insert(&self, relationship: Relationship) -> Result<bool, StorageError>;

    /// Delete a relationship. Returns true if a row was removed.
    fn delete(&self, relationship: Relationship) -> Result<bool, StorageError>;

    /// All relationships touching `view` from either end.
    fn find_by_view(&self, view: ViewId) -> Result<Vec<Relationship>, StorageError>;

    /// All relationships of a cycle.
    fn list_by_cycle(&self, cycle: CycleId) -> Result<Vec<Relationship>, StorageError>;
}

/// Append-only storage for audit entries.
pub trait AuditStore: Send + Sync {
    /// Append an entry.
    fn append(&self, entry: AuditEntry) -> Result<(), StorageError>;

    /// Entries whose resulting record is `record`.
    fn find_by_record(&self, record: RecordId) -> Result<Vec<AuditEntry>, StorageError>;

    /// Entries naming `record` as either parent.
    fn find_by_parent(&self, record: RecordId) -> Result<Vec<AuditEntry>, StorageError>;
}
