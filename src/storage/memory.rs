//! In-memory storage backend.
//!
//! This module provides thread-safe in-memory implementations of the storage traits.
//! It is intended for embedded usage, tests, and as a reference implementation.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use crate::audit::AuditEntry;
use crate::batch::Batch;
use crate::entity::{CanonicalEntity, Relationship, View};
use crate::field::RecordKind;
use crate::id::{BatchId, CycleId, EntityId, OrgId, ViewId};
use crate::record::{Record, RecordId};
use crate::storage::traits::{
    AuditStore, BatchStore, EntityStore, RecordStore, RelationshipStore, StorageError, ViewStore,
};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Thread-safe in-memory batch store.
#[derive(Debug, Default)]
pub struct InMemoryBatchStore {
    state: RwLock<HashMap<BatchId, Batch>>,
}

impl InMemoryBatchStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl BatchStore for InMemoryBatchStore {
    fn insert(&self, batch: Batch) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("batch.insert"))?;
        if state.contains_key(&batch.id) {
            return Err(StorageError::DuplicateKey(batch.id.to_string()));
        }
        state.insert(batch.id, batch);
        Ok(())
    }

    fn get(&self, id: BatchId) -> Result<Option<Batch>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("batch.get"))?;
        Ok(state.get(&id).cloned())
    }
}

#[derive(Debug, Default)]
struct RecordState {
    by_id: HashMap<RecordId, Record>,
    by_batch: HashMap<BatchId, Vec<RecordId>>,
}

/// Thread-safe in-memory record store.
#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    state: RwLock<RecordState>,
}

impl InMemoryRecordStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for InMemoryRecordStore {
    fn insert(&self, record: Record) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("record.insert"))?;
        if state.by_id.contains_key(&record.id) {
            return Err(StorageError::DuplicateKey(record.id.to_string()));
        }
        state.by_batch.entry(record.batch).or_default().push(record.id);
        state.by_id.insert(record.id, record);
        Ok(())
    }

    fn get(&self, id: RecordId) -> Result<Option<Record>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("record.get"))?;
        Ok(state.by_id.get(&id).cloned())
    }

    fn update(&self, record: Record) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("record.update"))?;
        let Some(slot) = state.by_id.get_mut(&record.id) else {
            return Err(StorageError::RecordNotFound(record.id));
        };
        if slot.batch != record.batch {
            return Err(StorageError::BackendError(format!(
                "record {} cannot move between batches",
                record.id
            )));
        }
        *slot = record;
        Ok(())
    }

    fn list_by_batch(&self, batch: BatchId) -> Result<Vec<Record>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("record.list_by_batch"))?;
        let Some(ids) = state.by_batch.get(&batch) else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter_map(|id| state.by_id.get(id).cloned()).collect())
    }
}

#[derive(Debug, Default)]
struct EntityState {
    by_id: HashMap<EntityId, CanonicalEntity>,
    order: Vec<EntityId>,
}

/// Thread-safe in-memory entity store.
#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    state: RwLock<EntityState>,
}

impl InMemoryEntityStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl EntityStore for InMemoryEntityStore {
    fn insert(&self, entity: CanonicalEntity) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("entity.insert"))?;
        if state.by_id.contains_key(&entity.id) {
            return Err(StorageError::DuplicateKey(entity.id.to_string()));
        }
        state.order.push(entity.id);
        state.by_id.insert(entity.id, entity);
        Ok(())
    }

    fn get(&self, id: EntityId) -> Result<Option<CanonicalEntity>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("entity.get"))?;
        Ok(state.by_id.get(&id).cloned())
    }

    fn delete(&self, id: EntityId) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("entity.delete"))?;
        if state.by_id.remove(&id).is_none() {
            return Err(StorageError::EntityNotFound(id));
        }
        state.order.retain(|x| *x != id);
        Ok(())
    }

    fn list_by_org(
        &self,
        org: OrgId,
        kind: RecordKind,
    ) -> Result<Vec<CanonicalEntity>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("entity.list_by_org"))?;
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.by_id.get(id))
            .filter(|e| e.org == org && e.kind == kind)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
struct ViewState {
    by_id: HashMap<ViewId, View>,
    order: Vec<ViewId>,
    by_entity_cycle: HashMap<(EntityId, CycleId), ViewId>,
    by_record: HashMap<RecordId, ViewId>,
}

impl ViewState {
    fn ordered<'a>(&'a self, keep: impl Fn(&View) -> bool + 'a) -> impl Iterator<Item = View> + 'a {
        self.order
            .iter()
            .filter_map(|id| self.by_id.get(id))
            .filter(move |v| keep(*v))
            .cloned()
    }
}

/// Thread-safe in-memory view store.
#[derive(Debug, Default)]
pub struct InMemoryViewStore {
    state: RwLock<ViewState>,
}

impl InMemoryViewStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ViewStore for InMemoryViewStore {
    fn insert(&self, view: View) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("view.insert"))?;
        if state.by_id.contains_key(&view.id) {
            return Err(StorageError::DuplicateKey(view.id.to_string()));
        }
        if state.by_entity_cycle.contains_key(&(view.entity, view.cycle)) {
            return Err(StorageError::DuplicateKey(format!(
                "entity {} already has a view in cycle {}",
                view.entity, view.cycle
            )));
        }
        state.by_entity_cycle.insert((view.entity, view.cycle), view.id);
        state.by_record.insert(view.record_id, view.id);
        state.order.push(view.id);
        state.by_id.insert(view.id, view);
        Ok(())
    }

    fn get(&self, id: ViewId) -> Result<Option<View>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("view.get"))?;
        Ok(state.by_id.get(&id).cloned())
    }

    fn update(&self, view: View) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("view.update"))?;
        let Some(old) = state.by_id.get(&view.id).cloned() else {
            return Err(StorageError::ViewNotFound(view.id));
        };
        if old.entity != view.entity || old.cycle != view.cycle {
            return Err(StorageError::BackendError(format!(
                "view {} cannot change entity or cycle",
                view.id
            )));
        }
        state.by_record.remove(&old.record_id);
        state.by_record.insert(view.record_id, view.id);
        state.by_id.insert(view.id, view);
        Ok(())
    }

    fn delete(&self, id: ViewId) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("view.delete"))?;
        let Some(view) = state.by_id.remove(&id) else {
            return Err(StorageError::ViewNotFound(id));
        };
        state.by_entity_cycle.remove(&(view.entity, view.cycle));
        state.by_record.remove(&view.record_id);
        state.order.retain(|x| *x != id);
        Ok(())
    }

    fn find(&self, entity: EntityId, cycle: CycleId) -> Result<Option<View>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("view.find"))?;
        Ok(state
            .by_entity_cycle
            .get(&(entity, cycle))
            .and_then(|id| state.by_id.get(id))
            .cloned())
    }

    fn find_by_record(&self, record: RecordId) -> Result<Option<View>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("view.find_by_record"))?;
        Ok(state
            .by_record
            .get(&record)
            .and_then(|id| state.by_id.get(id))
            .cloned())
    }

    fn list_by_entity(&self, entity: EntityId) -> Result<Vec<View>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("view.list_by_entity"))?;
        Ok(state.ordered(move |v| v.entity == entity).collect())
    }

    fn list_by_org(&self, org: OrgId, kind: RecordKind) -> Result<Vec<View>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("view.list_by_org"))?;
        Ok(state.ordered(move |v| v.org == org && v.kind == kind).collect())
    }

    fn list_by_cycle(
        &self,
        org: OrgId,
        cycle: CycleId,
        kind: RecordKind,
    ) -> Result<Vec<View>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("view.list_by_cycle"))?;
        Ok(state
            .ordered(move |v| v.org == org && v.cycle == cycle && v.kind == kind)
            .collect())
    }
}

/// Thread-safe in-memory relationship store.
#[derive(Debug, Default)]
pub struct InMemoryRelationshipStore {
    state: RwLock<BTreeSet<Relationship>>,
}

impl InMemoryRelationshipStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RelationshipStore for InMemoryRelationshipStore {
    fn insert(&self, relationship: Relationship) -> Result<bool, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("relationship.insert"))?;
        Ok(state.insert(relationship))
    }

    fn delete(&self, relationship: Relationship) -> Result<bool, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("relationship.delete"))?;
        Ok(state.remove(&relationship))
    }

    fn find_by_view(&self, view: ViewId) -> Result<Vec<Relationship>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("relationship.find_by_view"))?;
        Ok(state.iter().filter(|r| r.touches(view)).copied().collect())
    }

    fn list_by_cycle(&self, cycle: CycleId) -> Result<Vec<Relationship>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("relationship.list_by_cycle"))?;
        Ok(state.iter().filter(|r| r.cycle == cycle).copied().collect())
    }
}

#[derive(Debug, Default)]
struct AuditState {
    entries: Vec<AuditEntry>,
    by_record: HashMap<RecordId, Vec<usize>>,
    by_parent: HashMap<RecordId, Vec<usize>>,
}

/// Thread-safe in-memory append-only audit store.
#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    state: RwLock<AuditState>,
}

impl InMemoryAuditStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("audit.len"))?;
        Ok(state.entries.len())
    }
}

impl AuditStore for InMemoryAuditStore {
    fn append(&self, entry: AuditEntry) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("audit.append"))?;
        let idx = state.entries.len();
        state.by_record.entry(entry.record_id).or_default().push(idx);
        for parent in entry.parents() {
            state.by_parent.entry(parent).or_default().push(idx);
        }
        state.entries.push(entry);
        Ok(())
    }

    fn find_by_record(&self, record: RecordId) -> Result<Vec<AuditEntry>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("audit.find_by_record"))?;
        Ok(state
            .by_record
            .get(&record)
            .map(|idxs| idxs.iter().map(|i| state.entries[*i].clone()).collect())
            .unwrap_or_default())
    }

    fn find_by_parent(&self, record: RecordId) -> Result<Vec<AuditEntry>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("audit.find_by_parent"))?;
        Ok(state
            .by_parent
            .get(&record)
            .map(|idxs| idxs.iter().map(|i| state.entries[*i].clone()).collect())
            .unwrap_or_default())
    }
}

/// Convenience bundle of in-memory stores.
#[derive(Debug, Default)]
pub struct InMemoryStores {
    /// Batch store.
    pub batches: InMemoryBatchStore,
    /// Record store.
    pub records: InMemoryRecordStore,
    /// Entity store.
    pub entities: InMemoryEntityStore,
    /// View store.
    pub views: InMemoryViewStore,
    /// Relationship store.
    pub relationships: InMemoryRelationshipStore,
    /// Audit store.
    pub audit: InMemoryAuditStore,
}

impl InMemoryStores {
    /// Create a new bundle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::audit::AuditReason;

    #[test]
    fn record_insert_update_and_batch_order() {
        let store = InMemoryRecordStore::new();
        let org = OrgId::new();
        let batch = BatchId::new();

        let a = Record::new(org, batch, RecordKind::Building);
        let b = Record::new(org, batch, RecordKind::Building);
        let other = Record::new(org, BatchId::new(), RecordKind::Building);
        store.insert(b.clone()).unwrap();
        store.insert(a.clone()).unwrap();
        store.insert(other).unwrap();
        assert!(matches!(store.insert(a.clone()), Err(StorageError::DuplicateKey(_))));

        let listed: Vec<_> = store.list_by_batch(batch).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(listed, vec![b.id, a.id]);

        let mut moved = a.clone();
        moved.batch = BatchId::new();
        assert!(matches!(store.update(moved), Err(StorageError::BackendError(_))));

        let ghost = Record::new(org, batch, RecordKind::Building);
        assert!(matches!(store.update(ghost), Err(StorageError::RecordNotFound(_))));
    }

    #[test]
    fn view_rejects_second_view_per_cycle() {
        let store = InMemoryViewStore::new();
        let entity = CanonicalEntity::new(OrgId::new(), RecordKind::Building);
        let cycle = CycleId::new();

        let first = View::new(&entity, cycle, RecordId::next());
        store.insert(first.clone()).unwrap();
        let second = View::new(&entity, cycle, RecordId::next());
        assert!(matches!(store.insert(second), Err(StorageError::DuplicateKey(_))));

        let later = View::new(&entity, CycleId::new(), RecordId::next());
        store.insert(later.clone()).unwrap();
        assert_eq!(store.list_by_entity(entity.id).unwrap().len(), 2);
        assert_eq!(store.find(entity.id, cycle).unwrap().unwrap().id, first.id);
        assert_eq!(
            store.find_by_record(later.record_id).unwrap().unwrap().id,
            later.id
        );

        store.delete(first.id).unwrap();
        assert!(store.find(entity.id, cycle).unwrap().is_none());
        assert!(store.find_by_record(first.record_id).unwrap().is_none());
        store.insert(View::new(&entity, cycle, RecordId::next())).unwrap();
    }

    #[test]
    fn view_update_reindexes_record() {
        let store = InMemoryViewStore::new();
        let entity = CanonicalEntity::new(OrgId::new(), RecordKind::Parcel);
        let mut view = View::new(&entity, CycleId::new(), RecordId::next());
        let old_record = view.record_id;
        store.insert(view.clone()).unwrap();

        view.record_id = RecordId::next();
        store.update(view.clone()).unwrap();
        assert!(store.find_by_record(old_record).unwrap().is_none());
        assert_eq!(store.find_by_record(view.record_id).unwrap().unwrap().id, view.id);

        view.cycle = CycleId::new();
        assert!(store.update(view).is_err());
    }

    #[test]
    fn view_listing_filters_scope() {
        let store = InMemoryViewStore::new();
        let org = OrgId::new();
        let (c1, c2) = (CycleId::new(), CycleId::new());
        let b = CanonicalEntity::new(org, RecordKind::Building);
        let p = CanonicalEntity::new(org, RecordKind::Parcel);
        let foreign = CanonicalEntity::new(OrgId::new(), RecordKind::Building);

        store.insert(View::new(&b, c1, RecordId::next())).unwrap();
        store.insert(View::new(&b, c2, RecordId::next())).unwrap();
        store.insert(View::new(&p, c1, RecordId::next())).unwrap();
        store.insert(View::new(&foreign, c1, RecordId::next())).unwrap();

        assert_eq!(store.list_by_org(org, RecordKind::Building).unwrap().len(), 2);
        assert_eq!(store.list_by_cycle(org, c1, RecordKind::Building).unwrap().len(), 1);
        assert_eq!(store.list_by_cycle(org, c1, RecordKind::Parcel).unwrap().len(), 1);
    }

    #[test]
    fn relationship_insert_is_idempotent() {
        let store = InMemoryRelationshipStore::new();
        let rel = Relationship::new(ViewId::new(), ViewId::new(), CycleId::new());
        assert!(store.insert(rel).unwrap());
        assert!(!store.insert(rel).unwrap());
        assert_eq!(store.list_by_cycle(rel.cycle).unwrap(), vec![rel]);
        assert_eq!(store.find_by_view(rel.parcel_view).unwrap().len(), 1);
        assert!(store.delete(rel).unwrap());
        assert!(!store.delete(rel).unwrap());
    }

    #[test]
    fn audit_queries_by_record_and_parent() {
        let store = InMemoryAuditStore::new();
        let org = OrgId::new();
        let (a, b, m) = (RecordId::next(), RecordId::next(), RecordId::next());

        store
            .append(AuditEntry::new(org, m, a, Some(b), AuditReason::AutomaticMerge))
            .unwrap();
        store
            .append(AuditEntry::new(org, a, a, None, AuditReason::ImportCreation))
            .unwrap();

        assert_eq!(store.len().unwrap(), 2);
        assert_eq!(store.find_by_record(m).unwrap().len(), 1);
        assert_eq!(store.find_by_parent(b).unwrap().len(), 1);
        // The pass-through entry for `a` is not indexed as its own child.
        assert_eq!(store.find_by_parent(a).unwrap().len(), 1);
        assert_eq!(store.find_by_record(a).unwrap().len(), 1);
        assert!(store.find_by_record(b).unwrap().is_empty());
    }

    #[test]
    fn entity_listing_and_delete() {
        let store = InMemoryEntityStore::new();
        let org = OrgId::new();
        let e1 = CanonicalEntity::new(org, RecordKind::Building);
        let e2 = CanonicalEntity::new(org, RecordKind::Parcel);
        store.insert(e1.clone()).unwrap();
        store.insert(e2).unwrap();
        assert!(matches!(store.insert(e1.clone()), Err(StorageError::DuplicateKey(_))));
        assert_eq!(store.list_by_org(org, RecordKind::Building).unwrap(), vec![e1.clone()]);

        store.delete(e1.id).unwrap();
        assert!(store.get(e1.id).unwrap().is_none());
        assert!(matches!(store.delete(e1.id), Err(StorageError::EntityNotFound(_))));
    }
}
