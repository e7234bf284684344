//! Key index over existing Views.
//!
//! Cross-entity matching asks "which existing Views share a key with this
//! record?" once per record and spec. The index answers that with a hash
//! lookup instead of a scan over every View of the organization.

use std::collections::HashMap;

use crate::entity::View;
use crate::id::{CycleId, EntityId, ViewId};
use crate::key::{ClassKey, KeySpecList, Placeholders};
use crate::record::{Record, RecordId};

/// One indexed View.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexedView {
    pub view: ViewId,
    pub entity: EntityId,
    pub cycle: CycleId,
    /// Record the View was bound to when indexed.
    pub record: RecordId,
}

impl From<&View> for IndexedView {
    fn from(view: &View) -> Self {
        Self {
            view: view.id,
            entity: view.entity,
            cycle: view.cycle,
            record: view.record_id,
        }
    }
}

/// `(spec_index, key)` to Views carrying that key, in insertion order.
#[derive(Debug, Clone, Default)]
pub struct ViewKeyIndex {
    by_key: HashMap<ClassKey, Vec<IndexedView>>,
    views: usize,
}

impl ViewKeyIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes `view` under every usable key its record yields.
    pub fn insert(
        &mut self,
        view: &View,
        record: &Record,
        specs: &KeySpecList,
        placeholders: &Placeholders,
    ) {
        let entry = IndexedView::from(view);
        for key in specs.all_keys(record, placeholders) {
            let slot = self.by_key.entry(key).or_default();
            if !slot.iter().any(|v| v.view == entry.view) {
                slot.push(entry);
            }
        }
        self.views += 1;
    }

    /// Views indexed under `key`.
    #[must_use]
    pub fn lookup(&self, key: &ClassKey) -> &[IndexedView] {
        self.by_key.get(key).map_or(&[], Vec::as_slice)
    }

    /// Number of Views indexed.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.views
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.views == 0
    }

    /// Number of distinct keys.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.by_key.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::CanonicalEntity;
    use crate::field::{Field, RecordKind};
    use crate::id::{BatchId, OrgId};

    #[test]
    fn test_index_every_usable_key() {
        let org = OrgId::new();
        let specs = KeySpecList::default_for(RecordKind::Building);
        let placeholders = Placeholders::default();
        let record = Record::new(org, BatchId::new(), RecordKind::Building)
            .with(Field::Ubid, "u-1")
            .with(Field::AddressLine1, "1 Main St");
        let entity = CanonicalEntity::new(org, RecordKind::Building);
        let view = View::new(&entity, CycleId::new(), record.id);

        let mut index = ViewKeyIndex::new();
        index.insert(&view, &record, &specs, &placeholders);
        assert_eq!(index.len(), 1);
        assert_eq!(index.key_count(), 2);

        let by_address = Record::new(org, BatchId::new(), RecordKind::Building)
            .with(Field::AddressLine1, "1 MAIN ST ");
        let key = specs.first_key(&by_address, &placeholders).unwrap();
        let hits = index.lookup(&key);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity, entity.id);
    }

    #[test]
    fn test_lookup_miss_is_empty() {
        let index = ViewKeyIndex::new();
        let key = ClassKey {
            spec_index: 0,
            value: "nothing".to_string(),
        };
        assert!(index.lookup(&key).is_empty());
        assert!(index.is_empty());
    }
}
