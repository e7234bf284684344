//! Cross-entity matching.
//!
//! Links merged records of a batch to canonical entities:
//!
//! 1. A record whose key matches a View already in the batch's cycle
//!    redescribes an entity resolved in this cycle. It is superseded and no
//!    View is created.
//! 2. Otherwise a key match against any other cycle reuses that View's
//!    entity and binds it to this cycle with a new View.
//! 3. Otherwise a new entity and View are created.
//!
//! Keys are tried in spec priority order; when keys of different specs point
//! at different entities the first spec with any hit wins and the record is
//! counted as ambiguous. After records are resolved, building and parcel
//! Views of the cycle are linked by the relationship rule, reading parcel
//! lists from each View's record and from the records superseded onto it.

use std::collections::HashMap;

use crate::audit::{AuditEntry, AuditReason};
use crate::batch::Batch;
use crate::entity::{CanonicalEntity, Relationship, View};
use crate::error::AssetResult;
use crate::field::{FieldValue, RecordKind};
use crate::id::{EntityId, ViewId};
use crate::index::{IndexedView, ViewKeyIndex};
use crate::key::{KeySpecList, Placeholders, RelationshipKeySpec};
use crate::lot::ParcelListSplitter;
use crate::record::{Lifecycle, Record, SkipReason, SkippedRecord};
use crate::storage::{StorageError, Stores};

/// Counts from matching one kind of a batch's merged records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchOutcome {
    /// Attached to an entity first seen in another cycle.
    pub matched_existing: usize,
    /// Attached to a freshly created entity.
    pub matched_new: usize,
    /// Redescribed an entity already resolved in this cycle.
    pub superseded: usize,
    /// Keys of different specs pointed at different entities.
    pub ambiguous: usize,
    /// Already bound to a View by an interrupted earlier run.
    pub resumed: usize,
}

impl MatchOutcome {
    /// Folds another outcome into this one.
    pub fn absorb(&mut self, other: &Self) {
        self.matched_existing += other.matched_existing;
        self.matched_new += other.matched_new;
        self.superseded += other.superseded;
        self.ambiguous += other.ambiguous;
        self.resumed += other.resumed;
    }
}

/// Result of the relationship pass over one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationshipOutcome {
    /// Rows inserted by this pass; existing rows are not counted.
    pub created: usize,
    /// Building records whose parcel list could not be split.
    pub skipped: Vec<SkippedRecord>,
}

enum Resolution {
    SameCycle(IndexedView),
    Existing(IndexedView),
    New,
}

/// Links merged records to canonical entities across cycles.
#[derive(Debug, Clone)]
pub struct CrossEntityMatcher {
    stores: Stores,
    placeholders: Placeholders,
    relationship: RelationshipKeySpec,
    splitter: ParcelListSplitter,
}

impl CrossEntityMatcher {
    #[must_use]
    pub fn new(stores: Stores) -> Self {
        Self {
            stores,
            placeholders: Placeholders::default(),
            relationship: RelationshipKeySpec::lot_number(),
            splitter: ParcelListSplitter::default(),
        }
    }

    #[must_use]
    pub fn with_placeholders(mut self, placeholders: Placeholders) -> Self {
        self.placeholders = placeholders;
        self
    }

    #[must_use]
    pub fn with_relationship(mut self, relationship: RelationshipKeySpec) -> Self {
        self.relationship = relationship;
        self
    }

    #[must_use]
    pub fn with_splitter(mut self, splitter: ParcelListSplitter) -> Self {
        self.splitter = splitter;
        self
    }

    /// Indexes every View of `kind` the organization has, across cycles.
    pub fn build_index(
        &self,
        batch: &Batch,
        kind: RecordKind,
        specs: &KeySpecList,
    ) -> Result<ViewKeyIndex, StorageError> {
        let mut index = ViewKeyIndex::new();
        for view in self.stores.views.list_by_org(batch.org, kind)? {
            match self.stores.records.get(view.record_id)? {
                Some(record) => index.insert(&view, &record, specs, &self.placeholders),
                None => tracing::warn!(
                    view = %view.id,
                    record = %view.record_id,
                    "view points at a missing record; not indexed"
                ),
            }
        }
        Ok(index)
    }

    /// Matches `records` (all of one kind, all `Merged`) for `batch`.
    ///
    /// Records are processed in order; each new View is indexed immediately
    /// so later records of the same batch see it as a same-cycle match.
    ///
    /// # Errors
    /// - `IllegalTransition` if a record is not `Merged`
    /// - `Storage` on any store failure
    pub fn match_records(
        &self,
        batch: &Batch,
        kind: RecordKind,
        specs: &KeySpecList,
        records: Vec<Record>,
    ) -> AssetResult<MatchOutcome> {
        let mut index = self.build_index(batch, kind, specs)?;
        let mut outcome = MatchOutcome::default();

        for mut record in records {
            if let Some(view) = self.stores.views.find_by_record(record.id)? {
                let cycles = self.stores.views.list_by_entity(view.entity)?.len();
                record.transition(if cycles > 1 {
                    Lifecycle::MatchedExisting
                } else {
                    Lifecycle::MatchedNew
                })?;
                self.stores.records.update(record)?;
                outcome.resumed += 1;
                continue;
            }

            match self.resolve(batch, specs, &record, &index, &mut outcome)? {
                Resolution::SameCycle(hit) => {
                    tracing::debug!(
                        record = %record.id,
                        view = %hit.view,
                        "record redescribes an entity already in this cycle"
                    );
                    record.transition(Lifecycle::SupersededForDeletion)?;
                    self.stores.audit.append(AuditEntry::new(
                        batch.org,
                        record.id,
                        hit.record,
                        None,
                        AuditReason::SameCycleMatch,
                    ))?;
                    self.stores.records.update(record)?;
                    outcome.superseded += 1;
                }
                Resolution::Existing(hit) => {
                    record.transition(Lifecycle::MatchedExisting)?;
                    let entity = self
                        .stores
                        .entities
                        .get(hit.entity)?
                        .ok_or(StorageError::EntityNotFound(hit.entity))?;
                    let view = View::new(&entity, batch.cycle, record.id);
                    self.stores.views.insert(view.clone())?;
                    self.stores.audit.append(AuditEntry::new(
                        batch.org,
                        record.id,
                        hit.record,
                        None,
                        AuditReason::SystemMatch,
                    ))?;
                    tracing::debug!(
                        record = %record.id,
                        entity = %entity.id,
                        matched_record = %hit.record,
                        "matched to existing entity"
                    );
                    index.insert(&view, &record, specs, &self.placeholders);
                    self.stores.records.update(record)?;
                    outcome.matched_existing += 1;
                }
                Resolution::New => {
                    record.transition(Lifecycle::MatchedNew)?;
                    let entity = CanonicalEntity::new(batch.org, kind);
                    self.stores.entities.insert(entity.clone())?;
                    let view = View::new(&entity, batch.cycle, record.id);
                    self.stores.views.insert(view.clone())?;
                    tracing::debug!(record = %record.id, entity = %entity.id, "new entity");
                    index.insert(&view, &record, specs, &self.placeholders);
                    self.stores.records.update(record)?;
                    outcome.matched_new += 1;
                }
            }
        }

        Ok(outcome)
    }

    fn resolve(
        &self,
        batch: &Batch,
        specs: &KeySpecList,
        record: &Record,
        index: &ViewKeyIndex,
        outcome: &mut MatchOutcome,
    ) -> Result<Resolution, StorageError> {
        let keys = specs.all_keys(record, &self.placeholders);

        if let Some(hit) = keys
            .iter()
            .flat_map(|key| index.lookup(key))
            .find(|hit| hit.cycle == batch.cycle)
        {
            return Ok(Resolution::SameCycle(*hit));
        }

        let mut chosen: Option<(usize, IndexedView)> = None;
        let mut entities: Vec<EntityId> = Vec::new();
        for key in &keys {
            let hits = index.lookup(key);
            if let (None, Some(first)) = (chosen, hits.first()) {
                chosen = Some((key.spec_index, *first));
            }
            for hit in hits {
                if !entities.contains(&hit.entity) {
                    entities.push(hit.entity);
                }
            }
        }

        let Some((spec_index, hit)) = chosen else {
            return Ok(Resolution::New);
        };

        if entities.len() > 1 {
            outcome.ambiguous += 1;
            tracing::warn!(
                record = %record.id,
                spec = %specs.as_slice()[spec_index],
                candidates = entities.len(),
                chosen = %hit.entity,
                "ambiguous match; first matching spec wins"
            );
        }

        // The entity may already be in this cycle under a key this record
        // does not share.
        if let Some(existing) = self.stores.views.find(hit.entity, batch.cycle)? {
            return Ok(Resolution::SameCycle(IndexedView::from(&existing)));
        }
        Ok(Resolution::Existing(hit))
    }

    /// Links building and parcel Views of the batch's cycle.
    ///
    /// Insert-if-absent, so re-running creates nothing new.
    pub fn link_relationships(&self, batch: &Batch) -> Result<RelationshipOutcome, StorageError> {
        let mut outcome = RelationshipOutcome::default();

        let mut parcels: HashMap<String, Vec<ViewId>> = HashMap::new();
        for view in self
            .stores
            .views
            .list_by_cycle(batch.org, batch.cycle, RecordKind::Parcel)?
        {
            let Some(record) = self.stores.records.get(view.record_id)? else {
                continue;
            };
            if let Some(id) = record
                .get(self.relationship.parcel)
                .and_then(FieldValue::normalized)
                .filter(|id| !self.placeholders.contains(id))
            {
                parcels.entry(id).or_default().push(view.id);
            }
        }
        if parcels.is_empty() {
            return Ok(outcome);
        }

        for view in self
            .stores
            .views
            .list_by_cycle(batch.org, batch.cycle, RecordKind::Building)?
        {
            for record in self.described_by(&view)? {
                let Some(value) = record.get(self.relationship.building) else {
                    continue;
                };
                let ids = match self.parcel_ids(value) {
                    Ok(ids) => ids,
                    Err(reason) => {
                        tracing::warn!(record = %record.id, %reason, "no relationships derived");
                        outcome.skipped.push(SkippedRecord {
                            record_id: record.id,
                            reason,
                        });
                        continue;
                    }
                };
                for id in ids {
                    for parcel_view in parcels.get(&id).into_iter().flatten() {
                        let rel = Relationship::new(view.id, *parcel_view, batch.cycle);
                        if self.stores.relationships.insert(rel)? {
                            outcome.created += 1;
                        }
                    }
                }
            }
        }

        Ok(outcome)
    }

    /// The View's record followed by every record superseded onto it.
    fn described_by(&self, view: &View) -> Result<Vec<Record>, StorageError> {
        let mut records = Vec::new();
        if let Some(record) = self.stores.records.get(view.record_id)? {
            records.push(record);
        }
        for entry in self.stores.audit.find_by_parent(view.record_id)? {
            if entry.reason != AuditReason::SameCycleMatch {
                continue;
            }
            if let Some(record) = self.stores.records.get(entry.record_id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn parcel_ids(&self, value: &FieldValue) -> Result<Vec<String>, SkipReason> {
        let normalize = |raw: &str| {
            FieldValue::text(raw)
                .normalized()
                .filter(|id| !self.placeholders.contains(id))
        };
        if !self.relationship.split_list {
            return Ok(value
                .normalized()
                .filter(|id| !self.placeholders.contains(id))
                .into_iter()
                .collect());
        }
        let raw = match value.as_text() {
            Some(text) => text.to_string(),
            None => value.normalized().unwrap_or_default(),
        };
        let ids = self
            .splitter
            .split(&raw)
            .map_err(|e| SkipReason::MalformedParcelList(e.to_string()))?;
        Ok(ids.iter().filter_map(|id| normalize(id)).collect())
    }
}
