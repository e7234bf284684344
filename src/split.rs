//! Breaking up multi-parcel Views.
//!
//! Older imports sometimes describe several tax parcels with one parcel
//! record whose identifier is a list (`"100;101"`). This maintenance pass
//! replaces every such View with one View per listed parcel in the same
//! cycle, reusing the parcel entity that already carries that identifier
//! when there is one, and carries the View's relationships over. Records
//! that stop backing a View are retired.

use std::collections::HashMap;

use crate::audit::{AuditEntry, AuditReason};
use crate::entity::{CanonicalEntity, Relationship, View};
use crate::field::{Field, FieldValue, RecordKind};
use crate::error::AssetResult;
use crate::id::{EntityId, OrgId};
use crate::lot::{ParcelListSplitter, ParcelListStats};
use crate::record::{Lifecycle, Record};
use crate::storage::{StorageError, Stores};

/// What a split pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitReport {
    /// Shape of every parcel identifier inspected.
    pub stats: ParcelListStats,
    /// Multi-parcel Views replaced.
    pub views_split: usize,
    pub views_created: usize,
    /// Existing single-parcel Views re-pointed at a split record.
    pub views_updated: usize,
    /// Records superseded because their View was re-pointed.
    pub records_replaced: usize,
    pub entities_created: usize,
    /// Entities left without any View and deleted.
    pub entities_removed: usize,
    pub relationships_created: usize,
}

fn parcel_text(record: &Record) -> Option<String> {
    let value = record.get(Field::JurisdictionParcelId)?;
    value
        .as_text()
        .map(str::to_string)
        .or_else(|| value.normalized())
}

fn normalize(id: &str) -> Option<String> {
    FieldValue::text(id).normalized()
}

/// Splits every multi-parcel View of `org`.
///
/// Malformed identifier lists are counted and left alone. Running the pass
/// twice is a no-op the second time.
///
/// # Errors
/// - `IllegalTransition` if a View is backed by a record that cannot retire
/// - `Storage` on any store failure
pub fn split_multi_parcel_views(
    stores: &Stores,
    org: OrgId,
    splitter: &ParcelListSplitter,
) -> AssetResult<SplitReport> {
    let mut report = SplitReport::default();
    let views = stores.views.list_by_org(org, RecordKind::Parcel)?;

    let mut pending: Vec<(View, Record, Vec<String>)> = Vec::new();
    let mut by_parcel_id: HashMap<String, EntityId> = HashMap::new();
    for view in views {
        let Some(record) = stores.records.get(view.record_id)? else {
            continue;
        };
        let Some(text) = parcel_text(&record) else {
            continue;
        };
        let result = splitter.split(&text);
        report.stats.observe(&result);
        match result {
            Ok(ids) if ids.len() == 1 => {
                if let Some(key) = normalize(&ids[0]) {
                    by_parcel_id.entry(key).or_insert(view.entity);
                }
            }
            Ok(ids) if ids.len() > 1 => pending.push((view, record, ids)),
            Ok(_) => {}
            Err(e) => tracing::warn!(view = %view.id, error = %e, "parcel list left unsplit"),
        }
    }

    for (view, mut record, ids) in pending {
        record.retire()?;
        let relationships = stores.relationships.find_by_view(view.id)?;
        let mut kept_original = false;

        for id in ids {
            let Some(key) = normalize(&id) else {
                continue;
            };

            let (entity, reused) = match by_parcel_id.get(&key) {
                Some(entity_id) => match stores.entities.get(*entity_id)? {
                    Some(entity) => (entity, true),
                    None => return Err(StorageError::EntityNotFound(*entity_id).into()),
                },
                None => {
                    let entity = CanonicalEntity::new(org, RecordKind::Parcel);
                    stores.entities.insert(entity.clone())?;
                    by_parcel_id.insert(key, entity.id);
                    report.entities_created += 1;
                    (entity, false)
                }
            };

            let mut child = record.derive_child();
            child.set(Field::JurisdictionParcelId, id.as_str());
            child.transition(if reused {
                Lifecycle::MatchedExisting
            } else {
                Lifecycle::MatchedNew
            })?;
            stores.records.insert(child.clone())?;
            stores.audit.append(AuditEntry::new(
                org,
                child.id,
                record.id,
                None,
                AuditReason::ParcelSplit,
            ))?;

            let target = match stores.views.find(entity.id, view.cycle)? {
                Some(mut existing) => {
                    if existing.id == view.id {
                        kept_original = true;
                    } else if let Some(mut replaced) = stores.records.get(existing.record_id)? {
                        replaced.retire()?;
                        stores.records.update(replaced)?;
                        report.records_replaced += 1;
                    }
                    existing.record_id = child.id;
                    stores.views.update(existing.clone())?;
                    report.views_updated += 1;
                    existing
                }
                None => {
                    let created = View::new(&entity, view.cycle, child.id);
                    stores.views.insert(created.clone())?;
                    report.views_created += 1;
                    created
                }
            };

            if target.id != view.id {
                for rel in &relationships {
                    let moved = Relationship::new(rel.building_view, target.id, rel.cycle);
                    if stores.relationships.insert(moved)? {
                        report.relationships_created += 1;
                    }
                }
            }
            tracing::debug!(view = %view.id, parcel = %id, target = %target.id, "parcel split");
        }

        if !kept_original {
            for rel in &relationships {
                stores.relationships.delete(*rel)?;
            }
            stores.views.delete(view.id)?;
            if stores.views.list_by_entity(view.entity)?.is_empty() {
                stores.entities.delete(view.entity)?;
                report.entities_removed += 1;
            }
        }
        stores.records.update(record)?;
        report.views_split += 1;
    }

    tracing::info!(
        org = %org,
        inspected = report.stats.total(),
        views_split = report.views_split,
        views_created = report.views_created,
        entities_created = report.entities_created,
        malformed = report.stats.malformed,
        "multi-parcel split finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::{BatchId, CycleId};

    struct Fixture {
        stores: Stores,
        org: OrgId,
        cycle: CycleId,
        batch: BatchId,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                stores: Stores::in_memory(),
                org: OrgId::new(),
                cycle: CycleId::new(),
                batch: BatchId::new(),
            }
        }

        fn view(&self, kind: RecordKind, field: Field, value: &str, cycle: CycleId) -> View {
            let mut record = Record::new(self.org, self.batch, kind).with(field, value);
            record.lifecycle = Lifecycle::MatchedNew;
            self.stores.records.insert(record.clone()).unwrap();
            let entity = CanonicalEntity::new(self.org, kind);
            self.stores.entities.insert(entity.clone()).unwrap();
            let view = View::new(&entity, cycle, record.id);
            self.stores.views.insert(view.clone()).unwrap();
            view
        }
    }

    #[test]
    fn test_split_creates_view_per_parcel_and_moves_relationships() {
        let fx = Fixture::new();
        let building = fx.view(RecordKind::Building, Field::Ubid, "u-1", fx.cycle);
        let multi = fx.view(RecordKind::Parcel, Field::JurisdictionParcelId, "100;101", fx.cycle);
        fx.stores
            .relationships
            .insert(Relationship::new(building.id, multi.id, fx.cycle))
            .unwrap();

        let report =
            split_multi_parcel_views(&fx.stores, fx.org, &ParcelListSplitter::default()).unwrap();
        assert_eq!(report.views_split, 1);
        assert_eq!(report.views_created, 2);
        assert_eq!(report.entities_created, 2);
        assert_eq!(report.entities_removed, 1);
        assert_eq!(report.relationships_created, 2);
        assert_eq!(report.stats.multiple, 1);

        let parcels = fx
            .stores
            .views
            .list_by_cycle(fx.org, fx.cycle, RecordKind::Parcel)
            .unwrap();
        assert_eq!(parcels.len(), 2);
        assert!(fx.stores.views.get(multi.id).unwrap().is_none());
        assert_eq!(fx.stores.relationships.find_by_view(building.id).unwrap().len(), 2);
        assert_eq!(
            fx.stores.records.get(multi.record_id).unwrap().unwrap().lifecycle,
            Lifecycle::SupersededForDeletion
        );

        let again =
            split_multi_parcel_views(&fx.stores, fx.org, &ParcelListSplitter::default()).unwrap();
        assert_eq!(again.views_split, 0);
        assert_eq!(again.stats.single, 2);
    }

    #[test]
    fn test_split_reuses_existing_parcel_entity() {
        let fx = Fixture::new();
        let earlier = CycleId::new();
        let known = fx.view(RecordKind::Parcel, Field::JurisdictionParcelId, "100", earlier);
        fx.view(RecordKind::Parcel, Field::JurisdictionParcelId, "100, 109", fx.cycle);

        let report =
            split_multi_parcel_views(&fx.stores, fx.org, &ParcelListSplitter::default()).unwrap();
        assert_eq!(report.entities_created, 1);
        assert_eq!(fx.stores.views.list_by_entity(known.entity).unwrap().len(), 2);

        let in_cycle = fx.stores.views.find(known.entity, fx.cycle).unwrap().unwrap();
        let record = fx.stores.records.get(in_cycle.record_id).unwrap().unwrap();
        assert_eq!(record.get(Field::JurisdictionParcelId), Some(&FieldValue::text("100")));
        assert_eq!(record.lifecycle, Lifecycle::MatchedExisting);
        assert_eq!(fx.stores.audit.find_by_record(record.id).unwrap()[0].reason, AuditReason::ParcelSplit);
    }

    #[test]
    fn test_repointed_view_retires_replaced_record() {
        let fx = Fixture::new();
        let single = fx.view(RecordKind::Parcel, Field::JurisdictionParcelId, "100", fx.cycle);
        let multi = fx.view(RecordKind::Parcel, Field::JurisdictionParcelId, "100;101", fx.cycle);

        let report =
            split_multi_parcel_views(&fx.stores, fx.org, &ParcelListSplitter::default()).unwrap();
        assert_eq!(report.views_updated, 1);
        assert_eq!(report.views_created, 1);
        assert_eq!(report.records_replaced, 1);
        assert_eq!(report.stats.total(), 2);

        let lifecycle = |id| fx.stores.records.get(id).unwrap().unwrap().lifecycle;
        assert_eq!(lifecycle(single.record_id), Lifecycle::SupersededForDeletion);
        assert_eq!(lifecycle(multi.record_id), Lifecycle::SupersededForDeletion);

        let repointed = fx.stores.views.get(single.id).unwrap().unwrap();
        assert_ne!(repointed.record_id, single.record_id);
        assert!(fx.stores.views.find_by_record(single.record_id).unwrap().is_none());
        assert_eq!(lifecycle(repointed.record_id), Lifecycle::MatchedExisting);
    }

    #[test]
    fn test_superseded_backing_record_stops_the_pass() {
        let fx = Fixture::new();
        let view = fx.view(RecordKind::Parcel, Field::JurisdictionParcelId, "100;101", fx.cycle);
        let mut record = fx.stores.records.get(view.record_id).unwrap().unwrap();
        record.lifecycle = Lifecycle::SupersededForDeletion;
        fx.stores.records.update(record).unwrap();

        let err =
            split_multi_parcel_views(&fx.stores, fx.org, &ParcelListSplitter::default()).unwrap_err();
        assert!(matches!(
            err,
            crate::AssetLinkError::Match(crate::error::MatchError::IllegalTransition { .. })
        ));
        assert!(fx.stores.views.get(view.id).unwrap().is_some());
        assert_eq!(fx.stores.views.list_by_org(fx.org, RecordKind::Parcel).unwrap().len(), 1);
    }

    #[test]
    fn test_malformed_lists_are_left_alone() {
        let fx = Fixture::new();
        let view = fx.view(RecordKind::Parcel, Field::JurisdictionParcelId, "100;[101", fx.cycle);
        let report =
            split_multi_parcel_views(&fx.stores, fx.org, &ParcelListSplitter::default()).unwrap();
        assert_eq!(report.stats.malformed, 1);
        assert_eq!(report.views_split, 0);
        assert!(fx.stores.views.get(view.id).unwrap().is_some());
    }
}
