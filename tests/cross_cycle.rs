//! Canonical entities carried across cycles.

use std::collections::HashSet;

use assetlink::{
    AuditEntry, AuditReason, Batch, CycleId, EntityId, Field, Lifecycle, MatchEngine, OrgId,
    Record, RecordId, RecordKind, Stores, View,
};

struct Org {
    engine: MatchEngine,
    org: OrgId,
}

impl Org {
    fn new() -> Self {
        Self {
            engine: MatchEngine::with_defaults(Stores::in_memory()),
            org: OrgId::new(),
        }
    }

    fn import(&self, cycle: CycleId, buildings: &[&str], parcels: &[&str]) -> Batch {
        let batch = self.load(cycle, buildings, parcels);
        self.engine.match_batch(batch.id).unwrap();
        batch
    }

    fn load(&self, cycle: CycleId, buildings: &[&str], parcels: &[&str]) -> Batch {
        let batch = Batch::new(self.org, cycle);
        let stores = self.engine.stores();
        stores.batches.insert(batch.clone()).unwrap();
        for address in buildings {
            stores
                .records
                .insert(
                    Record::new(self.org, batch.id, RecordKind::Building)
                        .with(Field::AddressLine1, *address),
                )
                .unwrap();
        }
        for id in parcels {
            stores
                .records
                .insert(
                    Record::new(self.org, batch.id, RecordKind::Parcel)
                        .with(Field::JurisdictionParcelId, *id),
                )
                .unwrap();
        }
        batch
    }

    fn entity_of(&self, cycle: CycleId, kind: RecordKind, field: Field, value: &str) -> EntityId {
        let stores = self.engine.stores();
        stores
            .views
            .list_by_cycle(self.org, cycle, kind)
            .unwrap()
            .into_iter()
            .find(|v| {
                let record = stores.records.get(v.record_id).unwrap().unwrap();
                record.get(field).and_then(|f| f.as_text()) == Some(value)
            })
            .map(|v| v.entity)
            .unwrap()
    }

    fn views(&self, entity: EntityId) -> Vec<View> {
        self.engine.stores().views.list_by_entity(entity).unwrap()
    }
}

#[test]
fn entities_keep_one_view_per_cycle() {
    let org = Org::new();
    let first = CycleId::new();
    let second = CycleId::new();

    org.import(
        first,
        &["0 Evergreen Terrace", "1 Evergreen Terrace", "9 Evergreen Terrace"],
        &["100", "101"],
    );
    let batch = org.import(
        second,
        &["0 Evergreen Terrace", "1 Evergreen Terrace", "2 Evergreen Terrace"],
        &["100", "101", "109"],
    );

    let building = |cycle, address| {
        org.entity_of(cycle, RecordKind::Building, Field::AddressLine1, address)
    };
    let parcel = |cycle, id| org.entity_of(cycle, RecordKind::Parcel, Field::JurisdictionParcelId, id);

    for address in ["0 Evergreen Terrace", "1 Evergreen Terrace"] {
        let entity = building(second, address);
        assert_eq!(entity, building(first, address));
        assert_eq!(org.views(entity).len(), 2);
    }
    assert_eq!(org.views(building(second, "2 Evergreen Terrace")).len(), 1);
    assert_eq!(org.views(building(first, "9 Evergreen Terrace")).len(), 1);

    for id in ["100", "101"] {
        assert_eq!(org.views(parcel(second, id)).len(), 2);
    }
    assert_eq!(org.views(parcel(second, "109")).len(), 1);

    let records = org.engine.stores().records.list_by_batch(batch.id).unwrap();
    let existing = records
        .iter()
        .filter(|r| r.lifecycle == Lifecycle::MatchedExisting)
        .count();
    let new = records
        .iter()
        .filter(|r| r.lifecycle == Lifecycle::MatchedNew)
        .count();
    assert_eq!(existing, 4);
    assert_eq!(new, 2);
}

#[test]
fn cross_cycle_match_is_audited() {
    let org = Org::new();
    let first = CycleId::new();
    let second = CycleId::new();
    org.import(first, &["0 Evergreen Terrace"], &[]);
    org.import(second, &["0 Evergreen Terrace"], &[]);

    let entity = org.entity_of(second, RecordKind::Building, Field::AddressLine1, "0 Evergreen Terrace");
    let views = org.views(entity);
    let old = views.iter().find(|v| v.cycle == first).unwrap();
    let new = views.iter().find(|v| v.cycle == second).unwrap();

    // A singleton passes through the merger before it is matched.
    let audit = org.engine.stores().audit.find_by_record(new.record_id).unwrap();
    let reasons: Vec<AuditReason> = audit.iter().map(|e| e.reason).collect();
    assert_eq!(reasons, vec![AuditReason::ImportCreation, AuditReason::SystemMatch]);
    assert!(audit[0].is_creation());
    assert_eq!(audit[1].parent1, old.record_id);

    let children = org.engine.stores().audit.find_by_parent(old.record_id).unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].record_id, new.record_id);
}

#[test]
fn audit_chain_walk_ends_at_pass_through_records() {
    let org = Org::new();
    let first = CycleId::new();
    let second = CycleId::new();
    org.import(first, &["0 Evergreen Terrace"], &[]);

    let batch = Batch::new(org.org, second);
    let stores = org.engine.stores();
    stores.batches.insert(batch.clone()).unwrap();
    let mut originals = HashSet::new();
    for eui in [10.0, 20.0] {
        let record = Record::new(org.org, batch.id, RecordKind::Building)
            .with(Field::AddressLine1, "0 Evergreen Terrace")
            .with(Field::SiteEui, eui);
        originals.insert(record.id);
        stores.records.insert(record).unwrap();
    }
    let summary = org.engine.match_batch(batch.id).unwrap();
    assert_eq!(summary.matched_existing, 1);

    let entity = org.entity_of(second, RecordKind::Building, Field::AddressLine1, "0 Evergreen Terrace");
    let views = org.views(entity);
    let old = views.iter().find(|v| v.cycle == first).unwrap();
    let new = views.iter().find(|v| v.cycle == second).unwrap();

    let mut frontier: Vec<RecordId> = vec![new.record_id];
    let mut seen: HashSet<RecordId> = HashSet::new();
    let mut roots: HashSet<RecordId> = HashSet::new();
    while let Some(id) = frontier.pop() {
        assert!(seen.insert(id), "audit graph revisits {id}");
        let entries = stores.audit.find_by_record(id).unwrap();
        if entries.iter().all(AuditEntry::is_creation) {
            roots.insert(id);
        }
        for entry in entries {
            frontier.extend(entry.parents());
        }
    }

    let mut expected = originals;
    expected.insert(old.record_id);
    assert_eq!(roots, expected);
}

#[test]
fn second_batch_in_the_same_cycle_is_superseded() {
    let org = Org::new();
    let cycle = CycleId::new();
    let first = org.import(cycle, &["0 Evergreen Terrace"], &[]);

    let second = org.load(cycle, &["0 Evergreen Terrace"], &[]);
    let summary = org.engine.match_batch(second.id).unwrap();
    assert_eq!(summary.superseded, 1);
    assert_eq!(summary.views_created(), 0);

    let stores = org.engine.stores();
    let views = stores
        .views
        .list_by_cycle(org.org, cycle, RecordKind::Building)
        .unwrap();
    assert_eq!(views.len(), 1);
    let bound = stores.records.get(views[0].record_id).unwrap().unwrap();
    assert_eq!(bound.batch, first.id);

    let records = stores.records.list_by_batch(second.id).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].lifecycle, Lifecycle::SupersededForDeletion);
    let audit = stores.audit.find_by_record(records[0].id).unwrap();
    let redescribes = audit
        .iter()
        .find(|e| e.reason == AuditReason::SameCycleMatch)
        .unwrap();
    assert_eq!(redescribes.parent1, bound.id);
}

#[test]
fn ambiguous_match_takes_first_spec() {
    let org = Org::new();
    let first = CycleId::new();
    let second = CycleId::new();
    let stores = org.engine.stores();

    // Two entities: one known by ubid, one by address.
    let seed = Batch::new(org.org, first);
    stores.batches.insert(seed.clone()).unwrap();
    stores
        .records
        .insert(Record::new(org.org, seed.id, RecordKind::Building).with(Field::Ubid, "u-1"))
        .unwrap();
    stores
        .records
        .insert(
            Record::new(org.org, seed.id, RecordKind::Building)
                .with(Field::AddressLine1, "3 Fork Rd"),
        )
        .unwrap();
    org.engine.match_batch(seed.id).unwrap();
    let by_ubid = org.entity_of(first, RecordKind::Building, Field::Ubid, "u-1");

    let batch = Batch::new(org.org, second);
    stores.batches.insert(batch.clone()).unwrap();
    stores
        .records
        .insert(
            Record::new(org.org, batch.id, RecordKind::Building)
                .with(Field::Ubid, "u-1")
                .with(Field::AddressLine1, "3 Fork Rd"),
        )
        .unwrap();
    let summary = org.engine.match_batch(batch.id).unwrap();

    assert_eq!(summary.ambiguous, 1);
    assert_eq!(summary.matched_existing, 1);
    assert_eq!(org.views(by_ubid).len(), 2);
}
