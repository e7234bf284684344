//! Intra-batch deduplication.
//!
//! Splits one batch's records into unique representatives and duplicates.
//! Duplicates are kept (marked superseded) so nothing disappears without a
//! trace.

use serde::{Deserialize, Serialize};

use crate::error::MatchError;
use crate::field::RecordKind;
use crate::key::{KeySpecList, Placeholders};
use crate::partition::EquivalencePartitioner;
use crate::record::{Lifecycle, Record, RecordId};

/// Which equivalence the deduplicator applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupStrategy {
    /// Only records with identical descriptive content collapse.
    #[default]
    ContentIdentity,
    /// Records collapse under the default matching rules of their kind.
    MatchKeys,
}

impl DedupStrategy {
    /// Key spec list realising the strategy for `kind`.
    #[must_use]
    pub fn specs_for(self, kind: RecordKind) -> KeySpecList {
        match self {
            Self::ContentIdentity => KeySpecList::content_identity(),
            Self::MatchKeys => KeySpecList::default_for(kind),
        }
    }
}

/// A duplicate and the representative it collapsed onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DuplicateOf {
    pub duplicate: RecordId,
    pub representative: RecordId,
}

/// Result of a deduplication pass.
#[derive(Debug, Clone, Default)]
pub struct DedupOutcome {
    /// One record per class, in class discovery order.
    pub unique: Vec<Record>,
    /// Every other class member, lifecycle advanced to superseded.
    pub duplicates: Vec<Record>,
    /// Which representative each duplicate collapsed onto.
    pub links: Vec<DuplicateOf>,
}

/// Intra-batch deduplicator.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    partitioner: EquivalencePartitioner,
    workers: usize,
}

impl Deduplicator {
    #[must_use]
    pub fn new(partitioner: EquivalencePartitioner) -> Self {
        Self {
            partitioner,
            workers: 1,
        }
    }

    /// Deduplicator for `kind` under `strategy`.
    #[must_use]
    pub fn for_kind(kind: RecordKind, strategy: DedupStrategy, placeholders: Placeholders) -> Self {
        Self::new(
            EquivalencePartitioner::new(strategy.specs_for(kind)).with_placeholders(placeholders),
        )
    }

    /// Compute keys on `workers` threads.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Splits `records` into unique representatives and duplicates.
    ///
    /// The representative of each class is its first member by input order.
    ///
    /// # Errors
    /// - `IllegalTransition` if a duplicate cannot be superseded
    pub fn dedup(&self, records: Vec<Record>) -> Result<DedupOutcome, MatchError> {
        let classes = self.partitioner.partition_parallel(&records, self.workers);
        let mut slots: Vec<Option<Record>> = records.into_iter().map(Some).collect();
        let mut outcome = DedupOutcome::default();

        for class in classes {
            let mut members = class.members.into_iter();
            let Some(rep_idx) = members.next() else {
                continue;
            };
            let Some(rep) = slots[rep_idx].take() else {
                continue;
            };
            for idx in members {
                let Some(mut dup) = slots[idx].take() else {
                    continue;
                };
                dup.transition(Lifecycle::SupersededForDeletion)?;
                outcome.links.push(DuplicateOf {
                    duplicate: dup.id,
                    representative: rep.id,
                });
                outcome.duplicates.push(dup);
            }
            outcome.unique.push(rep);
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Field;
    use crate::id::{BatchId, OrgId};

    #[test]
    fn test_dedup_exact_copies() {
        let org = OrgId::new();
        let batch = BatchId::new();
        let mut records = Vec::new();
        for _ in 0..10 {
            records.push(
                Record::new(org, batch, RecordKind::Building)
                    .with(Field::AddressLine1, "123 The Same Address"),
            );
        }
        for i in 0..5 {
            records.push(
                Record::new(org, batch, RecordKind::Building)
                    .with(Field::AddressLine1, format!("{i} Other Street"))
                    .with(Field::SiteEui, f64::from(i)),
            );
        }
        let first_id = records[0].id;
        let total = records.len();

        let dedup = Deduplicator::for_kind(
            RecordKind::Building,
            DedupStrategy::ContentIdentity,
            Placeholders::default(),
        );
        let out = dedup.dedup(records).unwrap();

        assert_eq!(out.unique.len(), 6);
        assert_eq!(out.duplicates.len(), 9);
        assert_eq!(out.unique.len() + out.duplicates.len(), total);
        assert_eq!(out.unique[0].id, first_id);
        assert!(out
            .duplicates
            .iter()
            .all(|d| d.lifecycle == Lifecycle::SupersededForDeletion));
        assert!(out.links.iter().all(|l| l.representative == first_id));
    }

    #[test]
    fn test_content_identity_keeps_disagreeing_records() {
        let org = OrgId::new();
        let batch = BatchId::new();
        let records = vec![
            Record::new(org, batch, RecordKind::Building)
                .with(Field::AddressLine1, "123 same address")
                .with(Field::SiteEui, 25.0),
            Record::new(org, batch, RecordKind::Building)
                .with(Field::AddressLine1, "123 same address")
                .with(Field::SiteEui, 150.0),
        ];
        let out = Deduplicator::for_kind(
            RecordKind::Building,
            DedupStrategy::ContentIdentity,
            Placeholders::default(),
        )
        .dedup(records.clone())
        .unwrap();
        assert_eq!(out.unique.len(), 2);

        let out = Deduplicator::for_kind(
            RecordKind::Building,
            DedupStrategy::MatchKeys,
            Placeholders::default(),
        )
        .dedup(records)
        .unwrap();
        assert_eq!(out.unique.len(), 1);
        assert_eq!(out.duplicates.len(), 1);
    }

    #[test]
    fn test_dedup_is_reproducible() {
        let org = OrgId::new();
        let batch = BatchId::new();
        let records: Vec<Record> = (0..20)
            .map(|i| {
                Record::new(org, batch, RecordKind::Parcel)
                    .with(Field::JurisdictionParcelId, format!("{}", i % 7))
            })
            .collect();
        let d = Deduplicator::for_kind(
            RecordKind::Parcel,
            DedupStrategy::MatchKeys,
            Placeholders::default(),
        );
        let a = d.dedup(records.clone()).unwrap();
        let b = d.clone().with_workers(3).dedup(records).unwrap();
        let ids = |o: &DedupOutcome| o.unique.iter().map(|r| r.id).collect::<Vec<_>>();
        assert_eq!(ids(&a), ids(&b));
        assert_eq!(a.unique.len(), 7);
    }

    #[test]
    fn test_matched_duplicate_is_rejected() {
        let org = OrgId::new();
        let batch = BatchId::new();
        let first = Record::new(org, batch, RecordKind::Parcel).with(Field::JurisdictionParcelId, "7");
        let mut second = first.derive_child();
        second.lifecycle = Lifecycle::MatchedNew;

        let err = Deduplicator::for_kind(
            RecordKind::Parcel,
            DedupStrategy::ContentIdentity,
            Placeholders::default(),
        )
        .dedup(vec![first, second])
        .unwrap_err();
        assert!(matches!(err, MatchError::IllegalTransition { from: Lifecycle::MatchedNew, .. }));
    }
}
