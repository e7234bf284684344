//! Field-priority merge of duplicate records.
//!
//! Unique records are re-partitioned and every class is folded into a single
//! merged record. Members are ordered oldest-first by
//! `(release_date, generation_date, id)` and folded pairwise, so the newest
//! member's values win unless an organization overrides a field to favor the
//! existing value. Every pairwise step produces a fresh record and an audit
//! entry.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::audit::{AuditEntry, AuditReason};
use crate::error::MatchError;
use crate::field::{FieldSelector, RecordKind};
use crate::id::OrgId;
use crate::key::ClassKey;
use crate::partition::EquivalencePartitioner;
use crate::record::{Lifecycle, RankingDates, Record, SkipReason, SkippedRecord};
use crate::storage::StorageError;

/// Which parent wins a disputed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldPriority {
    /// The newer parent's value wins.
    #[default]
    FavorNew,
    /// The older parent's value wins.
    FavorExisting,
}

impl FieldPriority {
    /// Returns a short stable identifier suitable for logging/debugging.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::FavorNew => "favor_new",
            Self::FavorExisting => "favor_existing",
        }
    }
}

/// Per-field merge priorities for one organization.
///
/// Fields without an override favor the newer parent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldPriorities {
    overrides: BTreeMap<FieldSelector, FieldPriority>,
}

impl FieldPriorities {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style override.
    #[must_use]
    pub fn with(mut self, selector: impl Into<FieldSelector>, priority: FieldPriority) -> Self {
        self.overrides.insert(selector.into(), priority);
        self
    }

    #[must_use]
    pub fn get(&self, selector: &FieldSelector) -> FieldPriority {
        self.overrides.get(selector).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }
}

/// Organization priority configuration, owned by the host.
pub trait PriorityLookup: Send + Sync {
    /// Field priorities for `org`; organizations without configuration get
    /// the defaults.
    fn field_priorities(&self, org: OrgId) -> Result<FieldPriorities, StorageError>;
}

/// Thread-safe in-memory priority table.
#[derive(Debug, Default)]
pub struct StaticPriorities {
    by_org: RwLock<HashMap<OrgId, FieldPriorities>>,
}

impl StaticPriorities {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the priorities for `org`.
    pub fn set(&self, org: OrgId, priorities: FieldPriorities) -> Result<(), StorageError> {
        let mut guard = self
            .by_org
            .write()
            .map_err(|_| StorageError::BackendError("poisoned lock: priorities.set".to_string()))?;
        guard.insert(org, priorities);
        Ok(())
    }
}

impl PriorityLookup for StaticPriorities {
    fn field_priorities(&self, org: OrgId) -> Result<FieldPriorities, StorageError> {
        let guard = self
            .by_org
            .read()
            .map_err(|_| StorageError::BackendError("poisoned lock: priorities.get".to_string()))?;
        Ok(guard.get(&org).cloned().unwrap_or_default())
    }
}

/// Newer-first ordering: `Greater` means `a` is newer than `b`.
///
/// Missing dates rank below any present date; record id is the final
/// tie-break.
#[must_use]
pub fn compare_recency(a: (&Record, &RankingDates), b: (&Record, &RankingDates)) -> Ordering {
    a.1.release_date
        .cmp(&b.1.release_date)
        .then_with(|| a.1.generation_date.cmp(&b.1.generation_date))
        .then_with(|| a.0.id.cmp(&b.0.id))
}

fn pick<'a, T>(existing: Option<&'a T>, new: Option<&'a T>, priority: FieldPriority) -> Option<&'a T> {
    match (existing, new, priority) {
        (Some(_), Some(n), FieldPriority::FavorNew) => Some(n),
        (Some(e), Some(_), FieldPriority::FavorExisting) => Some(e),
        (Some(e), None, _) => Some(e),
        (None, n, _) => n,
    }
}

/// Merges two records into a fresh child record.
///
/// `existing` is the older parent and `new` the newer one; callers order
/// them with [`compare_recency`]. Typed fields and extra-data keys are merged
/// as a union, disputed values resolved by `priorities`. Ranking dates follow
/// the newer parent when present.
#[must_use]
pub fn merge_pair(existing: &Record, new: &Record, priorities: &FieldPriorities) -> Record {
    let mut child = new.derive_child();

    child.values.clear();
    let fields = existing.values.keys().chain(new.values.keys());
    for field in fields {
        if child.values.contains_key(field) {
            continue;
        }
        let priority = priorities.get(&FieldSelector::Typed(*field));
        if let Some(value) = pick(existing.values.get(field), new.values.get(field), priority) {
            child.values.insert(*field, value.clone());
        }
    }

    child.extra.clear();
    let keys = existing.extra.keys().chain(new.extra.keys());
    for key in keys {
        if child.extra.contains_key(key) {
            continue;
        }
        let priority = priorities.get(&FieldSelector::Extra(key.clone()));
        if let Some(value) = pick(existing.extra.get(key), new.extra.get(key), priority) {
            child.extra.insert(key.clone(), value.clone());
        }
    }

    child.release_date = new.release_date.clone().or_else(|| existing.release_date.clone());
    child.generation_date = new
        .generation_date
        .clone()
        .or_else(|| existing.generation_date.clone());
    child
}

/// Everything one `merge_all` call produced.
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    /// One record per class (plus skipped members), in class discovery order.
    pub merged: Vec<Record>,
    /// The key that grouped each merged record's class, parallel to `merged`.
    pub keys: Vec<Option<ClassKey>>,
    /// Parents and intermediates consumed by pairwise merges.
    pub retired: Vec<Record>,
    /// One entry per pairwise merge or pass-through.
    pub audit: Vec<AuditEntry>,
    /// Members that could not be ranked and were kept unmerged.
    pub skipped: Vec<SkippedRecord>,
}

impl MergeOutcome {
    /// Number of pairwise merges performed.
    #[must_use]
    pub fn pairwise_merges(&self) -> usize {
        self.audit
            .iter()
            .filter(|e| e.reason == AuditReason::AutomaticMerge)
            .count()
    }
}

/// Collapses equivalence classes of unique records into merged records.
#[derive(Debug, Clone)]
pub struct Merger {
    partitioner: EquivalencePartitioner,
    workers: usize,
}

impl Merger {
    #[must_use]
    pub fn new(partitioner: EquivalencePartitioner) -> Self {
        Self {
            partitioner,
            workers: 1,
        }
    }

    /// Merger over the default matching rules for `kind`.
    #[must_use]
    pub fn default_for(kind: RecordKind) -> Self {
        Self::new(EquivalencePartitioner::default_for(kind))
    }

    /// Compute keys on `workers` threads.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Partitions `unique` and folds each class into one merged record.
    ///
    /// # Errors
    /// - `IllegalTransition` if an input is not `PendingMatch`
    pub fn merge_all(
        &self,
        mut unique: Vec<Record>,
        priorities: &FieldPriorities,
    ) -> Result<MergeOutcome, MatchError> {
        for record in &mut unique {
            record.transition(Lifecycle::Merged)?;
        }
        let classes = self.partitioner.partition_parallel(&unique, self.workers);
        let mut slots: Vec<Option<Record>> = unique.into_iter().map(Some).collect();
        let mut outcome = MergeOutcome::default();

        for class in classes {
            let mut ranked: Vec<(Record, RankingDates)> = Vec::with_capacity(class.len());
            let mut unranked: Vec<Record> = Vec::new();

            for idx in &class.members {
                let Some(record) = slots[*idx].take() else {
                    continue;
                };
                if class.len() == 1 {
                    ranked.push((record, RankingDates::default()));
                    continue;
                }
                match record.ranking_dates() {
                    Ok(dates) => ranked.push((record, dates)),
                    Err(e) => {
                        tracing::warn!(record = %record.id, error = %e, "record kept unmerged");
                        outcome.skipped.push(SkippedRecord {
                            record_id: record.id,
                            reason: SkipReason::MalformedDate(e.to_string()),
                        });
                        unranked.push(record);
                    }
                }
            }

            if let Some(merged) = fold_class(ranked, priorities, &mut outcome) {
                outcome.merged.push(merged);
                outcome.keys.push(class.key.clone());
            }
            for record in unranked {
                let record = pass_through(record, &mut outcome);
                outcome.merged.push(record);
                outcome.keys.push(class.key.clone());
            }
        }

        Ok(outcome)
    }
}

fn pass_through(record: Record, outcome: &mut MergeOutcome) -> Record {
    outcome.audit.push(AuditEntry::new(
        record.org,
        record.id,
        record.id,
        None,
        AuditReason::ImportCreation,
    ));
    record
}

fn fold_class(
    mut ranked: Vec<(Record, RankingDates)>,
    priorities: &FieldPriorities,
    outcome: &mut MergeOutcome,
) -> Option<Record> {
    ranked.sort_by(|a, b| compare_recency((&a.0, &a.1), (&b.0, &b.1)));
    let mut members = ranked.into_iter().map(|(record, _)| record);
    let first = members.next()?;

    let Some(second) = members.next() else {
        return Some(pass_through(first, outcome));
    };

    let mut acc = merge_step(first, second, priorities, outcome);
    for next in members {
        acc = merge_step(acc, next, priorities, outcome);
    }
    Some(acc)
}

fn merge_step(
    mut existing: Record,
    mut new: Record,
    priorities: &FieldPriorities,
    outcome: &mut MergeOutcome,
) -> Record {
    let child = merge_pair(&existing, &new, priorities);
    tracing::debug!(
        existing = %existing.id,
        new = %new.id,
        merged = %child.id,
        "automatic merge"
    );
    outcome.audit.push(AuditEntry::new(
        child.org,
        child.id,
        existing.id,
        Some(new.id),
        AuditReason::AutomaticMerge,
    ));

    for parent in [&mut existing, &mut new] {
        parent.merged_into = Some(child.id);
    }
    outcome.retired.push(existing);
    outcome.retired.push(new);
    child
}
