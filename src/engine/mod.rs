//! Batch matching pipeline.
//!
//! [`MatchEngine::match_batch`] runs one import batch end to end:
//! deduplicate, merge, match against canonical state and link
//! relationships. Every step reads and writes through the [`Stores`] handles
//! so the engine itself holds no canonical state.

mod guard;

/// Worker pool running batches off the caller's thread.
pub mod runtime;

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::dedup::Deduplicator;
use crate::error::{AssetResult, ConfigurationError, MatchError};
use crate::field::RecordKind;
use crate::id::{BatchId, OrgId};
use crate::matcher::{CrossEntityMatcher, MatchOutcome};
use crate::merge::{Merger, PriorityLookup, StaticPriorities};
use crate::partition::EquivalencePartitioner;
use crate::record::{Lifecycle, Record, RecordId, SkipReason, SkippedRecord};
use crate::split::{split_multi_parcel_views, SplitReport};
use crate::storage::Stores;

pub use guard::{BatchGuard, BatchRegistry};
pub use runtime::{MatchRuntime, RunHandle};

/// Per-step counts of one matching run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch: BatchId,
    /// Records that entered dedup (`PendingMatch`).
    pub input: usize,
    pub unique: usize,
    pub duplicate: usize,
    /// Records produced by the merger, pass-throughs included.
    pub merged: usize,
    pub matched_existing: usize,
    pub matched_new: usize,
    /// Merged records that redescribed an entity already in the cycle.
    pub superseded: usize,
    /// Merged records left by an interrupted run and finalised now.
    pub resumed: usize,
    pub relationships_created: usize,
    pub ambiguous: usize,
    /// Records skipped in part or in full, with the reason.
    pub skipped: Vec<SkippedRecord>,
}

impl BatchSummary {
    fn new(batch: BatchId) -> Self {
        Self {
            batch,
            ..Self::default()
        }
    }

    fn absorb(&mut self, outcome: &MatchOutcome) {
        self.matched_existing += outcome.matched_existing;
        self.matched_new += outcome.matched_new;
        self.superseded += outcome.superseded;
        self.ambiguous += outcome.ambiguous;
        self.resumed += outcome.resumed;
    }

    /// Views created by this run.
    #[must_use]
    pub const fn views_created(&self) -> usize {
        self.matched_existing + self.matched_new
    }
}

#[derive(Default)]
struct KindWork {
    pending: Vec<Record>,
    resumable: Vec<Record>,
}

/// Record-matching and merge engine.
#[derive(Clone)]
pub struct MatchEngine {
    stores: Stores,
    priorities: Arc<dyn PriorityLookup>,
    config: EngineConfig,
    registry: BatchRegistry,
}

impl MatchEngine {
    /// Create an engine; the configuration is validated up front so a bad
    /// rule never reaches storage.
    pub fn new(
        stores: Stores,
        priorities: Arc<dyn PriorityLookup>,
        config: EngineConfig,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        Ok(Self {
            stores,
            priorities,
            config,
            registry: BatchRegistry::new(),
        })
    }

    /// Engine with default configuration and no priority overrides.
    #[must_use]
    pub fn with_defaults(stores: Stores) -> Self {
        Self {
            stores,
            priorities: Arc::new(StaticPriorities::new()),
            config: EngineConfig::default(),
            registry: BatchRegistry::new(),
        }
    }

    /// Get a reference to the stores.
    #[must_use]
    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Registry of batches with a run in progress.
    #[must_use]
    pub fn registry(&self) -> &BatchRegistry {
        &self.registry
    }

    /// Replaces every multi-parcel View of `org` with one View per parcel,
    /// using the configured delimiters.
    pub fn split_parcels(&self, org: OrgId) -> AssetResult<SplitReport> {
        let splitter = self.config.splitter()?;
        split_multi_parcel_views(&self.stores, org, &splitter)
    }

    fn matcher(&self) -> AssetResult<CrossEntityMatcher> {
        Ok(CrossEntityMatcher::new(self.stores.clone())
            .with_placeholders(self.config.placeholder_set())
            .with_relationship(self.config.rules.relationship.clone())
            .with_splitter(self.config.splitter()?))
    }

    /// Runs the full pipeline for one batch.
    ///
    /// Safe to re-run: records already matched are left alone, merged
    /// records from an interrupted run are matched without re-merging and
    /// relationship inserts are idempotent.
    ///
    /// # Errors
    /// - `ConcurrentRun` if a run for the batch is already in progress
    /// - `BatchNotFound` if the batch is not registered
    /// - `Storage` on any store failure; the batch can be re-run
    #[tracing::instrument(name = "match_batch", skip_all, fields(batch = %batch_id))]
    pub fn match_batch(&self, batch_id: BatchId) -> AssetResult<BatchSummary> {
        let _guard = self.registry.acquire(batch_id)?;
        let batch = self
            .stores
            .batches
            .get(batch_id)?
            .ok_or(MatchError::BatchNotFound { id: batch_id })?;
        let priorities = self.priorities.field_priorities(batch.org)?;
        let placeholders = self.config.placeholder_set();
        let matcher = self.matcher()?;

        let mut summary = BatchSummary::new(batch_id);
        let mut work = [KindWork::default(), KindWork::default()];
        for record in self.stores.records.list_by_batch(batch_id)? {
            if record.org != batch.org {
                tracing::warn!(record = %record.id, "record belongs to another organization");
                summary.skipped.push(SkippedRecord {
                    record_id: record.id,
                    reason: SkipReason::ForeignOrganization,
                });
                continue;
            }
            let slot = &mut work[kind_slot(record.kind)];
            match record.lifecycle {
                Lifecycle::PendingMatch => slot.pending.push(record),
                Lifecycle::Merged if record.merged_into.is_none() => slot.resumable.push(record),
                Lifecycle::Raw => summary.skipped.push(SkippedRecord {
                    record_id: record.id,
                    reason: SkipReason::UnexpectedLifecycle(record.lifecycle),
                }),
                _ => {}
            }
        }

        for kind in RecordKind::ALL {
            let KindWork { pending, resumable } = std::mem::take(&mut work[kind_slot(kind)]);
            if pending.is_empty() && resumable.is_empty() {
                continue;
            }
            let specs = self.config.rules.specs_for(kind);
            let workers = self.config.workers_for(pending.len());
            summary.input += pending.len();
            let originals: HashSet<RecordId> = pending.iter().map(|r| r.id).collect();

            let dedup = Deduplicator::for_kind(kind, self.config.dedup_strategy, placeholders.clone())
                .with_workers(workers)
                .dedup(pending)?;
            summary.unique += dedup.unique.len();
            summary.duplicate += dedup.duplicates.len();
            tracing::info!(
                %kind,
                unique = dedup.unique.len(),
                duplicate = dedup.duplicates.len(),
                "deduplicated"
            );

            let merger = Merger::new(
                EquivalencePartitioner::new(specs.clone()).with_placeholders(placeholders.clone()),
            )
            .with_workers(workers);
            let merged = merger.merge_all(dedup.unique, &priorities)?;
            summary.merged += merged.merged.len();
            for skipped in &merged.skipped {
                tracing::warn!(record = %skipped.record_id, reason = %skipped.reason, "record kept unmerged");
            }
            summary.skipped.extend(merged.skipped.iter().cloned());
            tracing::info!(
                %kind,
                merged = merged.merged.len(),
                pairwise = merged.pairwise_merges(),
                "merged"
            );

            // New records first, then audit, then the parents they consumed,
            // so an interrupted run never loses a record.
            for record in merged.merged.iter().chain(&merged.retired) {
                if !originals.contains(&record.id) {
                    self.stores.records.insert(record.clone())?;
                }
            }
            for entry in merged.audit {
                self.stores.audit.append(entry)?;
            }
            for record in merged.merged.iter().chain(&merged.retired).chain(&dedup.duplicates) {
                if originals.contains(&record.id) {
                    self.stores.records.update(record.clone())?;
                }
            }

            let mut to_match = resumable;
            to_match.extend(merged.merged);
            let outcome = matcher.match_records(&batch, kind, specs, to_match)?;
            tracing::info!(
                %kind,
                matched_existing = outcome.matched_existing,
                matched_new = outcome.matched_new,
                superseded = outcome.superseded,
                ambiguous = outcome.ambiguous,
                "matched"
            );
            summary.absorb(&outcome);
        }

        let relationships = matcher.link_relationships(&batch)?;
        summary.relationships_created = relationships.created;
        summary.skipped.extend(relationships.skipped);

        tracing::info!(
            input = summary.input,
            views_created = summary.views_created(),
            relationships = summary.relationships_created,
            skipped = summary.skipped.len(),
            "batch matched"
        );
        Ok(summary)
    }
}

const fn kind_slot(kind: RecordKind) -> usize {
    match kind {
        RecordKind::Building => 0,
        RecordKind::Parcel => 1,
    }
}

impl std::fmt::Debug for MatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
