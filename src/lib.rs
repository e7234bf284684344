//! # assetlink - record matching and merge for building and parcel inventories
//!
//! assetlink turns batches of imported building and tax-parcel records into
//! canonical entities that persist across reporting cycles.
//!
//! ## Core Concepts
//!
//! - **Record**: One imported row, owned by an organization and a batch
//! - **Equivalence class**: Records sharing a matching key
//! - **Canonical entity**: A stable identity for one building or parcel
//! - **View**: An entity's state in one cycle, backed by exactly one record
//! - **Relationship**: A building View linked to a parcel View in one cycle
//! - **Audit entry**: Provenance for every record produced by a merge or match
//!
//! ## Usage
//!
//! ```rust
//! use assetlink::{Batch, CycleId, Field, MatchEngine, OrgId, Record, RecordKind, Stores};
//!
//! let engine = MatchEngine::with_defaults(Stores::in_memory());
//! let batch = Batch::new(OrgId::new(), CycleId::new());
//! engine.stores().batches.insert(batch.clone())?;
//! engine.stores().records.insert(
//!     Record::new(batch.org, batch.id, RecordKind::Building)
//!         .with(Field::AddressLine1, "742 Evergreen Terrace"),
//! )?;
//!
//! let summary = engine.match_batch(batch.id)?;
//! assert_eq!(summary.matched_new, 1);
//! # Ok::<(), assetlink::AssetLinkError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod audit;
pub mod batch;
pub mod entity;
pub mod error;
pub mod field;
pub mod id;
pub mod record;

// Keys and configuration
pub mod config;
pub mod key;
pub mod lot;

// Pipeline
pub mod dedup;
pub mod engine;
pub mod index;
pub mod matcher;
pub mod merge;
pub mod partition;
pub mod split;
pub mod storage;

// Re-export primary types at crate root for convenience
pub use audit::{AuditEntry, AuditReason};
pub use batch::Batch;
pub use config::{EngineConfig, MatchRules, RuntimeConfig};
pub use dedup::{DedupOutcome, DedupStrategy, Deduplicator};
pub use engine::{BatchSummary, MatchEngine, MatchRuntime, RunHandle};
pub use entity::{CanonicalEntity, Relationship, View};
pub use error::{AssetLinkError, AssetResult, ConfigurationError, MatchError};
pub use field::{Field, FieldSelector, FieldValue, RecordKind};
pub use id::{AuditId, BatchId, CycleId, EntityId, OrgId, ViewId};
pub use key::{ClassKey, KeySpec, KeySpecList, Placeholders, RelationshipKeySpec};
pub use lot::{ParcelIdError, ParcelListSplitter};
pub use matcher::CrossEntityMatcher;
pub use merge::{FieldPriorities, FieldPriority, MergeOutcome, Merger, PriorityLookup, StaticPriorities};
pub use partition::{EquivalenceClass, EquivalencePartitioner};
pub use record::{Lifecycle, Record, RecordId, SkipReason, SkippedRecord};
pub use split::{split_multi_parcel_views, SplitReport};
pub use storage::{
    AuditStore, BatchStore, EntityStore, RecordStore, RelationshipStore, StorageError, Stores,
    ViewStore,
};
