//! Canonical state: entities, their per-cycle views and building/parcel
//! relationships.
//!
//! A [`CanonicalEntity`] is the durable identity of one physical building or
//! parcel. It carries no descriptive data itself; each [`View`] binds it to a
//! single cycle and the merged record describing it in that cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::field::RecordKind;
use crate::id::{CycleId, EntityId, OrgId, ViewId};
use crate::record::RecordId;

/// Durable real-world asset tracked across cycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalEntity {
    pub id: EntityId,
    pub org: OrgId,
    pub kind: RecordKind,
    pub created_at: DateTime<Utc>,
}

impl CanonicalEntity {
    #[must_use]
    pub fn new(org: OrgId, kind: RecordKind) -> Self {
        Self {
            id: EntityId::new(),
            org,
            kind,
            created_at: Utc::now(),
        }
    }
}

/// One entity as observed in one cycle.
///
/// At most one View exists per `(entity, cycle)`; storage enforces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    pub id: ViewId,
    pub entity: EntityId,
    pub org: OrgId,
    pub kind: RecordKind,
    pub cycle: CycleId,

    /// Merged record currently describing the entity in this cycle.
    pub record_id: RecordId,

    pub created_at: DateTime<Utc>,
}

impl View {
    /// Binds `entity` to `cycle` through `record_id`.
    #[must_use]
    pub fn new(entity: &CanonicalEntity, cycle: CycleId, record_id: RecordId) -> Self {
        Self {
            id: ViewId::new(),
            entity: entity.id,
            org: entity.org,
            kind: entity.kind,
            cycle,
            record_id,
            created_at: Utc::now(),
        }
    }
}

/// Link between a building View and a parcel View of the same cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Relationship {
    pub building_view: ViewId,
    pub parcel_view: ViewId,
    pub cycle: CycleId,
}

impl Relationship {
    #[must_use]
    pub const fn new(building_view: ViewId, parcel_view: ViewId, cycle: CycleId) -> Self {
        Self {
            building_view,
            parcel_view,
            cycle,
        }
    }

    /// True if `view` is either end of the relationship.
    #[must_use]
    pub fn touches(&self, view: ViewId) -> bool {
        self.building_view == view || self.parcel_view == view
    }
}
