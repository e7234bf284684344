//! Merge audit trail.
//!
//! Every record the pipeline produces or links gets an immutable entry naming
//! the one or two parent records it came from, so each automatic decision can
//! be inspected and, in principle, reversed.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{AuditId, OrgId};
use crate::record::RecordId;

/// Why an audit entry was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditReason {
    /// A singleton class passed through the merger unchanged.
    ImportCreation,
    /// Two duplicates were merged pairwise.
    AutomaticMerge,
    /// A merged record was linked to an entity from another cycle.
    SystemMatch,
    /// A multi-parcel record was split into one record per parcel.
    ParcelSplit,
    /// A merged record redescribed an entity already bound in its cycle and
    /// was superseded; the parent is the record backing that View.
    SameCycleMatch,
}

impl AuditReason {
    /// Policy name recorded on the entry.
    #[must_use]
    pub const fn policy_name(self) -> &'static str {
        match self {
            Self::ImportCreation => "Import Creation",
            Self::AutomaticMerge | Self::SystemMatch | Self::SameCycleMatch => "System Match",
            Self::ParcelSplit => "Parcel Split",
        }
    }

    /// Default human-readable description.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::ImportCreation => "Imported record passed through merge",
            Self::AutomaticMerge => "Automatic Merge",
            Self::SystemMatch => "Matched to existing entity across cycles",
            Self::ParcelSplit => "Split from multi-parcel record",
            Self::SameCycleMatch => "Superseded by a record already in this cycle",
        }
    }
}

impl fmt::Display for AuditReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Immutable audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditId,
    pub org: OrgId,

    /// The record produced or linked by this decision.
    pub record_id: RecordId,

    pub parent1: RecordId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent2: Option<RecordId>,

    pub reason: AuditReason,
    pub policy_name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Entry with the reason's default policy name and description.
    #[must_use]
    pub fn new(
        org: OrgId,
        record_id: RecordId,
        parent1: RecordId,
        parent2: Option<RecordId>,
        reason: AuditReason,
    ) -> Self {
        Self {
            id: AuditId::new(),
            org,
            record_id,
            parent1,
            parent2,
            reason,
            policy_name: reason.policy_name().to_string(),
            description: reason.description().to_string(),
            created_at: Utc::now(),
        }
    }

    /// Parents in order, without the optional slot.
    ///
    /// A pass-through entry names its own record as `parent1`; that slot is
    /// not a parent, so walks over the graph always terminate.
    #[must_use]
    pub fn parents(&self) -> Vec<RecordId> {
        std::iter::once(self.parent1)
            .chain(self.parent2)
            .filter(|id| *id != self.record_id)
            .collect()
    }

    /// True if `id` is one of this entry's parents.
    #[must_use]
    pub fn has_parent(&self, id: RecordId) -> bool {
        id != self.record_id && (self.parent1 == id || self.parent2 == Some(id))
    }

    /// A pass-through entry with no parent of its own.
    #[must_use]
    pub fn is_creation(&self) -> bool {
        self.parents().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_automatic_merge_entry() {
        let (a, b, m) = (RecordId::next(), RecordId::next(), RecordId::next());
        let entry = AuditEntry::new(OrgId::new(), m, a, Some(b), AuditReason::AutomaticMerge);
        assert_eq!(entry.description, "Automatic Merge");
        assert_eq!(entry.policy_name, "System Match");
        assert_eq!(entry.parents(), vec![a, b]);
        assert!(entry.has_parent(b));
        assert!(!entry.has_parent(m));
    }

    #[test]
    fn test_passthrough_entry_has_no_parent() {
        let r = RecordId::next();
        let entry = AuditEntry::new(OrgId::new(), r, r, None, AuditReason::ImportCreation);
        assert_eq!(entry.parent1, r);
        assert!(entry.parents().is_empty());
        assert!(!entry.has_parent(r));
        assert!(entry.is_creation());
        let json = serde_json::to_value(&entry).unwrap();
        assert!(json.get("parent2").is_none());
    }
}
