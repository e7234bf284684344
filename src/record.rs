//! Imported records and their lifecycle.
//!
//! A [`Record`] is one description of a building or parcel as it arrived in an
//! import batch, or the product of merging several such descriptions. Merged
//! records are ordinary records in the [`Lifecycle::Merged`] state whose
//! ancestry lives in the audit trail.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::MatchError;
use crate::field::{Field, FieldValue, RecordKind};
use crate::id::{BatchId, OrgId};

static NEXT_RECORD_ID: AtomicU64 = AtomicU64::new(1);

/// Sequential record primary key.
///
/// Allocation order is creation order; the merge tie-break compares ids
/// descending as its last criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(u64);

impl RecordId {
    /// Allocates the next record id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_RECORD_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wraps a host-assigned primary key.
    ///
    /// Later calls to [`RecordId::next`] never return a value at or below
    /// `raw`, so host keys and allocated keys do not collide.
    #[must_use]
    pub fn from_raw(raw: u64) -> Self {
        NEXT_RECORD_ID.fetch_max(raw.saturating_add(1), Ordering::Relaxed);
        Self(raw)
    }

    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a record through the matching pipeline.
///
/// ```text
/// raw -> pending_match -> merged -> matched_existing | matched_new
///                      \-> superseded_for_deletion
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Parsed but not yet column-mapped.
    Raw,
    /// Mapped and waiting for a matching run.
    PendingMatch,
    /// Produced by (or passed through) the merger.
    Merged,
    /// Redundant; excluded from queries and eligible for purge.
    SupersededForDeletion,
    /// Attached to a View of an entity that already existed.
    MatchedExisting,
    /// Attached to a View of a freshly created entity.
    MatchedNew,
}

impl Lifecycle {
    /// Returns true if the lifecycle allows moving to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Raw, Self::PendingMatch)
                | (Self::PendingMatch, Self::Merged)
                | (Self::PendingMatch, Self::SupersededForDeletion)
                | (Self::Merged, Self::SupersededForDeletion)
                | (Self::Merged, Self::MatchedExisting)
                | (Self::Merged, Self::MatchedNew)
        )
    }

    /// A maintenance pass may retire a record whose View it replaced.
    ///
    /// This is the only way out of a matched state.
    #[must_use]
    pub const fn can_retire(self) -> bool {
        matches!(
            self,
            Self::PendingMatch | Self::Merged | Self::MatchedExisting | Self::MatchedNew
        )
    }

    /// Terminal for the matching pipeline; see [`Self::can_retire`].
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::SupersededForDeletion | Self::MatchedExisting | Self::MatchedNew
        )
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::PendingMatch => "pending_match",
            Self::Merged => "merged",
            Self::SupersededForDeletion => "superseded_for_deletion",
            Self::MatchedExisting => "matched_existing",
            Self::MatchedNew => "matched_new",
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A ranking date that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateParseError {
    /// Which ranking date was malformed.
    pub field: &'static str,
    /// The offending text.
    pub value: String,
}

impl fmt::Display for DateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed {} '{}'", self.field, self.value)
    }
}

impl std::error::Error for DateParseError {}

/// Parses a ranking date. Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` and
/// `YYYY-MM-DD`; naive values are taken as UTC.
pub fn parse_ranking_date(
    field: &'static str,
    raw: &str,
) -> Result<DateTime<Utc>, DateParseError> {
    let text = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }
    if let Some(naive) = NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(naive.and_utc());
    }
    Err(DateParseError {
        field,
        value: raw.to_string(),
    })
}

/// Parsed ranking dates of one record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct RankingDates {
    pub release_date: Option<DateTime<Utc>>,
    pub generation_date: Option<DateTime<Utc>>,
}

/// One imported (or merged) building or parcel description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub org: OrgId,
    pub batch: BatchId,
    pub kind: RecordKind,

    #[serde(default)]
    pub values: BTreeMap<Field, FieldValue>,

    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,

    pub lifecycle: Lifecycle,

    /// Set when a pairwise merge consumed this record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_into: Option<RecordId>,

    pub created_at: DateTime<Utc>,

    /// Raw text as imported; parsed only when ranking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_date: Option<String>,
}

impl Record {
    /// Creates an empty mapped record waiting for a matching run.
    #[must_use]
    pub fn new(org: OrgId, batch: BatchId, kind: RecordKind) -> Self {
        Self {
            id: RecordId::next(),
            org,
            batch,
            kind,
            values: BTreeMap::new(),
            extra: serde_json::Map::new(),
            lifecycle: Lifecycle::PendingMatch,
            merged_into: None,
            created_at: Utc::now(),
            release_date: None,
            generation_date: None,
        }
    }

    /// Builder-style setter for a typed field.
    ///
    /// Fields that do not belong to the record's kind are ignored, matching
    /// the column mapper which never produces them.
    #[must_use]
    pub fn with(mut self, field: Field, value: impl Into<FieldValue>) -> Self {
        self.set(field, value);
        self
    }

    /// Builder-style setter for an extra-data entry.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_release_date(mut self, raw: impl Into<String>) -> Self {
        self.release_date = Some(raw.into());
        self
    }

    #[must_use]
    pub fn with_generation_date(mut self, raw: impl Into<String>) -> Self {
        self.generation_date = Some(raw.into());
        self
    }

    /// Sets a typed field. Returns false if the field does not apply to the kind.
    pub fn set(&mut self, field: Field, value: impl Into<FieldValue>) -> bool {
        if !field.applies_to(self.kind) {
            return false;
        }
        let value = value.into();
        if value.is_null() {
            self.values.remove(&field);
        } else {
            self.values.insert(field, value);
        }
        true
    }

    #[must_use]
    pub fn get(&self, field: Field) -> Option<&FieldValue> {
        self.values.get(&field)
    }

    /// Parses both ranking dates.
    pub fn ranking_dates(&self) -> Result<RankingDates, DateParseError> {
        let release_date = self
            .release_date
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(|s| parse_ranking_date("release_date", s))
            .transpose()?;
        let generation_date = self
            .generation_date
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(|s| parse_ranking_date("generation_date", s))
            .transpose()?;
        Ok(RankingDates {
            release_date,
            generation_date,
        })
    }

    /// Clones the descriptive content into a fresh record of the same batch.
    ///
    /// Lifecycle is reset to `Merged`; ancestry is the caller's job.
    #[must_use]
    pub fn derive_child(&self) -> Self {
        Self {
            id: RecordId::next(),
            lifecycle: Lifecycle::Merged,
            merged_into: None,
            created_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Moves the record to `next`.
    ///
    /// # Errors
    /// - `IllegalTransition` if the lifecycle does not allow the move
    pub fn transition(&mut self, next: Lifecycle) -> Result<(), MatchError> {
        if !self.lifecycle.can_transition_to(next) {
            return Err(self.illegal(next));
        }
        self.lifecycle = next;
        Ok(())
    }

    /// Marks the record `SupersededForDeletion` after its View was replaced.
    ///
    /// # Errors
    /// - `IllegalTransition` for raw or already superseded records
    pub fn retire(&mut self) -> Result<(), MatchError> {
        if !self.lifecycle.can_retire() {
            return Err(self.illegal(Lifecycle::SupersededForDeletion));
        }
        self.lifecycle = Lifecycle::SupersededForDeletion;
        Ok(())
    }

    const fn illegal(&self, to: Lifecycle) -> MatchError {
        MatchError::IllegalTransition {
            record: self.id,
            from: self.lifecycle,
            to,
        }
    }

    /// A record that has not been consumed by a merge and is not superseded.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.merged_into.is_none() && self.lifecycle != Lifecycle::SupersededForDeletion
    }
}

/// Why a record was left out of (part of) a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "detail")]
pub enum SkipReason {
    /// A ranking date could not be parsed; the record was kept unmerged.
    MalformedDate(String),
    /// A parcel identifier list could not be split; no relationships were
    /// derived from the record.
    MalformedParcelList(String),
    /// The record belongs to a different organization than its batch.
    ForeignOrganization,
    /// The record's lifecycle does not allow it to enter matching.
    UnexpectedLifecycle(Lifecycle),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedDate(detail) | Self::MalformedParcelList(detail) => {
                write!(f, "{detail}")
            }
            Self::ForeignOrganization => write!(f, "record belongs to another organization"),
            Self::UnexpectedLifecycle(state) => write!(f, "unexpected lifecycle '{state}'"),
        }
    }
}

/// A record that was skipped, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRecord {
    pub record_id: RecordId,
    pub reason: SkipReason,
}
