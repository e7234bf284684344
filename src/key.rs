//! Equivalence key specifications.
//!
//! A [`KeySpec`] is one matching rule: an ordered list of field selectors
//! whose normalised values, concatenated, form a record's key under that
//! rule. A [`KeySpecList`] orders rules by priority.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::field::{Field, FieldSelector, FieldValue, RecordKind};
use crate::record::Record;

const KEY_SEPARATOR: char = '\u{1f}';

/// Values treated as "no value" when computing keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholders(HashSet<String>);

impl Placeholders {
    /// Builds a placeholder set; tokens are compared after normalisation.
    #[must_use]
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            tokens
                .into_iter()
                .filter_map(|t| FieldValue::text(t.as_ref()).normalized())
                .collect(),
        )
    }

    #[must_use]
    pub fn contains(&self, normalized: &str) -> bool {
        self.0.contains(normalized)
    }
}

impl Default for Placeholders {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_PLACEHOLDERS)
    }
}

fn extra_component(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => FieldValue::text(s.as_str()).normalized(),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        serde_json::Value::Number(n) => n
            .as_f64()
            .and_then(|f| FieldValue::Number(f).normalized())
            .or_else(|| Some(n.to_string())),
        other => Some(other.to_string()),
    }
}

/// Stable digest over the descriptive content of a record.
///
/// Covers kind, typed values, extra data and ranking dates; ids, batch,
/// lifecycle and timestamps are excluded so exact re-imports collide.
#[must_use]
pub fn content_digest(record: &Record) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(record.kind.to_string().as_bytes());
    for (field, value) in &record.values {
        hasher.update(field.name().as_bytes());
        hasher.update(&[0]);
        if let Ok(bytes) = serde_json::to_vec(value) {
            hasher.update(&bytes);
        }
        hasher.update(&[0]);
    }
    if let Ok(bytes) = serde_json::to_vec(&record.extra) {
        hasher.update(&bytes);
    }
    for date in [&record.release_date, &record.generation_date] {
        hasher.update(&[0]);
        if let Some(d) = date {
            hasher.update(d.trim().as_bytes());
        }
    }
    hasher.finalize().to_hex().to_string()
}

/// Resolves one selector on a record to its normalised keying text.
#[must_use]
pub fn selector_value(
    record: &Record,
    selector: &FieldSelector,
    placeholders: &Placeholders,
) -> Option<String> {
    let raw = match selector {
        FieldSelector::Typed(field) => record.get(*field).and_then(FieldValue::normalized),
        FieldSelector::Extra(key) => record.extra.get(key).and_then(extra_component),
        FieldSelector::ContentDigest => return Some(content_digest(record)),
    }?;
    if placeholders.contains(&raw) {
        None
    } else {
        Some(raw)
    }
}

/// One matching rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeySpec {
    /// Short stable name used in logs and audit descriptions.
    pub name: String,
    pub selectors: Vec<FieldSelector>,
}

impl KeySpec {
    #[must_use]
    pub fn new(name: impl Into<String>, selectors: Vec<FieldSelector>) -> Self {
        Self {
            name: name.into(),
            selectors,
        }
    }

    /// Spec over typed fields, named after them.
    #[must_use]
    pub fn of(fields: &[Field]) -> Self {
        let name = fields
            .iter()
            .map(|f| f.name())
            .collect::<Vec<_>>()
            .join("+");
        Self::new(name, fields.iter().copied().map(FieldSelector::Typed).collect())
    }

    /// Computes the record's key under this spec.
    ///
    /// Returns `None` if any selector is missing, empty or a placeholder.
    #[must_use]
    pub fn key_for(&self, record: &Record, placeholders: &Placeholders) -> Option<String> {
        if self.selectors.is_empty() {
            return None;
        }
        let mut key = String::new();
        for (idx, selector) in self.selectors.iter().enumerate() {
            let part = selector_value(record, selector, placeholders)?;
            if idx > 0 {
                key.push(KEY_SEPARATOR);
            }
            key.push_str(&part);
        }
        Some(key)
    }

    /// Checks that every selector exists on `kind`.
    pub fn validate(&self, kind: RecordKind) -> Result<(), ConfigurationError> {
        if self.selectors.is_empty() {
            return Err(ConfigurationError::EmptyKeySpec {
                spec: self.name.clone(),
            });
        }
        for selector in &self.selectors {
            if let FieldSelector::Typed(field) = selector {
                if !field.applies_to(kind) {
                    return Err(ConfigurationError::UnknownField {
                        spec: self.name.clone(),
                        field: *field,
                        kind,
                    });
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for KeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// The key a record was bucketed under: which spec, and its value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClassKey {
    pub spec_index: usize,
    pub value: String,
}

/// Priority-ordered list of matching rules.
///
/// Empty lists are rejected, including on deserialisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct KeySpecList(Vec<KeySpec>);

impl<'de> Deserialize<'de> for KeySpecList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = Vec::<KeySpec>::deserialize(deserializer)?;
        KeySpecList::new(raw).map_err(serde::de::Error::custom)
    }
}

impl KeySpecList {
    /// Builds a list; empty lists are rejected.
    pub fn new(specs: Vec<KeySpec>) -> Result<Self, ConfigurationError> {
        if specs.is_empty() {
            return Err(ConfigurationError::EmptyKeySpecList);
        }
        Ok(Self(specs))
    }

    /// Default matching rules for a record kind.
    ///
    /// Strong identifiers come first, each tried with the parcel reference
    /// and then alone; address with parcel reference and finally the bare
    /// address are the fallbacks.
    #[must_use]
    pub fn default_for(kind: RecordKind) -> Self {
        let specs = match kind {
            RecordKind::Building => vec![
                KeySpec::of(&[Field::Ubid, Field::LotNumber]),
                KeySpec::of(&[Field::Ubid]),
                KeySpec::of(&[Field::PmPropertyId, Field::LotNumber]),
                KeySpec::of(&[Field::PmPropertyId]),
                KeySpec::of(&[Field::CustomId1, Field::LotNumber]),
                KeySpec::of(&[Field::CustomId1]),
                KeySpec::of(&[Field::AddressLine1, Field::LotNumber]),
                KeySpec::of(&[Field::AddressLine1]),
            ],
            RecordKind::Parcel => vec![
                KeySpec::of(&[Field::JurisdictionParcelId]),
                KeySpec::of(&[Field::Ubid]),
                KeySpec::of(&[Field::CustomId1]),
                KeySpec::of(&[Field::AddressLine1, Field::JurisdictionParcelId]),
                KeySpec::of(&[Field::AddressLine1]),
            ],
        };
        Self(specs)
    }

    /// Single rule keyed on the full content digest (exact duplicates only).
    #[must_use]
    pub fn content_identity() -> Self {
        Self(vec![KeySpec::new(
            "content_digest",
            vec![FieldSelector::ContentDigest],
        )])
    }

    /// Validates every spec against `kind`.
    pub fn validate(&self, kind: RecordKind) -> Result<(), ConfigurationError> {
        self.0.iter().try_for_each(|spec| spec.validate(kind))
    }

    #[must_use]
    pub fn as_slice(&self) -> &[KeySpec] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// First usable key in priority order.
    #[must_use]
    pub fn first_key(&self, record: &Record, placeholders: &Placeholders) -> Option<ClassKey> {
        self.0.iter().enumerate().find_map(|(spec_index, spec)| {
            spec.key_for(record, placeholders)
                .map(|value| ClassKey { spec_index, value })
        })
    }

    /// Every usable key, in priority order.
    #[must_use]
    pub fn all_keys(&self, record: &Record, placeholders: &Placeholders) -> Vec<ClassKey> {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(spec_index, spec)| {
                spec.key_for(record, placeholders)
                    .map(|value| ClassKey { spec_index, value })
            })
            .collect()
    }
}

/// Cross-kind rule linking building Views to parcel Views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipKeySpec {
    /// Field on the building record.
    pub building: Field,
    /// Field on the parcel record.
    pub parcel: Field,
    /// Split the building value into a parcel-id list before comparing.
    #[serde(default = "default_split_list")]
    pub split_list: bool,
}

const fn default_split_list() -> bool {
    true
}

impl RelationshipKeySpec {
    #[must_use]
    pub const fn lot_number() -> Self {
        Self {
            building: Field::LotNumber,
            parcel: Field::JurisdictionParcelId,
            split_list: true,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.building.applies_to(RecordKind::Building)
            && self.parcel.applies_to(RecordKind::Parcel)
        {
            Ok(())
        } else {
            Err(ConfigurationError::InvalidRelationshipSpec {
                building: self.building,
                parcel: self.parcel,
            })
        }
    }
}
