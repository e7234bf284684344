//! Typed field model for building and parcel records.
//!
//! Every record kind has an enumerated set of known fields plus a free-form
//! JSON extra-data map. Key specs address fields through [`FieldSelector`]
//! rather than attribute-name strings, so a spec that names a field the kind
//! does not carry is rejected before any matching happens.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The two inventory kinds that flow through matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// A building (property) asset.
    Building,
    /// A tax parcel (tax lot).
    Parcel,
}

impl RecordKind {
    /// Both kinds, in the order a batch resolves them.
    pub const ALL: [Self; 2] = [Self::Building, Self::Parcel];
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Building => write!(f, "building"),
            Self::Parcel => write!(f, "parcel"),
        }
    }
}

/// Known typed fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    AddressLine1,
    AddressLine2,
    City,
    PostalCode,
    /// Unique building identifier.
    Ubid,
    /// Portfolio-manager property id (secondary external identifier).
    PmPropertyId,
    CustomId1,
    /// Building-side parcel reference; may hold a delimited list of parcel ids.
    LotNumber,
    /// Parcel-side jurisdiction identifier.
    JurisdictionParcelId,
    PropertyName,
    SiteEui,
    GrossFloorArea,
    YearBuilt,
}

impl Field {
    /// Every known field, in declaration order.
    pub const ALL: [Self; 13] = [
        Self::AddressLine1,
        Self::AddressLine2,
        Self::City,
        Self::PostalCode,
        Self::Ubid,
        Self::PmPropertyId,
        Self::CustomId1,
        Self::LotNumber,
        Self::JurisdictionParcelId,
        Self::PropertyName,
        Self::SiteEui,
        Self::GrossFloorArea,
        Self::YearBuilt,
    ];

    /// Returns true if records of `kind` carry this field.
    #[must_use]
    pub const fn applies_to(self, kind: RecordKind) -> bool {
        match self {
            Self::LotNumber
            | Self::PmPropertyId
            | Self::PropertyName
            | Self::SiteEui
            | Self::GrossFloorArea
            | Self::YearBuilt => matches!(kind, RecordKind::Building),
            Self::JurisdictionParcelId => matches!(kind, RecordKind::Parcel),
            Self::AddressLine1
            | Self::AddressLine2
            | Self::City
            | Self::PostalCode
            | Self::Ubid
            | Self::CustomId1 => true,
        }
    }

    /// Stable snake_case name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::AddressLine1 => "address_line_1",
            Self::AddressLine2 => "address_line_2",
            Self::City => "city",
            Self::PostalCode => "postal_code",
            Self::Ubid => "ubid",
            Self::PmPropertyId => "pm_property_id",
            Self::CustomId1 => "custom_id_1",
            Self::LotNumber => "lot_number",
            Self::JurisdictionParcelId => "jurisdiction_parcel_id",
            Self::PropertyName => "property_name",
            Self::SiteEui => "site_eui",
            Self::GrossFloorArea => "gross_floor_area",
            Self::YearBuilt => "year_built",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A value held by a typed field.
///
/// # Examples
///
/// ```
/// use assetlink::FieldValue;
///
/// let v = FieldValue::text("  742 Evergreen   Terrace ");
/// assert_eq!(v.normalized().as_deref(), Some("742 evergreen terrace"));
/// assert!(FieldValue::Null.normalized().is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Number(f64),
    Bool(bool),
    Null,
}

impl FieldValue {
    /// Convenience constructor for text values.
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Canonical keying form: trimmed, inner whitespace collapsed and
    /// ASCII-lowercased. Returns `None` for `Null`, empty text and
    /// non-finite numbers.
    #[must_use]
    pub fn normalized(&self) -> Option<String> {
        match self {
            Self::Text(v) => {
                let collapsed = v.split_whitespace().collect::<Vec<_>>().join(" ");
                if collapsed.is_empty() {
                    None
                } else {
                    Some(collapsed.to_ascii_lowercase())
                }
            }
            Self::Integer(v) => Some(v.to_string()),
            Self::Number(v) if v.is_finite() => {
                if v.fract() == 0.0 && v.abs() < 1e15 {
                    #[allow(clippy::cast_possible_truncation)]
                    Some((*v as i64).to_string())
                } else {
                    Some(v.to_string())
                }
            }
            Self::Number(_) => None,
            Self::Bool(v) => Some(v.to_string()),
            Self::Null => None,
        }
    }
}

impl Default for FieldValue {
    fn default() -> Self {
        Self::Null
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Addresses one component of a matching key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "name")]
pub enum FieldSelector {
    /// A known typed field.
    Typed(Field),
    /// A key inside the record's extra-data map.
    Extra(String),
    /// Stable digest over all typed values and extra data.
    ContentDigest,
}

impl FieldSelector {
    /// Returns true if the selector can be resolved on records of `kind`.
    #[must_use]
    pub const fn applies_to(&self, kind: RecordKind) -> bool {
        match self {
            Self::Typed(field) => field.applies_to(kind),
            Self::Extra(_) | Self::ContentDigest => true,
        }
    }
}

impl From<Field> for FieldSelector {
    fn from(field: Field) -> Self {
        Self::Typed(field)
    }
}

impl fmt::Display for FieldSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Typed(field) => write!(f, "{field}"),
            Self::Extra(key) => write!(f, "extra:{key}"),
            Self::ContentDigest => write!(f, "content_digest"),
        }
    }
}
