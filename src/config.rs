//! Engine configuration.
//!
//! Everything is optional in TOML; missing keys take the defaults below.
//!
//! ```toml
//! placeholders = ["", "n/a", "null"]
//! parcel_delimiters = [";", ","]
//! dedup_strategy = "content_identity"
//! parallel_threshold = 5000
//! partition_workers = 4
//!
//! [runtime]
//! workers = 2
//! queue_capacity = 64
//!
//! [[rules.parcel]]
//! name = "jurisdiction_parcel_id"
//! selectors = [{ type = "typed", name = "jurisdiction_parcel_id" }]
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::dedup::DedupStrategy;
use crate::error::ConfigurationError;
use crate::field::RecordKind;
use crate::key::{KeySpecList, Placeholders, RelationshipKeySpec};
use crate::lot::ParcelListSplitter;

/// Values treated as missing when computing keys.
pub const DEFAULT_PLACEHOLDERS: [&str; 6] = ["", "n/a", "na", "none", "null", "-"];

/// Delimiters separating parcel identifiers in a list.
pub const DEFAULT_PARCEL_DELIMITERS: [char; 2] = [';', ','];

/// Matching rules per record kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchRules {
    pub building: KeySpecList,
    pub parcel: KeySpecList,
    pub relationship: RelationshipKeySpec,
}

impl Default for MatchRules {
    fn default() -> Self {
        Self {
            building: KeySpecList::default_for(RecordKind::Building),
            parcel: KeySpecList::default_for(RecordKind::Parcel),
            relationship: RelationshipKeySpec::lot_number(),
        }
    }
}

impl MatchRules {
    /// Rules for `kind`.
    #[must_use]
    pub const fn specs_for(&self, kind: RecordKind) -> &KeySpecList {
        match kind {
            RecordKind::Building => &self.building,
            RecordKind::Parcel => &self.parcel,
        }
    }

    /// Every spec must only name fields of its kind.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.building.validate(RecordKind::Building)?;
        self.parcel.validate(RecordKind::Parcel)?;
        self.relationship.validate()
    }
}

/// Worker pool sizing for [`crate::engine::MatchRuntime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub workers: usize,
    /// Maximum queued batches before `submit` reports the queue as full.
    pub queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 64,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub placeholders: Vec<String>,
    pub parcel_delimiters: Vec<char>,
    pub dedup_strategy: DedupStrategy,
    /// Batches with at least this many records compute keys in parallel.
    pub parallel_threshold: usize,
    pub partition_workers: usize,
    pub runtime: RuntimeConfig,
    pub rules: MatchRules,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            placeholders: DEFAULT_PLACEHOLDERS.iter().map(ToString::to_string).collect(),
            parcel_delimiters: DEFAULT_PARCEL_DELIMITERS.to_vec(),
            dedup_strategy: DedupStrategy::default(),
            parallel_threshold: 10_000,
            partition_workers: 4,
            runtime: RuntimeConfig::default(),
            rules: MatchRules::default(),
        }
    }
}

impl EngineConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigurationError> {
        let config: Self = toml::from_str(input).map_err(|e| ConfigurationError::InvalidConfig {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let input =
            std::fs::read_to_string(path).map_err(|e| ConfigurationError::InvalidConfig {
                reason: format!("cannot read {}: {e}", path.display()),
            })?;
        Self::from_toml_str(&input)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.rules.validate()?;
        self.splitter()?;
        if self.partition_workers == 0 {
            return Err(ConfigurationError::InvalidConfig {
                reason: "partition_workers must be at least 1".to_string(),
            });
        }
        if self.runtime.workers == 0 || self.runtime.queue_capacity == 0 {
            return Err(ConfigurationError::InvalidConfig {
                reason: "runtime workers and queue_capacity must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn placeholder_set(&self) -> Placeholders {
        Placeholders::new(&self.placeholders)
    }

    pub fn splitter(&self) -> Result<ParcelListSplitter, ConfigurationError> {
        ParcelListSplitter::new(&self.parcel_delimiters)
    }

    /// Worker count for a batch of `len` records.
    #[must_use]
    pub const fn workers_for(&self, len: usize) -> usize {
        if len >= self.parallel_threshold {
            self.partition_workers
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Field;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert!(config.placeholder_set().contains("n/a"));
        assert_eq!(config.workers_for(10), 1);
        assert_eq!(config.workers_for(10_000), 4);
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(EngineConfig::from_toml_str("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_partial_toml() {
        let config = EngineConfig::from_toml_str(
            r#"
            dedup_strategy = "match_keys"
            parcel_delimiters = ["|"]

            [runtime]
            workers = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.dedup_strategy, DedupStrategy::MatchKeys);
        assert_eq!(config.parcel_delimiters, vec!['|']);
        assert_eq!(config.runtime.workers, 8);
        assert_eq!(config.runtime.queue_capacity, 64);
    }

    #[test]
    fn test_custom_rules() {
        let config = EngineConfig::from_toml_str(
            r#"
            [[rules.parcel]]
            name = "jurisdiction_parcel_id"
            selectors = [{ type = "typed", name = "jurisdiction_parcel_id" }]

            [[rules.parcel]]
            name = "moniker"
            selectors = [{ type = "extra", name = "moniker" }]
            "#,
        )
        .unwrap();
        assert_eq!(config.rules.parcel.len(), 2);
        assert_eq!(config.rules.building, KeySpecList::default_for(RecordKind::Building));
    }

    #[test]
    fn test_foreign_field_in_rules_is_rejected() {
        let err = EngineConfig::from_toml_str(
            r#"
            [[rules.building]]
            name = "parcel"
            selectors = [{ type = "typed", name = "jurisdiction_parcel_id" }]
            "#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::UnknownField {
                field: Field::JurisdictionParcelId,
                kind: RecordKind::Building,
                ..
            }
        ));
    }

    #[test]
    fn test_empty_rule_list_is_rejected() {
        let err = EngineConfig::from_toml_str("[rules]\nparcel = []\n").unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidConfig { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "partition_workers = 2\nparallel_threshold = 100").unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.workers_for(100), 2);
        assert_eq!(config.workers_for(99), 1);

        assert!(EngineConfig::load(file.path().with_extension("missing")).is_err());
    }
}
