//! Error types for assetlink.
//!
//! All errors in assetlink are strongly typed using thiserror.
//! Fatal conditions abort a batch before any writes; per-record problems
//! (malformed ranking dates, ambiguous matches) are reported through
//! [`crate::engine::BatchSummary`] instead.

use thiserror::Error;

use crate::id::BatchId;
use crate::field::{Field, RecordKind};
use crate::record::{Lifecycle, RecordId};
use crate::storage::StorageError;

/// Configuration errors detected before a batch touches storage.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Key spec '{spec}' references field '{field}' which does not exist on {kind} records")]
    UnknownField {
        spec: String,
        field: Field,
        kind: RecordKind,
    },

    #[error("Key spec '{spec}' has no field selectors")]
    EmptyKeySpec {
        spec: String,
    },

    #[error("Key spec list cannot be empty")]
    EmptyKeySpecList,

    #[error("Relationship key spec pairs '{building}' with '{parcel}', which is not a building/parcel pair")]
    InvalidRelationshipSpec {
        building: Field,
        parcel: Field,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Errors that abort a matching run.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("Batch not found: {id}")]
    BatchNotFound {
        id: BatchId,
    },

    #[error("A matching run for batch {id} is already in progress")]
    ConcurrentRun {
        id: BatchId,
    },

    #[error("Match runtime queue is full (capacity={capacity})")]
    QueueFull {
        capacity: usize,
    },

    #[error("Match runtime worker disconnected")]
    Disconnected,

    #[error("Match run timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Record {record} cannot move from '{from}' to '{to}'")]
    IllegalTransition {
        record: RecordId,
        from: Lifecycle,
        to: Lifecycle,
    },
}

/// Top-level error type for assetlink.
#[derive(Debug, Error)]
pub enum AssetLinkError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Match error: {0}")]
    Match(#[from] MatchError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl AssetLinkError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Returns true if a concurrent run for the same batch was rejected.
    #[must_use]
    pub const fn is_concurrent_run(&self) -> bool {
        matches!(self, Self::Match(MatchError::ConcurrentRun { .. }))
    }

    /// Returns true if this is a storage error.
    #[must_use]
    pub const fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if retrying the same batch later may succeed.
    ///
    /// The pipeline is idempotent from `PendingMatch`, so storage faults and
    /// rejected concurrent runs can simply be re-submitted.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Configuration(_) => false,
            Self::Match(e) => matches!(
                e,
                MatchError::ConcurrentRun { .. }
                    | MatchError::QueueFull { .. }
                    | MatchError::Timeout { .. }
            ),
            Self::Storage(_) => true,
            Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for assetlink operations.
pub type AssetResult<T> = Result<T, AssetLinkError>;
