//! Stable identifiers shared across the matching pipeline.
//!
//! Everything except [`crate::record::RecordId`] is a random UUID; record ids
//! are allocated sequentially because merge tie-breaks order by them.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random ID.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an ID from an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

uuid_id!(
    /// Organization that owns records, entities and priorities.
    OrgId
);

uuid_id!(
    /// Reporting period ("cycle") a batch is imported into.
    CycleId
);

uuid_id!(
    /// One import batch (an imported file after column mapping).
    BatchId
);

uuid_id!(
    /// Canonical entity identifier.
    EntityId
);

uuid_id!(
    /// Identifier of a View (entity bound to one cycle).
    ViewId
);

uuid_id!(
    /// Audit entry identifier.
    AuditId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_display_as_uuid() {
        let a = BatchId::new();
        let b = BatchId::new();
        assert_ne!(a, b);
        assert_eq!(a.to_string(), a.as_uuid().to_string());
    }

    #[test]
    fn test_id_serde_transparent() {
        let id = OrgId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }
}
