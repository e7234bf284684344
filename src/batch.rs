//! Import batches as registered by the host import pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{BatchId, CycleId, OrgId};

/// An import batch as registered by the host import pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub org: OrgId,
    pub cycle: CycleId,
    pub created_at: DateTime<Utc>,
}

impl Batch {
    /// Registers a new batch for `org` in `cycle`.
    #[must_use]
    pub fn new(org: OrgId, cycle: CycleId) -> Self {
        Self {
            id: BatchId::new(),
            org,
            cycle,
            created_at: Utc::now(),
        }
    }
}
