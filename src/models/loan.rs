//! Physical loan (borrowed copy) model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Hard cap on simultaneously borrowed physical copies, whatever the reader's group
pub const MAX_ACTIVE_PHYSICAL_LOANS: i64 = 3;

/// Borrowed-copy record. Never deleted; `returned_at` is set on return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PhysicalLoan {
    pub id: i64,
    pub resource_id: i64,
    pub reader_id: i64,
    pub borrowed_at: DateTime<Utc>,
    pub returned_at: Option<DateTime<Utc>>,
}

impl PhysicalLoan {
    pub fn is_active(&self) -> bool {
        self.returned_at.is_none()
    }
}

