//! Lendable resources (books) and the readers who borrow them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A lendable title with its physical copy counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Resource {
    pub id: i64,
    pub title: String,
    /// Never negative; only the inventory ledger mutates it
    pub available_copies: i32,
    pub is_premium: bool,
    pub created_at: DateTime<Utc>,
    /// Soft-delete tombstone
    pub archived_at: Option<DateTime<Utc>>,
}

/// A reader (user) account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Reader {
    pub id: i64,
    pub display_name: String,
    pub group_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub archived_at: Option<DateTime<Utc>>,
}

impl Resource {
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }
}

impl Reader {
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }
}
