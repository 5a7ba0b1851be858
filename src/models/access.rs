//! Digital access (entitlement grant) model and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use super::text_column;

/// How the access was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessKind {
    Loan,
    Purchase,
    Subscription,
    Trial,
}

impl AccessKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessKind::Loan => "loan",
            AccessKind::Purchase => "purchase",
            AccessKind::Subscription => "subscription",
            AccessKind::Trial => "trial",
        }
    }
}

impl std::str::FromStr for AccessKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "loan" => Ok(AccessKind::Loan),
            "purchase" => Ok(AccessKind::Purchase),
            "subscription" => Ok(AccessKind::Subscription),
            "trial" => Ok(AccessKind::Trial),
            _ => Err(format!("Invalid access kind: {}", s)),
        }
    }
}

text_column!(AccessKind);

/// Stored lifecycle status.
///
/// `Active` is initial. `Revoked` and `Returned` are terminal. `Expired` is only
/// ever written by the expiry sweeper and never decides validity on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessStatus {
    Active,
    Expired,
    Revoked,
    Returned,
}

impl AccessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessStatus::Active => "active",
            AccessStatus::Expired => "expired",
            AccessStatus::Revoked => "revoked",
            AccessStatus::Returned => "returned",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AccessStatus::Revoked | AccessStatus::Returned)
    }
}

impl std::str::FromStr for AccessStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(AccessStatus::Active),
            "expired" => Ok(AccessStatus::Expired),
            "revoked" => Ok(AccessStatus::Revoked),
            "returned" => Ok(AccessStatus::Returned),
            _ => Err(format!("Invalid access status: {}", s)),
        }
    }
}

text_column!(AccessStatus);

/// Time-boxed right to read a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct DigitalAccess {
    pub id: i64,
    pub user_id: i64,
    pub resource_id: i64,
    pub kind: AccessKind,
    pub status: AccessStatus,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub current_page: i32,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub total_read_seconds: i64,
}

impl DigitalAccess {
    /// Computed validity: `Active` and `now` inside `[start_at, end_at)`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.status == AccessStatus::Active && self.start_at <= now && now < self.end_at
    }
}

/// Row to insert when granting access
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccess {
    pub user_id: i64,
    pub resource_id: i64,
    pub kind: AccessKind,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

/// Grant access request
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GrantAccessRequest {
    pub user_id: i64,
    pub resource_id: i64,
    pub kind: AccessKind,
    #[validate(range(min = 1, message = "requested_days must be at least 1"))]
    pub requested_days: i32,
}

/// Reading progress update
#[derive(Debug, Clone, Copy, Deserialize, Validate)]
pub struct ProgressUpdate {
    #[validate(range(min = 0))]
    pub current_page: i32,
    /// Seconds read since the previous update
    #[validate(range(min = 0))]
    pub read_delta: i64,
}

/// A user's accesses split by computed validity
#[derive(Debug, Clone, Default, Serialize)]
pub struct UserLibrary {
    pub valid: Vec<DigitalAccess>,
    pub inactive: Vec<DigitalAccess>,
}

impl UserLibrary {
    pub fn partition(accesses: Vec<DigitalAccess>, now: DateTime<Utc>) -> Self {
        let (valid, inactive) = accesses.into_iter().partition(|a| a.is_valid_at(now));
        Self { valid, inactive }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn access(status: AccessStatus) -> DigitalAccess {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        DigitalAccess {
            id: 1,
            user_id: 1,
            resource_id: 1,
            kind: AccessKind::Loan,
            status,
            start_at: start,
            end_at: start + Duration::days(14),
            current_page: 0,
            last_accessed_at: None,
            total_read_seconds: 0,
        }
    }

    #[test]
    fn test_validity_window() {
        let a = access(AccessStatus::Active);
        assert!(a.is_valid_at(a.start_at));
        assert!(a.is_valid_at(a.end_at - Duration::seconds(1)));
        assert!(!a.is_valid_at(a.end_at));
        assert!(!a.is_valid_at(a.start_at - Duration::seconds(1)));
    }

    #[test]
    fn test_validity_ignores_non_active_status() {
        let now = access(AccessStatus::Active).start_at + Duration::days(1);
        assert!(!access(AccessStatus::Revoked).is_valid_at(now));
        assert!(!access(AccessStatus::Returned).is_valid_at(now));
        assert!(!access(AccessStatus::Expired).is_valid_at(now));
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("Revoked".parse::<AccessStatus>(), Ok(AccessStatus::Revoked));
        assert_eq!("trial".parse::<AccessKind>(), Ok(AccessKind::Trial));
        assert!("lost".parse::<AccessStatus>().is_err());
        assert!(AccessStatus::Returned.is_terminal());
        assert!(!AccessStatus::Expired.is_terminal());
    }

    #[test]
    fn test_partition_library() {
        let now = access(AccessStatus::Active).start_at + Duration::days(1);
        let mut expired = access(AccessStatus::Active);
        expired.id = 2;
        expired.end_at = now;
        let library = UserLibrary::partition(
            vec![access(AccessStatus::Active), expired, access(AccessStatus::Revoked)],
            now,
        );
        assert_eq!(library.valid.len(), 1);
        assert_eq!(library.inactive.len(), 2);
    }

    #[test]
    fn test_grant_request_validation() {
        let request = GrantAccessRequest {
            user_id: 1,
            resource_id: 1,
            kind: AccessKind::Loan,
            requested_days: 0,
        };
        assert!(request.validate().is_err());
    }
}
