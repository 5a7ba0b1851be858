//! Group and subscription policies, and the quota resolved from them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::text_column;

/// Digital-access ceiling applied when a reader has no group policy
pub const DEFAULT_MAX_ACTIVE_RESOURCES: i32 = 3;

/// Limits attached to a reader cohort
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct GroupPolicy {
    pub id: i64,
    pub name: String,
    pub max_active_resources: i32,
    pub max_loan_days: i32,
    pub can_download: bool,
    pub archived_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Expired,
    Cancelled,
    Pending,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Pending => "pending",
        }
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(SubscriptionStatus::Active),
            "expired" => Ok(SubscriptionStatus::Expired),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            "pending" => Ok(SubscriptionStatus::Pending),
            _ => Err(format!("Invalid subscription status: {}", s)),
        }
    }
}

text_column!(SubscriptionStatus);

/// Paid plan; payment is settled upstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct SubscriptionPolicy {
    pub id: i64,
    pub user_id: i64,
    pub plan: String,
    pub status: SubscriptionStatus,
    pub max_active_resources: i32,
    pub can_access_premium: bool,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

impl SubscriptionPolicy {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active && self.end_at > now
    }
}

/// Effective limits for one reader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaPolicy {
    pub max_active_resources: i32,
    /// `None` leaves the requested duration uncapped
    pub max_loan_days: Option<i32>,
    pub can_download: bool,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            max_active_resources: DEFAULT_MAX_ACTIVE_RESOURCES,
            max_loan_days: None,
            can_download: false,
        }
    }
}

impl From<&GroupPolicy> for QuotaPolicy {
    fn from(group: &GroupPolicy) -> Self {
        Self {
            max_active_resources: group.max_active_resources,
            max_loan_days: Some(group.max_loan_days),
            can_download: group.can_download,
        }
    }
}

impl QuotaPolicy {
    pub fn cap_loan_days(&self, requested_days: i32) -> i32 {
        match self.max_loan_days {
            Some(max) => requested_days.min(max),
            None => requested_days,
        }
    }

    /// Subscriptions may raise the ceiling, never lower it
    pub fn with_subscription(mut self, subscription: &SubscriptionPolicy) -> Self {
        self.max_active_resources = self
            .max_active_resources
            .max(subscription.max_active_resources);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_cap_loan_days() {
        let policy = QuotaPolicy {
            max_active_resources: 5,
            max_loan_days: Some(14),
            can_download: false,
        };
        assert_eq!(policy.cap_loan_days(30), 14);
        assert_eq!(policy.cap_loan_days(7), 7);
        assert_eq!(QuotaPolicy::default().cap_loan_days(30), 30);
    }

    #[test]
    fn test_subscription_never_lowers_quota() {
        let now = Utc::now();
        let mut subscription = SubscriptionPolicy {
            id: 1,
            user_id: 1,
            plan: "basic".to_string(),
            status: SubscriptionStatus::Active,
            max_active_resources: 1,
            can_access_premium: false,
            start_at: now - Duration::days(1),
            end_at: now + Duration::days(30),
        };
        let base = QuotaPolicy::default();
        assert_eq!(base.with_subscription(&subscription).max_active_resources, 3);

        subscription.max_active_resources = 10;
        assert_eq!(base.with_subscription(&subscription).max_active_resources, 10);
    }

    #[test]
    fn test_subscription_validity() {
        let now = Utc::now();
        let subscription = SubscriptionPolicy {
            id: 1,
            user_id: 1,
            plan: "premium".to_string(),
            status: SubscriptionStatus::Cancelled,
            max_active_resources: 10,
            can_access_premium: true,
            start_at: now - Duration::days(1),
            end_at: now + Duration::days(30),
        };
        assert!(!subscription.is_valid_at(now));
        let active = SubscriptionPolicy {
            status: SubscriptionStatus::Active,
            ..subscription
        };
        assert!(active.is_valid_at(now));
        assert!(!active.is_valid_at(active.end_at));
    }
}
