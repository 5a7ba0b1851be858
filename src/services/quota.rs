//! Quota resolution from group and subscription policies

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    models::{policy::QuotaPolicy, resource::Reader},
    repository::{GroupPolicyStore, SubscriptionStore},
};

/// Pure policy lookup. Never fails: any lookup problem means "use the default".
#[derive(Clone)]
pub struct QuotaResolver {
    groups: Arc<dyn GroupPolicyStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
}

impl QuotaResolver {
    pub fn new(groups: Arc<dyn GroupPolicyStore>, subscriptions: Arc<dyn SubscriptionStore>) -> Self {
        Self {
            groups,
            subscriptions,
        }
    }

    /// Effective limits for `reader` at `now`
    pub async fn resolve(&self, reader: &Reader, now: DateTime<Utc>) -> QuotaPolicy {
        let policy = match reader.group_id {
            None => QuotaPolicy::default(),
            Some(group_id) => match self.groups.get_by_id(group_id).await {
                Ok(group) => QuotaPolicy::from(&group),
                Err(e) if e.is_not_found() => {
                    tracing::debug!("Group {} of reader {} not found, using defaults", group_id, reader.id);
                    QuotaPolicy::default()
                }
                Err(e) => {
                    tracing::warn!("Group policy lookup failed for reader {}: {}", reader.id, e);
                    QuotaPolicy::default()
                }
            },
        };

        match self.subscriptions.get_active_by_user(reader.id, now).await {
            Ok(subscription) if subscription.is_valid_at(now) => policy.with_subscription(&subscription),
            Ok(_) => policy,
            Err(e) if e.is_not_found() => policy,
            Err(e) => {
                tracing::warn!("Subscription lookup failed for reader {}: {}", reader.id, e);
                policy
            }
        }
    }

    pub fn cap_loan_days(requested_days: i32, policy: &QuotaPolicy) -> i32 {
        policy.cap_loan_days(requested_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::models::policy::{GroupPolicy, SubscriptionPolicy, SubscriptionStatus};
    use crate::repository::{MockGroupPolicyStore, MockSubscriptionStore};
    use chrono::Duration;

    fn reader(group_id: Option<i64>) -> Reader {
        Reader {
            id: 7,
            display_name: "Ada".to_string(),
            group_id,
            created_at: Utc::now(),
            archived_at: None,
        }
    }

    fn no_subscription() -> MockSubscriptionStore {
        let mut subscriptions = MockSubscriptionStore::new();
        subscriptions
            .expect_get_active_by_user()
            .returning(|id, _| Err(AppError::NotFound(format!("no subscription for {}", id))));
        subscriptions
    }

    #[tokio::test]
    async fn test_group_policy_applies() {
        let mut groups = MockGroupPolicyStore::new();
        groups.expect_get_by_id().withf(|id| *id == 2).returning(|id| {
            Ok(GroupPolicy {
                id,
                name: "students".to_string(),
                max_active_resources: 5,
                max_loan_days: 14,
                can_download: true,
                archived_at: None,
            })
        });
        let resolver = QuotaResolver::new(Arc::new(groups), Arc::new(no_subscription()));

        let policy = resolver.resolve(&reader(Some(2)), Utc::now()).await;
        assert_eq!(policy.max_active_resources, 5);
        assert_eq!(policy.max_loan_days, Some(14));
        assert!(policy.can_download);
        assert_eq!(QuotaResolver::cap_loan_days(30, &policy), 14);
    }

    #[tokio::test]
    async fn test_no_group_uses_default() {
        let mut groups = MockGroupPolicyStore::new();
        groups.expect_get_by_id().never();
        let resolver = QuotaResolver::new(Arc::new(groups), Arc::new(no_subscription()));

        let policy = resolver.resolve(&reader(None), Utc::now()).await;
        assert_eq!(policy, QuotaPolicy::default());
        assert_eq!(QuotaResolver::cap_loan_days(30, &policy), 30);
    }

    #[tokio::test]
    async fn test_lookup_failure_uses_default() {
        let mut groups = MockGroupPolicyStore::new();
        groups
            .expect_get_by_id()
            .returning(|_| Err(AppError::Internal("connection reset".to_string())));
        let mut subscriptions = MockSubscriptionStore::new();
        subscriptions
            .expect_get_active_by_user()
            .returning(|_, _| Err(AppError::Internal("connection reset".to_string())));
        let resolver = QuotaResolver::new(Arc::new(groups), Arc::new(subscriptions));

        let policy = resolver.resolve(&reader(Some(2)), Utc::now()).await;
        assert_eq!(policy.max_active_resources, 3);
        assert_eq!(policy.max_loan_days, None);
    }

    #[tokio::test]
    async fn test_subscription_raises_quota() {
        let now = Utc::now();
        let mut groups = MockGroupPolicyStore::new();
        groups
            .expect_get_by_id()
            .returning(|id| Err(AppError::NotFound(format!("group {}", id))));
        let mut subscriptions = MockSubscriptionStore::new();
        subscriptions.expect_get_active_by_user().returning(move |user_id, _| {
            Ok(SubscriptionPolicy {
                id: 1,
                user_id,
                plan: "reader-plus".to_string(),
                status: SubscriptionStatus::Active,
                max_active_resources: 10,
                can_access_premium: true,
                start_at: now - Duration::days(3),
                end_at: now + Duration::days(27),
            })
        });
        let resolver = QuotaResolver::new(Arc::new(groups), Arc::new(subscriptions));

        let policy = resolver.resolve(&reader(Some(4)), now).await;
        assert_eq!(policy.max_active_resources, 10);
    }
}
