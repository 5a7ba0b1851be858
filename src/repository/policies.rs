//! Group and subscription policies repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::policy::{GroupPolicy, SubscriptionPolicy, SubscriptionStatus},
};

use super::{GroupPolicyStore, SubscriptionStore};

#[derive(Clone)]
pub struct PoliciesRepository {
    pool: Pool<Postgres>,
}

impl PoliciesRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GroupPolicyStore for PoliciesRepository {
    async fn get_by_id(&self, id: i64) -> AppResult<GroupPolicy> {
        sqlx::query_as::<_, GroupPolicy>(
            "SELECT * FROM group_policies WHERE id = $1 AND archived_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Group policy with id {} not found", id)))
    }

    async fn list_all(&self) -> AppResult<Vec<GroupPolicy>> {
        let groups = sqlx::query_as::<_, GroupPolicy>(
            "SELECT * FROM group_policies WHERE archived_at IS NULL ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(groups)
    }
}

#[async_trait]
impl SubscriptionStore for PoliciesRepository {
    async fn get_active_by_user(&self, user_id: i64, now: DateTime<Utc>) -> AppResult<SubscriptionPolicy> {
        sqlx::query_as::<_, SubscriptionPolicy>(
            r#"
            SELECT * FROM subscriptions
            WHERE user_id = $1 AND status = $2 AND end_at > $3
            ORDER BY can_access_premium DESC, max_active_resources DESC, end_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(SubscriptionStatus::Active)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No active subscription for user {}", user_id)))
    }
}
