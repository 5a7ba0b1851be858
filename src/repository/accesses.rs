//! Digital accesses repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::access::{AccessStatus, DigitalAccess, NewAccess},
};

use super::{map_out_of_range, AccessStore};

#[derive(Clone)]
pub struct AccessesRepository {
    pool: Pool<Postgres>,
}

impl AccessesRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccessStore for AccessesRepository {
    async fn grant(&self, access: NewAccess, max_active: i64) -> AppResult<DigitalAccess> {
        let now = access.start_at;
        let mut tx = self.pool.begin().await?;

        // Locking the user row serializes concurrent grants for that user.
        sqlx::query_scalar::<_, i64>(
            "SELECT id FROM readers WHERE id = $1 AND archived_at IS NULL FOR UPDATE",
        )
        .bind(access.user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User with id {} not found", access.user_id)))?;

        let already_granted: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM digital_accesses
                WHERE user_id = $1 AND resource_id = $2
                  AND status = $3 AND start_at <= $4 AND end_at > $4
            )
            "#,
        )
        .bind(access.user_id)
        .bind(access.resource_id)
        .bind(AccessStatus::Active)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        if already_granted {
            return Err(AppError::Conflict(format!(
                "User {} already has access to resource {}",
                access.user_id, access.resource_id
            )));
        }

        let active: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM digital_accesses
            WHERE user_id = $1 AND status = $2 AND start_at <= $3 AND end_at > $3
            "#,
        )
        .bind(access.user_id)
        .bind(AccessStatus::Active)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        if active >= max_active {
            return Err(AppError::QuotaExceeded(format!(
                "Maximum active resources reached ({}/{})",
                active, max_active
            )));
        }

        let created = sqlx::query_as::<_, DigitalAccess>(
            r#"
            INSERT INTO digital_accesses (user_id, resource_id, kind, status, start_at, end_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(access.user_id)
        .bind(access.resource_id)
        .bind(access.kind)
        .bind(AccessStatus::Active)
        .bind(access.start_at)
        .bind(access.end_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> AppResult<DigitalAccess> {
        sqlx::query_as::<_, DigitalAccess>("SELECT * FROM digital_accesses WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Access with id {} not found", id)))
    }

    async fn get_active_by_user_and_resource(
        &self,
        user_id: i64,
        resource_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<DigitalAccess> {
        sqlx::query_as::<_, DigitalAccess>(
            r#"
            SELECT * FROM digital_accesses
            WHERE user_id = $1 AND resource_id = $2
              AND status = $3 AND start_at <= $4 AND end_at > $4
            ORDER BY end_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(resource_id)
        .bind(AccessStatus::Active)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "No valid access for user {} and resource {}",
                user_id, resource_id
            ))
        })
    }

    async fn count_active_by_user(&self, user_id: i64, now: DateTime<Utc>) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM digital_accesses
            WHERE user_id = $1 AND status = $2 AND start_at <= $3 AND end_at > $3
            "#,
        )
        .bind(user_id)
        .bind(AccessStatus::Active)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn list_by_user(&self, user_id: i64) -> AppResult<Vec<DigitalAccess>> {
        let accesses = sqlx::query_as::<_, DigitalAccess>(
            "SELECT * FROM digital_accesses WHERE user_id = $1 ORDER BY start_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(accesses)
    }

    async fn revoke(&self, id: i64) -> AppResult<DigitalAccess> {
        sqlx::query("UPDATE digital_accesses SET status = $2 WHERE id = $1 AND status IN ($3, $4)")
            .bind(id)
            .bind(AccessStatus::Revoked)
            .bind(AccessStatus::Active)
            .bind(AccessStatus::Expired)
            .execute(&self.pool)
            .await?;

        self.get_by_id(id).await
    }

    async fn mark_returned(&self, id: i64, now: DateTime<Utc>) -> AppResult<DigitalAccess> {
        sqlx::query(
            r#"
            UPDATE digital_accesses SET status = $2, end_at = LEAST(end_at, $3)
            WHERE id = $1 AND status IN ($4, $5)
            "#,
        )
        .bind(id)
        .bind(AccessStatus::Returned)
        .bind(now)
        .bind(AccessStatus::Active)
        .bind(AccessStatus::Expired)
        .execute(&self.pool)
        .await?;

        self.get_by_id(id).await
    }

    async fn update_progress(
        &self,
        id: i64,
        current_page: i32,
        read_delta: i64,
        now: DateTime<Utc>,
    ) -> AppResult<DigitalAccess> {
        sqlx::query_as::<_, DigitalAccess>(
            r#"
            UPDATE digital_accesses
            SET current_page = $2,
                total_read_seconds = total_read_seconds + $3,
                last_accessed_at = $4
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(current_page)
        .bind(read_delta)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_out_of_range(e, "Reading total would overflow"))?
        .ok_or_else(|| AppError::NotFound(format!("Access with id {} not found", id)))
    }

    async fn expire_lapsed(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE digital_accesses SET status = $1 WHERE status = $2 AND end_at <= $3",
        )
        .bind(AccessStatus::Expired)
        .bind(AccessStatus::Active)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
