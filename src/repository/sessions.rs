//! Reading sessions repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Transaction};

use crate::{
    error::{AppError, AppResult},
    models::session::{NewSession, ReadingSession, SessionTotals, StartedSession},
};

use super::{map_out_of_range, map_unique_violation, SessionStore};

#[derive(Clone)]
pub struct SessionsRepository {
    pool: Pool<Postgres>,
}

impl SessionsRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for SessionsRepository {
    async fn start(&self, session: NewSession) -> AppResult<StartedSession> {
        let mut tx = self.pool.begin().await?;

        let closed = sqlx::query_as::<_, ReadingSession>(
            r#"
            UPDATE reading_sessions
            SET ended_at = $3,
                duration_seconds = GREATEST(FLOOR(EXTRACT(EPOCH FROM ($3 - started_at)))::bigint, 0)
            WHERE user_id = $1 AND resource_id = $2 AND ended_at IS NULL
            RETURNING *
            "#,
        )
        .bind(session.user_id)
        .bind(session.resource_id)
        .bind(session.started_at)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(closed) = &closed {
            credit_reading(&mut tx, closed, None).await?;
        }

        let created = sqlx::query_as::<_, ReadingSession>(
            r#"
            INSERT INTO reading_sessions
                (user_id, resource_id, access_id, device_info, started_at, start_page)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(session.user_id)
        .bind(session.resource_id)
        .bind(session.access_id)
        .bind(&session.device_info)
        .bind(session.started_at)
        .bind(session.start_page)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, "A session for this resource is already open"))?;

        tx.commit().await?;
        Ok(StartedSession {
            session: created,
            closed,
        })
    }

    async fn end(&self, id: i64, end_page: i32, now: DateTime<Utc>) -> AppResult<ReadingSession> {
        let mut tx = self.pool.begin().await?;

        let ended = sqlx::query_as::<_, ReadingSession>(
            r#"
            UPDATE reading_sessions
            SET ended_at = $3,
                end_page = $2,
                duration_seconds = GREATEST(FLOOR(EXTRACT(EPOCH FROM ($3 - started_at)))::bigint, 0)
            WHERE id = $1 AND ended_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(end_page)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(session) = ended else {
            tx.rollback().await?;
            // Distinguish a missing session from one already ended
            self.get_by_id(id).await?;
            return Err(AppError::Conflict(format!("Session {} already ended", id)));
        };

        credit_reading(&mut tx, &session, Some(end_page)).await?;

        tx.commit().await?;
        Ok(session)
    }

    async fn get_by_id(&self, id: i64) -> AppResult<ReadingSession> {
        sqlx::query_as::<_, ReadingSession>("SELECT * FROM reading_sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Session with id {} not found", id)))
    }

    async fn get_active_by_pair(&self, user_id: i64, resource_id: i64) -> AppResult<ReadingSession> {
        sqlx::query_as::<_, ReadingSession>(
            r#"
            SELECT * FROM reading_sessions
            WHERE user_id = $1 AND resource_id = $2 AND ended_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(resource_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "No open session for user {} and resource {}",
                user_id, resource_id
            ))
        })
    }

    async fn stats_by_resource(&self, resource_id: i64) -> AppResult<SessionTotals> {
        let totals = sqlx::query_as::<_, SessionTotals>(
            r#"
            SELECT COUNT(DISTINCT user_id)::bigint AS distinct_readers,
                   COUNT(*)::bigint AS total_sessions,
                   COALESCE(SUM(duration_seconds), 0)::bigint AS total_read_seconds
            FROM reading_sessions
            WHERE resource_id = $1 AND ended_at IS NOT NULL
            "#,
        )
        .bind(resource_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(totals)
    }
}

/// Credits a just-closed session to its access inside the caller's transaction.
/// `end_page` also moves the reading position.
async fn credit_reading(
    tx: &mut Transaction<'_, Postgres>,
    session: &ReadingSession,
    end_page: Option<i32>,
) -> AppResult<()> {
    let updated = sqlx::query(
        r#"
        UPDATE digital_accesses
        SET total_read_seconds = total_read_seconds + $2,
            current_page = COALESCE($3, current_page),
            last_accessed_at = $4
        WHERE id = $1
        "#,
    )
    .bind(session.access_id)
    .bind(session.duration_seconds)
    .bind(end_page)
    .bind(session.ended_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_out_of_range(e, "Reading total would overflow"))?
    .rows_affected();

    if updated == 0 {
        return Err(AppError::NotFound(format!(
            "Access with id {} not found",
            session.access_id
        )));
    }
    Ok(())
}
