//! Physical loans repository and inventory ledger

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::loan::PhysicalLoan,
};

use super::{map_unique_violation, InventoryLedger, LoanStore};

#[derive(Clone)]
pub struct LoansRepository {
    pool: Pool<Postgres>,
}

impl LoansRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LoanStore for LoansRepository {
    async fn get_by_id(&self, id: i64) -> AppResult<PhysicalLoan> {
        sqlx::query_as::<_, PhysicalLoan>("SELECT * FROM physical_loans WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Loan with id {} not found", id)))
    }

    async fn get_active_by_pair(&self, resource_id: i64, reader_id: i64) -> AppResult<PhysicalLoan> {
        sqlx::query_as::<_, PhysicalLoan>(
            r#"
            SELECT * FROM physical_loans
            WHERE resource_id = $1 AND reader_id = $2 AND returned_at IS NULL
            "#,
        )
        .bind(resource_id)
        .bind(reader_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "No active loan for resource {} and reader {}",
                resource_id, reader_id
            ))
        })
    }

    async fn count_active_by_reader(&self, reader_id: i64) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM physical_loans WHERE reader_id = $1 AND returned_at IS NULL",
        )
        .bind(reader_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn list_active_by_reader(&self, reader_id: i64) -> AppResult<Vec<PhysicalLoan>> {
        let loans = sqlx::query_as::<_, PhysicalLoan>(
            r#"
            SELECT * FROM physical_loans
            WHERE reader_id = $1 AND returned_at IS NULL
            ORDER BY borrowed_at
            "#,
        )
        .bind(reader_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(loans)
    }
}

#[async_trait]
impl InventoryLedger for LoansRepository {
    async fn checkout(
        &self,
        resource_id: i64,
        reader_id: i64,
        max_active_loans: i64,
        now: DateTime<Utc>,
    ) -> AppResult<PhysicalLoan> {
        let mut tx = self.pool.begin().await?;

        // Row locks are always taken resource first, then reader.
        let copies = sqlx::query_scalar::<_, i32>(
            "SELECT available_copies FROM resources WHERE id = $1 AND archived_at IS NULL FOR UPDATE",
        )
        .bind(resource_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Resource with id {} not found", resource_id)))?;

        if copies <= 0 {
            return Err(AppError::Exhausted(format!(
                "No copies of resource {} left",
                resource_id
            )));
        }

        sqlx::query_scalar::<_, i64>(
            "SELECT id FROM readers WHERE id = $1 AND archived_at IS NULL FOR UPDATE",
        )
        .bind(reader_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Reader with id {} not found", reader_id)))?;

        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM physical_loans WHERE reader_id = $1 AND returned_at IS NULL",
        )
        .bind(reader_id)
        .fetch_one(&mut *tx)
        .await?;

        if active >= max_active_loans {
            return Err(AppError::QuotaExceeded(format!(
                "Maximum physical loans reached ({}/{})",
                active, max_active_loans
            )));
        }

        let already_borrowed: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM physical_loans
                WHERE resource_id = $1 AND reader_id = $2 AND returned_at IS NULL
            )
            "#,
        )
        .bind(resource_id)
        .bind(reader_id)
        .fetch_one(&mut *tx)
        .await?;

        if already_borrowed {
            return Err(AppError::Conflict(format!(
                "Reader {} already borrows resource {}",
                reader_id, resource_id
            )));
        }

        let loan = sqlx::query_as::<_, PhysicalLoan>(
            r#"
            INSERT INTO physical_loans (resource_id, reader_id, borrowed_at)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(resource_id)
        .bind(reader_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_unique_violation(e, "Reader already borrows this resource"))?;

        let decremented = sqlx::query(
            r#"
            UPDATE resources SET available_copies = available_copies - 1
            WHERE id = $1 AND available_copies > 0
            "#,
        )
        .bind(resource_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if decremented == 0 {
            return Err(AppError::Exhausted(format!(
                "No copies of resource {} left",
                resource_id
            )));
        }

        tx.commit().await?;
        Ok(loan)
    }

    async fn checkin(&self, loan_id: i64, now: DateTime<Utc>) -> AppResult<PhysicalLoan> {
        let mut tx = self.pool.begin().await?;

        let returned = sqlx::query_as::<_, PhysicalLoan>(
            r#"
            UPDATE physical_loans SET returned_at = $2
            WHERE id = $1 AND returned_at IS NULL
            RETURNING *
            "#,
        )
        .bind(loan_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let loan = match returned {
            Some(loan) => loan,
            None => {
                let exists: bool =
                    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM physical_loans WHERE id = $1)")
                        .bind(loan_id)
                        .fetch_one(&mut *tx)
                        .await?;
                return Err(if exists {
                    AppError::AlreadyReturned(format!("Loan {} already returned", loan_id))
                } else {
                    AppError::NotFound(format!("Loan with id {} not found", loan_id))
                });
            }
        };

        sqlx::query("UPDATE resources SET available_copies = available_copies + 1 WHERE id = $1")
            .bind(loan.resource_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(loan)
    }
}
