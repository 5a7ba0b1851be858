//! Persistence ports and their adapters
//!
//! Each aggregate gets its own capability trait so services can be tested
//! against mocks of exactly the queries they issue. The PostgreSQL adapters live
//! one file per aggregate; [`memory::MemoryStore`] implements every port in
//! process.

pub mod accesses;
pub mod loans;
pub mod memory;
pub mod policies;
pub mod readers;
pub mod resources;
pub mod sessions;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};

use crate::{
    error::{AppError, AppResult},
    models::{
        access::{DigitalAccess, NewAccess},
        loan::PhysicalLoan,
        policy::{GroupPolicy, SubscriptionPolicy},
        resource::{Reader, Resource},
        session::{NewSession, ReadingSession, SessionTotals, StartedSession},
    },
};

/// Resource (book) lookups. Tombstoned rows are `NotFound`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_by_id(&self, id: i64) -> AppResult<Resource>;
}

/// Reader (user) lookups. Tombstoned rows are `NotFound`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReaderStore: Send + Sync {
    async fn get_by_id(&self, id: i64) -> AppResult<Reader>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LoanStore: Send + Sync {
    async fn get_by_id(&self, id: i64) -> AppResult<PhysicalLoan>;
    /// The loan with `returned_at = NULL` for this pair
    async fn get_active_by_pair(&self, resource_id: i64, reader_id: i64) -> AppResult<PhysicalLoan>;
    async fn count_active_by_reader(&self, reader_id: i64) -> AppResult<i64>;
    async fn list_active_by_reader(&self, reader_id: i64) -> AppResult<Vec<PhysicalLoan>>;
}

/// Loan creation and return fused with the copy counter.
///
/// Both operations are a single atomic unit in every implementation: no other
/// borrow or return on the same resource can interleave with them.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InventoryLedger: Send + Sync {
    /// Checks, in order: copies left (`Exhausted`), reader below
    /// `max_active_loans` (`QuotaExceeded`), no active loan on the pair
    /// (`Conflict`). Then inserts the loan and decrements the counter.
    async fn checkout(
        &self,
        resource_id: i64,
        reader_id: i64,
        max_active_loans: i64,
        now: DateTime<Utc>,
    ) -> AppResult<PhysicalLoan>;

    /// Sets `returned_at` and increments the counter. `AlreadyReturned` if the
    /// loan was closed in the meantime.
    async fn checkin(&self, loan_id: i64, now: DateTime<Utc>) -> AppResult<PhysicalLoan>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AccessStore: Send + Sync {
    /// Inserts the access unless the pair already has a valid one (`Conflict`)
    /// or the user holds `max_active` valid accesses (`QuotaExceeded`).
    /// Validity is evaluated at `access.start_at`.
    async fn grant(&self, access: NewAccess, max_active: i64) -> AppResult<DigitalAccess>;
    async fn get_by_id(&self, id: i64) -> AppResult<DigitalAccess>;
    /// The access currently valid at `now` for this pair
    async fn get_active_by_user_and_resource(
        &self,
        user_id: i64,
        resource_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<DigitalAccess>;
    async fn count_active_by_user(&self, user_id: i64, now: DateTime<Utc>) -> AppResult<i64>;
    async fn list_by_user(&self, user_id: i64) -> AppResult<Vec<DigitalAccess>>;
    /// Moves any non-terminal access to `Revoked`; returns the row as stored
    async fn revoke(&self, id: i64) -> AppResult<DigitalAccess>;
    /// Moves a non-terminal access to `Returned`, closing its window at `now`;
    /// returns the row as stored
    async fn mark_returned(&self, id: i64, now: DateTime<Utc>) -> AppResult<DigitalAccess>;
    async fn update_progress(
        &self,
        id: i64,
        current_page: i32,
        read_delta: i64,
        now: DateTime<Utc>,
    ) -> AppResult<DigitalAccess>;
    /// Persists `Active -> Expired` where `end_at <= now`; returns rows touched
    async fn expire_lapsed(&self, now: DateTime<Utc>) -> AppResult<u64>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// The most permissive subscription valid at `now`
    async fn get_active_by_user(&self, user_id: i64, now: DateTime<Utc>) -> AppResult<SubscriptionPolicy>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GroupPolicyStore: Send + Sync {
    async fn get_by_id(&self, id: i64) -> AppResult<GroupPolicy>;
    async fn list_all(&self) -> AppResult<Vec<GroupPolicy>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Closes the open session for the pair at `session.started_at`, if any, then
    /// inserts the new one, atomically.
    ///
    /// The closed session's duration is added to its access's reading total in
    /// the same unit.
    async fn start(&self, session: NewSession) -> AppResult<StartedSession>;
    /// Ends the session and, in the same unit, moves its access to `end_page` and
    /// adds the duration to the access's reading total. `NotFound` if absent,
    /// `Conflict` if already ended. On error nothing changes.
    async fn end(&self, id: i64, end_page: i32, now: DateTime<Utc>) -> AppResult<ReadingSession>;
    async fn get_by_id(&self, id: i64) -> AppResult<ReadingSession>;
    async fn get_active_by_pair(&self, user_id: i64, resource_id: i64) -> AppResult<ReadingSession>;
    /// Totals over ended sessions only
    async fn stats_by_resource(&self, resource_id: i64) -> AppResult<SessionTotals>;
}

/// Every port the services need, behind trait objects
#[derive(Clone)]
pub struct Repository {
    pub resources: Arc<dyn ResourceStore>,
    pub readers: Arc<dyn ReaderStore>,
    pub loans: Arc<dyn LoanStore>,
    pub ledger: Arc<dyn InventoryLedger>,
    pub accesses: Arc<dyn AccessStore>,
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub groups: Arc<dyn GroupPolicyStore>,
    pub sessions: Arc<dyn SessionStore>,
}

impl Repository {
    /// PostgreSQL-backed repository sharing one pool
    pub fn new(pool: Pool<Postgres>) -> Self {
        let loans = Arc::new(loans::LoansRepository::new(pool.clone()));
        let policies = Arc::new(policies::PoliciesRepository::new(pool.clone()));
        Self {
            resources: Arc::new(resources::ResourcesRepository::new(pool.clone())),
            readers: Arc::new(readers::ReadersRepository::new(pool.clone())),
            loans: loans.clone(),
            ledger: loans,
            accesses: Arc::new(accesses::AccessesRepository::new(pool.clone())),
            subscriptions: policies.clone(),
            groups: policies,
            sessions: Arc::new(sessions::SessionsRepository::new(pool)),
        }
    }

    /// In-process repository; all ports share the same state
    pub fn in_memory(store: memory::MemoryStore) -> Self {
        Self {
            resources: Arc::new(store.clone()),
            readers: Arc::new(store.clone()),
            loans: Arc::new(store.clone()),
            ledger: Arc::new(store.clone()),
            accesses: Arc::new(store.clone()),
            subscriptions: Arc::new(store.clone()),
            groups: Arc::new(store.clone()),
            sessions: Arc::new(store),
        }
    }
}

/// Turns a unique-index hit into `Conflict`; other errors pass through
pub(crate) fn map_unique_violation(e: sqlx::Error, message: &str) -> AppError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::Conflict(message.to_string())
        }
        _ => AppError::Database(e),
    }
}

/// Turns a numeric overflow (SQLSTATE 22003) into `Validation`; other errors pass through
pub(crate) fn map_out_of_range(e: sqlx::Error, message: &str) -> AppError {
    match &e {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("22003") => {
            AppError::Validation(message.to_string())
        }
        _ => AppError::Database(e),
    }
}
