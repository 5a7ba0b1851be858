//! In-process implementation of every persistence port
//!
//! All state sits behind one async mutex, so each port method is a single
//! atomic unit. Used for embedding the engine without a database and for tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::{
    error::{AppError, AppResult},
    models::{
        access::{AccessStatus, DigitalAccess, NewAccess},
        loan::PhysicalLoan,
        policy::{GroupPolicy, SubscriptionPolicy},
        resource::{Reader, Resource},
        session::{elapsed_seconds, NewSession, ReadingSession, SessionTotals, StartedSession},
    },
};

use super::{
    AccessStore, GroupPolicyStore, InventoryLedger, LoanStore, ReaderStore, ResourceStore,
    SessionStore, SubscriptionStore,
};

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    resources: BTreeMap<i64, Resource>,
    readers: BTreeMap<i64, Reader>,
    groups: BTreeMap<i64, GroupPolicy>,
    subscriptions: BTreeMap<i64, SubscriptionPolicy>,
    loans: BTreeMap<i64, PhysicalLoan>,
    accesses: BTreeMap<i64, DigitalAccess>,
    sessions: BTreeMap<i64, ReadingSession>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn resource(&self, id: i64) -> AppResult<&Resource> {
        self.resources
            .get(&id)
            .filter(|r| !r.is_archived())
            .ok_or_else(|| AppError::NotFound(format!("Resource with id {} not found", id)))
    }

    fn reader(&self, id: i64) -> AppResult<&Reader> {
        self.readers
            .get(&id)
            .filter(|r| !r.is_archived())
            .ok_or_else(|| AppError::NotFound(format!("Reader with id {} not found", id)))
    }

    fn active_loans(&self, reader_id: i64) -> impl Iterator<Item = &PhysicalLoan> {
        self.loans
            .values()
            .filter(move |l| l.reader_id == reader_id && l.is_active())
    }

    fn valid_accesses(&self, user_id: i64, now: DateTime<Utc>) -> impl Iterator<Item = &DigitalAccess> {
        self.accesses
            .values()
            .filter(move |a| a.user_id == user_id && a.is_valid_at(now))
    }

    fn access_mut(&mut self, id: i64) -> AppResult<&mut DigitalAccess> {
        self.accesses
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Access with id {} not found", id)))
    }
}

/// Adds `read_delta` to the access's reading total. Leaves the access untouched
/// when the total would overflow.
fn add_reading(access: &mut DigitalAccess, read_delta: i64, now: DateTime<Utc>) -> AppResult<()> {
    access.total_read_seconds = access
        .total_read_seconds
        .checked_add(read_delta)
        .ok_or_else(|| {
            AppError::Validation(format!(
                "Reading total of access {} would overflow",
                access.id
            ))
        })?;
    access.last_accessed_at = Some(now);
    Ok(())
}

/// Ends an open session and credits its duration to the access it ran under.
/// `end_page` also moves the access's reading position. Nothing changes unless
/// both updates succeed.
fn close_session(
    state: &mut MemoryState,
    id: i64,
    end_page: Option<i32>,
    now: DateTime<Utc>,
) -> AppResult<ReadingSession> {
    let session = state
        .sessions
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("Session with id {} not found", id)))?;
    let duration_seconds = elapsed_seconds(session.started_at, now);

    let access = state
        .accesses
        .get_mut(&session.access_id)
        .ok_or_else(|| AppError::NotFound(format!("Access with id {} not found", session.access_id)))?;
    add_reading(access, duration_seconds, now)?;
    if let Some(page) = end_page {
        access.current_page = page;
    }

    session.ended_at = Some(now);
    session.duration_seconds = duration_seconds;
    if end_page.is_some() {
        session.end_page = end_page;
    }
    Ok(session.clone())
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_resource(&self, title: &str, available_copies: i32, is_premium: bool) -> Resource {
        let mut state = self.state.lock().await;
        let resource = Resource {
            id: state.next_id(),
            title: title.to_string(),
            available_copies: available_copies.max(0),
            is_premium,
            created_at: Utc::now(),
            archived_at: None,
        };
        state.resources.insert(resource.id, resource.clone());
        resource
    }

    pub async fn add_reader(&self, display_name: &str, group_id: Option<i64>) -> Reader {
        let mut state = self.state.lock().await;
        let reader = Reader {
            id: state.next_id(),
            display_name: display_name.to_string(),
            group_id,
            created_at: Utc::now(),
            archived_at: None,
        };
        state.readers.insert(reader.id, reader.clone());
        reader
    }

    pub async fn add_group_policy(
        &self,
        name: &str,
        max_active_resources: i32,
        max_loan_days: i32,
        can_download: bool,
    ) -> GroupPolicy {
        let mut state = self.state.lock().await;
        let group = GroupPolicy {
            id: state.next_id(),
            name: name.to_string(),
            max_active_resources,
            max_loan_days,
            can_download,
            archived_at: None,
        };
        state.groups.insert(group.id, group.clone());
        group
    }

    /// Stores a subscription; the given `id` is replaced
    pub async fn add_subscription(&self, subscription: SubscriptionPolicy) -> SubscriptionPolicy {
        let mut state = self.state.lock().await;
        let subscription = SubscriptionPolicy {
            id: state.next_id(),
            ..subscription
        };
        state.subscriptions.insert(subscription.id, subscription.clone());
        subscription
    }

    pub async fn archive_resource(&self, id: i64, at: DateTime<Utc>) {
        if let Some(resource) = self.state.lock().await.resources.get_mut(&id) {
            resource.archived_at = Some(at);
        }
    }

    pub async fn archive_reader(&self, id: i64, at: DateTime<Utc>) {
        if let Some(reader) = self.state.lock().await.readers.get_mut(&id) {
            reader.archived_at = Some(at);
        }
    }

    pub async fn archive_group_policy(&self, id: i64, at: DateTime<Utc>) {
        if let Some(group) = self.state.lock().await.groups.get_mut(&id) {
            group.archived_at = Some(at);
        }
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get_by_id(&self, id: i64) -> AppResult<Resource> {
        self.state.lock().await.resource(id).cloned()
    }
}

#[async_trait]
impl ReaderStore for MemoryStore {
    async fn get_by_id(&self, id: i64) -> AppResult<Reader> {
        self.state.lock().await.reader(id).cloned()
    }
}

#[async_trait]
impl LoanStore for MemoryStore {
    async fn get_by_id(&self, id: i64) -> AppResult<PhysicalLoan> {
        self.state
            .lock()
            .await
            .loans
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Loan with id {} not found", id)))
    }

    async fn get_active_by_pair(&self, resource_id: i64, reader_id: i64) -> AppResult<PhysicalLoan> {
        let state = self.state.lock().await;
        let result = state
            .active_loans(reader_id)
            .find(|l| l.resource_id == resource_id)
            .cloned()
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "No active loan for resource {} and reader {}",
                    resource_id, reader_id
                ))
            });
        result
    }

    async fn count_active_by_reader(&self, reader_id: i64) -> AppResult<i64> {
        Ok(self.state.lock().await.active_loans(reader_id).count() as i64)
    }

    async fn list_active_by_reader(&self, reader_id: i64) -> AppResult<Vec<PhysicalLoan>> {
        let state = self.state.lock().await;
        let mut loans: Vec<PhysicalLoan> = state.active_loans(reader_id).cloned().collect();
        loans.sort_by_key(|l| l.borrowed_at);
        Ok(loans)
    }
}

#[async_trait]
impl InventoryLedger for MemoryStore {
    async fn checkout(
        &self,
        resource_id: i64,
        reader_id: i64,
        max_active_loans: i64,
        now: DateTime<Utc>,
    ) -> AppResult<PhysicalLoan> {
        let mut state = self.state.lock().await;

        if state.resource(resource_id)?.available_copies <= 0 {
            return Err(AppError::Exhausted(format!(
                "No copies of resource {} left",
                resource_id
            )));
        }
        state.reader(reader_id)?;

        let active = state.active_loans(reader_id).count() as i64;
        if active >= max_active_loans {
            return Err(AppError::QuotaExceeded(format!(
                "Maximum physical loans reached ({}/{})",
                active, max_active_loans
            )));
        }
        if state
            .active_loans(reader_id)
            .any(|l| l.resource_id == resource_id)
        {
            return Err(AppError::Conflict(format!(
                "Reader {} already borrows resource {}",
                reader_id, resource_id
            )));
        }

        let loan = PhysicalLoan {
            id: state.next_id(),
            resource_id,
            reader_id,
            borrowed_at: now,
            returned_at: None,
        };
        state.loans.insert(loan.id, loan.clone());
        if let Some(resource) = state.resources.get_mut(&resource_id) {
            resource.available_copies -= 1;
        }
        Ok(loan)
    }

    async fn checkin(&self, loan_id: i64, now: DateTime<Utc>) -> AppResult<PhysicalLoan> {
        let mut state = self.state.lock().await;

        let loan = state
            .loans
            .get_mut(&loan_id)
            .ok_or_else(|| AppError::NotFound(format!("Loan with id {} not found", loan_id)))?;
        if !loan.is_active() {
            return Err(AppError::AlreadyReturned(format!(
                "Loan {} already returned",
                loan_id
            )));
        }
        loan.returned_at = Some(now);
        let loan = loan.clone();

        if let Some(resource) = state.resources.get_mut(&loan.resource_id) {
            resource.available_copies += 1;
        }
        Ok(loan)
    }
}

#[async_trait]
impl AccessStore for MemoryStore {
    async fn grant(&self, access: NewAccess, max_active: i64) -> AppResult<DigitalAccess> {
        let now = access.start_at;
        let mut state = self.state.lock().await;

        state.reader(access.user_id)?;
        if state
            .valid_accesses(access.user_id, now)
            .any(|a| a.resource_id == access.resource_id)
        {
            return Err(AppError::Conflict(format!(
                "User {} already has access to resource {}",
                access.user_id, access.resource_id
            )));
        }
        let active = state.valid_accesses(access.user_id, now).count() as i64;
        if active >= max_active {
            return Err(AppError::QuotaExceeded(format!(
                "Maximum active resources reached ({}/{})",
                active, max_active
            )));
        }

        let created = DigitalAccess {
            id: state.next_id(),
            user_id: access.user_id,
            resource_id: access.resource_id,
            kind: access.kind,
            status: AccessStatus::Active,
            start_at: access.start_at,
            end_at: access.end_at,
            current_page: 0,
            last_accessed_at: None,
            total_read_seconds: 0,
        };
        state.accesses.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_by_id(&self, id: i64) -> AppResult<DigitalAccess> {
        self.state.lock().await.access_mut(id).map(|a| a.clone())
    }

    async fn get_active_by_user_and_resource(
        &self,
        user_id: i64,
        resource_id: i64,
        now: DateTime<Utc>,
    ) -> AppResult<DigitalAccess> {
        let state = self.state.lock().await;
        state
            .valid_accesses(user_id, now)
            .filter(|a| a.resource_id == resource_id)
            .max_by_key(|a| a.end_at)
            .cloned()
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "No valid access for user {} and resource {}",
                    user_id, resource_id
                ))
            })
    }

    async fn count_active_by_user(&self, user_id: i64, now: DateTime<Utc>) -> AppResult<i64> {
        Ok(self.state.lock().await.valid_accesses(user_id, now).count() as i64)
    }

    async fn list_by_user(&self, user_id: i64) -> AppResult<Vec<DigitalAccess>> {
        let state = self.state.lock().await;
        let mut accesses: Vec<DigitalAccess> = state
            .accesses
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        accesses.sort_by(|a, b| b.start_at.cmp(&a.start_at));
        Ok(accesses)
    }

    async fn revoke(&self, id: i64) -> AppResult<DigitalAccess> {
        let mut state = self.state.lock().await;
        let access = state.access_mut(id)?;
        if !access.status.is_terminal() {
            access.status = AccessStatus::Revoked;
        }
        Ok(access.clone())
    }

    async fn mark_returned(&self, id: i64, now: DateTime<Utc>) -> AppResult<DigitalAccess> {
        let mut state = self.state.lock().await;
        let access = state.access_mut(id)?;
        if !access.status.is_terminal() {
            access.status = AccessStatus::Returned;
            access.end_at = access.end_at.min(now);
        }
        Ok(access.clone())
    }

    async fn update_progress(
        &self,
        id: i64,
        current_page: i32,
        read_delta: i64,
        now: DateTime<Utc>,
    ) -> AppResult<DigitalAccess> {
        let mut state = self.state.lock().await;
        let access = state.access_mut(id)?;
        add_reading(access, read_delta, now)?;
        access.current_page = current_page;
        Ok(access.clone())
    }

    async fn expire_lapsed(&self, now: DateTime<Utc>) -> AppResult<u64> {
        let mut state = self.state.lock().await;
        let mut touched = 0;
        for access in state.accesses.values_mut() {
            if access.status == AccessStatus::Active && access.end_at <= now {
                access.status = AccessStatus::Expired;
                touched += 1;
            }
        }
        Ok(touched)
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn get_active_by_user(&self, user_id: i64, now: DateTime<Utc>) -> AppResult<SubscriptionPolicy> {
        let state = self.state.lock().await;
        state
            .subscriptions
            .values()
            .filter(|s| s.user_id == user_id && s.is_valid_at(now))
            .max_by_key(|s| (s.can_access_premium, s.max_active_resources, s.end_at))
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("No active subscription for user {}", user_id)))
    }
}

#[async_trait]
impl GroupPolicyStore for MemoryStore {
    async fn get_by_id(&self, id: i64) -> AppResult<GroupPolicy> {
        self.state
            .lock()
            .await
            .groups
            .get(&id)
            .filter(|g| g.archived_at.is_none())
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Group policy with id {} not found", id)))
    }

    async fn list_all(&self) -> AppResult<Vec<GroupPolicy>> {
        Ok(self
            .state
            .lock()
            .await
            .groups
            .values()
            .filter(|g| g.archived_at.is_none())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn start(&self, session: NewSession) -> AppResult<StartedSession> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let now = session.started_at;

        let open_id = state
            .sessions
            .values()
            .find(|s| s.user_id == session.user_id && s.resource_id == session.resource_id && s.is_open())
            .map(|s| s.id);

        let closed = match open_id {
            Some(open_id) => Some(close_session(state, open_id, None, now)?),
            None => None,
        };

        let created = ReadingSession {
            id: state.next_id(),
            user_id: session.user_id,
            resource_id: session.resource_id,
            access_id: session.access_id,
            device_info: session.device_info,
            started_at: now,
            ended_at: None,
            start_page: session.start_page,
            end_page: None,
            duration_seconds: 0,
        };
        state.sessions.insert(created.id, created.clone());
        Ok(StartedSession {
            session: created,
            closed,
        })
    }

    async fn end(&self, id: i64, end_page: i32, now: DateTime<Utc>) -> AppResult<ReadingSession> {
        let mut state = self.state.lock().await;
        let session = state
            .sessions
            .get(&id)
            .ok_or_else(|| AppError::NotFound(format!("Session with id {} not found", id)))?;
        if !session.is_open() {
            return Err(AppError::Conflict(format!("Session {} already ended", id)));
        }
        close_session(&mut state, id, Some(end_page), now)
    }

    async fn get_by_id(&self, id: i64) -> AppResult<ReadingSession> {
        self.state
            .lock()
            .await
            .sessions
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Session with id {} not found", id)))
    }

    async fn get_active_by_pair(&self, user_id: i64, resource_id: i64) -> AppResult<ReadingSession> {
        self.state
            .lock()
            .await
            .sessions
            .values()
            .find(|s| s.user_id == user_id && s.resource_id == resource_id && s.is_open())
            .cloned()
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "No open session for user {} and resource {}",
                    user_id, resource_id
                ))
            })
    }

    async fn stats_by_resource(&self, resource_id: i64) -> AppResult<SessionTotals> {
        let state = self.state.lock().await;
        let sessions: Vec<&ReadingSession> = state
            .sessions
            .values()
            .filter(|s| s.resource_id == resource_id && !s.is_open())
            .collect();

        let mut readers: Vec<i64> = sessions.iter().map(|s| s.user_id).collect();
        readers.sort_unstable();
        readers.dedup();

        Ok(SessionTotals {
            distinct_readers: readers.len() as i64,
            total_sessions: sessions.len() as i64,
            total_read_seconds: sessions.iter().map(|s| s.duration_seconds).sum(),
        })
    }
}
