//! Reading session tracking

use std::sync::Arc;

use crate::{
    clock::Clock,
    error::{AppError, AppResult},
    models::session::{BookStats, NewSession, ReadingSession},
    repository::Repository,
};

use super::entitlements::EntitlementService;

#[derive(Clone)]
pub struct SessionTracker {
    repository: Repository,
    entitlements: EntitlementService,
    clock: Arc<dyn Clock>,
}

impl SessionTracker {
    pub fn new(repository: Repository, entitlements: EntitlementService, clock: Arc<dyn Clock>) -> Self {
        Self {
            repository,
            entitlements,
            clock,
        }
    }

    /// Open a session on a valid access, closing any session the user still has
    /// open on the same resource. The closed session's duration is credited to its
    /// access. Reading resumes at the access's current page.
    pub async fn start_session(
        &self,
        user_id: i64,
        resource_id: i64,
        access_id: i64,
        device_info: Option<serde_json::Value>,
    ) -> AppResult<ReadingSession> {
        let access = self.entitlements.get_access(access_id).await?;
        if access.user_id != user_id || access.resource_id != resource_id {
            return Err(AppError::Validation(format!(
                "Access {} does not belong to user {} on resource {}",
                access_id, user_id, resource_id
            )));
        }

        let now = self.clock.now();
        if !access.is_valid_at(now) {
            return Err(AppError::AccessExpired(format!(
                "Access {} is no longer valid",
                access_id
            )));
        }

        let started = self
            .repository
            .sessions
            .start(NewSession {
                user_id,
                resource_id,
                access_id,
                device_info,
                started_at: now,
                start_page: access.current_page,
            })
            .await?;

        if let Some(closed) = &started.closed {
            tracing::info!(
                "Auto-closed session {} after {}s for user {} on resource {}",
                closed.id,
                closed.duration_seconds,
                user_id,
                resource_id
            );
        }
        tracing::debug!(
            "Session {} started for user {} on resource {} at page {}",
            started.session.id,
            user_id,
            resource_id,
            started.session.start_page
        );
        Ok(started.session)
    }

    /// Close a session. The session store moves the access to `end_page` and adds
    /// the duration to its reading total in the same unit, so a failure leaves the
    /// session open and the call can be retried.
    pub async fn end_session(&self, id: i64, end_page: i32) -> AppResult<ReadingSession> {
        if end_page < 0 {
            return Err(AppError::Validation("end_page must not be negative".to_string()));
        }

        let session = self
            .repository
            .sessions
            .end(id, end_page, self.clock.now())
            .await?;

        tracing::debug!("Session {} ended after {}s", id, session.duration_seconds);
        Ok(session)
    }

    pub async fn get_book_stats(&self, resource_id: i64) -> AppResult<BookStats> {
        let totals = self.repository.sessions.stats_by_resource(resource_id).await?;
        Ok(BookStats::from(totals))
    }

    pub async fn get_session(&self, id: i64) -> AppResult<ReadingSession> {
        self.repository.sessions.get_by_id(id).await
    }

    pub async fn get_open_session(&self, user_id: i64, resource_id: i64) -> AppResult<ReadingSession> {
        self.repository
            .sessions
            .get_active_by_pair(user_id, resource_id)
            .await
    }
}
