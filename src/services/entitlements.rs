//! Digital access grants: create, check, revoke, return and track progress

use std::sync::Arc;

use chrono::Duration;
use validator::Validate;

use crate::{
    clock::Clock,
    error::{AppError, AppResult},
    models::access::{
        AccessKind, AccessStatus, DigitalAccess, GrantAccessRequest, NewAccess, ProgressUpdate,
        UserLibrary,
    },
    repository::Repository,
};

use super::quota::QuotaResolver;

#[derive(Clone)]
pub struct EntitlementService {
    repository: Repository,
    quota: QuotaResolver,
    clock: Arc<dyn Clock>,
}

impl EntitlementService {
    pub fn new(repository: Repository, quota: QuotaResolver, clock: Arc<dyn Clock>) -> Self {
        Self {
            repository,
            quota,
            clock,
        }
    }

    /// Grant a time-boxed access.
    ///
    /// Checks, in order: request validity, user and resource existence, the
    /// premium gate, pair uniqueness and the user's quota. The last two are
    /// enforced by the access store atomically with the insert.
    pub async fn grant_access(&self, request: GrantAccessRequest) -> AppResult<DigitalAccess> {
        request.validate()?;
        let now = self.clock.now();

        let user = self.repository.readers.get_by_id(request.user_id).await?;
        let resource = self.repository.resources.get_by_id(request.resource_id).await?;

        if resource.is_premium {
            let qualifies = match self
                .repository
                .subscriptions
                .get_active_by_user(user.id, now)
                .await
            {
                Ok(subscription) => subscription.is_valid_at(now) && subscription.can_access_premium,
                Err(e) if e.is_not_found() => false,
                Err(e) => return Err(e),
            };
            if !qualifies {
                return Err(AppError::PremiumRequired(format!(
                    "Resource {} requires a premium subscription",
                    resource.id
                )));
            }
        }

        let policy = self.quota.resolve(&user, now).await;
        let loan_days = QuotaResolver::cap_loan_days(request.requested_days, &policy);
        let end_at = Duration::try_days(loan_days as i64)
            .and_then(|days| now.checked_add_signed(days))
            .ok_or_else(|| {
                AppError::Validation(format!("requested_days {} is out of range", loan_days))
            })?;

        let access = self
            .repository
            .accesses
            .grant(
                NewAccess {
                    user_id: user.id,
                    resource_id: resource.id,
                    kind: request.kind,
                    start_at: now,
                    end_at,
                },
                policy.max_active_resources as i64,
            )
            .await?;

        tracing::info!(
            "Granted {} access {} on resource {} to user {} for {} days",
            access.kind,
            access.id,
            resource.id,
            user.id,
            loan_days
        );
        Ok(access)
    }

    /// Whether the user may read the resource right now. Never errors.
    pub async fn check_access(&self, user_id: i64, resource_id: i64) -> bool {
        let now = self.clock.now();
        match self
            .repository
            .accesses
            .get_active_by_user_and_resource(user_id, resource_id, now)
            .await
        {
            Ok(access) => access.is_valid_at(now),
            Err(e) => {
                if !e.is_not_found() {
                    tracing::warn!(
                        "Access lookup failed for user {} on resource {}: {}",
                        user_id,
                        resource_id,
                        e
                    );
                }
                false
            }
        }
    }

    /// Revoke an access. Calling it again, or on a returned access, is a no-op.
    pub async fn revoke_access(&self, id: i64) -> AppResult<DigitalAccess> {
        let access = self.repository.accesses.revoke(id).await?;
        tracing::info!("Access {} is now {}", id, access.status);
        Ok(access)
    }

    /// Hand back a loan-kind access before its window ends
    pub async fn return_access(&self, id: i64) -> AppResult<DigitalAccess> {
        let access = self.repository.accesses.get_by_id(id).await?;

        if access.kind != AccessKind::Loan {
            return Err(AppError::Validation(format!(
                "Only loan accesses can be returned, access {} is a {}",
                id, access.kind
            )));
        }
        check_returnable(&access)?;

        let returned = self
            .repository
            .accesses
            .mark_returned(id, self.clock.now())
            .await?;
        if returned.status != AccessStatus::Returned {
            // Revoked between the read and the update
            check_returnable(&returned)?;
            return Err(AppError::Conflict(format!("Access {} could not be returned", id)));
        }

        tracing::info!("Access {} returned by user {}", id, returned.user_id);
        Ok(returned)
    }

    /// Record reading position. The page may move backwards.
    pub async fn update_progress(&self, id: i64, update: ProgressUpdate) -> AppResult<DigitalAccess> {
        update.validate()?;
        self.repository
            .accesses
            .update_progress(id, update.current_page, update.read_delta, self.clock.now())
            .await
    }

    /// All of the user's accesses, split by validity recomputed now
    pub async fn get_user_library(&self, user_id: i64) -> AppResult<UserLibrary> {
        self.repository.readers.get_by_id(user_id).await?;
        let accesses = self.repository.accesses.list_by_user(user_id).await?;
        Ok(UserLibrary::partition(accesses, self.clock.now()))
    }

    pub async fn get_access(&self, id: i64) -> AppResult<DigitalAccess> {
        self.repository.accesses.get_by_id(id).await
    }

    pub fn is_valid(&self, access: &DigitalAccess) -> bool {
        access.is_valid_at(self.clock.now())
    }
}

fn check_returnable(access: &DigitalAccess) -> AppResult<()> {
    match access.status {
        AccessStatus::Returned => Err(AppError::AlreadyReturned(format!(
            "Access {} already returned",
            access.id
        ))),
        AccessStatus::Revoked => Err(AppError::Conflict(format!(
            "Access {} has been revoked",
            access.id
        ))),
        AccessStatus::Active | AccessStatus::Expired => Ok(()),
    }
}
