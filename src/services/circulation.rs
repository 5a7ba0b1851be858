//! Physical lending: borrow and return of fixed-copy resources

use std::sync::Arc;

use crate::{
    clock::Clock,
    error::{AppError, AppResult},
    models::loan::{PhysicalLoan, MAX_ACTIVE_PHYSICAL_LOANS},
    repository::Repository,
};

#[derive(Clone)]
pub struct CirculationService {
    repository: Repository,
    clock: Arc<dyn Clock>,
}

impl CirculationService {
    pub fn new(repository: Repository, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }

    /// Borrow one copy of a resource.
    ///
    /// Availability, the physical-loan cap and pair uniqueness are checked by the
    /// inventory ledger in the same atomic unit that creates the loan and
    /// decrements the counter, so two readers racing for the last copy cannot
    /// both win.
    pub async fn borrow_resource(&self, resource_id: i64, reader_id: i64) -> AppResult<PhysicalLoan> {
        // Verify both exist
        self.repository.resources.get_by_id(resource_id).await?;
        self.repository.readers.get_by_id(reader_id).await?;

        let loan = self
            .repository
            .ledger
            .checkout(resource_id, reader_id, MAX_ACTIVE_PHYSICAL_LOANS, self.clock.now())
            .await?;

        tracing::info!(
            "Reader {} borrowed resource {} (loan {})",
            reader_id,
            resource_id,
            loan.id
        );
        Ok(loan)
    }

    /// Return the reader's active loan on a resource
    pub async fn return_resource(&self, resource_id: i64, reader_id: i64) -> AppResult<PhysicalLoan> {
        let loan = self
            .repository
            .loans
            .get_active_by_pair(resource_id, reader_id)
            .await?;

        if loan.returned_at.is_some() {
            return Err(AppError::AlreadyReturned(format!("Loan {} already returned", loan.id)));
        }

        self.repository.ledger.checkin(loan.id, self.clock.now()).await?;

        tracing::info!(
            "Reader {} returned resource {} (loan {})",
            reader_id,
            resource_id,
            loan.id
        );
        self.repository.loans.get_by_id(loan.id).await
    }

    pub async fn get_active_loans_for_reader(&self, reader_id: i64) -> AppResult<Vec<PhysicalLoan>> {
        self.repository.readers.get_by_id(reader_id).await?;
        self.repository.loans.list_active_by_reader(reader_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::models::resource::{Reader, Resource};
    use crate::repository::{
        MockAccessStore, MockGroupPolicyStore, MockInventoryLedger, MockLoanStore,
        MockReaderStore, MockResourceStore, MockSessionStore, MockSubscriptionStore,
    };
    use chrono::Utc;

    fn resource(id: i64) -> Resource {
        Resource {
            id,
            title: "Dune".to_string(),
            available_copies: 1,
            is_premium: false,
            created_at: Utc::now(),
            archived_at: None,
        }
    }

    fn reader(id: i64) -> Reader {
        Reader {
            id,
            display_name: "Paul".to_string(),
            group_id: None,
            created_at: Utc::now(),
            archived_at: None,
        }
    }

    fn repository(
        resources: MockResourceStore,
        readers: MockReaderStore,
        loans: MockLoanStore,
        ledger: MockInventoryLedger,
    ) -> Repository {
        Repository {
            resources: Arc::new(resources),
            readers: Arc::new(readers),
            loans: Arc::new(loans),
            ledger: Arc::new(ledger),
            accesses: Arc::new(MockAccessStore::new()),
            subscriptions: Arc::new(MockSubscriptionStore::new()),
            groups: Arc::new(MockGroupPolicyStore::new()),
            sessions: Arc::new(MockSessionStore::new()),
        }
    }

    #[tokio::test]
    async fn test_borrow_missing_reader_never_touches_ledger() {
        let mut resources = MockResourceStore::new();
        resources.expect_get_by_id().returning(|id| Ok(resource(id)));
        let mut readers = MockReaderStore::new();
        readers
            .expect_get_by_id()
            .returning(|id| Err(AppError::NotFound(format!("reader {}", id))));
        let mut ledger = MockInventoryLedger::new();
        ledger.expect_checkout().never();

        let service = CirculationService::new(
            repository(resources, readers, MockLoanStore::new(), ledger),
            Arc::new(SystemClock),
        );
        let err = service.borrow_resource(1, 2).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_borrow_passes_fixed_loan_cap() {
        let mut resources = MockResourceStore::new();
        resources.expect_get_by_id().returning(|id| Ok(resource(id)));
        let mut readers = MockReaderStore::new();
        readers.expect_get_by_id().returning(|id| Ok(reader(id)));
        let mut ledger = MockInventoryLedger::new();
        ledger
            .expect_checkout()
            .withf(|resource_id, reader_id, max, _| {
                *resource_id == 1 && *reader_id == 2 && *max == MAX_ACTIVE_PHYSICAL_LOANS
            })
            .times(1)
            .returning(|resource_id, reader_id, _, now| {
                Ok(PhysicalLoan {
                    id: 10,
                    resource_id,
                    reader_id,
                    borrowed_at: now,
                    returned_at: None,
                })
            });

        let service = CirculationService::new(
            repository(resources, readers, MockLoanStore::new(), ledger),
            Arc::new(SystemClock),
        );
        let loan = service.borrow_resource(1, 2).await.unwrap();
        assert_eq!(loan.id, 10);
        assert!(loan.is_active());
    }

    #[tokio::test]
    async fn test_return_without_active_loan() {
        let mut loans = MockLoanStore::new();
        loans
            .expect_get_active_by_pair()
            .returning(|_, _| Err(AppError::NotFound("no active loan".to_string())));
        let mut ledger = MockInventoryLedger::new();
        ledger.expect_checkin().never();

        let service = CirculationService::new(
            repository(MockResourceStore::new(), MockReaderStore::new(), loans, ledger),
            Arc::new(SystemClock),
        );
        assert!(service.return_resource(1, 2).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_return_surfaces_ledger_already_returned() {
        let mut loans = MockLoanStore::new();
        loans.expect_get_active_by_pair().returning(|resource_id, reader_id| {
            Ok(PhysicalLoan {
                id: 5,
                resource_id,
                reader_id,
                borrowed_at: Utc::now(),
                returned_at: None,
            })
        });
        let mut ledger = MockInventoryLedger::new();
        ledger
            .expect_checkin()
            .returning(|id, _| Err(AppError::AlreadyReturned(format!("loan {}", id))));

        let service = CirculationService::new(
            repository(MockResourceStore::new(), MockReaderStore::new(), loans, ledger),
            Arc::new(SystemClock),
        );
        assert!(matches!(
            service.return_resource(1, 2).await,
            Err(AppError::AlreadyReturned(_))
        ));
    }
}
