//! Business logic services

pub mod circulation;
pub mod entitlements;
pub mod policy_cache;
pub mod quota;
pub mod sessions;
pub mod sweeper;

use std::sync::Arc;

use crate::{
    clock::Clock,
    config::{PolicyCacheConfig, SweeperConfig},
    repository::Repository,
};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub policy_cache: Arc<policy_cache::PolicyCache>,
    pub quota: quota::QuotaResolver,
    pub circulation: circulation::CirculationService,
    pub entitlements: entitlements::EntitlementService,
    pub sessions: sessions::SessionTracker,
    pub sweeper: Arc<sweeper::ExpirySweeper>,
}

impl Services {
    /// Wire all services over one repository and clock.
    ///
    /// Quota resolution reads group policies through the cache; everything else
    /// goes straight to the repository.
    pub fn new(
        repository: Repository,
        clock: Arc<dyn Clock>,
        cache_config: &PolicyCacheConfig,
        sweeper_config: &SweeperConfig,
    ) -> Self {
        let policy_cache = Arc::new(policy_cache::PolicyCache::new(
            repository.groups.clone(),
            cache_config.refresh_interval(),
        ));
        let quota = quota::QuotaResolver::new(policy_cache.clone(), repository.subscriptions.clone());
        let entitlements =
            entitlements::EntitlementService::new(repository.clone(), quota.clone(), clock.clone());

        Self {
            policy_cache,
            quota,
            circulation: circulation::CirculationService::new(repository.clone(), clock.clone()),
            sessions: sessions::SessionTracker::new(repository.clone(), entitlements.clone(), clock.clone()),
            entitlements,
            sweeper: Arc::new(sweeper::ExpirySweeper::new(
                repository.accesses,
                clock,
                sweeper_config.interval(),
            )),
        }
    }

    /// Stop background tasks
    pub fn shutdown(&self) {
        self.policy_cache.shutdown();
        self.sweeper.shutdown();
    }
}
