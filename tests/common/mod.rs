//! Shared fixtures for the in-memory integration tests

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use elidune_circulation::{
    clock::ManualClock,
    config::{PolicyCacheConfig, SweeperConfig},
    repository::{memory::MemoryStore, Repository},
    services::Services,
};

pub struct Harness {
    pub store: MemoryStore,
    pub clock: Arc<ManualClock>,
    pub services: Services,
}

pub fn harness() -> Harness {
    let store = MemoryStore::new();
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
    ));
    let services = Services::new(
        Repository::in_memory(store.clone()),
        clock.clone(),
        &PolicyCacheConfig {
            refresh_interval_secs: 60,
        },
        &SweeperConfig {
            enabled: true,
            interval_secs: 60,
        },
    );
    Harness {
        store,
        clock,
        services,
    }
}

impl Harness {
    pub fn clock_now(&self) -> chrono::DateTime<Utc> {
        use elidune_circulation::clock::Clock;
        self.clock.now()
    }
}
