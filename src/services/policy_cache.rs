//! Periodically refreshed group-policy cache
//!
//! The refresh task builds a new snapshot without holding any lock, then swaps it
//! in under a short write lock. Readers clone the current `Arc` under a read lock
//! and never wait on a rebuild. Misses fall through to the backing store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::{
    error::AppResult,
    models::policy::GroupPolicy,
    repository::GroupPolicyStore,
};

type Snapshot = Arc<HashMap<i64, GroupPolicy>>;

pub struct PolicyCache {
    inner: Arc<dyn GroupPolicyStore>,
    snapshot: RwLock<Option<Snapshot>>,
    refresh_interval: Duration,
    cancel: CancellationToken,
}

impl PolicyCache {
    pub fn new(inner: Arc<dyn GroupPolicyStore>, refresh_interval: Duration) -> Self {
        Self {
            inner,
            snapshot: RwLock::new(None),
            refresh_interval,
            cancel: CancellationToken::new(),
        }
    }

    /// Rebuild the snapshot now. Returns the number of cached policies.
    pub async fn refresh(&self) -> AppResult<usize> {
        let groups = self.inner.list_all().await?;
        let snapshot: HashMap<i64, GroupPolicy> = groups.into_iter().map(|g| (g.id, g)).collect();
        let count = snapshot.len();

        *self.snapshot.write().await = Some(Arc::new(snapshot));
        tracing::debug!("Policy cache refreshed with {} group policies", count);
        Ok(count)
    }

    /// Refresh loop; returns once [`PolicyCache::shutdown`] is called
    pub async fn run(self: Arc<Self>) {
        tracing::info!(
            "Policy cache refresher started (every {}s)",
            self.refresh_interval.as_secs()
        );

        let mut interval = tokio::time::interval(self.refresh_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.refresh().await {
                        tracing::warn!("Policy cache refresh failed, keeping previous snapshot: {}", e);
                    }
                }
            }
        }

        tracing::info!("Policy cache refresher stopped");
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    async fn current(&self) -> Option<Snapshot> {
        self.snapshot.read().await.clone()
    }
}

#[async_trait]
impl GroupPolicyStore for PolicyCache {
    async fn get_by_id(&self, id: i64) -> AppResult<GroupPolicy> {
        if let Some(group) = self.current().await.and_then(|s| s.get(&id).cloned()) {
            return Ok(group);
        }
        self.inner.get_by_id(id).await
    }

    async fn list_all(&self) -> AppResult<Vec<GroupPolicy>> {
        match self.current().await {
            Some(snapshot) => {
                let mut groups: Vec<GroupPolicy> = snapshot.values().cloned().collect();
                groups.sort_by_key(|g| g.id);
                Ok(groups)
            }
            None => self.inner.list_all().await,
        }
    }
}
