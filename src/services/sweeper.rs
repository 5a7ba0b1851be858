//! Background reconciliation of stored access status
//!
//! Validity is always recomputed from the access window, so the sweep never
//! changes whether an access may be used. It only brings the stored `status` of
//! lapsed grants in line (`Active -> Expired`) for reporting.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::{clock::Clock, error::AppResult, repository::AccessStore};

pub struct ExpirySweeper {
    accesses: Arc<dyn AccessStore>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    cancel: CancellationToken,
}

impl ExpirySweeper {
    pub fn new(accesses: Arc<dyn AccessStore>, clock: Arc<dyn Clock>, interval: Duration) -> Self {
        Self {
            accesses,
            clock,
            interval,
            cancel: CancellationToken::new(),
        }
    }

    pub async fn sweep_once(&self) -> AppResult<u64> {
        let expired = self.accesses.expire_lapsed(self.clock.now()).await?;
        if expired > 0 {
            tracing::info!("Marked {} lapsed accesses as expired", expired);
        }
        Ok(expired)
    }

    pub async fn run(self: Arc<Self>) {
        tracing::info!("Expiry sweeper started (every {}s)", self.interval.as_secs());

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        tracing::warn!("Expiry sweep failed: {}", e);
                    }
                }
            }
        }

        tracing::info!("Expiry sweeper stopped");
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::repository::MockAccessStore;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn test_sweep_uses_clock() {
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap();
        let mut accesses = MockAccessStore::new();
        accesses
            .expect_expire_lapsed()
            .withf(move |at| *at == now)
            .times(1)
            .returning(|_| Ok(4));

        let sweeper = ExpirySweeper::new(
            Arc::new(accesses),
            Arc::new(ManualClock::new(now)),
            Duration::from_secs(60),
        );
        assert_eq!(sweeper.sweep_once().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let mut accesses = MockAccessStore::new();
        accesses.expect_expire_lapsed().returning(|_| Ok(0));

        let sweeper = Arc::new(ExpirySweeper::new(
            Arc::new(accesses),
            Arc::new(ManualClock::new(Utc::now())),
            Duration::from_secs(3600),
        ));
        let task = tokio::spawn(sweeper.clone().run());
        sweeper.shutdown();

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
