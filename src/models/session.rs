//! Reading session model and per-book statistics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ReadingSession {
    pub id: i64,
    pub user_id: i64,
    pub resource_id: i64,
    pub access_id: i64,
    pub device_info: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub start_page: i32,
    pub end_page: Option<i32>,
    pub duration_seconds: i64,
}

impl ReadingSession {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Row to insert when a session starts
#[derive(Debug, Clone, PartialEq)]
pub struct NewSession {
    pub user_id: i64,
    pub resource_id: i64,
    pub access_id: i64,
    pub device_info: Option<serde_json::Value>,
    pub started_at: DateTime<Utc>,
    pub start_page: i32,
}

/// Result of starting a session: the auto-closed predecessor, if any
#[derive(Debug, Clone, PartialEq)]
pub struct StartedSession {
    pub session: ReadingSession,
    pub closed: Option<ReadingSession>,
}

/// Raw aggregates as stored
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromRow)]
pub struct SessionTotals {
    pub distinct_readers: i64,
    pub total_sessions: i64,
    pub total_read_seconds: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BookStats {
    pub distinct_readers: i64,
    pub total_sessions: i64,
    pub total_read_seconds: i64,
    pub avg_read_seconds: f64,
}

impl From<SessionTotals> for BookStats {
    fn from(totals: SessionTotals) -> Self {
        let avg_read_seconds = if totals.total_sessions == 0 {
            0.0
        } else {
            totals.total_read_seconds as f64 / totals.total_sessions as f64
        };
        Self {
            distinct_readers: totals.distinct_readers,
            total_sessions: totals.total_sessions,
            total_read_seconds: totals.total_read_seconds,
            avg_read_seconds,
        }
    }
}

/// Whole seconds between two instants, clamped at zero
pub fn elapsed_seconds(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_seconds().max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_average_guarded_on_zero_sessions() {
        let stats = BookStats::from(SessionTotals::default());
        assert_eq!(stats.avg_read_seconds, 0.0);
    }

    #[test]
    fn test_average() {
        let stats = BookStats::from(SessionTotals {
            distinct_readers: 2,
            total_sessions: 4,
            total_read_seconds: 600,
        });
        assert_eq!(stats.avg_read_seconds, 150.0);
    }

    #[test]
    fn test_elapsed_seconds_clamped() {
        let now = Utc::now();
        assert_eq!(elapsed_seconds(now, now + Duration::seconds(90)), 90);
        assert_eq!(elapsed_seconds(now, now - Duration::seconds(5)), 0);
    }
}
