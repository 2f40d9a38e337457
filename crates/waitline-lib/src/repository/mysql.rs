//! MySQL-backed queue repository
//!
//! Reads the `tokens` table written by the hospital queue backend.

use super::{async_trait, QueueRepository};
use crate::error::DataAccessError;
use crate::models::{DepartmentId, QueueEvent, TokenStatus};
use chrono::NaiveDateTime;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use tracing::debug;

const COMPLETED_TOKENS_QUERY: &str = r#"
    SELECT booking_time, actual_wait_time
    FROM tokens
    WHERE department_id = ?
      AND booking_time IS NOT NULL
      AND actual_wait_time IS NOT NULL
      AND status = 'COMPLETED'
"#;

const WAITING_COUNT_QUERY: &str = r#"
    SELECT COUNT(*)
    FROM tokens
    WHERE department_id = ?
      AND status = 'WAITING'
"#;

/// A completed row from the `tokens` table. Both columns are nullable in
/// the schema.
#[derive(Debug, FromRow)]
struct CompletedTokenRow {
    booking_time: Option<NaiveDateTime>,
    actual_wait_time: Option<i32>,
}

impl CompletedTokenRow {
    fn into_event(self, department: DepartmentId) -> Option<QueueEvent> {
        Some(QueueEvent {
            department_id: department,
            booking_time: self.booking_time?,
            actual_wait_time: Some(self.actual_wait_time?.max(0) as u32),
            status: TokenStatus::Completed,
        })
    }
}

/// Queue repository on a MySQL connection pool
#[derive(Clone)]
pub struct MySqlQueueRepository {
    pool: MySqlPool,
}

impl MySqlQueueRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Build a lazily-connecting pool. The service starts even when the
    /// database is down; queries fail until it comes back.
    pub fn connect_lazy(database_url: &str, max_connections: u32) -> Result<Self, DataAccessError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy(database_url)?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl QueueRepository for MySqlQueueRepository {
    async fn completed_tokens(
        &self,
        department: DepartmentId,
    ) -> Result<Vec<QueueEvent>, DataAccessError> {
        let rows: Vec<CompletedTokenRow> = sqlx::query_as(COMPLETED_TOKENS_QUERY)
            .bind(department.0)
            .fetch_all(&self.pool)
            .await?;

        debug!(department_id = %department, rows = rows.len(), "Fetched completed tokens");

        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_event(department))
            .collect())
    }

    async fn waiting_count(&self, department: DepartmentId) -> Result<u32, DataAccessError> {
        let count: i64 = sqlx::query_scalar(WAITING_COUNT_QUERY)
            .bind(department.0)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.clamp(0, u32::MAX as i64) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn booked() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(9, 15, 0)
            .unwrap()
    }

    #[test]
    fn test_completed_query_excludes_null_columns() {
        assert!(COMPLETED_TOKENS_QUERY.contains("booking_time IS NOT NULL"));
        assert!(COMPLETED_TOKENS_QUERY.contains("actual_wait_time IS NOT NULL"));
    }

    #[test]
    fn test_rows_with_null_columns_are_skipped() {
        let rows = vec![
            CompletedTokenRow {
                booking_time: Some(booked()),
                actual_wait_time: Some(25),
            },
            CompletedTokenRow {
                booking_time: None,
                actual_wait_time: Some(40),
            },
            CompletedTokenRow {
                booking_time: Some(booked()),
                actual_wait_time: None,
            },
            CompletedTokenRow {
                booking_time: Some(booked()),
                actual_wait_time: Some(-3),
            },
        ];

        let events: Vec<QueueEvent> = rows
            .into_iter()
            .filter_map(|row| row.into_event(DepartmentId(2)))
            .collect();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].booking_time, booked());
        assert_eq!(events[0].actual_wait_time, Some(25));
        assert_eq!(events[1].actual_wait_time, Some(0));
        assert!(events.iter().all(|e| e.department_id == DepartmentId(2)));
    }
}
