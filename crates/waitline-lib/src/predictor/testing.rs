//! Shared fixtures for predictor tests

use crate::error::{DataAccessError, PersistenceError};
use crate::models::{DepartmentId, QueueEvent, TokenStatus};
use crate::predictor::{ModelMetadata, ModelStore, TrainedModel};
use crate::repository::{async_trait, QueueRepository};
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use std::sync::Arc;
use std::time::Duration;

pub fn base_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

/// `buckets` distinct hourly buckets, two completed tokens each, every one
/// waiting `wait` minutes
pub fn history(department: i64, buckets: usize, wait: u32) -> Vec<QueueEvent> {
    (0..buckets)
        .flat_map(|i| {
            let time = base_time() + ChronoDuration::hours(i as i64 * 5);
            [0, 20].map(|minute| QueueEvent {
                department_id: DepartmentId(department),
                booking_time: time + ChronoDuration::minutes(minute),
                actual_wait_time: Some(wait),
                status: TokenStatus::Completed,
            })
        })
        .collect()
}

pub fn waiting(department: i64, count: usize) -> Vec<QueueEvent> {
    (0..count)
        .map(|_| QueueEvent {
            department_id: DepartmentId(department),
            booking_time: base_time(),
            actual_wait_time: None,
            status: TokenStatus::Waiting,
        })
        .collect()
}

/// Repository that answers after a delay
pub struct SlowRepository {
    pub delay: Duration,
    pub events: Vec<QueueEvent>,
}

#[async_trait]
impl QueueRepository for SlowRepository {
    async fn completed_tokens(
        &self,
        _department: DepartmentId,
    ) -> Result<Vec<QueueEvent>, DataAccessError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.events.clone())
    }

    async fn waiting_count(&self, _department: DepartmentId) -> Result<u32, DataAccessError> {
        Ok(0)
    }
}

/// Model store whose reads succeed with nothing and whose writes fail
pub struct ReadOnlyStore;

#[async_trait]
impl ModelStore for ReadOnlyStore {
    async fn get(&self, _department: DepartmentId) -> Result<Option<Arc<TrainedModel>>, PersistenceError> {
        Ok(None)
    }

    async fn put(&self, model: Arc<TrainedModel>) -> Result<(), PersistenceError> {
        Err(PersistenceError::io(
            format!("dept_{}.json", model.department_id),
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        ))
    }

    async fn invalidate(&self, _department: DepartmentId) -> Result<bool, PersistenceError> {
        Ok(false)
    }

    async fn list(&self) -> Result<Vec<ModelMetadata>, PersistenceError> {
        Ok(Vec::new())
    }

    async fn check_writable(&self) -> Result<(), PersistenceError> {
        Err(PersistenceError::io(
            "models",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        ))
    }
}

/// Model store whose reads always fail
pub struct UnreadableStore;

#[async_trait]
impl ModelStore for UnreadableStore {
    async fn get(&self, department: DepartmentId) -> Result<Option<Arc<TrainedModel>>, PersistenceError> {
        Err(PersistenceError::corrupt(
            format!("dept_{}.json", department),
            "truncated",
        ))
    }

    async fn put(&self, _model: Arc<TrainedModel>) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn invalidate(&self, _department: DepartmentId) -> Result<bool, PersistenceError> {
        Ok(false)
    }

    async fn list(&self) -> Result<Vec<ModelMetadata>, PersistenceError> {
        Ok(Vec::new())
    }
}
