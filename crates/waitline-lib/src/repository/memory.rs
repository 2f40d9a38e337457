//! In-memory queue repository for tests and local runs

use super::{async_trait, QueueRepository};
use crate::error::DataAccessError;
use crate::models::{DepartmentId, QueueEvent, TokenStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// Holds queue events in memory. Can be switched into an unavailable
/// state to exercise data-access failure paths.
#[derive(Debug, Default)]
pub struct InMemoryQueueRepository {
    events: RwLock<Vec<QueueEvent>>,
    unavailable: AtomicBool,
}

impl InMemoryQueueRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: Vec<QueueEvent>) -> Self {
        Self {
            events: RwLock::new(events),
            unavailable: AtomicBool::new(false),
        }
    }

    pub async fn push(&self, event: QueueEvent) {
        self.events.write().await.push(event);
    }

    pub async fn extend(&self, events: impl IntoIterator<Item = QueueEvent>) {
        self.events.write().await.extend(events);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), DataAccessError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DataAccessError::Unavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueRepository for InMemoryQueueRepository {
    async fn completed_tokens(
        &self,
        department: DepartmentId,
    ) -> Result<Vec<QueueEvent>, DataAccessError> {
        self.check_available()?;
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|e| e.department_id == department && e.is_eligible())
            .cloned()
            .collect())
    }

    async fn waiting_count(&self, department: DepartmentId) -> Result<u32, DataAccessError> {
        self.check_available()?;
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|e| e.department_id == department && e.status == TokenStatus::Waiting)
            .count() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn event(department: i64, status: TokenStatus, wait: Option<u32>) -> QueueEvent {
        QueueEvent {
            department_id: DepartmentId(department),
            booking_time: NaiveDate::from_ymd_opt(2024, 3, 4)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
            actual_wait_time: wait,
            status,
        }
    }

    #[tokio::test]
    async fn test_completed_tokens_are_partitioned_by_department() {
        let repo = InMemoryQueueRepository::with_events(vec![
            event(1, TokenStatus::Completed, Some(10)),
            event(1, TokenStatus::Completed, None),
            event(1, TokenStatus::Waiting, None),
            event(2, TokenStatus::Completed, Some(20)),
        ]);

        let tokens = repo.completed_tokens(DepartmentId(1)).await.unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].actual_wait_time, Some(10));
    }

    #[tokio::test]
    async fn test_waiting_count() {
        let repo = InMemoryQueueRepository::new();
        repo.extend(vec![
            event(1, TokenStatus::Waiting, None),
            event(1, TokenStatus::InProgress, None),
            event(2, TokenStatus::Waiting, None),
        ])
        .await;
        repo.push(event(1, TokenStatus::Waiting, None)).await;

        assert_eq!(repo.waiting_count(DepartmentId(1)).await.unwrap(), 2);
        assert_eq!(repo.waiting_count(DepartmentId(3)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_queries() {
        let repo = InMemoryQueueRepository::new();
        repo.set_unavailable(true);

        assert!(repo.completed_tokens(DepartmentId(1)).await.is_err());
        assert!(matches!(
            repo.waiting_count(DepartmentId(1)).await,
            Err(DataAccessError::Unavailable(_))
        ));

        repo.set_unavailable(false);
        assert!(repo.waiting_count(DepartmentId(1)).await.is_ok());
    }
}
