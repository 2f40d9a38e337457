//! Access to the queue data store
//!
//! The relational store is an external collaborator with a fixed `tokens`
//! schema. The service only needs two questions answered: the completed
//! token history of a department, and how many tokens are waiting right now.

mod memory;
mod mysql;

pub use memory::InMemoryQueueRepository;
pub use mysql::MySqlQueueRepository;

use crate::error::DataAccessError;
use crate::models::{DepartmentId, QueueEvent};

pub use async_trait::async_trait;

/// Trait for queue data store implementations
#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// Completed tokens with a recorded wait time for a department.
    /// Implementations may return ineligible rows; the feature extractor
    /// filters them out.
    async fn completed_tokens(
        &self,
        department: DepartmentId,
    ) -> Result<Vec<QueueEvent>, DataAccessError>;

    /// Number of tokens currently in WAITING status for a department
    async fn waiting_count(&self, department: DepartmentId) -> Result<u32, DataAccessError>;
}
