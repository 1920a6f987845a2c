// Workflow persistence - definitions, executions, audit log and statistics

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::workflows::models::{ExecutionStatus, Workflow, WorkflowExecution, WorkflowLog};
use crate::workflows::triggers::TriggerType;

pub use memory::InMemoryRepository;
pub use postgres::PgWorkflowRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid stored value: {0}")]
    InvalidData(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    async fn get_workflow(&self, id: Uuid) -> RepositoryResult<Option<Workflow>>;

    /// Insert or replace a definition
    async fn save_workflow(&self, workflow: &Workflow) -> RepositoryResult<()>;

    async fn delete_workflow(&self, id: Uuid) -> RepositoryResult<()>;

    /// Enabled workflows declaring `trigger_type`, oldest first
    async fn find_enabled_by_trigger(&self, trigger_type: TriggerType) -> RepositoryResult<Vec<Workflow>>;

    async fn create_execution(&self, execution: &WorkflowExecution) -> RepositoryResult<()>;

    async fn update_execution(&self, execution: &WorkflowExecution) -> RepositoryResult<()>;

    async fn get_execution(&self, id: Uuid) -> RepositoryResult<Option<WorkflowExecution>>;

    /// RETRYING executions whose `next_retry_at` has passed, earliest first
    async fn executions_due_for_retry(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<WorkflowExecution>>;

    async fn clear_retry_schedule(&self, execution_id: Uuid) -> RepositoryResult<()>;

    async fn append_log(&self, log: &WorkflowLog) -> RepositoryResult<()>;

    /// Fold one finalised attempt into the workflow's statistics atomically
    async fn record_execution_stats(
        &self,
        workflow_id: Uuid,
        status: ExecutionStatus,
        duration_ms: i64,
        at: DateTime<Utc>,
    ) -> RepositoryResult<()>;
}
