// In-memory repository for embedding and tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{RepositoryError, RepositoryResult, WorkflowRepository};
use crate::workflows::models::{ExecutionStatus, Workflow, WorkflowExecution, WorkflowLog};
use crate::workflows::triggers::TriggerType;

#[derive(Default)]
pub struct InMemoryRepository {
    workflows: RwLock<HashMap<Uuid, Workflow>>,
    executions: RwLock<HashMap<Uuid, WorkflowExecution>>,
    logs: RwLock<Vec<WorkflowLog>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Executions of one workflow ordered by start time
    pub async fn executions_for(&self, workflow_id: Uuid) -> Vec<WorkflowExecution> {
        let executions = self.executions.read().await;
        let mut found: Vec<_> = executions
            .values()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect();
        found.sort_by_key(|e| e.started_at);
        found
    }

    /// Audit entries of one workflow in append order
    pub async fn logs_for(&self, workflow_id: Uuid) -> Vec<WorkflowLog> {
        self.logs
            .read()
            .await
            .iter()
            .filter(|l| l.workflow_id == workflow_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryRepository {
    async fn get_workflow(&self, id: Uuid) -> RepositoryResult<Option<Workflow>> {
        Ok(self.workflows.read().await.get(&id).cloned())
    }

    async fn save_workflow(&self, workflow: &Workflow) -> RepositoryResult<()> {
        self.workflows
            .write()
            .await
            .insert(workflow.id, workflow.clone());
        Ok(())
    }

    async fn delete_workflow(&self, id: Uuid) -> RepositoryResult<()> {
        self.workflows
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| RepositoryError::NotFound(format!("Workflow {}", id)))
    }

    async fn find_enabled_by_trigger(&self, trigger_type: TriggerType) -> RepositoryResult<Vec<Workflow>> {
        let workflows = self.workflows.read().await;
        let mut found: Vec<Workflow> = workflows
            .values()
            .filter(|w| w.enabled && w.declares_trigger(trigger_type))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn create_execution(&self, execution: &WorkflowExecution) -> RepositoryResult<()> {
        self.executions
            .write()
            .await
            .insert(execution.id, execution.clone());
        Ok(())
    }

    async fn update_execution(&self, execution: &WorkflowExecution) -> RepositoryResult<()> {
        let mut executions = self.executions.write().await;
        match executions.get_mut(&execution.id) {
            Some(stored) => {
                *stored = execution.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!("Execution {}", execution.id))),
        }
    }

    async fn get_execution(&self, id: Uuid) -> RepositoryResult<Option<WorkflowExecution>> {
        Ok(self.executions.read().await.get(&id).cloned())
    }

    async fn executions_due_for_retry(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<WorkflowExecution>> {
        let executions = self.executions.read().await;
        let mut due: Vec<WorkflowExecution> = executions
            .values()
            .filter(|e| e.status == ExecutionStatus::Retrying)
            .filter(|e| e.next_retry_at.is_some_and(|at| at <= now))
            .cloned()
            .collect();
        due.sort_by_key(|e| e.next_retry_at);
        due.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(due)
    }

    async fn clear_retry_schedule(&self, execution_id: Uuid) -> RepositoryResult<()> {
        if let Some(execution) = self.executions.write().await.get_mut(&execution_id) {
            execution.next_retry_at = None;
        }
        Ok(())
    }

    async fn append_log(&self, log: &WorkflowLog) -> RepositoryResult<()> {
        self.logs.write().await.push(log.clone());
        Ok(())
    }

    async fn record_execution_stats(
        &self,
        workflow_id: Uuid,
        status: ExecutionStatus,
        duration_ms: i64,
        at: DateTime<Utc>,
    ) -> RepositoryResult<()> {
        let mut workflows = self.workflows.write().await;
        let workflow = workflows
            .get_mut(&workflow_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("Workflow {}", workflow_id)))?;
        workflow.stats.record(status, duration_ms, at);
        Ok(())
    }
}
