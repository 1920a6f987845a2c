// Postgres repository - JSONB columns for definitions, contexts and results

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use tracing::debug;
use uuid::Uuid;

use super::{RepositoryError, RepositoryResult, WorkflowRepository};
use crate::workflows::models::{
    ExecutionStatus, Workflow, WorkflowExecution, WorkflowLog, WorkflowStats,
};
use crate::workflows::triggers::TriggerType;

#[derive(Debug, FromRow)]
struct WorkflowRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    enabled: bool,
    triggers: Value,
    conditions: Option<Value>,
    actions: Value,
    max_retries: i32,
    retry_delay_seconds: i64,
    timeout_seconds: Option<i64>,
    execution_count: i64,
    success_count: i64,
    failure_count: i64,
    avg_execution_ms: f64,
    last_execution_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<WorkflowRow> for Workflow {
    type Error = RepositoryError;

    fn try_from(row: WorkflowRow) -> Result<Self, Self::Error> {
        Ok(Workflow {
            id: row.id,
            name: row.name,
            description: row.description,
            enabled: row.enabled,
            triggers: serde_json::from_value(row.triggers)?,
            conditions: row.conditions.map(serde_json::from_value).transpose()?,
            actions: serde_json::from_value(row.actions)?,
            max_retries: non_negative(row.max_retries.into(), "max_retries")?,
            retry_delay_seconds: non_negative(row.retry_delay_seconds, "retry_delay_seconds")?,
            timeout_seconds: row
                .timeout_seconds
                .map(|t| non_negative(t, "timeout_seconds"))
                .transpose()?,
            stats: WorkflowStats {
                execution_count: row.execution_count,
                success_count: row.success_count,
                failure_count: row.failure_count,
                avg_execution_ms: row.avg_execution_ms,
                last_execution_at: row.last_execution_at,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ExecutionRow {
    id: Uuid,
    workflow_id: Uuid,
    status: String,
    context: Value,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    duration_ms: Option<i64>,
    actions_executed: i32,
    actions_success: i32,
    actions_failed: i32,
    results: Value,
    retry_count: i32,
    next_retry_at: Option<DateTime<Utc>>,
    retry_of: Option<Uuid>,
    error: Option<String>,
}

impl TryFrom<ExecutionRow> for WorkflowExecution {
    type Error = RepositoryError;

    fn try_from(row: ExecutionRow) -> Result<Self, Self::Error> {
        let context: crate::workflows::context::ExecutionContext = serde_json::from_value(row.context)?;
        Ok(WorkflowExecution {
            id: row.id,
            workflow_id: row.workflow_id,
            status: row.status.parse().map_err(RepositoryError::InvalidData)?,
            triggered_by: context.triggered_by,
            trigger_source: context.trigger_source.clone(),
            context,
            started_at: row.started_at,
            completed_at: row.completed_at,
            duration_ms: row.duration_ms,
            actions_executed: row.actions_executed,
            actions_success: row.actions_success,
            actions_failed: row.actions_failed,
            results: serde_json::from_value(row.results)?,
            retry_count: non_negative(row.retry_count.into(), "retry_count")?,
            next_retry_at: row.next_retry_at,
            retry_of: row.retry_of,
            error: row.error,
        })
    }
}

fn non_negative<T: TryFrom<i64>>(value: i64, column: &str) -> RepositoryResult<T> {
    T::try_from(value).map_err(|_| RepositoryError::InvalidData(format!("{} = {}", column, value)))
}

fn to_i64(value: u64, column: &str) -> RepositoryResult<i64> {
    i64::try_from(value).map_err(|_| RepositoryError::InvalidData(format!("{} = {}", column, value)))
}

const WORKFLOW_COLUMNS: &str = r#"
    id, name, description, enabled, triggers, conditions, actions,
    max_retries, retry_delay_seconds, timeout_seconds,
    execution_count, success_count, failure_count, avg_execution_ms, last_execution_at,
    created_at, updated_at
"#;

const EXECUTION_COLUMNS: &str = r#"
    id, workflow_id, status, context, started_at, completed_at, duration_ms,
    actions_executed, actions_success, actions_failed, results,
    retry_count, next_retry_at, retry_of, error
"#;

#[derive(Clone)]
pub struct PgWorkflowRepository {
    pool: PgPool,
}

impl PgWorkflowRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkflowRepository for PgWorkflowRepository {
    async fn get_workflow(&self, id: Uuid) -> RepositoryResult<Option<Workflow>> {
        let query = format!("SELECT {} FROM workflows WHERE id = $1", WORKFLOW_COLUMNS);
        sqlx::query_as::<_, WorkflowRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Workflow::try_from)
            .transpose()
    }

    async fn save_workflow(&self, workflow: &Workflow) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workflows (
                id, name, description, enabled, triggers, conditions, actions,
                max_retries, retry_delay_seconds, timeout_seconds, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                enabled = EXCLUDED.enabled,
                triggers = EXCLUDED.triggers,
                conditions = EXCLUDED.conditions,
                actions = EXCLUDED.actions,
                max_retries = EXCLUDED.max_retries,
                retry_delay_seconds = EXCLUDED.retry_delay_seconds,
                timeout_seconds = EXCLUDED.timeout_seconds,
                updated_at = NOW()
            "#,
        )
        .bind(workflow.id)
        .bind(&workflow.name)
        .bind(&workflow.description)
        .bind(workflow.enabled)
        .bind(serde_json::to_value(&workflow.triggers)?)
        .bind(workflow.conditions.as_ref().map(serde_json::to_value).transpose()?)
        .bind(serde_json::to_value(&workflow.actions)?)
        .bind(i32::try_from(workflow.max_retries).unwrap_or(i32::MAX))
        .bind(to_i64(workflow.retry_delay_seconds, "retry_delay_seconds")?)
        .bind(workflow.timeout_seconds.map(|t| to_i64(t, "timeout_seconds")).transpose()?)
        .bind(workflow.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_workflow(&self, id: Uuid) -> RepositoryResult<()> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("Workflow {}", id)));
        }
        Ok(())
    }

    async fn find_enabled_by_trigger(&self, trigger_type: TriggerType) -> RepositoryResult<Vec<Workflow>> {
        let query = format!(
            "SELECT {} FROM workflows WHERE enabled = true AND triggers @> $1 ORDER BY created_at, id",
            WORKFLOW_COLUMNS
        );
        let rows = sqlx::query_as::<_, WorkflowRow>(&query)
            .bind(serde_json::json!([{ "type": trigger_type.as_str() }]))
            .fetch_all(&self.pool)
            .await?;

        debug!("Found {} enabled workflows for {}", rows.len(), trigger_type);
        rows.into_iter().map(Workflow::try_from).collect()
    }

    async fn create_execution(&self, execution: &WorkflowExecution) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_executions (
                id, workflow_id, status, triggered_by, trigger_source, context, started_at,
                completed_at, duration_ms, actions_executed, actions_success, actions_failed,
                results, retry_count, next_retry_at, retry_of, error
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(execution.id)
        .bind(execution.workflow_id)
        .bind(execution.status.as_str())
        .bind(execution.triggered_by.as_str())
        .bind(&execution.trigger_source)
        .bind(serde_json::to_value(&execution.context)?)
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(execution.duration_ms)
        .bind(execution.actions_executed)
        .bind(execution.actions_success)
        .bind(execution.actions_failed)
        .bind(serde_json::to_value(&execution.results)?)
        .bind(i32::try_from(execution.retry_count).unwrap_or(i32::MAX))
        .bind(execution.next_retry_at)
        .bind(execution.retry_of)
        .bind(&execution.error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update_execution(&self, execution: &WorkflowExecution) -> RepositoryResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_executions SET
                status = $2,
                completed_at = $3,
                duration_ms = $4,
                actions_executed = $5,
                actions_success = $6,
                actions_failed = $7,
                results = $8,
                retry_count = $9,
                next_retry_at = $10,
                error = $11
            WHERE id = $1
            "#,
        )
        .bind(execution.id)
        .bind(execution.status.as_str())
        .bind(execution.completed_at)
        .bind(execution.duration_ms)
        .bind(execution.actions_executed)
        .bind(execution.actions_success)
        .bind(execution.actions_failed)
        .bind(serde_json::to_value(&execution.results)?)
        .bind(i32::try_from(execution.retry_count).unwrap_or(i32::MAX))
        .bind(execution.next_retry_at)
        .bind(&execution.error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("Execution {}", execution.id)));
        }
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> RepositoryResult<Option<WorkflowExecution>> {
        let query = format!("SELECT {} FROM workflow_executions WHERE id = $1", EXECUTION_COLUMNS);
        sqlx::query_as::<_, ExecutionRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(WorkflowExecution::try_from)
            .transpose()
    }

    async fn executions_due_for_retry(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<WorkflowExecution>> {
        let query = format!(
            r#"
            SELECT {} FROM workflow_executions
            WHERE status = 'RETRYING' AND next_retry_at IS NOT NULL AND next_retry_at <= $1
            ORDER BY next_retry_at
            LIMIT $2
            "#,
            EXECUTION_COLUMNS
        );
        let rows = sqlx::query_as::<_, ExecutionRow>(&query)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(WorkflowExecution::try_from).collect()
    }

    async fn clear_retry_schedule(&self, execution_id: Uuid) -> RepositoryResult<()> {
        sqlx::query("UPDATE workflow_executions SET next_retry_at = NULL WHERE id = $1")
            .bind(execution_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn append_log(&self, log: &WorkflowLog) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_logs (id, workflow_id, execution_id, level, message, data, logged_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(log.id)
        .bind(log.workflow_id)
        .bind(log.execution_id)
        .bind(log.level.as_str())
        .bind(&log.message)
        .bind(&log.data)
        .bind(log.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_execution_stats(
        &self,
        workflow_id: Uuid,
        status: ExecutionStatus,
        duration_ms: i64,
        at: DateTime<Utc>,
    ) -> RepositoryResult<()> {
        // Right-hand sides read the pre-update row, so the mean divides by the new count
        let result = sqlx::query(
            r#"
            UPDATE workflows SET
                execution_count = execution_count + 1,
                success_count = success_count + CASE WHEN $2 = 'SUCCESS' THEN 1 ELSE 0 END,
                failure_count = failure_count + CASE WHEN $2 IN ('FAILED', 'RETRYING') THEN 1 ELSE 0 END,
                avg_execution_ms = avg_execution_ms
                    + ($3::DOUBLE PRECISION - avg_execution_ms) / (execution_count + 1),
                last_execution_at = $4
            WHERE id = $1
            "#,
        )
        .bind(workflow_id)
        .bind(status.as_str())
        .bind(duration_ms)
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("Workflow {}", workflow_id)));
        }
        Ok(())
    }
}
