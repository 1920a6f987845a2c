// Domain store - project, task and notification writes performed by workflow actions

use async_trait::async_trait;
use autoflow_shared::{Client, Invoice, NewNotification, NewTask, Project, Task};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::PgPool;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::repository::RepositoryError;
use crate::workflows::triggers::EntityLookup;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },

    #[error("{0}")]
    Rejected(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

/// What a mutation changed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationOutcome {
    pub entity_id: Uuid,
    pub field: String,
    pub value: Value,
}

impl MutationOutcome {
    pub fn new(entity_id: Uuid, field: &str, value: Value) -> Self {
        Self {
            entity_id,
            field: field.to_string(),
            value,
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DomainMutations: Send + Sync {
    async fn create_task(&self, task: NewTask) -> DomainResult<MutationOutcome>;
    async fn update_project_status(&self, project_id: Uuid, status: String) -> DomainResult<MutationOutcome>;
    async fn update_project_field(&self, project_id: Uuid, field: String, value: Value) -> DomainResult<MutationOutcome>;
    async fn update_task_status(&self, task_id: Uuid, status: String) -> DomainResult<MutationOutcome>;
    async fn update_task_priority(&self, task_id: Uuid, priority: String) -> DomainResult<MutationOutcome>;
    async fn assign_task(&self, task_id: Uuid, assignee_id: Uuid) -> DomainResult<MutationOutcome>;
    async fn add_task_comment(&self, task_id: Uuid, comment: String, internal: bool) -> DomainResult<MutationOutcome>;
    async fn create_notification(&self, notification: NewNotification) -> DomainResult<MutationOutcome>;
}

/// Project fields a workflow may set, with their column and SQL type
fn project_column(field: &str) -> Option<(&'static str, &'static str)> {
    match field {
        "name" => Some(("name", "text")),
        "description" => Some(("description", "text")),
        "status" => Some(("status", "text")),
        "startDate" | "start_date" => Some(("start_date", "date")),
        "endDate" | "end_date" => Some(("end_date", "date")),
        "budget" => Some(("budget", "numeric")),
        "spent" => Some(("spent", "numeric")),
        "clientEmail" | "client_email" => Some(("client_email", "text")),
        "projectManagerId" | "project_manager_id" => Some(("project_manager_id", "uuid")),
        _ => None,
    }
}

/// Postgres-backed domain store
#[derive(Clone)]
pub struct PgDomainStore {
    pool: PgPool,
}

impl PgDomainStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn ensure_updated(
        result: sqlx::postgres::PgQueryResult,
        kind: &'static str,
        id: Uuid,
    ) -> DomainResult<()> {
        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound { kind, id });
        }
        Ok(())
    }
}

#[async_trait]
impl DomainMutations for PgDomainStore {
    async fn create_task(&self, task: NewTask) -> DomainResult<MutationOutcome> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO tasks (id, project_id, title, description, assignee_id, status, priority, due_date, created_at)
            VALUES ($1, $2, $3, $4, $5, 'TODO', $6, $7, NOW())
            "#,
        )
        .bind(id)
        .bind(task.project_id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.assignee_id)
        .bind(&task.priority)
        .bind(task.due_date)
        .execute(&self.pool)
        .await?;

        info!("Workflow created task {} in project {}", id, task.project_id);
        Ok(MutationOutcome::new(id, "title", Value::String(task.title)))
    }

    async fn update_project_status(&self, project_id: Uuid, status: String) -> DomainResult<MutationOutcome> {
        let result = sqlx::query("UPDATE projects SET status = $1, updated_at = NOW() WHERE id = $2")
            .bind(&status)
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        Self::ensure_updated(result, "project", project_id)?;

        Ok(MutationOutcome::new(project_id, "status", Value::String(status)))
    }

    async fn update_project_field(&self, project_id: Uuid, field: String, value: Value) -> DomainResult<MutationOutcome> {
        let (column, sql_type) = project_column(&field)
            .ok_or_else(|| DomainError::Rejected(format!("Project field '{}' cannot be updated", field)))?;

        // Column and type come from the allow-list above
        let query = format!(
            "UPDATE projects SET {column} = ($1::jsonb #>> '{{}}')::{sql_type}, updated_at = NOW() WHERE id = $2"
        );
        let result = sqlx::query(&query)
            .bind(&value)
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        Self::ensure_updated(result, "project", project_id)?;

        Ok(MutationOutcome::new(project_id, &field, value))
    }

    async fn update_task_status(&self, task_id: Uuid, status: String) -> DomainResult<MutationOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = $1,
                completed_at = CASE WHEN $1 IN ('DONE', 'COMPLETED') THEN NOW() ELSE completed_at END,
                updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(&status)
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Self::ensure_updated(result, "task", task_id)?;

        Ok(MutationOutcome::new(task_id, "status", Value::String(status)))
    }

    async fn update_task_priority(&self, task_id: Uuid, priority: String) -> DomainResult<MutationOutcome> {
        let result = sqlx::query("UPDATE tasks SET priority = $1, updated_at = NOW() WHERE id = $2")
            .bind(&priority)
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Self::ensure_updated(result, "task", task_id)?;

        Ok(MutationOutcome::new(task_id, "priority", Value::String(priority)))
    }

    async fn assign_task(&self, task_id: Uuid, assignee_id: Uuid) -> DomainResult<MutationOutcome> {
        let result = sqlx::query("UPDATE tasks SET assignee_id = $1, updated_at = NOW() WHERE id = $2")
            .bind(assignee_id)
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Self::ensure_updated(result, "task", task_id)?;

        Ok(MutationOutcome::new(task_id, "assigneeId", Value::String(assignee_id.to_string())))
    }

    async fn add_task_comment(&self, task_id: Uuid, comment: String, internal: bool) -> DomainResult<MutationOutcome> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO task_comments (id, task_id, content, is_internal, created_by_system, created_at)
            VALUES ($1, $2, $3, $4, true, NOW())
            "#,
        )
        .bind(id)
        .bind(task_id)
        .bind(&comment)
        .bind(internal)
        .execute(&self.pool)
        .await?;

        Ok(MutationOutcome::new(id, "content", Value::String(comment)))
    }

    async fn create_notification(&self, notification: NewNotification) -> DomainResult<MutationOutcome> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, title, message, notification_type, entity_type, entity_id, read, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, false, NOW())
            "#,
        )
        .bind(id)
        .bind(notification.user_id)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(&notification.notification_type)
        .bind(&notification.entity_type)
        .bind(notification.entity_id)
        .execute(&self.pool)
        .await?;

        Ok(MutationOutcome::new(
            id,
            "userId",
            Value::String(notification.user_id.to_string()),
        ))
    }
}

#[async_trait]
impl EntityLookup for PgDomainStore {
    async fn snapshot(&self, kind: &str, id: &str) -> Result<Option<Value>, RepositoryError> {
        let Ok(id) = id.parse::<Uuid>() else {
            return Ok(None);
        };

        let snapshot = match kind {
            "project" => sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .map(|p| serde_json::to_value(p))
                .transpose()?,
            "task" => sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .map(|t| serde_json::to_value(t))
                .transpose()?,
            "invoice" => sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .map(|i| serde_json::to_value(i))
                .transpose()?,
            "client" => sqlx::query_as::<_, Client>("SELECT * FROM clients WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
                .map(|c| serde_json::to_value(c))
                .transpose()?,
            _ => None,
        };

        Ok(snapshot)
    }
}
