// Workflow Triggers - Entry points that turn domain events into executions

use autoflow_shared::{Actor, Invoice, Project, Task};
use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::context::{EntityRef, ExecutionContext, FieldChange};
use super::engine::WorkflowEngine;
use super::models::{ExecutionResult, ExecutionStatus};
use super::triggers::TriggerType;
use crate::error::{DispatchError, EngineResult};
use crate::repository::WorkflowRepository;

/// One queued fire-and-forget dispatch
#[derive(Debug, Clone)]
pub struct TriggerRequest {
    pub trigger_type: TriggerType,
    pub context: ExecutionContext,
}

#[derive(Clone)]
pub struct WorkflowTriggers {
    engine: Arc<WorkflowEngine>,
    repository: Arc<dyn WorkflowRepository>,
    queue: Option<mpsc::Sender<TriggerRequest>>,
}

impl WorkflowTriggers {
    pub fn new(engine: Arc<WorkflowEngine>, repository: Arc<dyn WorkflowRepository>) -> Self {
        Self {
            engine,
            repository,
            queue: None,
        }
    }

    /// Attach a bounded queue and spawn the worker that drains it.
    /// The worker stops once every clone holding the queue is dropped.
    pub fn with_async_queue(mut self, capacity: usize) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let dispatcher = AsyncDispatcher {
            triggers: self.clone(),
            receiver,
        };
        let handle = tokio::spawn(dispatcher.run());

        self.queue = Some(sender);
        (self, handle)
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }

    /// Run every enabled workflow declaring `trigger_type` concurrently.
    /// Executions that cannot start are logged and left out.
    pub async fn trigger_workflows(&self, trigger_type: TriggerType, ctx: ExecutionContext) -> Vec<ExecutionResult> {
        let workflows = match self.repository.find_enabled_by_trigger(trigger_type).await {
            Ok(workflows) => workflows,
            Err(e) => {
                error!("Failed to load workflows for {}: {}", trigger_type, e);
                return Vec::new();
            }
        };

        if workflows.is_empty() {
            debug!("No enabled workflows for {}", trigger_type);
            return Vec::new();
        }

        info!("Triggering {} workflow(s) for {}", workflows.len(), trigger_type);

        let runs = workflows.iter().map(|workflow| {
            let ctx = ctx.clone();
            async move { (workflow.id, self.engine.execute_workflow(workflow.id, ctx).await) }
        });

        join_all(runs)
            .await
            .into_iter()
            .filter_map(|(workflow_id, result)| match result {
                Ok(result) => Some(result),
                Err(e) => {
                    warn!(
                        workflow_id = %workflow_id,
                        "Workflow could not run for {}: {} ({})",
                        trigger_type,
                        e,
                        e.error_code()
                    );
                    None
                }
            })
            .collect()
    }

    /// Enqueue without waiting; fails when the queue is full or missing
    pub fn try_trigger_workflows_async(&self, trigger_type: TriggerType, ctx: ExecutionContext) -> Result<(), DispatchError> {
        let queue = self.queue.as_ref().ok_or(DispatchError::NotConfigured)?;
        queue
            .try_send(TriggerRequest {
                trigger_type,
                context: ctx,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => DispatchError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => DispatchError::QueueClosed,
            })
    }

    /// Fire-and-forget; a rejected request is logged and dropped
    pub fn trigger_workflows_async(&self, trigger_type: TriggerType, ctx: ExecutionContext) {
        if let Err(e) = self.try_trigger_workflows_async(trigger_type, ctx) {
            warn!("Dropping {} dispatch: {}", trigger_type, e);
        }
    }

    /// Run one workflow now, bypassing the trigger-type lookup
    pub async fn execute_workflow_manually(&self, workflow_id: Uuid, ctx: ExecutionContext) -> EngineResult<ExecutionResult> {
        self.engine.execute_workflow(workflow_id, ctx).await
    }

    pub async fn execute_workflow_via_webhook(
        &self,
        workflow_id: Uuid,
        payload: Value,
        source: &str,
    ) -> EngineResult<ExecutionResult> {
        self.engine
            .execute_workflow(workflow_id, ExecutionContext::webhook(source, payload))
            .await
    }

    // ===== Domain events =====

    pub async fn project_created(&self, project: &Project, actor: Option<Actor>) -> Vec<ExecutionResult> {
        let ctx = entity_context("project.created", "project", project.id, project, actor);
        self.trigger_workflows(TriggerType::ProjectCreated, ctx).await
    }

    pub async fn project_updated(
        &self,
        project: &Project,
        changes: BTreeMap<String, FieldChange>,
        actor: Option<Actor>,
    ) -> Vec<ExecutionResult> {
        let ctx = entity_context("project.updated", "project", project.id, project, actor).with_changes(changes);
        self.trigger_workflows(TriggerType::ProjectUpdated, ctx).await
    }

    /// Also fires PROJECT_COMPLETED when the new status is a completed one
    pub async fn project_status_changed(
        &self,
        project: &Project,
        old_status: &str,
        actor: Option<Actor>,
    ) -> Vec<ExecutionResult> {
        let mut ctx = entity_context("project.status_changed", "project", project.id, project, actor);
        if let Some(entity) = ctx.entity.take() {
            ctx.entity = Some(entity.with_change("status", json!(old_status), json!(project.status)));
        }

        let mut results = self
            .trigger_workflows(TriggerType::ProjectStatusChanged, ctx.clone())
            .await;
        if matches!(project.status.as_str(), "COMPLETED" | "DONE") {
            results.extend(self.trigger_workflows(TriggerType::ProjectCompleted, ctx).await);
        }
        results
    }

    pub async fn task_created(&self, task: &Task, actor: Option<Actor>) -> Vec<ExecutionResult> {
        let ctx = entity_context("task.created", "task", task.id, task, actor);
        self.trigger_workflows(TriggerType::TaskCreated, ctx).await
    }

    pub async fn task_completed(&self, task: &Task, actor: Option<Actor>) -> Vec<ExecutionResult> {
        let ctx = entity_context("task.completed", "task", task.id, task, actor);
        self.trigger_workflows(TriggerType::TaskCompleted, ctx).await
    }

    pub async fn task_assigned(
        &self,
        task: &Task,
        previous_assignee: Option<Uuid>,
        actor: Option<Actor>,
    ) -> Vec<ExecutionResult> {
        let mut ctx = entity_context("task.assigned", "task", task.id, task, actor);
        if let Some(entity) = ctx.entity.take() {
            ctx.entity = Some(entity.with_change(
                "assigneeId",
                json!(previous_assignee),
                json!(task.assignee_id),
            ));
        }
        self.trigger_workflows(TriggerType::TaskAssigned, ctx).await
    }

    pub async fn task_overdue(&self, task: &Task) -> Vec<ExecutionResult> {
        let ctx = ExecutionContext::scheduled("task.overdue").with_entity(EntityRef::from_entity("task", task.id, task));
        self.trigger_workflows(TriggerType::TaskOverdue, ctx).await
    }

    pub async fn invoice_paid(&self, invoice: &Invoice, actor: Option<Actor>) -> Vec<ExecutionResult> {
        let ctx = entity_context("invoice.paid", "invoice", invoice.id, invoice, actor);
        self.trigger_workflows(TriggerType::InvoicePaid, ctx).await
    }

    pub async fn invoice_overdue(&self, invoice: &Invoice) -> Vec<ExecutionResult> {
        let ctx = ExecutionContext::scheduled("invoice.overdue")
            .with_entity(EntityRef::from_entity("invoice", invoice.id, invoice));
        self.trigger_workflows(TriggerType::InvoiceOverdue, ctx).await
    }

    /// Run the workflows attached to a schedule trigger
    pub async fn scheduled_tick(&self, trigger_type: TriggerType) -> Vec<ExecutionResult> {
        self.trigger_workflows(trigger_type, ExecutionContext::scheduled(trigger_type.as_str()))
            .await
    }
}

fn entity_context<T: Serialize>(
    source: &str,
    kind: &str,
    id: Uuid,
    entity: &T,
    actor: Option<Actor>,
) -> ExecutionContext {
    let ctx = ExecutionContext::user_action(source).with_entity(EntityRef::from_entity(kind, id, entity));
    match actor {
        Some(actor) => ctx.with_user(actor),
        None => ctx,
    }
}

/// Drains the async queue one request at a time
struct AsyncDispatcher {
    triggers: WorkflowTriggers,
    receiver: mpsc::Receiver<TriggerRequest>,
}

impl AsyncDispatcher {
    async fn run(mut self) {
        info!("Async workflow dispatcher started");

        while let Some(request) = self.receiver.recv().await {
            let triggers = self.triggers.clone();
            let TriggerRequest { trigger_type, context } = request;
            let handle = tokio::spawn(async move { triggers.trigger_workflows(trigger_type, context).await });

            let results = match handle.await {
                Ok(results) => results,
                Err(e) => {
                    error!("Async {} dispatch aborted: {}", trigger_type, e);
                    continue;
                }
            };

            for failed in results.iter().filter(|r| r.status == ExecutionStatus::Failed) {
                error!(
                    workflow_id = %failed.workflow_id,
                    execution_id = %failed.execution_id,
                    "Async {} execution failed: {}",
                    trigger_type,
                    failed.error.as_deref().unwrap_or("every action failed")
                );
            }
        }

        info!("Async workflow dispatcher stopped");
    }
}
