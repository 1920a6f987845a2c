// Workflow Engine - Runs one workflow against one event and records the outcome

use chrono::Utc;
use futures::FutureExt;
use serde_json::json;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::actions::ActionResult;
use super::conditions::ConditionEvaluator;
use super::context::ExecutionContext;
use super::executor::ActionExecutor;
use super::models::{ExecutionResult, ExecutionStatus, LogLevel, Workflow, WorkflowExecution, WorkflowLog};
use super::triggers::{EntityLookup, TriggerEvaluator};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, ErrorReport};
use crate::repository::WorkflowRepository;

/// Retry bookkeeping for an execution attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionOptions {
    pub retry_count: u32,
    pub retry_of: Option<Uuid>,
}

type InFlight = Arc<Mutex<HashMap<Uuid, usize>>>;

/// Holds one in-flight slot until dropped
struct SlotGuard {
    in_flight: InFlight,
    workflow_id: Uuid,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut slots = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(count) = slots.get_mut(&self.workflow_id) {
            *count -= 1;
            if *count == 0 {
                slots.remove(&self.workflow_id);
            }
        }
    }
}

enum Gate {
    Open,
    TriggerMismatch,
    ConditionMismatch,
}

pub struct WorkflowEngine {
    repository: Arc<dyn WorkflowRepository>,
    executor: ActionExecutor,
    triggers: TriggerEvaluator,
    conditions: ConditionEvaluator,
    config: EngineConfig,
    in_flight: InFlight,
}

impl WorkflowEngine {
    pub fn new(repository: Arc<dyn WorkflowRepository>, executor: ActionExecutor, config: EngineConfig) -> Self {
        let executor = executor
            .with_default_timeout(config.default_action_timeout)
            .with_template_mode(config.template_mode);

        Self {
            repository,
            executor,
            triggers: TriggerEvaluator::new(),
            conditions: ConditionEvaluator::new(),
            config,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Let trigger evaluation load fields missing from the event
    pub fn with_entity_lookup(mut self, lookup: Arc<dyn EntityLookup>) -> Self {
        self.triggers = TriggerEvaluator::new().with_lookup(lookup);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Executions currently running across all workflows
    pub fn in_flight_count(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .sum()
    }

    /// Validate and store a definition
    pub async fn register_workflow(&self, workflow: Workflow) -> EngineResult<Workflow> {
        workflow.validate()?;
        self.repository.save_workflow(&workflow).await?;
        info!("Registered workflow '{}' ({})", workflow.name, workflow.id);
        Ok(workflow)
    }

    pub async fn get_workflow(&self, workflow_id: Uuid) -> EngineResult<Workflow> {
        self.repository
            .get_workflow(workflow_id)
            .await?
            .ok_or(EngineError::WorkflowNotFound(workflow_id))
    }

    pub async fn execute_workflow(&self, workflow_id: Uuid, ctx: ExecutionContext) -> EngineResult<ExecutionResult> {
        self.execute_with_options(workflow_id, ctx, ExecutionOptions::default())
            .await
    }

    /// Start a new attempt for a RETRYING execution
    pub async fn retry_execution(&self, previous: &WorkflowExecution) -> EngineResult<ExecutionResult> {
        self.repository.clear_retry_schedule(previous.id).await?;

        let options = ExecutionOptions {
            retry_count: previous.retry_count,
            retry_of: Some(previous.id),
        };
        info!(
            "Retrying execution {} of workflow {} (attempt {})",
            previous.id, previous.workflow_id, previous.retry_count
        );

        let result = self
            .execute_with_options(previous.workflow_id, previous.context.clone(), options)
            .await;

        if let Err(EngineError::ConcurrencyLimitReached { .. }) = &result {
            // Put the schedule back so a later sweep picks it up
            if let Err(e) = self.repository.update_execution(previous).await {
                warn!("Failed to restore retry schedule of execution {}: {}", previous.id, e);
            }
        }

        result
    }

    pub async fn execute_with_options(
        &self,
        workflow_id: Uuid,
        ctx: ExecutionContext,
        options: ExecutionOptions,
    ) -> EngineResult<ExecutionResult> {
        let _slot = self.reserve_slot(workflow_id).inspect_err(|e| {
            warn!(workflow_id = %workflow_id, "Execution rejected: {}", e);
        })?;

        let workflow = match self.repository.get_workflow(workflow_id).await? {
            Some(workflow) if workflow.enabled => workflow,
            Some(_) => {
                error!(workflow_id = %workflow_id, "Workflow is disabled");
                return Err(EngineError::WorkflowDisabled(workflow_id));
            }
            None => {
                error!(workflow_id = %workflow_id, "Workflow not found");
                return Err(EngineError::WorkflowNotFound(workflow_id));
            }
        };

        let mut execution = WorkflowExecution::new(workflow.id, ctx, options.retry_count, options.retry_of);
        self.repository.create_execution(&execution).await?;

        execution.mark_running();
        if let Err(e) = self.repository.update_execution(&execution).await {
            warn!(execution_id = %execution.id, "Failed to mark execution running: {}", e);
        }

        info!(
            workflow_id = %workflow.id,
            execution_id = %execution.id,
            "Executing workflow '{}' ({} from {})",
            workflow.name,
            execution.triggered_by.as_str(),
            execution.trigger_source
        );
        self.audit(
            &workflow,
            &execution,
            LogLevel::Info,
            "Execution started",
            json!({
                "triggeredBy": execution.triggered_by,
                "triggerSource": execution.trigger_source,
                "retryCount": execution.retry_count,
                "retryOf": execution.retry_of,
            }),
        )
        .await;

        let gates = AssertUnwindSafe(self.evaluate_gates(&workflow, &execution.context))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                error!(execution_id = %execution.id, "Trigger or condition evaluation panicked");
                Err(EngineError::EvaluationPanicked)
            });

        match gates {
            Ok(Gate::Open) => self.run_actions(&workflow, &mut execution).await,
            Ok(Gate::TriggerMismatch) => {
                execution.finish(ExecutionStatus::Cancelled, Vec::new(), None);
                self.audit(&workflow, &execution, LogLevel::Info, "Trigger did not match", json!({}))
                    .await;
            }
            Ok(Gate::ConditionMismatch) => {
                execution.finish(ExecutionStatus::Cancelled, Vec::new(), None);
                self.audit(&workflow, &execution, LogLevel::Info, "Conditions not met", json!({}))
                    .await;
            }
            Err(e) => self.handle_evaluation_error(&workflow, &mut execution, e).await,
        }

        if let Err(e) = self.repository.update_execution(&execution).await {
            error!(execution_id = %execution.id, "Failed to persist execution: {}", e);
        }
        self.record_stats(&execution).await;

        info!(
            workflow_id = %workflow.id,
            execution_id = %execution.id,
            "Workflow '{}' finished with {} in {}ms",
            workflow.name,
            execution.status,
            execution.duration_ms.unwrap_or(0)
        );

        Ok(ExecutionResult::from(&execution))
    }

    fn reserve_slot(&self, workflow_id: Uuid) -> EngineResult<SlotGuard> {
        let mut slots = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        let limit = self.config.max_concurrent_executions;
        if slots.values().sum::<usize>() >= limit {
            return Err(EngineError::ConcurrencyLimitReached { limit });
        }

        *slots.entry(workflow_id).or_insert(0) += 1;
        Ok(SlotGuard {
            in_flight: self.in_flight.clone(),
            workflow_id,
        })
    }

    async fn evaluate_gates(&self, workflow: &Workflow, ctx: &ExecutionContext) -> EngineResult<Gate> {
        if !self.triggers.evaluate(&workflow.triggers, ctx).await? {
            return Ok(Gate::TriggerMismatch);
        }
        if !self.conditions.evaluate(workflow.conditions.as_ref(), ctx)? {
            return Ok(Gate::ConditionMismatch);
        }
        Ok(Gate::Open)
    }

    async fn run_actions(&self, workflow: &Workflow, execution: &mut WorkflowExecution) {
        let results = self
            .executor
            .execute_actions(&workflow.actions, &execution.context, workflow, execution.id)
            .await;

        for failed in results.iter().filter(|r| !r.is_success()) {
            self.audit(
                workflow,
                execution,
                LogLevel::Error,
                "Action failed",
                json!({
                    "actionType": failed.action_type,
                    "order": failed.order,
                    "error": failed.error,
                }),
            )
            .await;
        }

        let (status, error) = overall_status(&results);
        execution.finish(status, results, error);

        self.audit(
            workflow,
            execution,
            LogLevel::Info,
            "Execution completed",
            json!({
                "status": execution.status,
                "actionsExecuted": execution.actions_executed,
                "actionsSuccess": execution.actions_success,
                "actionsFailed": execution.actions_failed,
                "durationMs": execution.duration_ms,
            }),
        )
        .await;
    }

    async fn handle_evaluation_error(&self, workflow: &Workflow, execution: &mut WorkflowExecution, err: EngineError) {
        let report = ErrorReport::from(&err);

        if !err.is_configuration_error() && execution.retry_count < workflow.max_retries {
            execution.schedule_retry(workflow.retry_delay_seconds, err.to_string());
            warn!(
                workflow_id = %workflow.id,
                execution_id = %execution.id,
                "Evaluation failed, retry {} scheduled for {:?}: {}",
                execution.retry_count,
                execution.next_retry_at,
                err
            );
            self.audit(
                workflow,
                execution,
                LogLevel::Warning,
                "Retry scheduled",
                json!({
                    "error": report,
                    "retryCount": execution.retry_count,
                    "nextRetryAt": execution.next_retry_at,
                }),
            )
            .await;
            return;
        }

        execution.finish(ExecutionStatus::Failed, Vec::new(), Some(err.to_string()));
        error!(
            workflow_id = %workflow.id,
            execution_id = %execution.id,
            "Workflow execution failed: {}",
            err
        );
        self.audit(workflow, execution, LogLevel::Error, "Execution failed", json!({ "error": report }))
            .await;
    }

    async fn record_stats(&self, execution: &WorkflowExecution) {
        let at = execution.completed_at.unwrap_or_else(Utc::now);
        if let Err(e) = self
            .repository
            .record_execution_stats(
                execution.workflow_id,
                execution.status,
                execution.duration_ms.unwrap_or(0),
                at,
            )
            .await
        {
            warn!(workflow_id = %execution.workflow_id, "Failed to update workflow statistics: {}", e);
        }
    }

    async fn audit(
        &self,
        workflow: &Workflow,
        execution: &WorkflowExecution,
        level: LogLevel,
        message: &str,
        data: serde_json::Value,
    ) {
        let entry = WorkflowLog::new(workflow.id, Some(execution.id), level, message, data);
        if let Err(e) = self.repository.append_log(&entry).await {
            warn!(execution_id = %execution.id, "Failed to append workflow log: {}", e);
        }
    }
}

/// SUCCESS unless every attempted action failed; no actions is SUCCESS
fn overall_status(results: &[ActionResult]) -> (ExecutionStatus, Option<String>) {
    if results.is_empty() || results.iter().any(|r| r.is_success()) {
        return (ExecutionStatus::Success, None);
    }

    let error = results
        .last()
        .and_then(|r| r.error_message())
        .map(str::to_string);
    (ExecutionStatus::Failed, error)
}
