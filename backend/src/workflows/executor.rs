// Workflow Executor - Runs a workflow's actions in order

use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::actions::{ActionDeclaration, ActionError, ActionResult, ActionType};
use super::context::ExecutionContext;
use super::handlers::{ActionCollaborators, ActionHandler, ActionRegistry, HandlerContext};
use super::models::Workflow;
use super::template::{self, TemplateMode};

const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(300);

pub struct ActionExecutor {
    registry: ActionRegistry,
    default_timeout: Duration,
    template_mode: TemplateMode,
}

impl ActionExecutor {
    pub fn new(collaborators: ActionCollaborators) -> Self {
        Self {
            registry: ActionRegistry::new(&collaborators),
            default_timeout: DEFAULT_ACTION_TIMEOUT,
            template_mode: TemplateMode::default(),
        }
    }

    pub fn with_registry(mut self, registry: ActionRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Override the handler for one action type
    pub fn with_handler(mut self, action_type: ActionType, handler: Arc<dyn ActionHandler>) -> Self {
        self.registry.register(action_type, handler);
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_template_mode(mut self, mode: TemplateMode) -> Self {
        self.template_mode = mode;
        self
    }

    /// Action timeout, else workflow timeout, else the executor default
    pub fn effective_timeout(&self, action: &ActionDeclaration, workflow: &Workflow) -> Duration {
        action
            .timeout_seconds
            .or(workflow.timeout_seconds)
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout)
    }

    /// Execute actions sorted by `order`. A failed action without
    /// `continue_on_error` ends the batch; its result is the last one returned.
    pub async fn execute_actions(
        &self,
        actions: &[ActionDeclaration],
        ctx: &ExecutionContext,
        workflow: &Workflow,
        execution_id: Uuid,
    ) -> Vec<ActionResult> {
        let mut ordered: Vec<&ActionDeclaration> = actions.iter().collect();
        ordered.sort_by_key(|a| a.order);

        let namespace = ctx.namespace();
        let handler_ctx = HandlerContext {
            execution: ctx,
            workflow_id: workflow.id,
            execution_id,
        };

        let mut results = Vec::with_capacity(ordered.len());
        for action in ordered {
            let timeout = self.effective_timeout(action, workflow);
            let result = self.execute_action(action, &namespace, &handler_ctx, timeout).await;
            let stop = !result.is_success() && !action.continue_on_error;
            results.push(result);

            if stop {
                warn!(
                    workflow_id = %workflow.id,
                    execution_id = %execution_id,
                    "Stopping after failed {} action at order {}",
                    action.action_type,
                    action.order
                );
                break;
            }
        }

        results
    }

    async fn execute_action(
        &self,
        action: &ActionDeclaration,
        namespace: &serde_json::Value,
        ctx: &HandlerContext<'_>,
        timeout: Duration,
    ) -> ActionResult {
        let started_at = Utc::now();
        info!(
            workflow_id = %ctx.workflow_id,
            execution_id = %ctx.execution_id,
            action_type = %action.action_type,
            "Executing action {}",
            action.name.as_deref().unwrap_or(action.action_type.as_str())
        );

        let outcome = match self.prepare(action, namespace) {
            Ok((handler, config)) => {
                // A panicking handler still yields a failed result
                let run = AssertUnwindSafe(handler.execute(config, ctx)).catch_unwind();
                match tokio::time::timeout(timeout, run).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(_)) => Err(ActionError::Panicked),
                    Err(_) => Err(ActionError::Timeout),
                }
            }
            Err(e) => Err(e),
        };

        let result = match outcome {
            Ok(output) => ActionResult::success(action, Some(output)),
            Err(e) => {
                error!(
                    workflow_id = %ctx.workflow_id,
                    execution_id = %ctx.execution_id,
                    action_type = %action.action_type,
                    "Action failed: {}",
                    e
                );
                ActionResult::failure(action, &e)
            }
        };

        result.timed(started_at, Utc::now())
    }

    /// Look up the handler and render the config
    fn prepare(
        &self,
        action: &ActionDeclaration,
        namespace: &serde_json::Value,
    ) -> Result<(Arc<dyn ActionHandler>, serde_json::Value), ActionError> {
        let handler = self
            .registry
            .get(action.action_type)
            .ok_or(ActionError::UnknownType)?;

        let rendered = template::render(&action.config, namespace);
        if !rendered.is_complete() {
            match self.template_mode {
                TemplateMode::Strict => return Err(ActionError::Template(rendered.unresolved)),
                TemplateMode::Lenient => warn!(
                    "Leaving unresolved placeholders in {} config: {}",
                    action.action_type,
                    rendered.unresolved.join(", ")
                ),
            }
        }

        Ok((handler, rendered.value))
    }
}
