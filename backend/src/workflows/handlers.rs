// Action Handlers - One handler per action type, dispatched through a registry

use async_trait::async_trait;
use autoflow_shared::{NewNotification, NewTask};
use chrono::TimeDelta;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::actions::*;
use super::context::ExecutionContext;
use crate::services::{DeliveryChannel, DomainMutations, HttpDispatcher, RenderedMessage, WebhookRequest};
use crate::validation::{recipients, RecipientKind};

/// What a handler sees besides its rendered config
pub struct HandlerContext<'a> {
    pub execution: &'a ExecutionContext,
    pub workflow_id: Uuid,
    pub execution_id: Uuid,
}

impl HandlerContext<'_> {
    /// Explicit id, else the context entity's id when it is of `kind`
    fn target_id(&self, explicit: Option<Uuid>, kind: &str, action_type: ActionType, key: &str) -> ActionOutcome<Uuid> {
        if let Some(id) = explicit {
            return Ok(id);
        }

        self.execution
            .entity
            .as_ref()
            .filter(|e| e.is_kind(kind))
            .and_then(|e| e.uuid())
            .ok_or_else(|| {
                ActionError::MissingTarget(format!("{} requires {} or a {} entity", action_type, key, kind))
            })
    }
}

#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(&self, config: Value, ctx: &HandlerContext<'_>) -> ActionOutcome<Value>;
}

/// Services the built-in handlers talk to
#[derive(Clone)]
pub struct ActionCollaborators {
    pub email: Arc<dyn DeliveryChannel>,
    pub chat: Arc<dyn DeliveryChannel>,
    pub sms: Arc<dyn DeliveryChannel>,
    pub http: Arc<dyn HttpDispatcher>,
    pub domain: Arc<dyn DomainMutations>,
}

/// Maps action types to their handlers
#[derive(Clone)]
pub struct ActionRegistry {
    handlers: HashMap<ActionType, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new(collaborators: &ActionCollaborators) -> Self {
        let handlers = ActionType::ALL
            .iter()
            .filter_map(|t| default_handler(*t, collaborators).map(|h| (*t, h)))
            .collect();
        Self { handlers }
    }

    /// Replace the handler for one action type
    pub fn register(&mut self, action_type: ActionType, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(action_type, handler);
    }

    pub fn get(&self, action_type: ActionType) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(&action_type).cloned()
    }
}

fn default_handler(action_type: ActionType, c: &ActionCollaborators) -> Option<Arc<dyn ActionHandler>> {
    let handler: Arc<dyn ActionHandler> = match action_type {
        ActionType::SendEmail => Arc::new(SendEmailHandler { channel: c.email.clone() }),
        ActionType::SendChatMessage => Arc::new(SendChatMessageHandler { channel: c.chat.clone() }),
        ActionType::SendSms => Arc::new(SendSmsHandler { channel: c.sms.clone() }),
        ActionType::CreateNotification => Arc::new(CreateNotificationHandler { domain: c.domain.clone() }),
        ActionType::CreateTask => Arc::new(CreateTaskHandler { domain: c.domain.clone() }),
        ActionType::UpdateProjectStatus => Arc::new(UpdateProjectStatusHandler { domain: c.domain.clone() }),
        ActionType::UpdateProjectField => Arc::new(UpdateProjectFieldHandler { domain: c.domain.clone() }),
        ActionType::UpdateTaskStatus => Arc::new(UpdateTaskStatusHandler { domain: c.domain.clone() }),
        ActionType::UpdateTaskPriority => Arc::new(UpdateTaskPriorityHandler { domain: c.domain.clone() }),
        ActionType::AssignTask => Arc::new(AssignTaskHandler { domain: c.domain.clone() }),
        ActionType::AddTaskComment => Arc::new(AddTaskCommentHandler { domain: c.domain.clone() }),
        ActionType::Webhook => Arc::new(WebhookHandler { http: c.http.clone() }),
        ActionType::Delay => Arc::new(DelayHandler),
        ActionType::Unknown => return None,
    };
    Some(handler)
}

/// Send to every target; any failed target fails the action
async fn deliver_all(
    channel: &dyn DeliveryChannel,
    targets: &[String],
    message: &RenderedMessage,
) -> ActionOutcome<Value> {
    let mut delivered = Vec::new();
    let mut failed = Vec::new();
    let mut last_error = None;

    for (i, target) in targets.iter().enumerate() {
        // cc recipients get a single copy
        let message = if i == 0 {
            message.clone()
        } else {
            message.clone().with_cc(Vec::new())
        };

        let report = channel.send(target, &message).await;
        if report.success {
            delivered.push(json!({ "to": target, "messageId": report.provider_message_id }));
        } else {
            warn!("{} delivery to {} failed: {:?}", channel.name(), target, report.error);
            failed.push(json!({ "to": target, "error": report.error }));
            last_error = report.error;
        }
    }

    let error = last_error.unwrap_or_else(|| format!("no {} recipients", channel.name()));
    if delivered.is_empty() && failed.len() <= 1 {
        return Err(ActionError::Delivery(error));
    }
    if !failed.is_empty() {
        return Err(ActionError::Undelivered {
            error,
            detail: json!({
                "channel": channel.name(),
                "delivered": delivered,
                "failed": failed,
            }),
        });
    }

    Ok(json!({
        "channel": channel.name(),
        "delivered": delivered,
    }))
}

fn mutation_error(e: crate::services::DomainError) -> ActionError {
    ActionError::Mutation(e.to_string())
}

struct SendEmailHandler {
    channel: Arc<dyn DeliveryChannel>,
}

#[async_trait]
impl ActionHandler for SendEmailHandler {
    async fn execute(&self, config: Value, _ctx: &HandlerContext<'_>) -> ActionOutcome<Value> {
        let config: SendEmailConfig = decode_config(ActionType::SendEmail, config)?;

        let to = recipients(&config.to.into_vec(), RecipientKind::Email);
        if to.is_empty() {
            return Err(ActionError::Delivery("No valid email recipients".to_string()));
        }
        let cc = config
            .cc
            .map(|cc| recipients(&cc.into_vec(), RecipientKind::Email))
            .unwrap_or_default();

        let message = RenderedMessage::text(config.body)
            .with_subject(config.subject)
            .as_html(config.html)
            .with_cc(cc);

        deliver_all(self.channel.as_ref(), &to, &message).await
    }
}

struct SendChatMessageHandler {
    channel: Arc<dyn DeliveryChannel>,
}

#[async_trait]
impl ActionHandler for SendChatMessageHandler {
    async fn execute(&self, config: Value, _ctx: &HandlerContext<'_>) -> ActionOutcome<Value> {
        let config: SendChatMessageConfig = decode_config(ActionType::SendChatMessage, config)?;

        let mut message = RenderedMessage::text(config.message);
        if let Some(title) = config.title {
            message = message.with_subject(title);
        }

        deliver_all(self.channel.as_ref(), &[config.channel], &message).await
    }
}

struct SendSmsHandler {
    channel: Arc<dyn DeliveryChannel>,
}

#[async_trait]
impl ActionHandler for SendSmsHandler {
    async fn execute(&self, config: Value, _ctx: &HandlerContext<'_>) -> ActionOutcome<Value> {
        let config: SendSmsConfig = decode_config(ActionType::SendSms, config)?;

        let to = recipients(&config.to.into_vec(), RecipientKind::Phone);
        if to.is_empty() {
            return Err(ActionError::Delivery("No valid phone numbers".to_string()));
        }

        deliver_all(self.channel.as_ref(), &to, &RenderedMessage::text(config.message)).await
    }
}

struct CreateNotificationHandler {
    domain: Arc<dyn DomainMutations>,
}

#[async_trait]
impl ActionHandler for CreateNotificationHandler {
    async fn execute(&self, config: Value, ctx: &HandlerContext<'_>) -> ActionOutcome<Value> {
        let config: CreateNotificationConfig = decode_config(ActionType::CreateNotification, config)?;

        let user_ids: Vec<Uuid> = config
            .user_ids
            .into_vec()
            .iter()
            .filter_map(|id| match id.parse() {
                Ok(uuid) => Some(uuid),
                Err(_) => {
                    warn!("Skipping notification for invalid user id '{}'", id);
                    None
                }
            })
            .collect();

        if user_ids.is_empty() {
            return Err(ActionError::InvalidConfig {
                action_type: ActionType::CreateNotification,
                message: "no valid user ids".to_string(),
            });
        }

        let entity = ctx.execution.entity.as_ref();
        let mut created = Vec::with_capacity(user_ids.len());
        for user_id in user_ids {
            let outcome = self
                .domain
                .create_notification(NewNotification {
                    user_id,
                    title: config.title.clone(),
                    message: config.message.clone(),
                    notification_type: config.notification_type.clone(),
                    entity_type: entity.map(|e| e.entity_type.clone()),
                    entity_id: entity.and_then(|e| e.uuid()),
                })
                .await;

            match outcome {
                Ok(outcome) => created.push(outcome.entity_id),
                Err(e) if created.is_empty() => return Err(mutation_error(e)),
                Err(e) => {
                    warn!("Notification for user {} failed after {} were created: {}", user_id, created.len(), e);
                    return Err(ActionError::PartialMutation {
                        error: e.to_string(),
                        detail: json!({ "notificationIds": created, "failedUserId": user_id }),
                    });
                }
            }
        }

        Ok(json!({ "notificationIds": created }))
    }
}

struct CreateTaskHandler {
    domain: Arc<dyn DomainMutations>,
}

#[async_trait]
impl ActionHandler for CreateTaskHandler {
    async fn execute(&self, config: Value, ctx: &HandlerContext<'_>) -> ActionOutcome<Value> {
        let config: CreateTaskConfig = decode_config(ActionType::CreateTask, config)?;

        // A task entity carries its project id in its data
        let from_task = ctx
            .execution
            .entity
            .as_ref()
            .filter(|e| e.is_kind("task"))
            .and_then(|e| e.data.get("projectId"))
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok());
        let project_id = ctx.target_id(
            config.project_id.or(from_task),
            "project",
            ActionType::CreateTask,
            "projectId",
        )?;

        let due_date = match config.due_in_days {
            Some(days) => Some(
                TimeDelta::try_days(days)
                    .and_then(|offset| ctx.execution.timestamp.date_naive().checked_add_signed(offset))
                    .ok_or_else(|| ActionError::InvalidConfig {
                        action_type: ActionType::CreateTask,
                        message: format!("dueInDays {} is out of range", days),
                    })?,
            ),
            None => None,
        };

        let outcome = self
            .domain
            .create_task(NewTask {
                project_id,
                title: config.title.clone(),
                description: config.description,
                assignee_id: config.assignee_id,
                priority: config.priority.unwrap_or_else(|| "MEDIUM".to_string()),
                due_date,
            })
            .await
            .map_err(mutation_error)?;

        info!("Workflow {} created task {}", ctx.workflow_id, outcome.entity_id);
        Ok(json!({
            "taskId": outcome.entity_id,
            "projectId": project_id,
            "title": config.title,
            "dueDate": due_date,
        }))
    }
}

struct UpdateProjectStatusHandler {
    domain: Arc<dyn DomainMutations>,
}

#[async_trait]
impl ActionHandler for UpdateProjectStatusHandler {
    async fn execute(&self, config: Value, ctx: &HandlerContext<'_>) -> ActionOutcome<Value> {
        let config: UpdateProjectStatusConfig = decode_config(ActionType::UpdateProjectStatus, config)?;
        let project_id = ctx.target_id(config.project_id, "project", ActionType::UpdateProjectStatus, "projectId")?;

        let outcome = self
            .domain
            .update_project_status(project_id, config.status)
            .await
            .map_err(mutation_error)?;
        Ok(json!(outcome))
    }
}

struct UpdateProjectFieldHandler {
    domain: Arc<dyn DomainMutations>,
}

#[async_trait]
impl ActionHandler for UpdateProjectFieldHandler {
    async fn execute(&self, config: Value, ctx: &HandlerContext<'_>) -> ActionOutcome<Value> {
        let config: UpdateProjectFieldConfig = decode_config(ActionType::UpdateProjectField, config)?;
        let project_id = ctx.target_id(config.project_id, "project", ActionType::UpdateProjectField, "projectId")?;

        let outcome = self
            .domain
            .update_project_field(project_id, config.field, config.value)
            .await
            .map_err(mutation_error)?;
        Ok(json!(outcome))
    }
}

struct UpdateTaskStatusHandler {
    domain: Arc<dyn DomainMutations>,
}

#[async_trait]
impl ActionHandler for UpdateTaskStatusHandler {
    async fn execute(&self, config: Value, ctx: &HandlerContext<'_>) -> ActionOutcome<Value> {
        let config: UpdateTaskStatusConfig = decode_config(ActionType::UpdateTaskStatus, config)?;
        let task_id = ctx.target_id(config.task_id, "task", ActionType::UpdateTaskStatus, "taskId")?;

        let outcome = self
            .domain
            .update_task_status(task_id, config.status)
            .await
            .map_err(mutation_error)?;
        Ok(json!(outcome))
    }
}

struct UpdateTaskPriorityHandler {
    domain: Arc<dyn DomainMutations>,
}

#[async_trait]
impl ActionHandler for UpdateTaskPriorityHandler {
    async fn execute(&self, config: Value, ctx: &HandlerContext<'_>) -> ActionOutcome<Value> {
        let config: UpdateTaskPriorityConfig = decode_config(ActionType::UpdateTaskPriority, config)?;
        let task_id = ctx.target_id(config.task_id, "task", ActionType::UpdateTaskPriority, "taskId")?;

        let outcome = self
            .domain
            .update_task_priority(task_id, config.priority)
            .await
            .map_err(mutation_error)?;
        Ok(json!(outcome))
    }
}

struct AssignTaskHandler {
    domain: Arc<dyn DomainMutations>,
}

#[async_trait]
impl ActionHandler for AssignTaskHandler {
    async fn execute(&self, config: Value, ctx: &HandlerContext<'_>) -> ActionOutcome<Value> {
        let config: AssignTaskConfig = decode_config(ActionType::AssignTask, config)?;
        let task_id = ctx.target_id(config.task_id, "task", ActionType::AssignTask, "taskId")?;

        let outcome = self
            .domain
            .assign_task(task_id, config.assignee_id)
            .await
            .map_err(mutation_error)?;
        Ok(json!(outcome))
    }
}

struct AddTaskCommentHandler {
    domain: Arc<dyn DomainMutations>,
}

#[async_trait]
impl ActionHandler for AddTaskCommentHandler {
    async fn execute(&self, config: Value, ctx: &HandlerContext<'_>) -> ActionOutcome<Value> {
        let config: AddTaskCommentConfig = decode_config(ActionType::AddTaskComment, config)?;
        let task_id = ctx.target_id(config.task_id, "task", ActionType::AddTaskComment, "taskId")?;

        let outcome = self
            .domain
            .add_task_comment(task_id, config.comment, config.internal)
            .await
            .map_err(mutation_error)?;
        Ok(json!({ "commentId": outcome.entity_id, "taskId": task_id, "internal": config.internal }))
    }
}

struct WebhookHandler {
    http: Arc<dyn HttpDispatcher>,
}

#[async_trait]
impl ActionHandler for WebhookHandler {
    async fn execute(&self, config: Value, ctx: &HandlerContext<'_>) -> ActionOutcome<Value> {
        let config: WebhookConfig = decode_config(ActionType::Webhook, config)?;

        let request = WebhookRequest {
            method: config.method,
            url: config.url,
            headers: config.headers,
            body: config.body,
        };

        let response = self
            .http
            .dispatch(request)
            .await
            .map_err(|e| ActionError::Http(e.to_string()))?;

        info!(
            "Webhook for execution {} answered with status {}",
            ctx.execution_id, response.status
        );
        Ok(json!({ "status": response.status, "body": response.body }))
    }
}

struct DelayHandler;

#[async_trait]
impl ActionHandler for DelayHandler {
    async fn execute(&self, config: Value, _ctx: &HandlerContext<'_>) -> ActionOutcome<Value> {
        let config: DelayConfig = decode_config(ActionType::Delay, config)?;
        let duration = config.duration()?;

        tokio::time::sleep(duration).await;
        Ok(json!({ "delayedMs": duration.as_millis() as u64 }))
    }
}
