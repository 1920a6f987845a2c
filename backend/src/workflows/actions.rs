// Workflow Actions - Side effects a workflow performs once it is triggered

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Types of actions that workflows can execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    // Notification actions
    SendEmail,
    SendChatMessage,
    SendSms,
    CreateNotification,

    // Project and task actions
    CreateTask,
    UpdateProjectStatus,
    UpdateProjectField,
    UpdateTaskStatus,
    UpdateTaskPriority,
    AssignTask,
    AddTaskComment,

    // Integration and control flow
    Webhook,
    Delay,

    #[serde(other)]
    Unknown,
}

impl ActionType {
    pub const ALL: [ActionType; 14] = [
        Self::SendEmail,
        Self::SendChatMessage,
        Self::SendSms,
        Self::CreateNotification,
        Self::CreateTask,
        Self::UpdateProjectStatus,
        Self::UpdateProjectField,
        Self::UpdateTaskStatus,
        Self::UpdateTaskPriority,
        Self::AssignTask,
        Self::AddTaskComment,
        Self::Webhook,
        Self::Delay,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendEmail => "SEND_EMAIL",
            Self::SendChatMessage => "SEND_CHAT_MESSAGE",
            Self::SendSms => "SEND_SMS",
            Self::CreateNotification => "CREATE_NOTIFICATION",
            Self::CreateTask => "CREATE_TASK",
            Self::UpdateProjectStatus => "UPDATE_PROJECT_STATUS",
            Self::UpdateProjectField => "UPDATE_PROJECT_FIELD",
            Self::UpdateTaskStatus => "UPDATE_TASK_STATUS",
            Self::UpdateTaskPriority => "UPDATE_TASK_PRIORITY",
            Self::AssignTask => "ASSIGN_TASK",
            Self::AddTaskComment => "ADD_TASK_COMMENT",
            Self::Webhook => "WEBHOOK",
            Self::Delay => "DELAY",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An action as declared on a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDeclaration {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub config: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ActionDeclaration {
    pub fn new(action_type: ActionType, config: Value) -> Self {
        Self {
            action_type,
            order: 0,
            config,
            timeout_seconds: None,
            continue_on_error: false,
            name: None,
        }
    }

    pub fn at_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    // ===== Notification Action Builders =====

    pub fn send_email(to: &str, subject: &str, body: &str) -> Self {
        Self::new(
            ActionType::SendEmail,
            serde_json::json!({
                "to": to,
                "subject": subject,
                "body": body
            }),
        )
    }

    pub fn send_chat_message(channel: &str, message: &str) -> Self {
        Self::new(
            ActionType::SendChatMessage,
            serde_json::json!({
                "channel": channel,
                "message": message
            }),
        )
    }

    pub fn send_sms(to: &str, message: &str) -> Self {
        Self::new(
            ActionType::SendSms,
            serde_json::json!({
                "to": to,
                "message": message
            }),
        )
    }

    pub fn create_notification(user_ids: &str, title: &str, message: &str) -> Self {
        Self::new(
            ActionType::CreateNotification,
            serde_json::json!({
                "userIds": user_ids,
                "title": title,
                "message": message
            }),
        )
    }

    // ===== Project and Task Action Builders =====

    pub fn create_task(title: &str, priority: &str) -> Self {
        Self::new(
            ActionType::CreateTask,
            serde_json::json!({
                "title": title,
                "priority": priority
            }),
        )
    }

    pub fn update_project_status(status: &str) -> Self {
        Self::new(
            ActionType::UpdateProjectStatus,
            serde_json::json!({ "status": status }),
        )
    }

    pub fn update_project_field(field: &str, value: Value) -> Self {
        Self::new(
            ActionType::UpdateProjectField,
            serde_json::json!({
                "field": field,
                "value": value
            }),
        )
    }

    pub fn update_task_status(status: &str) -> Self {
        Self::new(
            ActionType::UpdateTaskStatus,
            serde_json::json!({ "status": status }),
        )
    }

    pub fn update_task_priority(priority: &str) -> Self {
        Self::new(
            ActionType::UpdateTaskPriority,
            serde_json::json!({ "priority": priority }),
        )
    }

    pub fn assign_task(assignee_id: &str) -> Self {
        Self::new(
            ActionType::AssignTask,
            serde_json::json!({ "assigneeId": assignee_id }),
        )
    }

    pub fn add_task_comment(comment: &str, internal: bool) -> Self {
        Self::new(
            ActionType::AddTaskComment,
            serde_json::json!({
                "comment": comment,
                "internal": internal
            }),
        )
    }

    // ===== Integration and Control Flow Builders =====

    pub fn webhook(url: &str, body: Value) -> Self {
        Self::new(
            ActionType::Webhook,
            serde_json::json!({
                "url": url,
                "method": "POST",
                "body": body
            }),
        )
    }

    pub fn delay_ms(milliseconds: u64) -> Self {
        Self::new(
            ActionType::Delay,
            serde_json::json!({ "milliseconds": milliseconds }),
        )
    }
}

/// String or list of strings; a single string may hold comma or semicolon separated values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<String> {
        let items = match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(list) => list,
        };
        items
            .iter()
            .flat_map(|s| s.split([',', ';']))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

fn default_true() -> bool {
    true
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_notification_type() -> String {
    "info".to_string()
}

// Typed per-action configs, decoded after templating

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEmailConfig {
    pub to: OneOrMany,
    #[serde(default)]
    pub cc: Option<OneOrMany>,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub html: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendChatMessageConfig {
    pub channel: String,
    pub message: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendSmsConfig {
    pub to: OneOrMany,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNotificationConfig {
    #[serde(alias = "userId")]
    pub user_ids: OneOrMany,
    pub title: String,
    pub message: String,
    #[serde(default = "default_notification_type")]
    pub notification_type: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskConfig {
    #[serde(default)]
    pub project_id: Option<Uuid>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub assignee_id: Option<Uuid>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub due_in_days: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProjectStatusConfig {
    #[serde(default)]
    pub project_id: Option<Uuid>,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProjectFieldConfig {
    #[serde(default)]
    pub project_id: Option<Uuid>,
    pub field: String,
    pub value: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskStatusConfig {
    #[serde(default)]
    pub task_id: Option<Uuid>,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskPriorityConfig {
    #[serde(default)]
    pub task_id: Option<Uuid>,
    pub priority: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignTaskConfig {
    #[serde(default)]
    pub task_id: Option<Uuid>,
    pub assignee_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddTaskCommentConfig {
    #[serde(default)]
    pub task_id: Option<Uuid>,
    pub comment: String,
    #[serde(default = "default_true")]
    pub internal: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayConfig {
    #[serde(default)]
    pub seconds: Option<u64>,
    #[serde(default)]
    pub milliseconds: Option<u64>,
}

impl DelayConfig {
    pub fn duration(&self) -> ActionOutcome<Duration> {
        let invalid = |message: &str| ActionError::InvalidConfig {
            action_type: ActionType::Delay,
            message: message.to_string(),
        };

        match (self.seconds, self.milliseconds) {
            (None, None) => Err(invalid("seconds or milliseconds is required")),
            (secs, millis) => Duration::from_secs(secs.unwrap_or(0))
                .checked_add(Duration::from_millis(millis.unwrap_or(0)))
                .ok_or_else(|| invalid("delay is out of range")),
        }
    }
}

/// Decode a rendered config into its typed form
pub fn decode_config<T: DeserializeOwned>(action_type: ActionType, config: Value) -> ActionOutcome<T> {
    serde_json::from_value(config).map_err(|e| ActionError::InvalidConfig {
        action_type,
        message: e.to_string(),
    })
}

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("Invalid {action_type} config: {message}")]
    InvalidConfig {
        action_type: ActionType,
        message: String,
    },

    #[error("Unresolved template placeholders: {}", .0.join(", "))]
    Template(Vec<String>),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// At least one target failed; detail lists both sides
    #[error("Delivery failed: {error}")]
    Undelivered { error: String, detail: Value },

    #[error("Domain update failed: {0}")]
    Mutation(String),

    /// Some writes landed before one failed
    #[error("Domain update failed: {error}")]
    PartialMutation { error: String, detail: Value },

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Unknown action type")]
    UnknownType,

    #[error("{0}")]
    MissingTarget(String),

    #[error("Action timeout")]
    Timeout,

    #[error("Action panicked")]
    Panicked,
}

pub type ActionOutcome<T> = Result<T, ActionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionFailure {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl From<&ActionError> for ActionFailure {
    fn from(error: &ActionError) -> Self {
        let detail = match error {
            ActionError::Template(paths) => Some(serde_json::json!({ "unresolved": paths })),
            ActionError::InvalidConfig { action_type, .. } => {
                Some(serde_json::json!({ "actionType": action_type }))
            }
            ActionError::Undelivered { detail, .. } | ActionError::PartialMutation { detail, .. } => {
                Some(detail.clone())
            }
            _ => None,
        };

        Self {
            message: error.to_string(),
            detail,
        }
    }
}

/// Result of executing an action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResult {
    pub action_type: ActionType,
    pub order: i32,
    pub status: ActionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ActionFailure>,
}

impl ActionResult {
    pub fn success(action: &ActionDeclaration, output: Option<Value>) -> Self {
        let now = Utc::now();
        Self {
            action_type: action.action_type,
            order: action.order,
            status: ActionStatus::Success,
            started_at: now,
            completed_at: now,
            duration_ms: 0,
            result: output,
            error: None,
        }
    }

    pub fn failure(action: &ActionDeclaration, error: &ActionError) -> Self {
        let now = Utc::now();
        Self {
            action_type: action.action_type,
            order: action.order,
            status: ActionStatus::Failed,
            started_at: now,
            completed_at: now,
            duration_ms: 0,
            result: None,
            error: Some(ActionFailure::from(error)),
        }
    }

    pub fn timed(mut self, started_at: DateTime<Utc>, completed_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self.completed_at = completed_at;
        self.duration_ms = (completed_at - started_at).num_milliseconds().max(0);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ActionStatus::Success
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }
}

/// Pre-built action sequences for common project workflows
pub mod presets {
    use super::*;

    /// Welcome the client when a project starts
    pub fn welcome_client() -> Vec<ActionDeclaration> {
        vec![
            ActionDeclaration::send_email(
                "{{entity.data.clientEmail}}",
                "Your project {{entity.data.name}} has started",
                "Hello,\n\nWork on {{entity.data.name}} has begun. We will keep you posted.",
            )
            .at_order(1),
            ActionDeclaration::create_task("Schedule kickoff for {{entity.data.name}}", "HIGH")
                .at_order(2)
                .continue_on_error(),
        ]
    }

    /// Escalate an overdue task and tell its assignee
    pub fn escalate_overdue_task() -> Vec<ActionDeclaration> {
        vec![
            ActionDeclaration::update_task_priority("URGENT").at_order(1),
            ActionDeclaration::add_task_comment(
                "Automatically escalated: task passed its due date {{entity.data.dueDate}}",
                true,
            )
            .at_order(2),
            ActionDeclaration::create_notification(
                "{{entity.data.assigneeId}}",
                "Task overdue",
                "{{entity.data.title}} is overdue",
            )
            .at_order(3)
            .continue_on_error(),
        ]
    }
}
