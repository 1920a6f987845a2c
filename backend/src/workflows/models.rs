// Workflow Models - Definitions, executions and audit log entries

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use super::actions::{ActionDeclaration, ActionResult, ActionType};
use super::conditions::{ConditionError, ConditionTree};
use super::context::{ExecutionContext, TriggeredBy};
use super::triggers::{TriggerDeclaration, TriggerType};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStats {
    pub execution_count: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub avg_execution_ms: f64,
    pub last_execution_at: Option<DateTime<Utc>>,
}

impl WorkflowStats {
    /// Fold one finalised attempt into the counters
    pub fn record(&mut self, status: ExecutionStatus, duration_ms: i64, at: DateTime<Utc>) {
        self.execution_count += 1;
        match status {
            ExecutionStatus::Success => self.success_count += 1,
            ExecutionStatus::Failed | ExecutionStatus::Retrying => self.failure_count += 1,
            _ => {}
        }
        let n = self.execution_count as f64;
        self.avg_execution_ms += (duration_ms as f64 - self.avg_execution_ms) / n;
        self.last_execution_at = Some(at);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub enabled: bool,
    #[serde(default)]
    pub triggers: Vec<TriggerDeclaration>,
    #[serde(default)]
    pub conditions: Option<ConditionTree>,
    #[serde(default)]
    pub actions: Vec<ActionDeclaration>,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub stats: WorkflowStats,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_retry_delay() -> u64 {
    60
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkflowValidationError {
    #[error("Workflow name must not be empty")]
    EmptyName,

    #[error("Workflow declares an unknown trigger type")]
    UnknownTrigger,

    #[error("Action at order {order} has an unknown type")]
    UnknownAction { order: i32 },

    #[error(transparent)]
    Condition(#[from] ConditionError),
}

impl Workflow {
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: None,
            enabled: true,
            triggers: Vec::new(),
            conditions: None,
            actions: Vec::new(),
            max_retries: 0,
            retry_delay_seconds: default_retry_delay(),
            timeout_seconds: None,
            stats: WorkflowStats::default(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_trigger(mut self, trigger: TriggerDeclaration) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn with_conditions(mut self, conditions: ConditionTree) -> Self {
        self.conditions = Some(conditions);
        self
    }

    pub fn with_action(mut self, action: ActionDeclaration) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_actions(mut self, actions: Vec<ActionDeclaration>) -> Self {
        self.actions.extend(actions);
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay_seconds: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_delay_seconds = retry_delay_seconds;
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn trigger_types(&self) -> Vec<TriggerType> {
        self.triggers.iter().map(|t| t.trigger_type).collect()
    }

    pub fn declares_trigger(&self, trigger_type: TriggerType) -> bool {
        self.triggers.iter().any(|t| t.trigger_type == trigger_type)
    }

    /// Static checks run before a definition is stored
    pub fn validate(&self) -> Result<(), WorkflowValidationError> {
        if self.name.trim().is_empty() {
            return Err(WorkflowValidationError::EmptyName);
        }
        if self.declares_trigger(TriggerType::Unknown) {
            return Err(WorkflowValidationError::UnknownTrigger);
        }
        if let Some(action) = self.actions.iter().find(|a| a.action_type == ActionType::Unknown) {
            return Err(WorkflowValidationError::UnknownAction {
                order: action.order,
            });
        }
        if let Some(conditions) = &self.conditions {
            conditions.validate()?;
        }
        Ok(())
    }
}

/// PENDING -> RUNNING -> SUCCESS | FAILED | CANCELLED | RETRYING
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
    Retrying,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Retrying => "RETRYING",
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            "RETRYING" => Ok(Self::Retrying),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    pub triggered_by: TriggeredBy,
    pub trigger_source: String,
    pub context: ExecutionContext,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub actions_executed: i32,
    pub actions_success: i32,
    pub actions_failed: i32,
    pub results: Vec<ActionResult>,
    pub retry_count: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub retry_of: Option<Uuid>,
    pub error: Option<String>,
}

impl WorkflowExecution {
    pub fn new(workflow_id: Uuid, context: ExecutionContext, retry_count: u32, retry_of: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            status: ExecutionStatus::Pending,
            triggered_by: context.triggered_by,
            trigger_source: context.trigger_source.clone(),
            context,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            actions_executed: 0,
            actions_success: 0,
            actions_failed: 0,
            results: Vec::new(),
            retry_count,
            next_retry_at: None,
            retry_of,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = ExecutionStatus::Running;
    }

    /// Close the attempt with a final status and its action results
    pub fn finish(&mut self, status: ExecutionStatus, results: Vec<ActionResult>, error: Option<String>) {
        let now = Utc::now();
        self.actions_executed = results.len() as i32;
        self.actions_success = results.iter().filter(|r| r.is_success()).count() as i32;
        self.actions_failed = self.actions_executed - self.actions_success;
        self.results = results;
        self.status = status;
        self.error = error;
        self.completed_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds().max(0));
    }

    /// Close as RETRYING; the next attempt carries `retry_count + 1`
    pub fn schedule_retry(&mut self, delay_seconds: u64, error: String) {
        self.finish(ExecutionStatus::Retrying, Vec::new(), Some(error));
        self.retry_count += 1;
        let delay = Duration::seconds(delay_seconds.min(i64::MAX as u64 / 1000) as i64);
        self.next_retry_at = self.completed_at.and_then(|at| at.checked_add_signed(delay));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INFO" => Ok(Self::Info),
            "WARNING" => Ok(Self::Warning),
            "ERROR" => Ok(Self::Error),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

/// Append-only audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowLog {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub execution_id: Option<Uuid>,
    pub level: LogLevel,
    pub message: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl WorkflowLog {
    pub fn new(workflow_id: Uuid, execution_id: Option<Uuid>, level: LogLevel, message: &str, data: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            execution_id,
            level,
            message: message.to_string(),
            data,
            timestamp: Utc::now(),
        }
    }
}

/// What callers get back from an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    pub status: ExecutionStatus,
    pub results: Vec<ActionResult>,
    pub actions_executed: i32,
    pub actions_success: i32,
    pub actions_failed: i32,
    pub duration_ms: i64,
    pub error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl ExecutionResult {
    /// True when any action failed, including partially successful runs
    pub fn has_failures(&self) -> bool {
        self.actions_failed > 0
    }
}

impl From<&WorkflowExecution> for ExecutionResult {
    fn from(execution: &WorkflowExecution) -> Self {
        Self {
            execution_id: execution.id,
            workflow_id: execution.workflow_id,
            status: execution.status,
            results: execution.results.clone(),
            actions_executed: execution.actions_executed,
            actions_success: execution.actions_success,
            actions_failed: execution.actions_failed,
            duration_ms: execution.duration_ms.unwrap_or(0),
            error: execution.error.clone(),
            next_retry_at: execution.next_retry_at,
        }
    }
}
