// Workflow Triggers - Event types and the filters that decide whether an event fires a workflow

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use super::conditions::parse_date;
use super::context::{EntityRef, ExecutionContext};
use crate::repository::RepositoryError;

/// Types of events that can trigger workflows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    // Project triggers
    ProjectCreated,
    ProjectUpdated,
    ProjectStatusChanged,
    ProjectCompleted,
    ProjectDeadlineApproaching,
    ProjectBudgetThreshold,

    // Task triggers
    TaskCreated,
    TaskUpdated,
    TaskStatusChanged,
    TaskAssigned,
    TaskPriorityChanged,
    TaskCompleted,
    TaskDueSoon,
    TaskOverdue,

    // Invoice triggers
    InvoiceCreated,
    InvoiceSent,
    InvoicePaid,
    InvoiceOverdue,

    // Client triggers
    ClientCreated,

    // Schedule triggers
    ScheduleHourly,
    ScheduleDaily,
    ScheduleWeekly,
    ScheduleMonthly,

    // External triggers
    Webhook,
    Manual,

    #[serde(other)]
    Unknown,
}

impl TriggerType {
    pub const ALL: [TriggerType; 25] = [
        Self::ProjectCreated,
        Self::ProjectUpdated,
        Self::ProjectStatusChanged,
        Self::ProjectCompleted,
        Self::ProjectDeadlineApproaching,
        Self::ProjectBudgetThreshold,
        Self::TaskCreated,
        Self::TaskUpdated,
        Self::TaskStatusChanged,
        Self::TaskAssigned,
        Self::TaskPriorityChanged,
        Self::TaskCompleted,
        Self::TaskDueSoon,
        Self::TaskOverdue,
        Self::InvoiceCreated,
        Self::InvoiceSent,
        Self::InvoicePaid,
        Self::InvoiceOverdue,
        Self::ClientCreated,
        Self::ScheduleHourly,
        Self::ScheduleDaily,
        Self::ScheduleWeekly,
        Self::ScheduleMonthly,
        Self::Webhook,
        Self::Manual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProjectCreated => "PROJECT_CREATED",
            Self::ProjectUpdated => "PROJECT_UPDATED",
            Self::ProjectStatusChanged => "PROJECT_STATUS_CHANGED",
            Self::ProjectCompleted => "PROJECT_COMPLETED",
            Self::ProjectDeadlineApproaching => "PROJECT_DEADLINE_APPROACHING",
            Self::ProjectBudgetThreshold => "PROJECT_BUDGET_THRESHOLD",
            Self::TaskCreated => "TASK_CREATED",
            Self::TaskUpdated => "TASK_UPDATED",
            Self::TaskStatusChanged => "TASK_STATUS_CHANGED",
            Self::TaskAssigned => "TASK_ASSIGNED",
            Self::TaskPriorityChanged => "TASK_PRIORITY_CHANGED",
            Self::TaskCompleted => "TASK_COMPLETED",
            Self::TaskDueSoon => "TASK_DUE_SOON",
            Self::TaskOverdue => "TASK_OVERDUE",
            Self::InvoiceCreated => "INVOICE_CREATED",
            Self::InvoiceSent => "INVOICE_SENT",
            Self::InvoicePaid => "INVOICE_PAID",
            Self::InvoiceOverdue => "INVOICE_OVERDUE",
            Self::ClientCreated => "CLIENT_CREATED",
            Self::ScheduleHourly => "SCHEDULE_HOURLY",
            Self::ScheduleDaily => "SCHEDULE_DAILY",
            Self::ScheduleWeekly => "SCHEDULE_WEEKLY",
            Self::ScheduleMonthly => "SCHEDULE_MONTHLY",
            Self::Webhook => "WEBHOOK",
            Self::Manual => "MANUAL",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Entity kind the event concerns; `None` for schedule and external triggers
    pub fn entity_kind(&self) -> Option<&'static str> {
        match self {
            Self::ProjectCreated
            | Self::ProjectUpdated
            | Self::ProjectStatusChanged
            | Self::ProjectCompleted
            | Self::ProjectDeadlineApproaching
            | Self::ProjectBudgetThreshold => Some("project"),
            Self::TaskCreated
            | Self::TaskUpdated
            | Self::TaskStatusChanged
            | Self::TaskAssigned
            | Self::TaskPriorityChanged
            | Self::TaskCompleted
            | Self::TaskDueSoon
            | Self::TaskOverdue => Some("task"),
            Self::InvoiceCreated | Self::InvoiceSent | Self::InvoicePaid | Self::InvoiceOverdue => {
                Some("invoice")
            }
            Self::ClientCreated => Some("client"),
            Self::ScheduleHourly
            | Self::ScheduleDaily
            | Self::ScheduleWeekly
            | Self::ScheduleMonthly
            | Self::Webhook
            | Self::Manual
            | Self::Unknown => None,
        }
    }

    pub fn is_schedule(&self) -> bool {
        matches!(
            self,
            Self::ScheduleHourly | Self::ScheduleDaily | Self::ScheduleWeekly | Self::ScheduleMonthly
        )
    }
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown trigger type: {s}"))
    }
}

/// A trigger as declared on a workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerDeclaration {
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "empty_config")]
    pub config: Value,
}

fn default_true() -> bool {
    true
}

fn empty_config() -> Value {
    Value::Object(serde_json::Map::new())
}

impl TriggerDeclaration {
    pub fn new(trigger_type: TriggerType) -> Self {
        Self {
            trigger_type,
            enabled: true,
            config: empty_config(),
        }
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("Invalid {trigger_type} trigger config: {message}")]
    InvalidConfig {
        trigger_type: TriggerType,
        message: String,
    },

    #[error("Entity lookup failed: {0}")]
    Lookup(#[from] RepositoryError),
}

pub type TriggerResult<T> = Result<T, TriggerError>;

/// Read-only access to the current state of a domain entity
#[async_trait]
pub trait EntityLookup: Send + Sync {
    /// Current JSON snapshot of `kind`/`id`, or `None` if it no longer exists
    async fn snapshot(&self, kind: &str, id: &str) -> Result<Option<Value>, RepositoryError>;
}

// Filter configs, one per trigger family

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct FieldsFilter {
    fields: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StatusFilter {
    statuses: Option<Vec<String>>,
    from_statuses: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AssigneeFilter {
    assignee_ids: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PriorityFilter {
    priorities: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct DaysBeforeFilter {
    days_before: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct BudgetFilter {
    percentage: Option<Decimal>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AmountFilter {
    min_amount: Option<Decimal>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct OverdueFilter {
    min_days_overdue: Option<i64>,
}

const COMPLETED_STATUSES: [&str; 2] = ["COMPLETED", "DONE"];
const TERMINAL_STATUSES: [&str; 3] = ["COMPLETED", "DONE", "CANCELLED"];
const DEFAULT_PROJECT_DAYS_BEFORE: i64 = 7;
const DEFAULT_TASK_DAYS_BEFORE: i64 = 1;
const DEFAULT_BUDGET_PERCENTAGE: i64 = 80;
const DEFAULT_MIN_DAYS_OVERDUE: i64 = 1;

/// Entity fields with a lazy fallback to the stored snapshot
struct EntityFields<'a> {
    entity: &'a EntityRef,
    lookup: Option<&'a dyn EntityLookup>,
    snapshot: Option<Option<Value>>,
}

impl<'a> EntityFields<'a> {
    fn new(entity: &'a EntityRef, lookup: Option<&'a dyn EntityLookup>) -> Self {
        Self {
            entity,
            lookup,
            snapshot: None,
        }
    }

    async fn get(&mut self, field: &str) -> TriggerResult<Option<Value>> {
        if let Some(value) = self.entity.data.get(field).filter(|v| !v.is_null()) {
            return Ok(Some(value.clone()));
        }

        let Some(lookup) = self.lookup else {
            return Ok(None);
        };

        if self.snapshot.is_none() {
            debug!(
                "Loading {} {} snapshot for trigger field '{}'",
                self.entity.entity_type, self.entity.id, field
            );
            let snapshot = lookup
                .snapshot(&self.entity.entity_type.to_lowercase(), &self.entity.id)
                .await?;
            self.snapshot = Some(snapshot);
        }

        Ok(self
            .snapshot
            .as_ref()
            .and_then(|s| s.as_ref())
            .and_then(|s| s.get(field))
            .filter(|v| !v.is_null())
            .cloned())
    }

    async fn text(&mut self, field: &str) -> TriggerResult<Option<String>> {
        Ok(self.get(field).await?.and_then(|v| v.as_str().map(str::to_string)))
    }

    async fn date(&mut self, field: &str) -> TriggerResult<Option<NaiveDate>> {
        Ok(self
            .get(field)
            .await?
            .and_then(|v| parse_date(&v))
            .map(|dt| dt.date_naive()))
    }

    async fn decimal(&mut self, field: &str) -> TriggerResult<Option<Decimal>> {
        Ok(self.get(field).await?.and_then(|v| to_decimal(&v)))
    }

    /// New value of `field`: the recorded change if present, else the current value
    async fn new_text(&mut self, field: &str) -> TriggerResult<Option<String>> {
        if let Some(change) = self.entity.change(field) {
            if let Some(s) = change.new.as_str() {
                return Ok(Some(s.to_string()));
            }
        }
        self.text(field).await
    }
}

fn to_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .ok()
            .or_else(|| n.as_f64().and_then(|f| Decimal::try_from(f).ok())),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn listed(allowed: &Option<Vec<String>>, value: Option<&str>) -> bool {
    match allowed {
        None => true,
        Some(list) if list.is_empty() => true,
        Some(list) => value.is_some_and(|v| list.iter().any(|a| a.eq_ignore_ascii_case(v))),
    }
}

fn is_one_of(status: Option<&str>, set: &[&str]) -> bool {
    status.is_some_and(|s| set.iter().any(|t| t.eq_ignore_ascii_case(s)))
}

/// Decides whether a workflow's declared triggers match an event
#[derive(Clone, Default)]
pub struct TriggerEvaluator {
    lookup: Option<Arc<dyn EntityLookup>>,
}

impl TriggerEvaluator {
    pub fn new() -> Self {
        Self { lookup: None }
    }

    pub fn with_lookup(mut self, lookup: Arc<dyn EntityLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    /// All enabled declarations must match. No enabled declarations means triggered.
    pub async fn evaluate(
        &self,
        triggers: &[TriggerDeclaration],
        context: &ExecutionContext,
    ) -> TriggerResult<bool> {
        for declaration in triggers.iter().filter(|t| t.enabled) {
            if !self.matches(declaration, context).await? {
                debug!(
                    "Trigger {} did not match event from {}",
                    declaration.trigger_type, context.trigger_source
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn matches(
        &self,
        declaration: &TriggerDeclaration,
        context: &ExecutionContext,
    ) -> TriggerResult<bool> {
        let trigger_type = declaration.trigger_type;

        if trigger_type == TriggerType::Unknown {
            warn!("Workflow declares an unknown trigger type; treating as not matched");
            return Ok(false);
        }

        let Some(kind) = trigger_type.entity_kind() else {
            // Schedule, webhook and manual triggers match any event routed to them
            return Ok(true);
        };

        let Some(entity) = context.entity.as_ref().filter(|e| e.is_kind(kind)) else {
            return Ok(false);
        };

        let mut fields = EntityFields::new(entity, self.lookup.as_deref());
        let today = context.timestamp.date_naive();

        match trigger_type {
            TriggerType::ProjectCreated
            | TriggerType::TaskCreated
            | TriggerType::InvoiceCreated
            | TriggerType::InvoiceSent
            | TriggerType::ClientCreated => Ok(true),

            TriggerType::ProjectUpdated | TriggerType::TaskUpdated => {
                let filter: FieldsFilter = parse_config(declaration)?;
                Ok(match filter.fields {
                    Some(wanted) if !wanted.is_empty() => wanted
                        .iter()
                        .any(|field| entity.change(field).is_some()),
                    _ => true,
                })
            }

            TriggerType::ProjectStatusChanged | TriggerType::TaskStatusChanged => {
                let filter: StatusFilter = parse_config(declaration)?;
                let new_status = fields.new_text("status").await?;
                let old_status = entity
                    .change("status")
                    .and_then(|c| c.old.as_str().map(str::to_string));

                Ok(listed(&filter.statuses, new_status.as_deref())
                    && listed(&filter.from_statuses, old_status.as_deref()))
            }

            TriggerType::ProjectCompleted | TriggerType::TaskCompleted => {
                let status = fields.new_text("status").await?;
                Ok(is_one_of(status.as_deref(), &COMPLETED_STATUSES))
            }

            TriggerType::TaskAssigned => {
                let filter: AssigneeFilter = parse_config(declaration)?;
                let assignee = fields.get("assigneeId").await?.map(|v| match v {
                    Value::String(s) => s,
                    other => other.to_string(),
                });
                Ok(assignee.is_some() && listed(&filter.assignee_ids, assignee.as_deref()))
            }

            TriggerType::TaskPriorityChanged => {
                let filter: PriorityFilter = parse_config(declaration)?;
                let priority = fields.new_text("priority").await?;
                Ok(listed(&filter.priorities, priority.as_deref()))
            }

            TriggerType::ProjectDeadlineApproaching | TriggerType::TaskDueSoon => {
                let filter: DaysBeforeFilter = parse_config(declaration)?;
                let (field, default_days) = if trigger_type == TriggerType::TaskDueSoon {
                    ("dueDate", DEFAULT_TASK_DAYS_BEFORE)
                } else {
                    ("endDate", DEFAULT_PROJECT_DAYS_BEFORE)
                };
                let days_before = filter.days_before.unwrap_or(default_days);

                let Some(deadline) = fields.date(field).await? else {
                    return Ok(false);
                };
                let days_until = (deadline - today).num_days();
                let status = fields.text("status").await?;

                Ok((0..=days_before).contains(&days_until)
                    && !is_one_of(status.as_deref(), &TERMINAL_STATUSES))
            }

            TriggerType::TaskOverdue => {
                let Some(due) = fields.date("dueDate").await? else {
                    return Ok(false);
                };
                let status = fields.text("status").await?;
                Ok(due < today && !is_one_of(status.as_deref(), &TERMINAL_STATUSES))
            }

            TriggerType::ProjectBudgetThreshold => {
                let filter: BudgetFilter = parse_config(declaration)?;
                let threshold = filter
                    .percentage
                    .unwrap_or_else(|| Decimal::from(DEFAULT_BUDGET_PERCENTAGE));

                let (Some(budget), Some(spent)) =
                    (fields.decimal("budget").await?, fields.decimal("spent").await?)
                else {
                    return Ok(false);
                };
                if budget <= Decimal::ZERO {
                    return Ok(false);
                }

                // Overflow is a data error
                let Some(usage) = spent
                    .checked_div(budget)
                    .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
                else {
                    warn!("Budget usage for spent {} over budget {} is out of range", spent, budget);
                    return Ok(false);
                };
                Ok(usage >= threshold)
            }

            TriggerType::InvoicePaid => {
                let filter: AmountFilter = parse_config(declaration)?;
                match filter.min_amount {
                    None => Ok(true),
                    Some(min) => Ok(fields
                        .decimal("amount")
                        .await?
                        .is_some_and(|amount| amount >= min)),
                }
            }

            TriggerType::InvoiceOverdue => {
                let filter: OverdueFilter = parse_config(declaration)?;
                let min_days = filter.min_days_overdue.unwrap_or(DEFAULT_MIN_DAYS_OVERDUE);

                let Some(due) = fields.date("dueDate").await? else {
                    return Ok(false);
                };
                let status = fields.text("status").await?;
                let days_overdue = (today - due).num_days();

                Ok(days_overdue >= min_days && !is_one_of(status.as_deref(), &["PAID"]))
            }

            TriggerType::ScheduleHourly
            | TriggerType::ScheduleDaily
            | TriggerType::ScheduleWeekly
            | TriggerType::ScheduleMonthly
            | TriggerType::Webhook
            | TriggerType::Manual
            | TriggerType::Unknown => Ok(true),
        }
    }
}

fn parse_config<T: DeserializeOwned + Default>(declaration: &TriggerDeclaration) -> TriggerResult<T> {
    if declaration.config.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(declaration.config.clone()).map_err(|e| TriggerError::InvalidConfig {
        trigger_type: declaration.trigger_type,
        message: e.to_string(),
    })
}
