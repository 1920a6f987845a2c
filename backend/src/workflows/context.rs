// Execution Context - Read-only snapshot of the event that started a workflow

use autoflow_shared::Actor;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// What kind of origin fired the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggeredBy {
    UserAction,
    Schedule,
    Webhook,
}

impl TriggeredBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserAction => "USER_ACTION",
            Self::Schedule => "SCHEDULE",
            Self::Webhook => "WEBHOOK",
        }
    }
}

impl std::str::FromStr for TriggeredBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USER_ACTION" => Ok(Self::UserAction),
            "SCHEDULE" => Ok(Self::Schedule),
            "WEBHOOK" => Ok(Self::Webhook),
            other => Err(format!("unknown trigger origin: {other}")),
        }
    }
}

/// Before/after values of a single updated field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub old: Value,
    pub new: Value,
}

/// The domain object an event is about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub id: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<BTreeMap<String, FieldChange>>,
}

impl EntityRef {
    pub fn new(entity_type: &str, id: impl ToString, data: Value) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
            data,
            changes: None,
        }
    }

    /// Build from any serializable entity; serialization failures leave `data` null
    pub fn from_entity<T: Serialize>(entity_type: &str, id: impl ToString, entity: &T) -> Self {
        Self::new(
            entity_type,
            id,
            serde_json::to_value(entity).unwrap_or(Value::Null),
        )
    }

    pub fn with_change(mut self, field: &str, old: Value, new: Value) -> Self {
        self.changes
            .get_or_insert_with(BTreeMap::new)
            .insert(field.to_string(), FieldChange { old, new });
        self
    }

    pub fn is_kind(&self, kind: &str) -> bool {
        self.entity_type.eq_ignore_ascii_case(kind)
    }

    pub fn uuid(&self) -> Option<Uuid> {
        self.id.parse().ok()
    }

    pub fn change(&self, field: &str) -> Option<&FieldChange> {
        self.changes.as_ref().and_then(|c| c.get(field))
    }
}

/// Event snapshot passed unchanged through triggers, conditions and actions.
///
/// Its JSON form (see [`ExecutionContext::namespace`]) is what condition
/// field paths and `{{placeholders}}` resolve against, e.g.
/// `entity.data.status` or `user.email`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContext {
    pub triggered_by: TriggeredBy,
    pub trigger_source: String,
    #[serde(default)]
    pub entity: Option<EntityRef>,
    #[serde(default)]
    pub user: Option<Actor>,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "empty_object")]
    pub metadata: Value,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl ExecutionContext {
    pub fn new(triggered_by: TriggeredBy, trigger_source: impl Into<String>) -> Self {
        Self {
            triggered_by,
            trigger_source: trigger_source.into(),
            entity: None,
            user: None,
            timestamp: Utc::now(),
            metadata: empty_object(),
        }
    }

    pub fn user_action(trigger_source: impl Into<String>) -> Self {
        Self::new(TriggeredBy::UserAction, trigger_source)
    }

    pub fn scheduled(schedule_name: impl Into<String>) -> Self {
        Self::new(TriggeredBy::Schedule, schedule_name)
    }

    pub fn webhook(source: impl Into<String>, payload: Value) -> Self {
        Self::new(TriggeredBy::Webhook, source)
            .with_metadata(serde_json::json!({ "payload": payload }))
    }

    pub fn with_entity(mut self, entity: EntityRef) -> Self {
        self.entity = Some(entity);
        self
    }

    /// Attach field changes to the entity; ignored when no entity is set
    pub fn with_changes(mut self, changes: BTreeMap<String, FieldChange>) -> Self {
        if let Some(entity) = self.entity.as_mut() {
            entity.changes = Some(changes);
        }
        self
    }

    pub fn with_user(mut self, user: Actor) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// JSON namespace used for field paths and template placeholders
    pub fn namespace(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Walk a dot-separated path through objects (by key) and arrays (by index).
pub fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() {
        return None;
    }

    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}
