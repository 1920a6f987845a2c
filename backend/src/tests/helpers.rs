// Common test utilities and shared engine setup
use async_trait::async_trait;
use autoflow_shared::{NewNotification, NewTask};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Once};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::repository::{InMemoryRepository, RepositoryError, WorkflowRepository};
use crate::services::domain::{DomainMutations, DomainResult, MutationOutcome};
use crate::services::{DeliveryChannel, DeliveryReport, ReqwestDispatcher, RenderedMessage};
use crate::workflows::dispatch::WorkflowTriggers;
use crate::workflows::engine::WorkflowEngine;
use crate::workflows::executor::ActionExecutor;
use crate::workflows::handlers::ActionCollaborators;
use crate::workflows::triggers::EntityLookup;

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("debug")
            .try_init()
            .ok();
    });
}

/// Delivery channel that records what it was asked to send
pub struct RecordingChannel {
    name: &'static str,
    fail: bool,
    sent: Mutex<Vec<(String, RenderedMessage)>>,
}

impl RecordingChannel {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            fail: false,
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Every send reports a failure
    pub fn failing(name: &'static str) -> Self {
        Self {
            fail: true,
            ..Self::new(name)
        }
    }

    pub fn sent(&self) -> Vec<(String, RenderedMessage)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn targets(&self) -> Vec<String> {
        self.sent().into_iter().map(|(target, _)| target).collect()
    }
}

#[async_trait]
impl DeliveryChannel for RecordingChannel {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn send(&self, target: &str, message: &RenderedMessage) -> DeliveryReport {
        self.sent.lock().unwrap().push((target.to_string(), message.clone()));
        if self.fail {
            DeliveryReport::failed(format!("{} relay refused {}", self.name, target))
        } else {
            DeliveryReport::delivered(Some(Uuid::new_v4().to_string()))
        }
    }
}

/// Domain store that records mutations as `(operation, payload)` pairs
#[derive(Default)]
pub struct RecordingDomain {
    calls: Mutex<Vec<(String, Value)>>,
}

impl RecordingDomain {
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn operations(&self) -> Vec<String> {
        self.calls().into_iter().map(|(op, _)| op).collect()
    }

    fn record(&self, op: &str, entity_id: Uuid, field: &str, value: Value) -> DomainResult<MutationOutcome> {
        self.calls
            .lock()
            .unwrap()
            .push((op.to_string(), json!({ "id": entity_id, field: value.clone() })));
        Ok(MutationOutcome::new(entity_id, field, value))
    }
}

#[async_trait]
impl DomainMutations for RecordingDomain {
    async fn create_task(&self, task: NewTask) -> DomainResult<MutationOutcome> {
        self.record("create_task", Uuid::new_v4(), "task", json!(task))
    }

    async fn update_project_status(&self, project_id: Uuid, status: String) -> DomainResult<MutationOutcome> {
        self.record("update_project_status", project_id, "status", json!(status))
    }

    async fn update_project_field(&self, project_id: Uuid, field: String, value: Value) -> DomainResult<MutationOutcome> {
        self.record("update_project_field", project_id, &field, value)
    }

    async fn update_task_status(&self, task_id: Uuid, status: String) -> DomainResult<MutationOutcome> {
        self.record("update_task_status", task_id, "status", json!(status))
    }

    async fn update_task_priority(&self, task_id: Uuid, priority: String) -> DomainResult<MutationOutcome> {
        self.record("update_task_priority", task_id, "priority", json!(priority))
    }

    async fn assign_task(&self, task_id: Uuid, assignee_id: Uuid) -> DomainResult<MutationOutcome> {
        self.record("assign_task", task_id, "assigneeId", json!(assignee_id))
    }

    async fn add_task_comment(&self, task_id: Uuid, comment: String, internal: bool) -> DomainResult<MutationOutcome> {
        self.record(
            "add_task_comment",
            task_id,
            "comment",
            json!({ "content": comment, "internal": internal }),
        )
    }

    async fn create_notification(&self, notification: NewNotification) -> DomainResult<MutationOutcome> {
        self.record("create_notification", Uuid::new_v4(), "notification", json!(notification))
    }
}

/// Entity snapshots served from memory
#[derive(Default)]
pub struct StaticLookup {
    snapshots: Mutex<HashMap<(String, String), Value>>,
    fail: bool,
}

impl StaticLookup {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn insert(&self, kind: &str, id: Uuid, snapshot: Value) {
        self.snapshots
            .lock()
            .unwrap()
            .insert((kind.to_string(), id.to_string()), snapshot);
    }
}

#[async_trait]
impl EntityLookup for StaticLookup {
    async fn snapshot(&self, kind: &str, id: &str) -> Result<Option<Value>, RepositoryError> {
        if self.fail {
            return Err(RepositoryError::InvalidData("lookup store unavailable".to_string()));
        }
        Ok(self
            .snapshots
            .lock()
            .unwrap()
            .get(&(kind.to_string(), id.to_string()))
            .cloned())
    }
}

/// An engine over the in-memory repository with recording collaborators
pub struct Harness {
    pub repo: Arc<InMemoryRepository>,
    pub email: Arc<RecordingChannel>,
    pub chat: Arc<RecordingChannel>,
    pub sms: Arc<RecordingChannel>,
    pub domain: Arc<RecordingDomain>,
    pub engine: Arc<WorkflowEngine>,
    pub triggers: WorkflowTriggers,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(EngineConfig::default(), RecordingChannel::new("email"), None)
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self::build(config, RecordingChannel::new("email"), None)
    }

    pub fn with_email(email: RecordingChannel) -> Self {
        Self::build(EngineConfig::default(), email, None)
    }

    pub fn with_lookup(lookup: Arc<dyn EntityLookup>) -> Self {
        Self::build(EngineConfig::default(), RecordingChannel::new("email"), Some(lookup))
    }

    fn build(config: EngineConfig, email: RecordingChannel, lookup: Option<Arc<dyn EntityLookup>>) -> Self {
        init_test_logging();

        let repo = Arc::new(InMemoryRepository::new());
        let email = Arc::new(email);
        let chat = Arc::new(RecordingChannel::new("chat"));
        let sms = Arc::new(RecordingChannel::new("sms"));
        let domain = Arc::new(RecordingDomain::default());

        let collaborators = ActionCollaborators {
            email: email.clone(),
            chat: chat.clone(),
            sms: sms.clone(),
            http: Arc::new(ReqwestDispatcher::new()),
            domain: domain.clone(),
        };

        let mut engine = WorkflowEngine::new(repo.clone(), ActionExecutor::new(collaborators), config);
        if let Some(lookup) = lookup {
            engine = engine.with_entity_lookup(lookup);
        }
        let engine = Arc::new(engine);
        let triggers = WorkflowTriggers::new(engine.clone(), repo.clone() as Arc<dyn WorkflowRepository>);

        Self {
            repo,
            email,
            chat,
            sms,
            domain,
            engine,
            triggers,
        }
    }
}
