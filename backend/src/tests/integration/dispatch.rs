// Domain events, webhook and queued dispatch into the engine

use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::tests::fixtures::*;
use crate::repository::RepositoryError;
use crate::tests::helpers::Harness;
use crate::workflows::actions::ActionDeclaration;
use crate::workflows::context::{EntityRef, ExecutionContext, FieldChange, TriggeredBy};
use crate::workflows::models::{ExecutionStatus, Workflow};
use crate::workflows::triggers::{EntityLookup, TriggerDeclaration, TriggerType};

fn chat_on(trigger: TriggerDeclaration, message: &str) -> Workflow {
    Workflow::new(message)
        .with_trigger(trigger)
        .with_action(ActionDeclaration::send_chat_message("#ops", message))
}

#[tokio::test]
async fn test_event_runs_every_matching_workflow() {
    let harness = Harness::new();
    for message in ["first", "second"] {
        harness
            .engine
            .register_workflow(chat_on(TriggerDeclaration::new(TriggerType::TaskCreated), message))
            .await
            .unwrap();
    }
    harness
        .engine
        .register_workflow(chat_on(TriggerDeclaration::new(TriggerType::TaskCreated), "off").disabled())
        .await
        .unwrap();
    harness
        .engine
        .register_workflow(chat_on(TriggerDeclaration::new(TriggerType::ProjectCreated), "other"))
        .await
        .unwrap();

    let task = fake_task(uuid::Uuid::new_v4());
    let results = harness.triggers.task_created(&task, Some(fake_actor())).await;

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.status == ExecutionStatus::Success));

    let mut bodies: Vec<String> = harness.chat.sent().into_iter().map(|(_, m)| m.body).collect();
    bodies.sort();
    assert_eq!(bodies, vec!["first", "second"]);
}

#[tokio::test]
async fn test_project_completion_also_fires_completed_trigger() {
    let harness = Harness::new();
    harness
        .engine
        .register_workflow(chat_on(TriggerDeclaration::new(TriggerType::ProjectStatusChanged), "changed"))
        .await
        .unwrap();
    harness
        .engine
        .register_workflow(chat_on(TriggerDeclaration::new(TriggerType::ProjectCompleted), "done"))
        .await
        .unwrap();

    let mut project = fake_project(10_000);
    project.status = "COMPLETED".to_string();
    let results = harness.triggers.project_status_changed(&project, "ACTIVE", None).await;
    assert_eq!(results.len(), 2);

    project.status = "ON_HOLD".to_string();
    let results = harness.triggers.project_status_changed(&project, "COMPLETED", None).await;
    assert_eq!(results.len(), 1);
    assert_eq!(harness.chat.sent().len(), 3);
}

#[tokio::test]
async fn test_project_update_field_filter() {
    let harness = Harness::new();
    harness
        .engine
        .register_workflow(chat_on(
            TriggerDeclaration::new(TriggerType::ProjectUpdated).with_config(json!({ "fields": ["budget"] })),
            "budget moved",
        ))
        .await
        .unwrap();

    let project = fake_project(30_000);
    let renamed = BTreeMap::from([(
        "name".to_string(),
        FieldChange {
            old: json!("Old"),
            new: json!(project.name),
        },
    )]);
    let rebudgeted = BTreeMap::from([(
        "budget".to_string(),
        FieldChange {
            old: json!("20000"),
            new: json!("30000"),
        },
    )]);

    let results = harness.triggers.project_updated(&project, renamed, None).await;
    assert_eq!(results[0].status, ExecutionStatus::Cancelled);

    let results = harness.triggers.project_updated(&project, rebudgeted, None).await;
    assert_eq!(results[0].status, ExecutionStatus::Success);
    assert_eq!(harness.chat.sent().len(), 1);
}

#[tokio::test]
async fn test_task_assignment_records_previous_assignee() {
    let harness = Harness::new();
    let workflow = harness
        .engine
        .register_workflow(chat_on(TriggerDeclaration::new(TriggerType::TaskAssigned), "assigned"))
        .await
        .unwrap();

    let task = fake_task(uuid::Uuid::new_v4());
    let previous = uuid::Uuid::new_v4();
    let results = harness.triggers.task_assigned(&task, Some(previous), None).await;
    assert_eq!(results[0].status, ExecutionStatus::Success);

    let execution = harness.repo.executions_for(workflow.id).await.pop().unwrap();
    let change = execution.context.entity.unwrap().changes.unwrap()["assigneeId"].clone();
    assert_eq!(change.old, json!(previous));
    assert_eq!(change.new, json!(task.assignee_id));
}

#[tokio::test]
async fn test_invoice_paid_minimum_amount() {
    let harness = Harness::new();
    harness
        .engine
        .register_workflow(chat_on(
            TriggerDeclaration::new(TriggerType::InvoicePaid).with_config(json!({ "minAmount": 1000 })),
            "big payment",
        ))
        .await
        .unwrap();

    let today = chrono::Utc::now().date_naive();
    let small = harness.triggers.invoice_paid(&fake_invoice(500, today), None).await;
    let large = harness.triggers.invoice_paid(&fake_invoice(2_500, today), None).await;

    assert_eq!(small[0].status, ExecutionStatus::Cancelled);
    assert_eq!(large[0].status, ExecutionStatus::Success);
}

#[tokio::test]
async fn test_webhook_payload_reaches_templates() {
    let harness = Harness::new();
    let workflow = harness
        .engine
        .register_workflow(chat_on(
            TriggerDeclaration::new(TriggerType::Webhook),
            "Deploy {{metadata.payload.version}} from {{triggerSource}}",
        ))
        .await
        .unwrap();

    let result = harness
        .triggers
        .execute_workflow_via_webhook(workflow.id, json!({ "version": "1.4.2" }), "ci")
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(harness.chat.sent()[0].1.body, "Deploy 1.4.2 from ci");

    let stored = harness.repo.executions_for(workflow.id).await.pop().unwrap();
    assert_eq!(stored.trigger_source, "ci");
    assert_eq!(stored.triggered_by, TriggeredBy::Webhook);
}

#[tokio::test]
async fn test_manual_execution_of_unknown_workflow_errors() {
    let harness = Harness::new();
    let result = harness
        .triggers
        .execute_workflow_manually(uuid::Uuid::new_v4(), ExecutionContext::user_action("tests"))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_async_queue_worker_runs_requests() {
    let harness = Harness::new();
    let workflow = harness
        .engine
        .register_workflow(chat_on(TriggerDeclaration::new(TriggerType::ScheduleDaily), "daily digest"))
        .await
        .unwrap();

    let (triggers, worker) = harness.triggers.clone().with_async_queue(8);
    triggers
        .try_trigger_workflows_async(TriggerType::ScheduleDaily, ExecutionContext::scheduled("daily"))
        .unwrap();

    // Dropping every sender lets the worker drain and stop
    drop(triggers);
    tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(harness.chat.targets(), vec!["#ops"]);
    let execution = harness.repo.executions_for(workflow.id).await.pop().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Success);
    assert_eq!(execution.trigger_source, "daily");
}

/// Lookup that hits a bug on every call
struct PanickingLookup;

#[async_trait::async_trait]
impl EntityLookup for PanickingLookup {
    async fn snapshot(&self, _kind: &str, _id: &str) -> Result<Option<serde_json::Value>, RepositoryError> {
        panic!("snapshot decoder bug");
    }
}

#[tokio::test]
async fn test_async_worker_survives_a_panicking_evaluation() {
    let harness = Harness::with_lookup(Arc::new(PanickingLookup));
    let overdue = harness
        .engine
        .register_workflow(chat_on(TriggerDeclaration::new(TriggerType::TaskOverdue), "overdue").with_retries(3, 60))
        .await
        .unwrap();
    let daily = harness
        .engine
        .register_workflow(chat_on(TriggerDeclaration::new(TriggerType::ScheduleDaily), "daily digest"))
        .await
        .unwrap();

    let (triggers, worker) = harness.triggers.clone().with_async_queue(8);
    let task = fake_task(uuid::Uuid::new_v4());
    triggers
        .try_trigger_workflows_async(
            TriggerType::TaskOverdue,
            ExecutionContext::scheduled("task.overdue").with_entity(EntityRef::new("task", task.id, json!({}))),
        )
        .unwrap();
    triggers
        .try_trigger_workflows_async(TriggerType::ScheduleDaily, ExecutionContext::scheduled("daily"))
        .unwrap();

    drop(triggers);
    tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .unwrap()
        .unwrap();

    let failed = harness.repo.executions_for(overdue.id).await.pop().unwrap();
    assert_eq!(failed.status, ExecutionStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("Trigger or condition evaluation panicked"));
    assert!(failed.next_retry_at.is_none());

    let ran = harness.repo.executions_for(daily.id).await.pop().unwrap();
    assert_eq!(ran.status, ExecutionStatus::Success);
    assert_eq!(harness.chat.targets(), vec!["#ops"]);
}
