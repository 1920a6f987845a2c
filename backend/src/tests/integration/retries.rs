// Retry scheduling for transient evaluation failures

use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;

use crate::repository::WorkflowRepository;
use crate::tests::fixtures::*;
use crate::tests::helpers::{Harness, StaticLookup};
use crate::workflows::actions::ActionDeclaration;
use crate::workflows::context::{EntityRef, ExecutionContext};
use crate::workflows::models::{ExecutionStatus, LogLevel, Workflow};
use crate::workflows::triggers::{TriggerDeclaration, TriggerType};

fn overdue_escalation(max_retries: u32) -> Workflow {
    Workflow::new("Escalate overdue task")
        .with_trigger(TriggerDeclaration::new(TriggerType::TaskOverdue))
        .with_action(ActionDeclaration::send_chat_message("#ops", "Task {{entity.id}} is overdue"))
        .with_retries(max_retries, 60)
}

/// An overdue event that only carries the task id, so evaluation needs the lookup
fn bare_task_context() -> ExecutionContext {
    let task = fake_task(uuid::Uuid::new_v4());
    ExecutionContext::scheduled("task.overdue").with_entity(EntityRef::new("task", task.id, json!({})))
}

fn failing_harness() -> Harness {
    Harness::with_lookup(Arc::new(StaticLookup::failing()))
}

#[tokio::test]
async fn test_lookup_failure_schedules_retry() {
    let harness = failing_harness();
    let workflow = harness.engine.register_workflow(overdue_escalation(2)).await.unwrap();

    let before = Utc::now();
    let result = harness
        .engine
        .execute_workflow(workflow.id, bare_task_context())
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Retrying);
    let next = result.next_retry_at.unwrap();
    assert!(next >= before + Duration::seconds(60));
    assert!(result.error.unwrap().contains("lookup store unavailable"));

    let stored = harness.repo.get_execution(result.execution_id).await.unwrap().unwrap();
    assert_eq!(stored.retry_count, 1);
    assert!(stored.retry_of.is_none());

    let log = harness.repo.logs_for(workflow.id).await.pop().unwrap();
    assert_eq!(log.message, "Retry scheduled");
    assert_eq!(log.level, LogLevel::Warning);
    assert_eq!(log.data["error"]["code"], "ENTITY_LOOKUP_FAILED");
    assert_eq!(log.data["error"]["retryable"], true);

    // Not due yet, then due once the delay has passed
    assert!(harness.repo.executions_due_for_retry(Utc::now(), 10).await.unwrap().is_empty());
    let due = harness
        .repo
        .executions_due_for_retry(next + Duration::seconds(1), 10)
        .await
        .unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, result.execution_id);
}

#[tokio::test]
async fn test_retry_links_attempts_until_exhausted() {
    let harness = failing_harness();
    let workflow = harness.engine.register_workflow(overdue_escalation(2)).await.unwrap();

    let first = harness
        .engine
        .execute_workflow(workflow.id, bare_task_context())
        .await
        .unwrap();
    let first_stored = harness.repo.get_execution(first.execution_id).await.unwrap().unwrap();

    let second = harness.engine.retry_execution(&first_stored).await.unwrap();
    assert_eq!(second.status, ExecutionStatus::Retrying);

    let first_after = harness.repo.get_execution(first.execution_id).await.unwrap().unwrap();
    assert!(first_after.next_retry_at.is_none());
    assert_eq!(first_after.status, ExecutionStatus::Retrying);

    let second_stored = harness.repo.get_execution(second.execution_id).await.unwrap().unwrap();
    assert_eq!(second_stored.retry_of, Some(first.execution_id));
    assert_eq!(second_stored.retry_count, 2);
    assert_eq!(second_stored.context, first_stored.context);

    let third = harness.engine.retry_execution(&second_stored).await.unwrap();
    assert_eq!(third.status, ExecutionStatus::Failed);
    assert!(third.next_retry_at.is_none());

    let third_stored = harness.repo.get_execution(third.execution_id).await.unwrap().unwrap();
    assert_eq!(third_stored.retry_of, Some(second.execution_id));
    assert_eq!(third_stored.retry_count, 2);

    let stats = harness.repo.get_workflow(workflow.id).await.unwrap().unwrap().stats;
    assert_eq!(stats.execution_count, 3);
    assert_eq!(stats.failure_count, 3);
    assert!(harness.chat.sent().is_empty());
}

#[tokio::test]
async fn test_no_retry_budget_fails_immediately() {
    let harness = failing_harness();
    let workflow = harness.engine.register_workflow(overdue_escalation(0)).await.unwrap();

    let result = harness
        .engine
        .execute_workflow(workflow.id, bare_task_context())
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert!(result.next_retry_at.is_none());
    assert_eq!(
        harness.repo.logs_for(workflow.id).await.pop().unwrap().message,
        "Execution failed"
    );
}

#[tokio::test]
async fn test_bad_trigger_config_is_never_retried() {
    let harness = Harness::new();
    let workflow = harness
        .engine
        .register_workflow(
            Workflow::new("misconfigured")
                .with_trigger(
                    TriggerDeclaration::new(TriggerType::ProjectStatusChanged)
                        .with_config(json!({ "statuses": "COMPLETED" })),
                )
                .with_retries(5, 1),
        )
        .await
        .unwrap();

    let result = harness
        .engine
        .execute_workflow(workflow.id, project_context(&fake_project(1_000)))
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert!(result.error.unwrap().starts_with("Invalid PROJECT_STATUS_CHANGED trigger config"));

    let log = harness.repo.logs_for(workflow.id).await.pop().unwrap();
    assert_eq!(log.data["error"]["code"], "INVALID_TRIGGER_CONFIG");
    assert_eq!(log.data["error"]["retryable"], false);
}

#[tokio::test]
async fn test_retry_succeeds_once_lookup_recovers() {
    let lookup = Arc::new(StaticLookup::default());
    let harness = Harness::with_lookup(lookup.clone());
    let workflow = harness.engine.register_workflow(overdue_escalation(3)).await.unwrap();

    let ctx = bare_task_context();
    let task_id = ctx.entity.as_ref().and_then(|e| e.uuid()).unwrap();

    // Snapshot missing: not overdue, nothing to retry
    let skipped = harness.engine.execute_workflow(workflow.id, ctx.clone()).await.unwrap();
    assert_eq!(skipped.status, ExecutionStatus::Cancelled);

    let yesterday = (Utc::now() - Duration::days(1)).date_naive();
    lookup.insert("task", task_id, json!({ "dueDate": yesterday, "status": "TODO" }));

    let previous = harness.repo.get_execution(skipped.execution_id).await.unwrap().unwrap();
    let retried = harness.engine.retry_execution(&previous).await.unwrap();
    assert_eq!(retried.status, ExecutionStatus::Success);
    assert_eq!(
        harness.chat.sent()[0].1.body,
        format!("Task {} is overdue", task_id)
    );
}
