// Full trigger -> condition -> action runs through the engine

use serde_json::json;
use std::time::Duration;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::tests::fixtures::*;
use crate::tests::helpers::{Harness, RecordingChannel};
use crate::workflows::actions::{ActionDeclaration, ActionType};
use crate::workflows::context::ExecutionContext;
use crate::workflows::models::{ExecutionStatus, LogLevel, Workflow};
use crate::workflows::triggers::{TriggerDeclaration, TriggerType};
use crate::repository::WorkflowRepository;

fn completed(budget: i64) -> autoflow_shared::Project {
    let mut project = fake_project(budget);
    project.status = "COMPLETED".to_string();
    project
}

#[tokio::test]
async fn test_completed_project_over_budget_emails_client() {
    let harness = Harness::new();
    harness
        .engine
        .register_workflow(completion_email_workflow(50_000.0))
        .await
        .unwrap();

    let project = completed(75_000);
    let results = harness
        .triggers
        .project_status_changed(&project, "ACTIVE", Some(fake_actor()))
        .await;

    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.actions_executed, 1);
    assert_eq!(result.actions_success, 1);

    let sent = harness.email.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(Some(sent[0].0.clone()), project.client_email);
    assert_eq!(sent[0].1.subject, Some(format!("{} is complete", project.name)));
}

#[tokio::test]
async fn test_small_budget_is_cancelled_without_actions() {
    let harness = Harness::new();
    let workflow = harness
        .engine
        .register_workflow(completion_email_workflow(50_000.0))
        .await
        .unwrap();

    let results = harness
        .triggers
        .project_status_changed(&completed(10_000), "ACTIVE", None)
        .await;

    assert_eq!(results[0].status, ExecutionStatus::Cancelled);
    assert_eq!(results[0].actions_executed, 0);
    assert!(harness.email.sent().is_empty());

    let logs = harness.repo.logs_for(workflow.id).await;
    assert_eq!(logs.last().unwrap().message, "Conditions not met");
}

#[tokio::test]
async fn test_trigger_mismatch_is_cancelled() {
    let harness = Harness::new();
    let workflow = harness
        .engine
        .register_workflow(completion_email_workflow(0.0))
        .await
        .unwrap();

    // Dispatched manually with a project that is still active
    let result = harness
        .triggers
        .execute_workflow_manually(workflow.id, project_context(&fake_project(90_000)))
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Cancelled);
    assert!(result.results.is_empty());

    let messages: Vec<String> = harness
        .repo
        .logs_for(workflow.id)
        .await
        .into_iter()
        .map(|l| l.message)
        .collect();
    assert_eq!(messages, vec!["Execution started", "Trigger did not match"]);
}

#[tokio::test]
async fn test_slow_action_times_out() {
    let harness = Harness::with_config(EngineConfig::default().with_default_action_timeout(Duration::from_millis(50)));
    let workflow = harness
        .engine
        .register_workflow(
            Workflow::new("slow")
                .with_action(ActionDeclaration::delay_ms(2_000).at_order(1))
                .with_action(ActionDeclaration::send_chat_message("#ops", "after").at_order(2)),
        )
        .await
        .unwrap();

    let result = harness
        .engine
        .execute_workflow(workflow.id, ExecutionContext::user_action("tests"))
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.error.as_deref(), Some("Action timeout"));
    assert_eq!(result.actions_executed, 1);
    assert!(harness.chat.sent().is_empty());
}

fn three_step_workflow(continue_on_error: bool) -> Workflow {
    let mut slow = ActionDeclaration::delay_ms(2_000).at_order(2);
    slow.continue_on_error = continue_on_error;
    Workflow::new("three steps")
        .with_action(ActionDeclaration::send_chat_message("#ops", "first").at_order(1))
        .with_action(slow)
        .with_action(ActionDeclaration::send_chat_message("#ops", "third").at_order(3))
}

#[tokio::test]
async fn test_middle_timeout_skips_remaining_actions() {
    let harness = Harness::with_config(EngineConfig::default().with_default_action_timeout(Duration::from_millis(50)));
    let workflow = harness.engine.register_workflow(three_step_workflow(false)).await.unwrap();

    let result = harness
        .engine
        .execute_workflow(workflow.id, ExecutionContext::user_action("tests"))
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.results.len(), 2);
    assert_eq!(result.results[1].error_message(), Some("Action timeout"));
    assert_eq!(harness.chat.sent().len(), 1);
    assert_eq!(harness.chat.sent()[0].1.body, "first");
}

#[tokio::test]
async fn test_middle_timeout_with_continue_on_error_runs_third_action() {
    let harness = Harness::with_config(EngineConfig::default().with_default_action_timeout(Duration::from_millis(50)));
    let workflow = harness.engine.register_workflow(three_step_workflow(true)).await.unwrap();

    let result = harness
        .engine
        .execute_workflow(workflow.id, ExecutionContext::user_action("tests"))
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Success);
    assert!(result.has_failures());
    assert_eq!(result.results.len(), 3);
    assert_eq!(result.results[1].error_message(), Some("Action timeout"));
    let bodies: Vec<String> = harness.chat.sent().into_iter().map(|(_, m)| m.body).collect();
    assert_eq!(bodies, vec!["first", "third"]);
}

#[tokio::test]
async fn test_out_of_range_due_date_fails_instead_of_hanging() {
    let harness = Harness::new();
    let project = fake_project(8_000);
    let workflow = harness
        .engine
        .register_workflow(Workflow::new("far future").with_action(ActionDeclaration::new(
            ActionType::CreateTask,
            json!({"title": "t", "dueInDays": 9_000_000_000_000i64}),
        )))
        .await
        .unwrap();

    let result = harness
        .engine
        .execute_workflow(workflow.id, project_context(&project))
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Failed);
    let stored = harness.repo.get_execution(result.execution_id).await.unwrap().unwrap();
    assert_eq!(stored.status, ExecutionStatus::Failed);
    assert!(harness.domain.calls().is_empty());
}

#[tokio::test]
async fn test_extreme_budget_figures_do_not_fire() {
    let harness = Harness::new();
    let mut project = fake_project(1);
    project.budget = Some("0.0000000001".parse().unwrap());
    project.spent = Some(rust_decimal::Decimal::MAX);
    let workflow = harness
        .engine
        .register_workflow(
            Workflow::new("budget alarm")
                .with_trigger(TriggerDeclaration::new(TriggerType::ProjectBudgetThreshold))
                .with_action(ActionDeclaration::send_chat_message("#finance", "over budget")),
        )
        .await
        .unwrap();

    let result = harness
        .engine
        .execute_workflow(workflow.id, project_context(&project))
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Cancelled);
    let stored = harness.repo.get_execution(result.execution_id).await.unwrap().unwrap();
    assert_eq!(stored.status, ExecutionStatus::Cancelled);
}

#[tokio::test]
async fn test_continue_on_error_runs_later_actions() {
    let harness = Harness::with_email(RecordingChannel::failing("email"));
    let workflow = harness
        .engine
        .register_workflow(
            Workflow::new("best effort")
                .with_action(ActionDeclaration::send_chat_message("#ops", "second").at_order(2))
                .with_action(
                    ActionDeclaration::send_email("a@b.com", "first", "body")
                        .at_order(1)
                        .continue_on_error(),
                ),
        )
        .await
        .unwrap();

    let result = harness
        .engine
        .execute_workflow(workflow.id, ExecutionContext::user_action("tests"))
        .await
        .unwrap();

    // One success is enough for SUCCESS
    assert_eq!(result.status, ExecutionStatus::Success);
    assert!(result.has_failures());
    assert_eq!(result.actions_executed, 2);
    assert_eq!(result.actions_failed, 1);
    assert_eq!(result.results[0].order, 1);
    assert_eq!(harness.chat.targets(), vec!["#ops"]);

    let logs = harness.repo.logs_for(workflow.id).await;
    let failed: Vec<_> = logs.iter().filter(|l| l.message == "Action failed").collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].level, LogLevel::Error);
}

#[tokio::test]
async fn test_failure_stops_remaining_actions() {
    let harness = Harness::with_email(RecordingChannel::failing("email"));
    let workflow = harness
        .engine
        .register_workflow(
            Workflow::new("strict order")
                .with_action(ActionDeclaration::send_email("a@b.com", "first", "body").at_order(1))
                .with_action(ActionDeclaration::send_chat_message("#ops", "never").at_order(2)),
        )
        .await
        .unwrap();

    let result = harness
        .engine
        .execute_workflow(workflow.id, ExecutionContext::user_action("tests"))
        .await
        .unwrap();

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.actions_executed, 1);
    assert!(harness.chat.sent().is_empty());
}

#[tokio::test]
async fn test_stats_follow_each_run() {
    let harness = Harness::new();
    let workflow = harness
        .engine
        .register_workflow(completion_email_workflow(50_000.0))
        .await
        .unwrap();

    harness
        .triggers
        .project_status_changed(&completed(75_000), "ACTIVE", None)
        .await;
    harness
        .triggers
        .project_status_changed(&completed(1_000), "ACTIVE", None)
        .await;

    let stored = harness.repo.get_workflow(workflow.id).await.unwrap().unwrap();
    assert_eq!(stored.stats.execution_count, 2);
    assert_eq!(stored.stats.success_count, 1);
    assert_eq!(stored.stats.failure_count, 0);
    assert!(stored.stats.last_execution_at.is_some());

    let executions = harness.repo.executions_for(workflow.id).await;
    assert_eq!(executions.len(), 2);
    assert!(executions.iter().all(|e| e.status.is_final()));
}

#[tokio::test]
async fn test_concurrency_limit_rejects_extra_runs() {
    let harness = Harness::with_config(EngineConfig::default().with_max_concurrent_executions(1));
    let slow = harness
        .engine
        .register_workflow(Workflow::new("slow").with_action(ActionDeclaration::delay_ms(300)))
        .await
        .unwrap();
    let quick = harness
        .engine
        .register_workflow(Workflow::new("quick"))
        .await
        .unwrap();

    let engine = harness.engine.clone();
    let running = tokio::spawn(async move {
        engine
            .execute_workflow(slow.id, ExecutionContext::user_action("tests"))
            .await
    });

    // Let the slow run claim the only slot
    tokio::time::sleep(Duration::from_millis(50)).await;
    let rejected = harness
        .engine
        .execute_workflow(quick.id, ExecutionContext::user_action("tests"))
        .await;
    assert!(matches!(rejected, Err(EngineError::ConcurrencyLimitReached { limit: 1 })));
    assert!(harness.repo.executions_for(quick.id).await.is_empty());

    let finished = running.await.unwrap().unwrap();
    assert_eq!(finished.status, ExecutionStatus::Success);
    assert_eq!(harness.engine.in_flight_count(), 0);

    let after = harness
        .engine
        .execute_workflow(quick.id, ExecutionContext::user_action("tests"))
        .await
        .unwrap();
    assert_eq!(after.status, ExecutionStatus::Success);
}

#[tokio::test]
async fn test_execution_record_keeps_context_and_results() {
    let harness = Harness::new();
    let workflow = harness
        .engine
        .register_workflow(
            Workflow::new("record")
                .with_trigger(TriggerDeclaration::new(TriggerType::Manual))
                .with_action(ActionDeclaration::send_chat_message("#ops", "{{metadata.note}}")),
        )
        .await
        .unwrap();

    let ctx = ExecutionContext::user_action("tests").with_metadata(json!({ "note": "hello" }));
    let result = harness
        .engine
        .execute_workflow(workflow.id, ctx.clone())
        .await
        .unwrap();

    let stored = harness
        .repo
        .get_execution(result.execution_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, ExecutionStatus::Success);
    assert_eq!(stored.context, ctx);
    assert_eq!(stored.results.len(), 1);
    assert!(stored.completed_at.is_some());
    assert_eq!(harness.chat.sent()[0].1.body, "hello");
}
