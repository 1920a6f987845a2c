// Trigger and condition evaluation against contexts built from domain entities

use chrono::{Duration, TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;

use crate::tests::fixtures::*;
use crate::tests::helpers::StaticLookup;
use crate::workflows::conditions::{presets, Condition, ConditionEvaluator, ConditionTree};
use crate::workflows::context::{EntityRef, ExecutionContext};
use crate::workflows::template::{self, TemplateMode};
use crate::workflows::triggers::{TriggerDeclaration, TriggerError, TriggerEvaluator, TriggerType};

fn completed_project_ctx(budget: i64) -> ExecutionContext {
    let mut project = fake_project(budget);
    project.status = "COMPLETED".to_string();
    project.client_email = Some("a@b.com".to_string());

    ExecutionContext::user_action("project.status_changed").with_entity(
        EntityRef::from_entity("project", project.id, &project).with_change("status", json!("ACTIVE"), json!("COMPLETED")),
    )
}

#[tokio::test]
async fn test_completed_project_matches_trigger_and_budget_guard() {
    let workflow = completion_email_workflow(50_000.0);
    let ctx = completed_project_ctx(75_000);

    assert!(TriggerEvaluator::new().evaluate(&workflow.triggers, &ctx).await.unwrap());
    assert!(ConditionEvaluator::new()
        .evaluate(workflow.conditions.as_ref(), &ctx)
        .unwrap());

    let rendered = template::render(&workflow.actions[0].config, &ctx.namespace());
    assert!(rendered.is_complete());
    assert_eq!(rendered.value["to"], "a@b.com");
}

#[tokio::test]
async fn test_small_budget_fails_guard_only() {
    let workflow = completion_email_workflow(50_000.0);
    let ctx = completed_project_ctx(10_000);

    assert!(TriggerEvaluator::new().evaluate(&workflow.triggers, &ctx).await.unwrap());
    assert!(!ConditionEvaluator::new()
        .evaluate(workflow.conditions.as_ref(), &ctx)
        .unwrap());
}

#[tokio::test]
async fn test_status_filter_rejects_other_statuses() {
    let workflow = completion_email_workflow(0.0);
    let project = fake_project(1_000);
    let ctx = ExecutionContext::user_action("project.status_changed").with_entity(
        EntityRef::from_entity("project", project.id, &project).with_change("status", json!("PLANNING"), json!("ACTIVE")),
    );

    assert!(!TriggerEvaluator::new().evaluate(&workflow.triggers, &ctx).await.unwrap());
}

#[tokio::test]
async fn test_overdue_task_uses_snapshot_for_missing_fields() {
    let project = fake_project(5_000);
    let task = fake_task(project.id);
    let lookup = Arc::new(StaticLookup::default());
    lookup.insert(
        "task",
        task.id,
        json!({ "dueDate": "2025-01-10", "status": "IN_PROGRESS" }),
    );

    // The event only carries the id
    let ctx = ExecutionContext::scheduled("task.overdue")
        .with_entity(EntityRef::new("task", task.id, json!({})))
        .at(Utc.with_ymd_and_hms(2025, 1, 12, 9, 0, 0).unwrap());
    let triggers = [TriggerDeclaration::new(TriggerType::TaskOverdue)];

    let evaluator = TriggerEvaluator::new().with_lookup(lookup);
    assert!(evaluator.evaluate(&triggers, &ctx).await.unwrap());
    assert!(!TriggerEvaluator::new().evaluate(&triggers, &ctx).await.unwrap());
}

#[tokio::test]
async fn test_lookup_failure_is_transient_error() {
    let task = fake_task(uuid::Uuid::new_v4());
    let ctx = ExecutionContext::scheduled("task.due_soon").with_entity(EntityRef::new("task", task.id, json!({})));
    let triggers = [TriggerDeclaration::new(TriggerType::TaskDueSoon)];

    let err = TriggerEvaluator::new()
        .with_lookup(Arc::new(StaticLookup::failing()))
        .evaluate(&triggers, &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, TriggerError::Lookup(_)));
}

#[tokio::test]
async fn test_deadline_window_from_fixture() {
    let mut project = fake_project(20_000);
    let now = Utc::now();
    project.end_date = Some(now.date_naive() + Duration::days(3));
    let ctx = ExecutionContext::scheduled("daily").with_entity(EntityRef::from_entity("project", project.id, &project)).at(now);

    let within = [TriggerDeclaration::new(TriggerType::ProjectDeadlineApproaching)];
    let narrow = [TriggerDeclaration::new(TriggerType::ProjectDeadlineApproaching).with_config(json!({ "daysBefore": 2 }))];

    assert!(TriggerEvaluator::new().evaluate(&within, &ctx).await.unwrap());
    assert!(!TriggerEvaluator::new().evaluate(&narrow, &ctx).await.unwrap());
}

#[test]
fn test_presets_against_project_context() {
    let mut project = fake_project(90_000);
    project.client_email = Some("pm@example.com".to_string());
    let ctx = project_context(&project);
    let evaluator = ConditionEvaluator::new();

    let guard = ConditionTree::and(vec![
        presets::budget_above(50_000.0),
        presets::status_is("ACTIVE"),
        presets::has_client_email(),
    ]);
    assert!(evaluator.evaluate(Some(&guard), &ctx).unwrap());

    let actor_guard: ConditionTree = Condition::is_not_null("user.email").into();
    assert!(evaluator.evaluate(Some(&actor_guard), &ctx).unwrap());
}

#[test]
fn test_list_placeholder_keeps_array_for_recipients() {
    let ctx = ExecutionContext::user_action("tests").with_metadata(json!({ "watchers": ["a@x.com", "b@x.com"] }));
    let rendered = template::render(&json!({ "to": "{{metadata.watchers}}" }), &ctx.namespace());

    assert_eq!(rendered.value["to"], json!(["a@x.com", "b@x.com"]));
    assert_eq!("lenient".parse::<TemplateMode>(), Ok(TemplateMode::Lenient));
}
