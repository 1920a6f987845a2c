// Outbound actions driven through the engine with recording channels

use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::config::EngineConfig;
use crate::tests::fixtures::*;
use crate::tests::helpers::{Harness, RecordingChannel};
use crate::workflows::actions::{ActionDeclaration, ActionType};
use crate::workflows::context::ExecutionContext;
use crate::workflows::models::{ExecutionStatus, Workflow};
use crate::workflows::template::TemplateMode;

async fn run(harness: &Harness, workflow: Workflow, ctx: ExecutionContext) -> crate::workflows::ExecutionResult {
    let workflow = harness.engine.register_workflow(workflow).await.unwrap();
    harness
        .triggers
        .execute_workflow_manually(workflow.id, ctx)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_webhook_posts_rendered_body() {
    let server = MockServer::start().await;
    let project = fake_project(40_000);

    Mock::given(method("POST"))
        .and(path("/hooks/projects"))
        .and(body_json(json!({ "project": project.name, "status": "ACTIVE" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::new();
    let workflow = Workflow::new("notify tracker").with_action(ActionDeclaration::webhook(
        &format!("{}/hooks/projects", server.uri()),
        json!({ "project": "{{entity.data.name}}", "status": "{{entity.data.status}}" }),
    ));

    let result = run(&harness, workflow, project_context(&project)).await;

    assert_eq!(result.status, ExecutionStatus::Success);
    let output = result.results[0].result.as_ref().unwrap();
    assert_eq!(output["status"], 200);
    assert_eq!(output["body"], json!({ "ok": true }));
}

#[tokio::test]
async fn test_webhook_error_status_still_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let harness = Harness::new();
    let workflow = Workflow::new("flaky hook").with_action(ActionDeclaration::webhook(&server.uri(), json!({})));

    let result = run(&harness, workflow, ExecutionContext::user_action("tests")).await;
    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(result.results[0].result.as_ref().unwrap()["status"], 500);
}

#[tokio::test]
async fn test_email_fans_out_with_cc_on_first_message() {
    let harness = Harness::new();
    let mut action = ActionDeclaration::send_email("ops@example.com; not-an-address, lead@example.com", "Heads up", "Body");
    action.config["cc"] = json!("boss@example.com");

    let result = run(
        &harness,
        Workflow::new("fan out").with_action(action),
        ExecutionContext::user_action("tests"),
    )
    .await;

    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(harness.email.targets(), vec!["ops@example.com", "lead@example.com"]);

    let sent = harness.email.sent();
    assert_eq!(sent[0].1.cc, vec!["boss@example.com"]);
    assert!(sent[1].1.cc.is_empty());
    assert_eq!(sent[0].1.subject.as_deref(), Some("Heads up"));

    let delivered = &result.results[0].result.as_ref().unwrap()["delivered"];
    assert_eq!(delivered.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_email_without_valid_recipients_fails() {
    let harness = Harness::new();
    let result = run(
        &harness,
        Workflow::new("no one").with_action(ActionDeclaration::send_email("nobody", "x", "y")),
        ExecutionContext::user_action("tests"),
    )
    .await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(
        result.results[0].error_message(),
        Some("Delivery failed: No valid email recipients")
    );
    assert!(harness.email.sent().is_empty());
}

#[tokio::test]
async fn test_sms_normalises_numbers() {
    let harness = Harness::new();
    let result = run(
        &harness,
        Workflow::new("page on-call")
            .with_action(ActionDeclaration::send_sms("+1 (555) 010-2000, call me", "Server down")),
        ExecutionContext::user_action("tests"),
    )
    .await;

    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(harness.sms.targets(), vec!["+15550102000"]);
    assert_eq!(harness.sms.sent()[0].1.body, "Server down");
}

#[tokio::test]
async fn test_chat_message_targets_channel() {
    let harness = Harness::new();
    let project = fake_project(12_000);
    let result = run(
        &harness,
        Workflow::new("chat").with_action(ActionDeclaration::send_chat_message(
            "#delivery",
            "{{entity.data.name}} was updated",
        )),
        project_context(&project),
    )
    .await;

    assert_eq!(result.status, ExecutionStatus::Success);
    let sent = harness.chat.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "#delivery");
    assert_eq!(sent[0].1.body, format!("{} was updated", project.name));
}

#[tokio::test]
async fn test_strict_template_blocks_dispatch() {
    let harness = Harness::new();
    let result = run(
        &harness,
        Workflow::new("strict").with_action(ActionDeclaration::send_chat_message("#ops", "Hi {{user.name}}")),
        ExecutionContext::user_action("tests"),
    )
    .await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(result.results[0].action_type, ActionType::SendChatMessage);
    assert_eq!(
        result.results[0].error_message(),
        Some("Unresolved template placeholders: user.name")
    );
    assert!(harness.chat.sent().is_empty());
}

#[tokio::test]
async fn test_lenient_template_sends_placeholder_text() {
    let harness = Harness::with_config(EngineConfig::default().with_template_mode(TemplateMode::Lenient));
    let result = run(
        &harness,
        Workflow::new("lenient").with_action(ActionDeclaration::send_chat_message("#ops", "Hi {{user.name}}")),
        ExecutionContext::user_action("tests"),
    )
    .await;

    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(harness.chat.sent()[0].1.body, "Hi {{user.name}}");
}

#[tokio::test]
async fn test_failing_channel_reports_failure() {
    let harness = Harness::with_email(RecordingChannel::failing("email"));
    let result = run(
        &harness,
        Workflow::new("bounce").with_action(ActionDeclaration::send_email("a@b.com", "s", "b")),
        ExecutionContext::user_action("tests"),
    )
    .await;

    assert_eq!(result.status, ExecutionStatus::Failed);
    assert_eq!(harness.email.targets(), vec!["a@b.com"]);
    assert!(result.error.unwrap().contains("email relay refused a@b.com"));
}

#[tokio::test]
async fn test_domain_actions_resolve_entity_targets() {
    let harness = Harness::new();
    let project = fake_project(8_000);
    let result = run(
        &harness,
        Workflow::new("close out")
            .with_action(ActionDeclaration::update_project_status("ON_HOLD").at_order(1))
            .with_action(ActionDeclaration::create_task("Review {{entity.data.name}}", "HIGH").at_order(2)),
        project_context(&project),
    )
    .await;

    assert_eq!(result.status, ExecutionStatus::Success);
    assert_eq!(harness.domain.operations(), vec!["update_project_status", "create_task"]);

    let calls = harness.domain.calls();
    assert_eq!(calls[0].1["id"], json!(project.id));
    assert_eq!(calls[1].1["task"]["title"], json!(format!("Review {}", project.name)));
    assert_eq!(calls[1].1["task"]["projectId"], json!(project.id));
}
