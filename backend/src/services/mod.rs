// Delivery channels and domain stores the workflow actions talk to

pub mod chat;
pub mod domain;
pub mod email;
pub mod sms;
pub mod webhook;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use chat::ChatService;
pub use domain::{DomainError, DomainMutations, MutationOutcome, PgDomainStore};
pub use email::EmailService;
pub use sms::SmsService;
pub use webhook::{HttpDispatcher, HttpError, ReqwestDispatcher, WebhookRequest, WebhookResponse};

/// A message after template rendering, ready for a channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedMessage {
    pub subject: Option<String>,
    pub body: String,
    pub html: bool,
    /// Extra recipients (email cc); ignored by channels without the concept
    #[serde(default)]
    pub cc: Vec<String>,
}

impl RenderedMessage {
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            subject: None,
            body: body.into(),
            html: false,
            cc: Vec::new(),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn as_html(mut self, html: bool) -> Self {
        self.html = html;
        self
    }

    pub fn with_cc(mut self, cc: Vec<String>) -> Self {
        self.cc = cc;
        self
    }
}

/// Outcome reported by a delivery channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    pub success: bool,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
}

impl DeliveryReport {
    pub fn delivered(provider_message_id: Option<String>) -> Self {
        Self {
            success: true,
            provider_message_id,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            provider_message_id: None,
            error: Some(error.into()),
        }
    }
}

/// Email, chat and SMS senders all implement this
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Channel name used in logs
    fn name(&self) -> &'static str;

    /// Deliver to one target. Failures come back in the report, not as errors.
    async fn send(&self, target: &str, message: &RenderedMessage) -> DeliveryReport;
}

/// Channel used when a delivery backend is not configured; every send fails
#[derive(Debug, Clone)]
pub struct UnconfiguredChannel {
    name: &'static str,
}

impl UnconfiguredChannel {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

#[async_trait]
impl DeliveryChannel for UnconfiguredChannel {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn send(&self, _target: &str, _message: &RenderedMessage) -> DeliveryReport {
        DeliveryReport::failed(format!("{} channel is not configured", self.name))
    }
}
