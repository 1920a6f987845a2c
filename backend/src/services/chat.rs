//! Chat webhook delivery
//!
//! Posts Teams-style adaptive cards to incoming-webhook URLs. A target is
//! either a configured channel name or a full webhook URL.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{error, info};

use super::{DeliveryChannel, DeliveryReport, RenderedMessage};
use crate::config::ChatConfig;

/// Adaptive card body sent to the webhook
#[derive(Debug, Clone, Serialize)]
pub struct AdaptiveCard {
    #[serde(rename = "type")]
    pub card_type: String,
    #[serde(rename = "$schema")]
    pub schema: String,
    pub version: String,
    pub body: Vec<CardElement>,
}

impl Default for AdaptiveCard {
    fn default() -> Self {
        Self {
            card_type: "AdaptiveCard".to_string(),
            schema: "http://adaptivecards.io/schemas/adaptive-card.json".to_string(),
            version: "1.4".to_string(),
            body: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum CardElement {
    TextBlock {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        size: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        weight: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        wrap: Option<bool>,
    },
}

impl AdaptiveCard {
    /// Card with an optional bold title followed by the wrapped message text
    pub fn from_message(title: Option<&str>, message: &str) -> Self {
        let mut body = Vec::new();
        if let Some(title) = title.filter(|t| !t.trim().is_empty()) {
            body.push(CardElement::TextBlock {
                text: title.to_string(),
                size: Some("medium".to_string()),
                weight: Some("bolder".to_string()),
                wrap: None,
            });
        }
        body.push(CardElement::TextBlock {
            text: message.to_string(),
            size: None,
            weight: None,
            wrap: Some(true),
        });

        Self {
            body,
            ..Self::default()
        }
    }
}

/// Wrapper for the webhook payload
#[derive(Debug, Clone, Serialize)]
pub struct ChatWebhookPayload {
    #[serde(rename = "type")]
    pub payload_type: String,
    pub attachments: Vec<ChatAttachment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatAttachment {
    #[serde(rename = "contentType")]
    pub content_type: String,
    pub content: AdaptiveCard,
}

impl ChatWebhookPayload {
    pub fn from_card(card: AdaptiveCard) -> Self {
        Self {
            payload_type: "message".to_string(),
            attachments: vec![ChatAttachment {
                content_type: "application/vnd.microsoft.card.adaptive".to_string(),
                content: card,
            }],
        }
    }
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Unknown chat channel: {0}")]
    UnknownChannel(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Webhook failed: {0}")]
    WebhookFailed(String),
}

/// Chat notification service
pub struct ChatService {
    client: reqwest::Client,
    default_webhook: Option<String>,
    channels: HashMap<String, String>,
}

impl ChatService {
    pub fn new(config: &ChatConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            default_webhook: config.default_webhook_url.clone(),
            channels: config
                .channels
                .iter()
                .map(|(name, url)| (name.to_lowercase(), url.clone()))
                .collect(),
        }
    }

    /// Resolve a channel name or URL to a webhook URL
    pub fn resolve_webhook(&self, channel: &str) -> Result<String, ChatError> {
        let channel = channel.trim();
        if channel.starts_with("https://") || channel.starts_with("http://") {
            return Ok(channel.to_string());
        }

        let key = channel.trim_start_matches('#').to_lowercase();
        self.channels
            .get(&key)
            .or(self.default_webhook.as_ref())
            .cloned()
            .ok_or_else(|| ChatError::UnknownChannel(channel.to_string()))
    }

    /// Send a payload to a webhook URL
    pub async fn send_webhook(
        &self,
        webhook_url: &str,
        payload: &ChatWebhookPayload,
    ) -> Result<(), ChatError> {
        let response = self
            .client
            .post(webhook_url)
            .json(payload)
            .send()
            .await
            .map_err(|e| ChatError::RequestFailed(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ChatError::WebhookFailed(format!(
                "Status: {}, Body: {}",
                status, body
            )))
        }
    }

    pub async fn post_message(
        &self,
        channel: &str,
        title: Option<&str>,
        message: &str,
    ) -> Result<(), ChatError> {
        let url = self.resolve_webhook(channel)?;
        let payload = ChatWebhookPayload::from_card(AdaptiveCard::from_message(title, message));
        self.send_webhook(&url, &payload).await?;
        info!("Chat message posted to {}", channel);
        Ok(())
    }
}

#[async_trait]
impl DeliveryChannel for ChatService {
    fn name(&self) -> &'static str {
        "chat"
    }

    async fn send(&self, target: &str, message: &RenderedMessage) -> DeliveryReport {
        match self
            .post_message(target, message.subject.as_deref(), &message.body)
            .await
        {
            Ok(()) => DeliveryReport::delivered(None),
            Err(e) => {
                error!("Failed to post chat message to {}: {}", target, e);
                DeliveryReport::failed(e.to_string())
            }
        }
    }
}
