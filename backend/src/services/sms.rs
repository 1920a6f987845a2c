//! SMS delivery through an HTTP gateway (form-encoded `To`/`From`/`Body`,
//! basic auth with the account SID and token).

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{error, info};

use super::{DeliveryChannel, DeliveryReport, RenderedMessage};
use crate::config::SmsConfig;

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    #[serde(default)]
    sid: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

pub struct SmsService {
    client: reqwest::Client,
    api_url: String,
    account_sid: String,
    auth_token: String,
    from_number: String,
}

impl SmsService {
    pub fn new(config: &SmsConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: config.api_url.clone(),
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            from_number: config.from_number.clone(),
        }
    }

    async fn post(&self, to: &str, body: &str) -> Result<Option<String>, String> {
        let response = self
            .client
            .post(&self.api_url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&[("To", to), ("From", self.from_number.as_str()), ("Body", body)])
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;

        let status = response.status();
        let parsed = response.json::<GatewayResponse>().await.ok();

        if status.is_success() {
            Ok(parsed.and_then(|p| p.sid))
        } else {
            let detail = parsed.and_then(|p| p.message).unwrap_or_default();
            Err(format!("Gateway returned {}: {}", status, detail))
        }
    }
}

#[async_trait]
impl DeliveryChannel for SmsService {
    fn name(&self) -> &'static str {
        "sms"
    }

    async fn send(&self, target: &str, message: &RenderedMessage) -> DeliveryReport {
        match self.post(target, &message.body).await {
            Ok(sid) => {
                info!("SMS sent to {}", target);
                DeliveryReport::delivered(sid)
            }
            Err(e) => {
                error!("Failed to send SMS to {}: {}", target, e);
                DeliveryReport::failed(e)
            }
        }
    }
}
