use crate::config::SmtpConfig;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::{authentication::Credentials, PoolConfig},
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

use super::{DeliveryChannel, DeliveryReport, RenderedMessage};

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("Invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("Invalid message: {0}")]
    Message(#[from] lettre::error::Error),
}

pub type EmailResult<T> = Result<T, EmailError>;

/// SMTP delivery over a pooled lettre transport
#[derive(Debug, Clone)]
pub struct EmailService {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_email: String,
    from_name: String,
}

impl EmailService {
    pub fn new(smtp_config: &SmtpConfig) -> EmailResult<Self> {
        let builder = if smtp_config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp_config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp_config.host)
        };

        let mut builder = builder
            .port(smtp_config.port)
            .pool_config(PoolConfig::new().max_size(10))
            .timeout(Some(Duration::from_secs(10)));

        if !smtp_config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                smtp_config.username.clone(),
                smtp_config.password.clone(),
            ));
        }

        Ok(EmailService {
            transport: builder.build(),
            from_email: smtp_config.from_email.clone(),
            from_name: smtp_config.from_name.clone(),
        })
    }

    fn build_message(&self, to_email: &str, message: &RenderedMessage) -> EmailResult<Message> {
        let from = format!("{} <{}>", self.from_name, self.from_email).parse::<Mailbox>()?;
        let content_type = if message.html {
            ContentType::TEXT_HTML
        } else {
            ContentType::TEXT_PLAIN
        };

        let mut builder = Message::builder()
            .from(from)
            .to(to_email.parse::<Mailbox>()?)
            .subject(message.subject.clone().unwrap_or_default())
            .header(content_type);

        for cc in &message.cc {
            builder = builder.cc(cc.parse::<Mailbox>()?);
        }

        Ok(builder.body(message.body.clone())?)
    }

    pub async fn send_email(&self, to_email: &str, message: &RenderedMessage) -> EmailResult<String> {
        let email = self.build_message(to_email, message)?;

        match self.transport.send(email).await {
            Ok(response) => {
                info!("Email sent successfully to {}", to_email);
                Ok(response
                    .message()
                    .collect::<Vec<&str>>()
                    .join(" "))
            }
            Err(e) => {
                error!("Failed to send email to {}: {}", to_email, e);
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl DeliveryChannel for EmailService {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn send(&self, target: &str, message: &RenderedMessage) -> DeliveryReport {
        match self.send_email(target, message).await {
            Ok(reply) if reply.is_empty() => DeliveryReport::delivered(None),
            Ok(reply) => DeliveryReport::delivered(Some(reply)),
            Err(e) => DeliveryReport::failed(e.to_string()),
        }
    }
}
