//! Email transport for newsletter delivery.
//!
//! Supports multiple email providers:
//! - `console`: Logs emails to console (development)
//! - `smtp`: Sends via SMTP server using `lettre`
//! - `sendgrid`: Uses SendGrid API

use std::sync::Arc;
use std::time::Duration;

use domain::services::{EmailTransport, OutboundEmail, TransportError};
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, error, info};

use crate::config::EmailConfig;

const SENDGRID_SEND_URL: &str = "https://api.sendgrid.com/v3/mail/send";

/// Email service implementing [`EmailTransport`] for the configured provider.
#[derive(Clone)]
pub struct EmailService {
    config: Arc<EmailConfig>,
    smtp: Option<AsyncSmtpTransport<Tokio1Executor>>,
    http: reqwest::Client,
}

impl EmailService {
    /// Creates a new EmailService with the given configuration.
    ///
    /// The SMTP transport is built eagerly but connects lazily on first send.
    pub fn new(config: EmailConfig) -> Result<Self, TransportError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let smtp = if config.enabled && config.provider == "smtp" {
            Some(build_smtp_transport(&config, timeout)?)
        } else {
            None
        };
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Unavailable(format!("HTTP client: {}", e)))?;

        Ok(Self {
            config: Arc::new(config),
            smtp,
            http,
        })
    }

    /// Check if email service is enabled.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Console provider - logs email to console (for development).
    async fn send_console(&self, email: &OutboundEmail) -> Result<(), TransportError> {
        info!(
            to = %email.to,
            subject = %email.subject,
            from = %self.config.sender_email,
            html_length = email.html_body.len(),
            has_text = email.text_body.is_some(),
            "Email (console provider)"
        );
        Ok(())
    }

    /// SMTP provider - sends via SMTP server.
    async fn send_smtp(&self, email: &OutboundEmail) -> Result<(), TransportError> {
        let mailer = self.smtp.as_ref().ok_or(TransportError::NotConfigured)?;
        let message = self.build_message(email)?;

        mailer.send(message).await.map_err(|e| {
            if e.is_permanent() {
                TransportError::Rejected(e.to_string())
            } else {
                TransportError::Unavailable(e.to_string())
            }
        })?;

        debug!(to = %email.to, "Email sent via SMTP");
        Ok(())
    }

    fn build_message(&self, email: &OutboundEmail) -> Result<Message, TransportError> {
        let from_address: Address = self.config.sender_email.parse().map_err(|_| {
            TransportError::InvalidAddress(format!("sender {}", self.config.sender_email))
        })?;
        let from = Mailbox::new(Some(self.config.sender_name.clone()), from_address);
        let to = Mailbox::new(None, parse_address(&email.to)?);

        let builder = Message::builder()
            .from(from)
            .to(to)
            .subject(email.subject.clone());

        let result = match &email.text_body {
            Some(text) => builder.multipart(MultiPart::alternative_plain_html(
                text.clone(),
                email.html_body.clone(),
            )),
            None => builder.singlepart(SinglePart::html(email.html_body.clone())),
        };
        result.map_err(|e| TransportError::Rejected(format!("message build failed: {}", e)))
    }

    /// SendGrid provider - sends via SendGrid API.
    async fn send_sendgrid(&self, email: &OutboundEmail) -> Result<(), TransportError> {
        if self.config.sendgrid_api_key.is_empty() {
            return Err(TransportError::NotConfigured);
        }

        let body = sendgrid_body(&self.config, email);

        let response = self
            .http
            .post(SENDGRID_SEND_URL)
            .bearer_auth(&self.config.sendgrid_api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::Unavailable(format!("SendGrid request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            debug!(to = %email.to, "Email sent via SendGrid");
            return Ok(());
        }

        let error_body = response.text().await.unwrap_or_default();
        error!(status = %status, error = %error_body, "SendGrid API error");
        let message = format!("SendGrid returned {}: {}", status, error_body);
        if status.is_server_error() || status.as_u16() == 429 {
            Err(TransportError::Unavailable(message))
        } else {
            Err(TransportError::Rejected(message))
        }
    }
}

#[async_trait::async_trait]
impl EmailTransport for EmailService {
    async fn send(&self, email: &OutboundEmail) -> Result<(), TransportError> {
        if !self.config.enabled {
            debug!(
                to = %email.to,
                subject = %email.subject,
                "Email service disabled, refusing send"
            );
            return Err(TransportError::NotConfigured);
        }

        parse_address(&email.to)?;

        match self.config.provider.as_str() {
            "console" => self.send_console(email).await,
            "smtp" => self.send_smtp(email).await,
            "sendgrid" => self.send_sendgrid(email).await,
            provider => {
                error!(provider = %provider, "Unknown email provider");
                Err(TransportError::NotConfigured)
            }
        }
    }
}

fn parse_address(address: &str) -> Result<Address, TransportError> {
    address
        .parse()
        .map_err(|_| TransportError::InvalidAddress(address.to_string()))
}

fn build_smtp_transport(
    config: &EmailConfig,
    timeout: Duration,
) -> Result<AsyncSmtpTransport<Tokio1Executor>, TransportError> {
    if config.smtp_host.is_empty() {
        return Err(TransportError::NotConfigured);
    }

    let builder = if !config.smtp_use_tls {
        AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
    } else if config.smtp_port == 465 {
        // Implicit TLS
        AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            .map_err(|e| TransportError::Unavailable(e.to_string()))?
    } else {
        AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| TransportError::Unavailable(e.to_string()))?
    };

    let mut builder = builder.port(config.smtp_port).timeout(Some(timeout));
    if !config.smtp_username.is_empty() {
        builder = builder.credentials(Credentials::new(
            config.smtp_username.clone(),
            config.smtp_password.clone(),
        ));
    }
    Ok(builder.build())
}

fn sendgrid_body(config: &EmailConfig, email: &OutboundEmail) -> serde_json::Value {
    let mut content = Vec::with_capacity(2);
    if let Some(text) = &email.text_body {
        content.push(serde_json::json!({ "type": "text/plain", "value": text }));
    }
    content.push(serde_json::json!({ "type": "text/html", "value": email.html_body }));

    serde_json::json!({
        "personalizations": [{ "to": [{ "email": email.to }] }],
        "from": {
            "email": config.sender_email,
            "name": config.sender_name
        },
        "subject": email.subject,
        "content": content
    })
}
