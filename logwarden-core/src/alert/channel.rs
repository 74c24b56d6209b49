use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use logwarden_model::Alert;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};

/// Delivery target for triggered alerts. Sends are best-effort; a failed
/// channel is logged and the resend loop retries later.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;
    fn channel_type(&self) -> &str;
    async fn send(&self, alert: &Alert) -> Result<()>;
}

/// HTTP POST of the canonical alert JSON.
#[derive(Debug, Clone)]
pub struct WebhookChannel {
    name: String,
    url: String,
    headers: HashMap<String, String>,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        headers: HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Notification(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            name: name.into(),
            url: url.into(),
            headers,
            client,
        })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn channel_type(&self) -> &str {
        "WEBHOOK"
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        debug!("Webhook {} POST {} for alert {}", self.name, self.url, alert.id);

        let mut request = self
            .client
            .post(&self.url)
            .header("Accept", "application/json")
            .json(alert);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::Notification(format!("webhook request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(PipelineError::Notification(format!(
                "webhook returned {status}: {body}"
            )))
        }
    }
}

/// SMTP delivery of a plain-text rendering of the alert.
///
/// With `dry_run` the channel only logs the would-be message, which keeps
/// default configurations and tests free of a real SMTP dependency.
pub struct EmailChannel {
    name: String,
    from: Mailbox,
    to: Vec<Mailbox>,
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
}

impl std::fmt::Debug for EmailChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailChannel")
            .field("name", &self.name)
            .field("recipients", &self.to.len())
            .field("dry_run", &self.transport.is_none())
            .finish()
    }
}

impl EmailChannel {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        smtp_server: &str,
        smtp_port: u16,
        username: &str,
        password: &str,
        from: &str,
        to: &[String],
        use_tls: bool,
    ) -> Result<Self> {
        let from = parse_mailbox(from)?;
        let to = to.iter().map(|addr| parse_mailbox(addr)).collect::<Result<Vec<_>>>()?;

        let builder = if use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_server)
                .map_err(|e| PipelineError::Notification(format!("invalid SMTP relay: {e}")))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(smtp_server)
        };
        let transport = builder
            .port(smtp_port)
            .credentials(Credentials::new(username.to_string(), password.to_string()))
            .build();

        Ok(Self {
            name: name.into(),
            from,
            to,
            transport: Some(transport),
        })
    }

    /// Channel that renders and logs instead of talking to an SMTP server.
    pub fn dry_run(name: impl Into<String>, from: &str, to: &[String]) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            from: parse_mailbox(from)?,
            to: to.iter().map(|addr| parse_mailbox(addr)).collect::<Result<Vec<_>>>()?,
            transport: None,
        })
    }

    fn render_body(alert: &Alert) -> String {
        format!(
            "Alert: {}\nLevel: {}\nStatus: {}\nSource: {}\nTime: {}\nCount: {}\n\n{}\n",
            alert.name,
            alert.level,
            alert.status,
            alert.source,
            logwarden_model::format_timestamp(alert.timestamp),
            alert.count,
            alert.description,
        )
    }
}

fn parse_mailbox(addr: &str) -> Result<Mailbox> {
    addr.parse::<Mailbox>()
        .map_err(|e| PipelineError::Notification(format!("invalid email address {addr:?}: {e}")))
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn channel_type(&self) -> &str {
        "EMAIL"
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        let subject = format!("[{}] {}", alert.level, alert.name);
        let body = Self::render_body(alert);

        let Some(transport) = &self.transport else {
            info!("Email channel {} (dry run) would send {subject:?} to {} recipients", self.name, self.to.len());
            return Ok(());
        };

        for recipient in &self.to {
            let message = Message::builder()
                .from(self.from.clone())
                .to(recipient.clone())
                .subject(subject.clone())
                .body(body.clone())
                .map_err(|e| PipelineError::Notification(format!("failed to build email: {e}")))?;

            transport
                .send(message)
                .await
                .map_err(|e| PipelineError::Notification(format!("SMTP send failed: {e}")))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logwarden_model::AlertLevel;

    #[test]
    fn email_body_carries_the_core_fields() {
        let mut alert = Alert::new("HighCpu", "cpu over 80%", AlertLevel::Warning);
        alert.source = "web-1".into();
        alert.count = 3;

        let body = EmailChannel::render_body(&alert);
        assert!(body.contains("Alert: HighCpu"));
        assert!(body.contains("Level: WARNING"));
        assert!(body.contains("Count: 3"));
        assert!(body.contains("cpu over 80%"));
    }

    #[test]
    fn invalid_addresses_are_rejected() {
        assert!(EmailChannel::dry_run("e", "not-an-address", &[]).is_err());
        assert!(EmailChannel::dry_run("e", "ops@example.com", &["also bad".into()]).is_err());
    }

    #[tokio::test]
    async fn dry_run_sends_succeed() {
        let channel =
            EmailChannel::dry_run("e", "ops@example.com", &["oncall@example.com".to_string()])
                .unwrap();
        let alert = Alert::new("X", "", AlertLevel::Info);
        channel.send(&alert).await.unwrap();
        assert_eq!(channel.channel_type(), "EMAIL");
    }
}
