//! Webhook `NotificationSender` — `POST {ALERT_WEBHOOK_URL}` with the alert
//! payload (§5 external collaborator, §6).

use async_trait::async_trait;
use oracle_core::error::UpstreamError;
use oracle_core::traits::{NotificationPayload, NotificationSender};
use oracle_core::types::NotificationChannel;
use std::time::Duration;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Ignores `channel` beyond logging it: every channel in the closed set
/// posts to the same configured webhook URL, the one environment variable
/// this engine reads for notification transport (§5).
pub struct WebhookNotificationSender {
    client: reqwest::Client,
    webhook_url: String,
}

impl WebhookNotificationSender {
    pub fn new(webhook_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(NOTIFY_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client, webhook_url }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        let webhook_url = std::env::var("ALERT_WEBHOOK_URL")
            .map_err(|_| anyhow::anyhow!("ALERT_WEBHOOK_URL is not set"))?;
        Ok(Self::new(webhook_url))
    }
}

#[async_trait]
impl NotificationSender for WebhookNotificationSender {
    async fn send(&self, channel: NotificationChannel, payload: &NotificationPayload) -> Result<(), UpstreamError> {
        let response = self
            .client
            .post(&self.webhook_url)
            .header("content-type", "application/json")
            .json(payload)
            .send()
            .await
            .map_err(|e| UpstreamError::Transient(e.to_string()))?;

        if !response.status().is_success() {
            tracing::warn!(?channel, status = %response.status(), "notification webhook returned non-2xx");
            return Err(UpstreamError::Transient(format!("webhook returned {}", response.status())));
        }
        Ok(())
    }
}
