use anyhow::Context;
use async_trait::async_trait;

use super::Notifier;
use crate::models::EventKind;

/// Posts `{"event": ..., "reservation_id": ...}` to the notification dispatcher.
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: EventKind, reservation_id: &str) -> anyhow::Result<()> {
        self.client
            .post(&self.url)
            .json(&serde_json::json!({
                "event": event.as_str(),
                "reservation_id": reservation_id,
            }))
            .send()
            .await
            .context("failed to reach notification dispatcher")?
            .error_for_status()
            .context("notification dispatcher returned error")?;

        Ok(())
    }
}

/// Used when no dispatcher is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: EventKind, reservation_id: &str) -> anyhow::Result<()> {
        tracing::info!(event = event.as_str(), reservation_id, "notification");
        Ok(())
    }
}
