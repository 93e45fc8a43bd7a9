//! Webhook channel: JSON POST to a configured URL.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use super::{Notification, NotificationChannel};

/// Posts every notification as JSON. The `text` field carries the title and
/// body so chat webhooks (Slack, Mattermost, Discord-compatible relays) show a
/// readable message without further mapping.
pub struct WebhookChannel {
    client: reqwest::Client,
    url: reqwest::Url,
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    text: String,
    #[serde(flatten)]
    notification: &'a Notification,
}

impl WebhookChannel {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url = reqwest::Url::parse(url).with_context(|| format!("invalid webhook url {url}"))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build webhook client")?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, notification: &Notification) -> Result<()> {
        let payload = WebhookPayload {
            text: format!("{}\n{}", notification.title, notification.body()),
            notification,
        };
        self.client
            .post(self.url.clone())
            .json(&payload)
            .send()
            .await
            .context("send webhook")?
            .error_for_status()
            .context("webhook rejected notification")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::EventKind;
    use crate::test_support::notification;

    #[test]
    fn rejects_invalid_url() {
        assert!(WebhookChannel::new("::nope::", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn payload_flattens_notification_fields() {
        let n = notification(EventKind::MaxIterationsReached);
        let payload = WebhookPayload {
            text: "title".to_string(),
            notification: &n,
        };
        let value = serde_json::to_value(&payload).expect("serialize");
        assert_eq!(value["text"], "title");
        assert_eq!(value["event"], "max_iterations_reached");
        assert_eq!(value["project"], "demo");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_error() {
        // Port 9 (discard) on localhost is closed on CI machines.
        let channel =
            WebhookChannel::new("http://127.0.0.1:9/hook", Duration::from_secs(2)).expect("channel");
        let result = channel
            .deliver(&notification(EventKind::SessionStarted))
            .await;
        assert!(result.is_err());
    }
}
