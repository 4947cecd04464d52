//! Generic JSON webhook sink

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{info, instrument};

use super::{Channel, NotificationSink, NotifyError, NotifyResult};
use crate::monitoring::MonitoringEvent;

/// POSTs one JSON document per notification
///
/// ```json
/// {
///   "channel": "email",
///   "message": "[error+email] billing.db: connection lost",
///   "machine": "host-a", "module": "billing", "component": "billing.db",
///   "severity": "error+email", "title": "connection lost",
///   "description": "...", "timestamp": "2025-01-01T00:00:00+00:00"
/// }
/// ```
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    #[instrument(skip(self, event), fields(title = %event.title))]
    async fn notify(&self, channel: Channel, event: &MonitoringEvent) -> NotifyResult<()> {
        let payload = json!({
            "channel": channel.as_str(),
            "message": format!("[{}] {}: {}", event.severity, event.component, event.title),
            "machine": event.machine,
            "module": event.module,
            "component": event.component,
            "severity": event.severity,
            "title": event.title,
            "description": event.description,
            "timestamp": event.timestamp.to_rfc3339(),
        });

        let response = self.client.post(&self.url).json(&payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!("Successfully sent webhook notification");
        Ok(())
    }

    fn name(&self) -> &str {
        "webhook"
    }
}
