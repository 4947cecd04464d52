//! Notification sink that writes to the tracing log

use async_trait::async_trait;
use tracing::{info, warn};

use super::{Channel, NotificationSink, NotifyResult};
use crate::monitoring::{Level, MonitoringEvent};

/// Logs every notification under the `notification` target
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify(&self, channel: Channel, event: &MonitoringEvent) -> NotifyResult<()> {
        if event.severity.level() >= Level::Warning {
            warn!(
                target: "notification",
                "[{}] {}/{}/{} {}: {} {}",
                channel.as_str(),
                event.machine,
                event.module,
                event.component,
                event.severity,
                event.title,
                event.description
            );
        } else {
            info!(
                target: "notification",
                "[{}] {}/{}/{} {}: {} {}",
                channel.as_str(),
                event.machine,
                event.module,
                event.component,
                event.severity,
                event.title,
                event.description
            );
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}
