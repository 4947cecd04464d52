//! Severity-routed notification side channels
//!
//! Every accepted event whose severity carries notification bits is handed to
//! the sinks registered for the matching [`Channel`]s. An `error+email` event
//! reaches both the plain and the email sinks; plain `error` reaches none.
//!
//! Delivery is best effort: failures are logged and never retried, and never
//! hold back persistence of the batch.

pub mod discord;
pub mod log;
pub mod webhook;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, trace};

use crate::monitoring::{MonitoringEvent, Severity};

pub use discord::DiscordNotifier;
pub use log::LogNotifier;
pub use webhook::WebhookNotifier;

pub type NotifyResult<T> = Result<T, NotifyError>;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to send notification: {0}")]
    Request(#[from] reqwest::Error),

    #[error("notification rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Notification class selected by the severity bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Plain,
    Email,
    Sms,
}

impl Channel {
    pub fn accepts(self, severity: Severity) -> bool {
        match self {
            Channel::Plain => severity.notifies(),
            Channel::Email => severity.emails(),
            Channel::Sms => severity.texts(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Plain => "plain",
            Channel::Email => "email",
            Channel::Sms => "sms",
        }
    }
}

/// One notification target
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one event on `channel`
    async fn notify(&self, channel: Channel, event: &MonitoringEvent) -> NotifyResult<()>;

    /// Name used in log lines
    fn name(&self) -> &str;
}

/// Fans events out to the sinks of every channel their severity selects
#[derive(Clone, Default)]
pub struct NotificationRouter {
    sinks: Vec<(Channel, Arc<dyn NotificationSink>)>,
}

impl NotificationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, channel: Channel, sink: Arc<dyn NotificationSink>) {
        self.sinks.push((channel, sink));
    }

    pub fn with(mut self, channel: Channel, sink: Arc<dyn NotificationSink>) -> Self {
        self.add(channel, sink);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Whether any sink would receive an event of this severity
    pub fn routes(&self, severity: Severity) -> bool {
        self.sinks
            .iter()
            .any(|(channel, _)| channel.accepts(severity))
    }

    /// Send every event of the batch to its sinks concurrently
    ///
    /// Returns the number of successful deliveries.
    pub async fn dispatch(&self, batch: &[MonitoringEvent]) -> usize {
        let deliveries = batch.iter().flat_map(|event| {
            self.sinks
                .iter()
                .filter(|(channel, _)| channel.accepts(event.severity))
                .map(move |(channel, sink)| async move {
                    let result = sink.notify(*channel, event).await;
                    if let Err(e) = &result {
                        error!(
                            "{} notification '{}' via {} failed: {}",
                            channel.as_str(),
                            event.title,
                            sink.name(),
                            e
                        );
                    }
                    result.is_ok()
                })
        });

        let delivered = join_all(deliveries)
            .await
            .into_iter()
            .filter(|ok| *ok)
            .count();
        trace!("delivered {} notifications", delivered);
        delivered
    }
}
