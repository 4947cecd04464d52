//! Discord webhook sink
//!
//! Each notification becomes one embed colored by level. When a `user_id` is
//! configured, email and sms class notifications also mention that user.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{error, info, instrument};

use super::{Channel, NotificationSink, NotifyError, NotifyResult};
use crate::monitoring::{Level, MonitoringEvent};

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<EmbedFooter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedFooter {
    pub text: String,
}

#[derive(Debug, Default)]
pub struct MessageBuilder {
    content: Option<String>,
    embeds: Vec<Embed>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl ToString) -> Self {
        self.content = Some(content.to_string());
        self
    }

    pub fn add_embed(mut self, embed: Embed) -> Self {
        self.embeds.push(embed);
        self
    }

    pub fn build(self) -> Message {
        Message {
            content: self.content,
            embeds: self.embeds,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DiscordNotifier {
    client: Client,
    url: String,
    user_id: Option<String>,
}

impl DiscordNotifier {
    pub fn new(url: impl Into<String>, user_id: Option<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            user_id,
        }
    }

    fn style(level: Level) -> (&'static str, u32) {
        match level {
            Level::Debug => ("🔍", 9807270),   // Grey
            Level::Info => ("ℹ️", 5793266),    // Light blue
            Level::Warning => ("⚠️", 15105570), // Orange
            Level::Error => ("🔥", 15158332),  // Red
            Level::Fatal => ("💀", 10038562),  // Dark red
        }
    }

    pub fn build_event_embed(&self, event: &MonitoringEvent) -> Embed {
        let (emoji, color) = Self::style(event.severity.level());

        Embed {
            title: Some(format!("{} {}", emoji, event.title)),
            description: (!event.description.is_empty()).then(|| event.description.clone()),
            color: Some(color),
            fields: vec![
                EmbedField {
                    name: "Component".to_string(),
                    value: format!("`{}`", event.component),
                    inline: true,
                },
                EmbedField {
                    name: "Severity".to_string(),
                    value: event.severity.to_string(),
                    inline: true,
                },
            ],
            footer: Some(EmbedFooter {
                text: format!("Machine: {} | Module: {}", event.machine, event.module),
            }),
            timestamp: Some(event.timestamp.to_rfc3339()),
        }
    }

    pub fn build_message(&self, channel: Channel, event: &MonitoringEvent) -> Message {
        let mut builder = MessageBuilder::new().add_embed(self.build_event_embed(event));
        if channel != Channel::Plain
            && let Some(user_id) = &self.user_id
        {
            builder = builder.content(format!("({} ~ {}) <@{user_id}>", event.module, event.title));
        }
        builder.build()
    }
}

#[async_trait]
impl NotificationSink for DiscordNotifier {
    #[instrument(skip(self, event), fields(title = %event.title))]
    async fn notify(&self, channel: Channel, event: &MonitoringEvent) -> NotifyResult<()> {
        let message = self.build_message(channel, event);
        let response = self.client.post(&self.url).json(&message).send().await?;

        let status = response.status();
        if !status.is_success() {
            error!("Discord message failed with status: {}", status);
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!("Successfully sent Discord message");
        Ok(())
    }

    fn name(&self) -> &str {
        "discord"
    }
}
