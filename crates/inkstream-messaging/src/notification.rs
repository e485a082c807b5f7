//! Notification consumer
//!
//! Subscribes to the `notifications` topic, renders each event and hands it to
//! a [`NotificationSender`] per requested channel. Rendering and delivery
//! failures are ordinary handler errors, so the message is retried and
//! eventually dead-lettered like any other.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use inkstream_core::error::Result;
use inkstream_core::storage::StreamEntryId;

use crate::handler::{HandlerContext, HandlerError, HandlerResult, MessageHandler};
use crate::message::Message;
use crate::service::MessagingService;

/// Topic notification events are published to
pub const NOTIFICATIONS_TOPIC: &str = "notifications";

/// Category of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    #[default]
    System,
    Social,
    Content,
    Reward,
    Message,
    Update,
    Membership,
}

/// Delivery urgency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

/// Delivery channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Push,
}

fn default_channels() -> Vec<Channel> {
    vec![Channel::Push]
}

/// Payload published on [`NOTIFICATIONS_TOPIC`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub user_id: String,
    #[serde(default)]
    pub kind: NotificationKind,
    #[serde(default)]
    pub priority: NotificationPriority,
    pub title: String,
    #[serde(default)]
    pub content: String,
    /// Content template with `{{name}}` placeholders; overrides `content`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default = "default_channels")]
    pub channels: Vec<Channel>,
}

impl NotificationEvent {
    /// A push notification with literal content
    pub fn new(user_id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            kind: NotificationKind::default(),
            priority: NotificationPriority::default(),
            title: title.into(),
            content: content.into(),
            template: None,
            variables: BTreeMap::new(),
            channels: default_channels(),
        }
    }
}

/// Notification ready for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedNotification {
    pub user_id: String,
    pub kind: NotificationKind,
    pub priority: NotificationPriority,
    pub title: String,
    pub body: String,
}

/// Substitutes `{{name}}` placeholders
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateRenderer;

impl TemplateRenderer {
    /// Replace every `{{name}}` (surrounding whitespace allowed) with its
    /// value. Unknown placeholders are left untouched.
    pub fn render(&self, template: &str, variables: &BTreeMap<String, String>) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find("}}") {
                Some(end) => {
                    let name = after[..end].trim();
                    match variables.get(name) {
                        Some(value) => out.push_str(value),
                        None => out.push_str(&rest[start..start + 2 + end + 2]),
                    }
                    rest = &after[end + 2..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }

    /// Render an event into its deliverable form
    pub fn render_event(&self, event: &NotificationEvent) -> RenderedNotification {
        let body = match &event.template {
            Some(template) => self.render(template, &event.variables),
            None => event.content.clone(),
        };
        RenderedNotification {
            user_id: event.user_id.clone(),
            kind: event.kind,
            priority: event.priority,
            title: self.render(&event.title, &event.variables),
            body,
        }
    }
}

/// Email and push delivery
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Send an email notification
    async fn send_email(&self, notification: &RenderedNotification) -> HandlerResult;

    /// Send a push notification
    async fn send_push(&self, notification: &RenderedNotification) -> HandlerResult;
}

/// Consumes [`NotificationEvent`]s and delivers them
pub struct NotificationConsumer {
    sender: Arc<dyn NotificationSender>,
    renderer: TemplateRenderer,
}

impl NotificationConsumer {
    /// Create a consumer delivering through `sender`
    pub fn new(sender: Arc<dyn NotificationSender>) -> Self {
        Self {
            sender,
            renderer: TemplateRenderer,
        }
    }

    /// Subscribe `self` to the notifications topic on `service`
    pub async fn start(self, service: &MessagingService) -> Result<()> {
        service.subscribe(NOTIFICATIONS_TOPIC, self).await?;
        info!(topic = NOTIFICATIONS_TOPIC, "notification consumer started");
        Ok(())
    }

    /// Publish a notification event
    pub async fn notify(service: &MessagingService, event: &NotificationEvent) -> Result<StreamEntryId> {
        service.publish_json(NOTIFICATIONS_TOPIC, event).await
    }

    async fn deliver(&self, event: &NotificationEvent) -> HandlerResult {
        let rendered = self.renderer.render_event(event);
        for channel in &event.channels {
            match channel {
                Channel::Email => self.sender.send_email(&rendered).await?,
                Channel::Push => self.sender.send_push(&rendered).await?,
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for NotificationConsumer {
    async fn handle(&self, ctx: HandlerContext, message: Message) -> HandlerResult {
        let event: NotificationEvent = message
            .decode_json()
            .map_err(|e| HandlerError::from(e.to_string()))?;
        debug!(
            user_id = %event.user_id,
            delivery_count = ctx.delivery_count,
            channels = event.channels.len(),
            "delivering notification"
        );
        self.deliver(&event).await
    }
}
