use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(test)]
pub mod fake;

#[derive(Debug, Clone, Error)]
pub enum PlatformError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid id: {0}")]
    InvalidId(String),
    #[error("platform client is not connected")]
    NotConnected,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmojiCreateError {
    #[error("emoji name or image rejected: {0}")]
    NameInvalid(String),
    #[error("custom emoji quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("emoji upload failed: {0}")]
    Other(String),
}

/// A webhook as listed on a channel. The token is absent for webhooks owned
/// by other applications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookIdentity {
    pub id: String,
    pub name: Option<String>,
    pub token: Option<String>,
    pub channel_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookHandle {
    pub id: String,
    #[serde(skip_serializing)]
    pub token: String,
    pub channel_id: String,
    pub created_at: DateTime<Utc>,
}

impl WebhookHandle {
    pub fn url(&self) -> String {
        format!("https://discord.com/api/webhooks/{}/{}", self.id, self.token)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutboundMessage {
    pub content: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub thread_id: Option<String>,
    /// Embed description; set for pinned notes.
    pub note: Option<String>,
    pub allow_user_mentions: bool,
    pub suppress_notifications: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub id: String,
    pub author_name: String,
    pub content: String,
    pub webhook_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomEmoji {
    pub id: String,
    pub name: String,
    /// Inline form, e.g. `<:name:id>`.
    pub reference: String,
    pub animated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Capabilities {
    pub view_channel: bool,
    pub send_messages: bool,
    pub manage_channels: bool,
    pub manage_messages: bool,
    pub manage_webhooks: bool,
}

impl Capabilities {
    pub fn all() -> Self {
        Self {
            view_channel: true,
            send_messages: true,
            manage_channels: true,
            manage_messages: true,
            manage_webhooks: true,
        }
    }

    pub fn can_mention(&self) -> bool {
        self.view_channel && self.send_messages
    }

    pub fn can_moderate(&self) -> bool {
        self.view_channel && self.manage_channels && self.manage_messages
    }

    /// Names of the moderation permissions that are missing.
    pub fn missing_for_moderation(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !self.view_channel {
            missing.push("VIEW_CHANNEL");
        }
        if !self.manage_channels {
            missing.push("MANAGE_CHANNELS");
        }
        if !self.manage_messages {
            missing.push("MANAGE_MESSAGES");
        }
        missing
    }
}

/// The destination chat platform as seen by the relay core.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    async fn list_webhooks(&self, channel_id: &str) -> Result<Vec<WebhookIdentity>, PlatformError>;

    async fn create_webhook(
        &self,
        channel_id: &str,
        name: &str,
        avatar_url: &str,
    ) -> Result<WebhookIdentity, PlatformError>;

    async fn delete_webhook(&self, webhook_id: &str) -> Result<(), PlatformError>;

    /// Returns the id of the created message.
    async fn send_via_webhook(
        &self,
        handle: &WebhookHandle,
        message: &OutboundMessage,
    ) -> Result<String, PlatformError>;

    /// `thread_id` is required for messages that live in a thread.
    async fn edit_webhook_message(
        &self,
        handle: &WebhookHandle,
        thread_id: Option<&str>,
        message_id: &str,
        content: &str,
        suppress_embeds: bool,
    ) -> Result<(), PlatformError>;

    /// Most recent messages first.
    async fn fetch_recent_messages(
        &self,
        channel_id: &str,
    ) -> Result<Vec<ChannelMessage>, PlatformError>;

    async fn pin_message(&self, channel_id: &str, message_id: &str) -> Result<(), PlatformError>;

    async fn delete_messages(
        &self,
        channel_id: &str,
        message_ids: &[String],
    ) -> Result<(), PlatformError>;

    async fn list_custom_emoji(&self, community_id: &str)
    -> Result<Vec<CustomEmoji>, PlatformError>;

    async fn create_custom_emoji(
        &self,
        community_id: &str,
        name: &str,
        asset_url: &str,
    ) -> Result<CustomEmoji, EmojiCreateError>;

    /// Returns the member's user id.
    async fn resolve_member_by_username(
        &self,
        community_id: &str,
        username: &str,
    ) -> Result<Option<String>, PlatformError>;

    async fn channel_permissions(
        &self,
        community_id: &str,
        channel_id: &str,
    ) -> Result<Capabilities, PlatformError>;
}
