use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;

use super::{
    Capabilities, ChannelMessage, ChatPlatform, CustomEmoji, EmojiCreateError, OutboundMessage,
    PlatformError, WebhookHandle, WebhookIdentity,
};

/// In-memory platform that records every call.
pub struct FakePlatform {
    pub state: Mutex<FakeState>,
}

pub struct FakeState {
    next_id: u64,
    pub webhooks: HashMap<String, Vec<WebhookIdentity>>,
    pub list_webhook_calls: usize,
    pub created_webhooks: Vec<String>,
    pub deleted_webhooks: Vec<String>,
    pub failing_webhook_channels: HashSet<String>,
    pub sent: Vec<(String, OutboundMessage)>,
    pub failing_send_channels: HashSet<String>,
    pub hanging_send_channels: HashSet<String>,
    pub messages: HashMap<String, Vec<ChannelMessage>>,
    pub edits: Vec<(String, String, bool)>,
    pub failing_edits: HashSet<String>,
    pub pinned: Vec<(String, String)>,
    pub deleted_messages: Vec<(String, Vec<String>)>,
    pub emoji: HashMap<String, Vec<CustomEmoji>>,
    pub emoji_uploads: Vec<(String, String)>,
    pub emoji_failures: HashMap<String, EmojiCreateError>,
    pub members: HashMap<String, String>,
    pub capabilities: Capabilities,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            next_id: 1000,
            webhooks: HashMap::new(),
            list_webhook_calls: 0,
            created_webhooks: Vec::new(),
            deleted_webhooks: Vec::new(),
            failing_webhook_channels: HashSet::new(),
            sent: Vec::new(),
            failing_send_channels: HashSet::new(),
            hanging_send_channels: HashSet::new(),
            messages: HashMap::new(),
            edits: Vec::new(),
            failing_edits: HashSet::new(),
            pinned: Vec::new(),
            deleted_messages: Vec::new(),
            emoji: HashMap::new(),
            emoji_uploads: Vec::new(),
            emoji_failures: HashMap::new(),
            members: HashMap::new(),
            capabilities: Capabilities::all(),
        }
    }
}

impl FakeState {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }

    pub fn add_webhook(&mut self, channel_id: &str, name: &str, age_minutes: i64) -> String {
        let id = self.next_id();
        self.webhooks
            .entry(channel_id.to_string())
            .or_default()
            .push(WebhookIdentity {
                id: id.clone(),
                name: Some(name.to_string()),
                token: Some(format!("token-{id}")),
                channel_id: channel_id.to_string(),
                created_at: Utc::now() - Duration::minutes(age_minutes),
            });
        id
    }

    pub fn add_emoji(&mut self, community_id: &str, name: &str) {
        let id = self.next_id();
        self.emoji
            .entry(community_id.to_string())
            .or_default()
            .push(CustomEmoji {
                id,
                name: name.to_string(),
                reference: format!("<emoji:{name}>"),
                animated: false,
            });
    }

    /// Pushes a message as the newest in the channel window.
    pub fn add_message(
        &mut self,
        channel_id: &str,
        author_name: &str,
        content: &str,
        webhook_id: Option<&str>,
    ) -> String {
        let id = self.next_id();
        let window = self.messages.entry(channel_id.to_string()).or_default();
        let timestamp = Utc::now() + Duration::seconds(window.len() as i64);
        window.insert(
            0,
            ChannelMessage {
                id: id.clone(),
                author_name: author_name.to_string(),
                content: content.to_string(),
                webhook_id: webhook_id.map(str::to_string),
                timestamp,
            },
        );
        id
    }

    pub fn message_content(&self, channel_id: &str, message_id: &str) -> Option<String> {
        self.messages
            .get(channel_id)?
            .iter()
            .find(|message| message.id == message_id)
            .map(|message| message.content.clone())
    }

    pub fn sent_to(&self, channel_id: &str) -> Vec<OutboundMessage> {
        self.sent
            .iter()
            .filter(|(channel, _)| channel == channel_id)
            .map(|(_, message)| message.clone())
            .collect()
    }
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
        }
    }
}

#[async_trait]
impl ChatPlatform for FakePlatform {
    async fn list_webhooks(&self, channel_id: &str) -> Result<Vec<WebhookIdentity>, PlatformError> {
        let mut state = self.state.lock();
        state.list_webhook_calls += 1;
        if state.failing_webhook_channels.contains(channel_id) {
            return Err(PlatformError::Request("missing access".to_string()));
        }
        Ok(state.webhooks.get(channel_id).cloned().unwrap_or_default())
    }

    async fn create_webhook(
        &self,
        channel_id: &str,
        name: &str,
        _avatar_url: &str,
    ) -> Result<WebhookIdentity, PlatformError> {
        let mut state = self.state.lock();
        if state.failing_webhook_channels.contains(channel_id) {
            return Err(PlatformError::Request("missing access".to_string()));
        }
        let id = state.add_webhook(channel_id, name, 0);
        state.created_webhooks.push(id.clone());
        state
            .webhooks
            .get(channel_id)
            .and_then(|hooks| hooks.iter().find(|hook| hook.id == id).cloned())
            .ok_or_else(|| PlatformError::NotFound(id))
    }

    async fn delete_webhook(&self, webhook_id: &str) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        for hooks in state.webhooks.values_mut() {
            hooks.retain(|hook| hook.id != webhook_id);
        }
        state.deleted_webhooks.push(webhook_id.to_string());
        Ok(())
    }

    async fn send_via_webhook(
        &self,
        handle: &WebhookHandle,
        message: &OutboundMessage,
    ) -> Result<String, PlatformError> {
        let hang = self
            .state
            .lock()
            .hanging_send_channels
            .contains(&handle.channel_id);
        if hang {
            futures::future::pending::<()>().await;
        }

        let mut state = self.state.lock();
        if state.failing_send_channels.contains(&handle.channel_id) {
            return Err(PlatformError::Request("Unknown Webhook".to_string()));
        }
        state
            .sent
            .push((handle.channel_id.clone(), message.clone()));
        let window = message
            .thread_id
            .clone()
            .unwrap_or_else(|| handle.channel_id.clone());
        let id = state.add_message(
            &window,
            &message.display_name,
            &message.content,
            Some(&handle.id),
        );
        Ok(id)
    }

    async fn edit_webhook_message(
        &self,
        handle: &WebhookHandle,
        thread_id: Option<&str>,
        message_id: &str,
        content: &str,
        suppress_embeds: bool,
    ) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        if state.failing_edits.contains(message_id) {
            return Err(PlatformError::Request("edit rejected".to_string()));
        }
        state
            .edits
            .push((message_id.to_string(), content.to_string(), suppress_embeds));
        if let Some(message) = state
            .messages
            .get_mut(thread_id.unwrap_or(&handle.channel_id))
            .and_then(|window| window.iter_mut().find(|message| message.id == message_id))
        {
            message.content = content.to_string();
        }
        Ok(())
    }

    async fn fetch_recent_messages(
        &self,
        channel_id: &str,
    ) -> Result<Vec<ChannelMessage>, PlatformError> {
        Ok(self
            .state
            .lock()
            .messages
            .get(channel_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn pin_message(&self, channel_id: &str, message_id: &str) -> Result<(), PlatformError> {
        self.state
            .lock()
            .pinned
            .push((channel_id.to_string(), message_id.to_string()));
        Ok(())
    }

    async fn delete_messages(
        &self,
        channel_id: &str,
        message_ids: &[String],
    ) -> Result<(), PlatformError> {
        let mut state = self.state.lock();
        if let Some(window) = state.messages.get_mut(channel_id) {
            window.retain(|message| !message_ids.contains(&message.id));
        }
        state
            .deleted_messages
            .push((channel_id.to_string(), message_ids.to_vec()));
        Ok(())
    }

    async fn list_custom_emoji(
        &self,
        community_id: &str,
    ) -> Result<Vec<CustomEmoji>, PlatformError> {
        Ok(self
            .state
            .lock()
            .emoji
            .get(community_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_custom_emoji(
        &self,
        community_id: &str,
        name: &str,
        asset_url: &str,
    ) -> Result<CustomEmoji, EmojiCreateError> {
        let mut state = self.state.lock();
        state
            .emoji_uploads
            .push((name.to_string(), asset_url.to_string()));
        if let Some(err) = state.emoji_failures.get(asset_url) {
            return Err(err.clone());
        }
        state.add_emoji(community_id, name);
        state
            .emoji
            .get(community_id)
            .and_then(|emoji| emoji.last().cloned())
            .ok_or_else(|| EmojiCreateError::Other("emoji vanished".to_string()))
    }

    async fn resolve_member_by_username(
        &self,
        _community_id: &str,
        username: &str,
    ) -> Result<Option<String>, PlatformError> {
        Ok(self.state.lock().members.get(username).cloned())
    }

    async fn channel_permissions(
        &self,
        _community_id: &str,
        _channel_id: &str,
    ) -> Result<Capabilities, PlatformError> {
        Ok(self.state.lock().capabilities)
    }
}
