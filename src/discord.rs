use std::collections::HashSet;
use std::num::NonZeroU64;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, error, info, warn};

use serenity::all::{
    Cache, ChannelId, Client as SerenityClient, Context as SerenityContext, CreateAllowedMentions,
    CreateAttachment, CreateEmbed, CreateWebhook, EditMessage, EditWebhookMessage, Emoji,
    EventHandler as SerenityEventHandler, ExecuteWebhook, GatewayIntents, GetMessages, GuildId,
    Http, MessageFlags, MessageId, Permissions, Ready, Timestamp, UserId, Webhook,
    WebhookId,
};
use serenity::http::HttpError;
use tokio::sync::{Mutex as AsyncMutex, oneshot};

use crate::platform::{
    Capabilities, ChannelMessage, ChatPlatform, CustomEmoji, EmojiCreateError, OutboundMessage,
    PlatformError, WebhookHandle, WebhookIdentity,
};

const INITIAL_LOGIN_RETRY_SECONDS: u64 = 2;
const MAX_LOGIN_RETRY_SECONDS: u64 = 300;
const READY_TIMEOUT_SECONDS: u64 = 30;

const RECENT_MESSAGE_WINDOW: u8 = 100;
const BULK_DELETE_MAX: usize = 100;
const MEMBER_SEARCH_LIMIT: u64 = 10;
const NOTE_EMBED_COLOUR: u32 = 0x00b0f4;

const DISCORD_INVALID_FORM_BODY: isize = 50035;
const DISCORD_MAX_EMOJIS: isize = 30008;
const DISCORD_ASSET_TOO_LARGE: isize = 50138;

/// REST client plus gateway cache, available once the gateway is ready.
#[derive(Clone)]
struct Session {
    http: Arc<Http>,
    cache: Arc<Cache>,
    bot_id: UserId,
}

struct DiscordLoginState {
    is_logged_in: bool,
    gateway_task: Option<tokio::task::JoinHandle<()>>,
}

struct ReadySignalHandler {
    ready_sender: AsyncMutex<Option<oneshot::Sender<Session>>>,
}

#[serenity::async_trait]
impl SerenityEventHandler for ReadySignalHandler {
    async fn ready(&self, ctx: SerenityContext, ready: Ready) {
        info!(
            "discord gateway ready as {} ({}) in {} guilds",
            ready.user.name,
            ready.user.id,
            ready.guilds.len()
        );
        if let Some(sender) = self.ready_sender.lock().await.take() {
            let _ = sender.send(Session {
                http: ctx.http.clone(),
                cache: ctx.cache.clone(),
                bot_id: ready.user.id,
            });
        }
    }
}

pub struct DiscordClient {
    bot_token: SecretString,
    login_state: AsyncMutex<DiscordLoginState>,
    session: RwLock<Option<Session>>,
}

impl DiscordClient {
    pub fn new(bot_token: &str) -> Self {
        info!("initializing discord client");
        Self {
            bot_token: SecretString::from(bot_token.to_string()),
            login_state: AsyncMutex::new(DiscordLoginState {
                is_logged_in: false,
                gateway_task: None,
            }),
            session: RwLock::new(None),
        }
    }

    pub async fn login(&self) -> Result<()> {
        let mut state = self.login_state.lock().await;
        if state.is_logged_in {
            return Ok(());
        }

        let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_EMOJIS_AND_STICKERS;
        let (ready_tx, ready_rx) = oneshot::channel();
        let event_handler = ReadySignalHandler {
            ready_sender: AsyncMutex::new(Some(ready_tx)),
        };

        let mut gateway_client = SerenityClient::builder(self.bot_token.expose_secret(), intents)
            .event_handler(event_handler)
            .await
            .map_err(|err| anyhow!("failed to build discord gateway client: {err}"))?;

        let gateway_task = tokio::spawn(async move {
            if let Err(err) = gateway_client.start_autosharded().await {
                error!("discord gateway stopped: {err}");
            }
        });

        match tokio::time::timeout(std::time::Duration::from_secs(READY_TIMEOUT_SECONDS), ready_rx).await {
            Ok(Ok(session)) => {
                *self.session.write() = Some(session);
                state.is_logged_in = true;
                state.gateway_task = Some(gateway_task);
                info!("discord bot login succeeded and gateway is connected");
                Ok(())
            }
            Ok(Err(_)) => {
                gateway_task.abort();
                Err(anyhow!("discord gateway exited before receiving Ready event"))
            }
            Err(_) => {
                gateway_task.abort();
                Err(anyhow!("timed out waiting for discord Ready event"))
            }
        }
    }

    pub async fn start(&self) -> Result<()> {
        let mut retry_seconds = INITIAL_LOGIN_RETRY_SECONDS;

        loop {
            match self.login().await {
                Ok(()) => {
                    info!("discord client is ready");
                    return Ok(());
                }
                Err(err) => {
                    error!(
                        "failed to start discord client: {err}. retrying in {} seconds",
                        retry_seconds
                    );
                    tokio::time::sleep(std::time::Duration::from_secs(retry_seconds)).await;
                    retry_seconds = (retry_seconds * 2).min(MAX_LOGIN_RETRY_SECONDS);
                }
            }
        }
    }

    pub async fn stop(&self) -> Result<()> {
        let mut state = self.login_state.lock().await;
        if !state.is_logged_in {
            return Ok(());
        }

        if let Some(gateway_task) = state.gateway_task.take() {
            gateway_task.abort();
            match gateway_task.await {
                Ok(()) => info!("discord gateway task exited"),
                Err(join_err) if join_err.is_cancelled() => info!("discord gateway task aborted"),
                Err(join_err) => error!("discord gateway task join error: {join_err}"),
            }
        }

        *self.session.write() = None;
        state.is_logged_in = false;
        info!("discord client stopped");
        Ok(())
    }

    fn session(&self) -> Result<Session, PlatformError> {
        self.session.read().clone().ok_or(PlatformError::NotConnected)
    }

    async fn webhook(&self, http: &Http, handle: &WebhookHandle) -> Result<Webhook, PlatformError> {
        Webhook::from_url(http, &handle.url())
            .await
            .map_err(|e| PlatformError::Request(format!("failed to load webhook {}: {}", handle.id, e)))
    }
}

fn snowflake(raw: &str) -> Result<u64, PlatformError> {
    raw.trim()
        .parse::<NonZeroU64>()
        .map(NonZeroU64::get)
        .map_err(|_| PlatformError::InvalidId(raw.to_string()))
}

fn channel_id(raw: &str) -> Result<ChannelId, PlatformError> {
    snowflake(raw).map(ChannelId::new)
}

fn guild_id(raw: &str) -> Result<GuildId, PlatformError> {
    snowflake(raw).map(GuildId::new)
}

fn message_id(raw: &str) -> Result<MessageId, PlatformError> {
    snowflake(raw).map(MessageId::new)
}

fn request_error(what: &str, err: serenity::Error) -> PlatformError {
    PlatformError::Request(format!("{what}: {err}"))
}

fn to_utc(timestamp: Timestamp) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(timestamp.unix_timestamp(), 0).unwrap_or_else(Utc::now)
}

/// The token is only exposed through the execute URL.
fn webhook_token(webhook: &Webhook) -> Option<String> {
    let url = webhook.url().ok()?;
    url.rsplit('/').next().filter(|token| !token.is_empty()).map(str::to_string)
}

fn to_identity(webhook: &Webhook, fallback_channel: &str) -> WebhookIdentity {
    WebhookIdentity {
        id: webhook.id.to_string(),
        name: webhook.name.clone(),
        token: webhook_token(webhook),
        channel_id: webhook
            .channel_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| fallback_channel.to_string()),
        created_at: to_utc(webhook.id.created_at()),
    }
}

fn to_custom_emoji(emoji: &Emoji) -> CustomEmoji {
    CustomEmoji {
        id: emoji.id.to_string(),
        name: emoji.name.clone(),
        reference: emoji.to_string(),
        animated: emoji.animated,
    }
}

fn permissions_to_capabilities(perms: Permissions) -> Capabilities {
    Capabilities {
        view_channel: perms.contains(Permissions::VIEW_CHANNEL),
        send_messages: perms.contains(Permissions::SEND_MESSAGES),
        manage_channels: perms.contains(Permissions::MANAGE_CHANNELS),
        manage_messages: perms.contains(Permissions::MANAGE_MESSAGES),
        manage_webhooks: perms.contains(Permissions::MANAGE_WEBHOOKS),
    }
}

fn unique_message_ids(ids: Vec<MessageId>) -> Vec<MessageId> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}

fn emoji_error_for_code(code: isize, message: String) -> EmojiCreateError {
    match code {
        DISCORD_INVALID_FORM_BODY => EmojiCreateError::NameInvalid(message),
        DISCORD_MAX_EMOJIS | DISCORD_ASSET_TOO_LARGE => EmojiCreateError::QuotaExceeded(message),
        _ => EmojiCreateError::Other(message),
    }
}

fn classify_emoji_error(err: serenity::Error) -> EmojiCreateError {
    match &err {
        serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) => {
            emoji_error_for_code(response.error.code, response.error.message.clone())
        }
        _ => EmojiCreateError::Other(err.to_string()),
    }
}

#[async_trait]
impl ChatPlatform for DiscordClient {
    async fn list_webhooks(&self, channel: &str) -> Result<Vec<WebhookIdentity>, PlatformError> {
        let session = self.session()?;
        let webhooks = channel_id(channel)?
            .webhooks(&*session.http)
            .await
            .map_err(|e| request_error("failed to fetch webhooks", e))?;
        Ok(webhooks.iter().map(|hook| to_identity(hook, channel)).collect())
    }

    async fn create_webhook(
        &self,
        channel: &str,
        name: &str,
        avatar_url: &str,
    ) -> Result<WebhookIdentity, PlatformError> {
        let session = self.session()?;
        let mut builder = CreateWebhook::new(name);
        match CreateAttachment::url(&*session.http, avatar_url).await {
            Ok(avatar) => builder = builder.avatar(&avatar),
            Err(e) => warn!("creating webhook without avatar, failed to fetch {}: {}", avatar_url, e),
        }

        let webhook = channel_id(channel)?
            .create_webhook(&*session.http, builder)
            .await
            .map_err(|e| request_error("failed to create webhook", e))?;
        Ok(to_identity(&webhook, channel))
    }

    async fn delete_webhook(&self, webhook: &str) -> Result<(), PlatformError> {
        let session = self.session()?;
        session
            .http
            .delete_webhook(WebhookId::new(snowflake(webhook)?), Some("duplicate relay webhook"))
            .await
            .map_err(|e| request_error("failed to delete webhook", e))
    }

    async fn send_via_webhook(
        &self,
        handle: &WebhookHandle,
        message: &OutboundMessage,
    ) -> Result<String, PlatformError> {
        let session = self.session()?;
        let webhook = self.webhook(&*session.http, handle).await?;

        let mut builder = ExecuteWebhook::new()
            .content(&message.content)
            .username(&message.display_name)
            .allowed_mentions(CreateAllowedMentions::new().all_users(message.allow_user_mentions));
        if let Some(avatar) = &message.avatar_url {
            builder = builder.avatar_url(avatar);
        }
        if let Some(thread) = &message.thread_id {
            builder = builder.in_thread(channel_id(thread)?);
        }
        if let Some(note) = &message.note {
            builder = builder.embed(CreateEmbed::new().description(note).colour(NOTE_EMBED_COLOUR));
        }
        if message.suppress_notifications {
            builder = builder.flags(MessageFlags::SUPPRESS_NOTIFICATIONS);
        }

        let sent = webhook
            .execute(&*session.http, true, builder)
            .await
            .map_err(|e| request_error("webhook send failed", e))?
            .ok_or_else(|| PlatformError::Request("webhook execution returned no message".to_string()))?;

        debug!("sent message via webhook={} message_id={}", handle.id, sent.id);
        Ok(sent.id.to_string())
    }

    async fn edit_webhook_message(
        &self,
        handle: &WebhookHandle,
        thread_id: Option<&str>,
        message: &str,
        content: &str,
        suppress_embeds: bool,
    ) -> Result<(), PlatformError> {
        let session = self.session()?;
        let webhook = self.webhook(&*session.http, handle).await?;
        let message = message_id(message)?;

        let mut builder = EditWebhookMessage::new().content(content);
        if let Some(thread) = thread_id {
            builder = builder.in_thread(channel_id(thread)?);
        }
        webhook
            .edit_message(&*session.http, message, builder)
            .await
            .map_err(|e| request_error("webhook edit failed", e))?;

        let window = channel_id(thread_id.unwrap_or(&handle.channel_id))?;
        window
            .edit_message(&*session.http, message, EditMessage::new().suppress_embeds(suppress_embeds))
            .await
            .map_err(|e| request_error("failed to update embed suppression", e))?;
        Ok(())
    }

    async fn fetch_recent_messages(&self, channel: &str) -> Result<Vec<ChannelMessage>, PlatformError> {
        let session = self.session()?;
        let messages = channel_id(channel)?
            .messages(&*session.http, GetMessages::new().limit(RECENT_MESSAGE_WINDOW))
            .await
            .map_err(|e| request_error("failed to fetch messages", e))?;

        Ok(messages
            .into_iter()
            .map(|message| ChannelMessage {
                id: message.id.to_string(),
                author_name: message.author.name.clone(),
                content: message.content.clone(),
                webhook_id: message.webhook_id.map(|id| id.to_string()),
                timestamp: to_utc(message.timestamp),
            })
            .collect())
    }

    async fn pin_message(&self, channel: &str, message: &str) -> Result<(), PlatformError> {
        let session = self.session()?;
        channel_id(channel)?
            .pin(&*session.http, message_id(message)?)
            .await
            .map_err(|e| request_error("failed to pin message", e))
    }

    async fn delete_messages(&self, channel: &str, message_ids: &[String]) -> Result<(), PlatformError> {
        let session = self.session()?;
        let channel = channel_id(channel)?;
        let ids = unique_message_ids(
            message_ids
                .iter()
                .map(|id| message_id(id))
                .collect::<Result<Vec<_>, _>>()?,
        );

        for chunk in ids.chunks(BULK_DELETE_MAX) {
            let result = match chunk {
                [single] => channel.delete_message(&*session.http, *single).await,
                _ => channel.delete_messages(&*session.http, chunk.iter().copied()).await,
            };
            result.map_err(|e| request_error("failed to delete messages", e))?;
        }
        Ok(())
    }

    async fn list_custom_emoji(&self, community: &str) -> Result<Vec<CustomEmoji>, PlatformError> {
        let session = self.session()?;
        let guild = guild_id(community)?;

        let cached: Option<Vec<CustomEmoji>> = session
            .cache
            .guild(guild)
            .map(|guild| guild.emojis.values().map(to_custom_emoji).collect());
        if let Some(emoji) = cached {
            return Ok(emoji);
        }

        let emoji = guild
            .emojis(&*session.http)
            .await
            .map_err(|e| request_error("failed to list emoji", e))?;
        Ok(emoji.iter().map(to_custom_emoji).collect())
    }

    async fn create_custom_emoji(
        &self,
        community: &str,
        name: &str,
        asset_url: &str,
    ) -> Result<CustomEmoji, EmojiCreateError> {
        let session = self
            .session()
            .map_err(|e| EmojiCreateError::Other(e.to_string()))?;
        let guild = guild_id(community).map_err(|e| EmojiCreateError::Other(e.to_string()))?;

        let image = CreateAttachment::url(&*session.http, asset_url)
            .await
            .map_err(|e| EmojiCreateError::Other(format!("failed to download {asset_url}: {e}")))?;

        let emoji = guild
            .create_emoji(&*session.http, name, &image.to_base64())
            .await
            .map_err(classify_emoji_error)?;
        Ok(to_custom_emoji(&emoji))
    }

    async fn resolve_member_by_username(
        &self,
        community: &str,
        username: &str,
    ) -> Result<Option<String>, PlatformError> {
        let session = self.session()?;
        let members = guild_id(community)?
            .search_members(&*session.http, username, Some(MEMBER_SEARCH_LIMIT))
            .await
            .map_err(|e| request_error("member search failed", e))?;

        Ok(members
            .iter()
            .find(|member| member.user.name.eq_ignore_ascii_case(username))
            .map(|member| member.user.id.to_string()))
    }

    async fn channel_permissions(&self, community: &str, channel: &str) -> Result<Capabilities, PlatformError> {
        let session = self.session()?;
        let guild = guild_id(community)?
            .to_partial_guild(&*session.http)
            .await
            .map_err(|e| request_error("failed to fetch guild", e))?;
        let channel = channel_id(channel)?
            .to_channel(&*session.http)
            .await
            .map_err(|e| request_error("failed to fetch channel", e))?
            .guild()
            .ok_or_else(|| PlatformError::NotFound(format!("guild channel {channel}")))?;
        let member = guild
            .member(&*session.http, session.bot_id)
            .await
            .map_err(|e| request_error("failed to fetch bot member", e))?;

        Ok(permissions_to_capabilities(guild.user_permissions_in(&channel, &member)))
    }
}
