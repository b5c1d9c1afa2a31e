use chrono::{Duration, Utc};
use tracing::{debug, info, warn};

use super::display_name::author_matches;
use crate::db::Destination;
use crate::error::RelayError;
use crate::events::ChatEvent;
use crate::platform::{ChatPlatform, OutboundMessage};
use crate::webhook_cache::WebhookCache;

pub const NOTE_AUTHOR: &str = "📝";
const NOTE_CONTENT: &str = "Note added:";

/// Messages older than this cannot be bulk-deleted.
const BULK_DELETE_MAX_AGE_DAYS: i64 = 14;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InlineCommand {
    AddNote { note: String },
    Vanish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandGate {
    Privileged,
    Anyone,
}

impl InlineCommand {
    /// `None` for text that is not a command, an unknown command, or an
    /// `addnote` without a note.
    pub fn parse(text: &str, prefix: &str) -> Option<Self> {
        if prefix.is_empty() {
            return None;
        }
        let body = text.trim_start().strip_prefix(prefix)?;
        let mut parts = body.splitn(2, char::is_whitespace);
        let command = parts.next()?.to_ascii_lowercase();
        let args = parts.next().unwrap_or("").trim();

        match command.as_str() {
            "addnote" if !args.is_empty() => Some(Self::AddNote {
                note: args.to_string(),
            }),
            "vanish" => Some(Self::Vanish),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::AddNote { .. } => "addnote",
            Self::Vanish => "vanish",
        }
    }

    pub fn gate(&self) -> CommandGate {
        match self {
            Self::AddNote { .. } => CommandGate::Privileged,
            Self::Vanish => CommandGate::Anyone,
        }
    }

    pub fn permits(&self, event: &ChatEvent) -> bool {
        match self.gate() {
            CommandGate::Privileged => event.privileged,
            CommandGate::Anyone => true,
        }
    }
}

pub struct CommandContext<'a> {
    pub platform: &'a dyn ChatPlatform,
    pub webhooks: &'a WebhookCache,
    pub destination: &'a Destination,
    pub event: &'a ChatEvent,
    pub avatar_url: &'a str,
    pub webhook_name: &'a str,
    pub webhook_avatar_url: &'a str,
    pub marker: &'a str,
}

pub async fn execute(command: &InlineCommand, ctx: &CommandContext<'_>) -> Result<(), RelayError> {
    match command {
        InlineCommand::AddNote { note } => add_note(note, ctx).await,
        InlineCommand::Vanish => vanish(ctx).await,
    }
}

async fn add_note(note: &str, ctx: &CommandContext<'_>) -> Result<(), RelayError> {
    let channel_id = ctx.destination.channel_id.as_str();
    let handle = ctx
        .webhooks
        .get_or_create(ctx.destination, ctx.webhook_name, ctx.webhook_avatar_url)
        .await?;

    let message = OutboundMessage {
        content: NOTE_CONTENT.to_string(),
        display_name: NOTE_AUTHOR.to_string(),
        avatar_url: Some(ctx.avatar_url.to_string()),
        thread_id: ctx.destination.thread_id.clone(),
        note: Some(note.to_string()),
        allow_user_mentions: false,
        suppress_notifications: false,
    };

    let message_id = match ctx.platform.send_via_webhook(&handle, &message).await {
        Ok(id) => id,
        Err(e) => {
            ctx.webhooks.evict(ctx.destination);
            return Err(RelayError::DeliveryFailed {
                channel_id: channel_id.to_string(),
                reason: e.to_string(),
            });
        }
    };

    let pin_channel = ctx.destination.thread_id.as_deref().unwrap_or(channel_id);
    ctx.platform
        .pin_message(pin_channel, &message_id)
        .await
        .map_err(|e| RelayError::DeliveryFailed {
            channel_id: pin_channel.to_string(),
            reason: format!("failed to pin note: {e}"),
        })?;

    info!(
        "note added by {} in channel={} message={}",
        ctx.event.source_user, pin_channel, message_id
    );
    Ok(())
}

async fn vanish(ctx: &CommandContext<'_>) -> Result<(), RelayError> {
    let channel_id = ctx
        .destination
        .thread_id
        .as_deref()
        .unwrap_or(&ctx.destination.channel_id);
    let handle = ctx
        .webhooks
        .get_or_create(ctx.destination, ctx.webhook_name, ctx.webhook_avatar_url)
        .await?;

    let recent = ctx
        .platform
        .fetch_recent_messages(channel_id)
        .await
        .map_err(|e| RelayError::DeliveryFailed {
            channel_id: channel_id.to_string(),
            reason: format!("failed to fetch recent messages: {e}"),
        })?;

    let cutoff = Utc::now() - Duration::days(BULK_DELETE_MAX_AGE_DAYS);
    let doomed: Vec<String> = recent
        .into_iter()
        .filter(|message| message.webhook_id.as_deref() == Some(handle.id.as_str()))
        .filter(|message| message.timestamp > cutoff)
        .filter(|message| author_matches(&message.author_name, &ctx.event.source_user, ctx.marker))
        .map(|message| message.id)
        .collect();

    if doomed.is_empty() {
        debug!(
            "vanish by {} found nothing to delete in channel={}",
            ctx.event.source_user, channel_id
        );
        return Ok(());
    }

    if let Err(e) = ctx.platform.delete_messages(channel_id, &doomed).await {
        warn!(
            "failed to delete {} messages for {} in channel={}: {}",
            doomed.len(),
            ctx.event.source_user,
            channel_id,
            e
        );
        return Err(RelayError::DeliveryFailed {
            channel_id: channel_id.to_string(),
            reason: e.to_string(),
        });
    }

    info!(
        "vanished {} messages for {} in channel={}",
        doomed.len(),
        ctx.event.source_user,
        channel_id
    );
    Ok(())
}
