use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

pub mod commands;
pub mod display_name;
pub mod emoji;
pub mod emotes;
pub mod materialize;
pub mod mentions;

pub use commands::InlineCommand;

use self::commands::CommandContext;
use self::display_name::{DisplayNameRules, format_display_name};
use self::emoji::substitute_guild_emoji;
use self::emotes::collect_emote_links;
use self::materialize::materialize_emotes;
use self::mentions::{MentionPattern, resolve_mentions};
use crate::config::{NoticesConfig, RelayConfig};
use crate::db::Destination;
use crate::events::{ChatEvent, ChatEventKind};
use crate::platform::{ChatPlatform, OutboundMessage};
use crate::providers::{
    EmoteProvider, NoEmotes, NoPronouns, NoProfiles, ProfileLookup, PronounLookup,
};
use crate::utils::formatting::replace_whole_words;
use crate::webhook_cache::WebhookCache;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub webhook_name: String,
    pub webhook_avatar_url: String,
    pub default_avatar_url: String,
    pub command_prefix: String,
    pub mention_prefix: String,
    pub reserved_user: Option<String>,
    pub reserved_marker: String,
    pub notices: NoticesConfig,
    pub lookup_timeout: Duration,
}

impl From<&RelayConfig> for PipelineSettings {
    fn from(relay: &RelayConfig) -> Self {
        Self {
            webhook_name: relay.webhook_name.clone(),
            webhook_avatar_url: relay.webhook_avatar_url.clone(),
            default_avatar_url: relay.default_avatar_url.clone(),
            command_prefix: relay.command_prefix.clone(),
            mention_prefix: relay.mention_prefix.clone(),
            reserved_user: relay.reserved_user.clone(),
            reserved_marker: relay.reserved_marker.clone(),
            notices: relay.notices.clone(),
            lookup_timeout: Duration::from_secs(relay.lookup_timeout_secs),
        }
    }
}

/// Per-event work shared by every destination of the event.
#[derive(Debug, Clone)]
pub struct PreparedEvent {
    pub event: ChatEvent,
    pub display_name: String,
    pub avatar_url: String,
    pub emote_map: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Forward(OutboundMessage),
    CommandHandled(InlineCommand),
    /// Nothing left to send.
    Empty,
}

pub struct MessagePipeline {
    platform: Arc<dyn ChatPlatform>,
    webhooks: Arc<WebhookCache>,
    emotes: Arc<dyn EmoteProvider>,
    pronouns: Arc<dyn PronounLookup>,
    profiles: Arc<dyn ProfileLookup>,
    mentions: MentionPattern,
    settings: PipelineSettings,
}

impl MessagePipeline {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        webhooks: Arc<WebhookCache>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            platform,
            webhooks,
            emotes: Arc::new(NoEmotes),
            pronouns: Arc::new(NoPronouns),
            profiles: Arc::new(NoProfiles),
            mentions: MentionPattern::new(&settings.mention_prefix),
            settings,
        }
    }

    pub fn with_emotes(mut self, emotes: Arc<dyn EmoteProvider>) -> Self {
        self.emotes = emotes;
        self
    }

    pub fn with_pronouns(mut self, pronouns: Arc<dyn PronounLookup>) -> Self {
        self.pronouns = pronouns;
        self
    }

    pub fn with_profiles(mut self, profiles: Arc<dyn ProfileLookup>) -> Self {
        self.profiles = profiles;
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub async fn prepare_event(&self, event: ChatEvent) -> PreparedEvent {
        let emote_map = async {
            let channel_id = match &event.source_channel_id {
                Some(id) if event.kind.carries_chat_text() => id,
                _ => return HashMap::new(),
            };
            match self
                .bounded("emote set", self.emotes.fetch_channel_emote_map(channel_id))
                .await
            {
                Some(Ok(map)) => map,
                Some(Err(e)) => {
                    warn!("failed to fetch emote set for channel={}: {:#}", channel_id, e);
                    HashMap::new()
                }
                None => HashMap::new(),
            }
        };

        // the avatar override marks a pseudo user with no pronouns of its own
        let pronoun_suffix = async {
            if event.avatar_url.is_some() {
                return String::new();
            }
            self.bounded("pronouns", self.pronouns.fetch_pronoun_suffix(&event.source_user))
                .await
                .unwrap_or_default()
        };

        let avatar_url = async {
            if let Some(url) = &event.avatar_url {
                return url.clone();
            }
            self.bounded("profile", self.profiles.fetch_avatar_url(&event.source_user))
                .await
                .flatten()
                .unwrap_or_else(|| self.settings.default_avatar_url.clone())
        };

        let (emote_map, pronoun_suffix, avatar_url) = tokio::join!(emote_map, pronoun_suffix, avatar_url);

        let rules = DisplayNameRules {
            reserved_user: self.settings.reserved_user.as_deref(),
            marker: &self.settings.reserved_marker,
        };
        let display_name = format_display_name(&event.source_user, &pronoun_suffix, &rules);

        PreparedEvent {
            event,
            display_name,
            avatar_url,
            emote_map,
        }
    }

    async fn bounded<T>(&self, what: &str, lookup: impl Future<Output = T>) -> Option<T> {
        match tokio::time::timeout(self.settings.lookup_timeout, lookup).await {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(
                    "{} lookup timed out after {:?}",
                    what, self.settings.lookup_timeout
                );
                None
            }
        }
    }

    pub async fn render(&self, prepared: &PreparedEvent, destination: &Destination) -> PipelineOutcome {
        let event = &prepared.event;
        if let Some(notice) = notice_text(event.kind, &self.settings.notices) {
            return self.forward(prepared, destination, notice.to_string());
        }

        let community_id = destination.community_id.as_str();
        let channel_id = destination.channel_id.as_str();

        let guild_emoji = match self.platform.list_custom_emoji(community_id).await {
            Ok(emoji) => emoji,
            Err(e) => {
                warn!("failed to list custom emoji for community={}: {}", community_id, e);
                Vec::new()
            }
        };

        let text = substitute_guild_emoji(&event.display_text, &guild_emoji);

        if event.kind == ChatEventKind::Message {
            if let Some(command) = InlineCommand::parse(&text, &self.settings.command_prefix) {
                if command.permits(event) {
                    self.run_command(&command, prepared, destination).await;
                    return PipelineOutcome::CommandHandled(command);
                }
                debug!(
                    "{} is not allowed to run {}, forwarding as chat",
                    event.source_user,
                    command.name()
                );
            }
        }

        let links = collect_emote_links(&text, event.emote_slices(), &prepared.emote_map);
        let mut text = text;
        if !links.is_empty() {
            let references =
                materialize_emotes(self.platform.as_ref(), community_id, &links, &guild_emoji).await;
            for link in &links {
                if let Some(reference) = references.get(&link.name) {
                    text = replace_whole_words(&text, &link.name, reference);
                }
            }
        }

        let text = resolve_mentions(
            self.platform.as_ref(),
            &self.mentions,
            community_id,
            channel_id,
            &text,
        )
        .await;

        if text.trim().is_empty() {
            return PipelineOutcome::Empty;
        }
        self.forward(prepared, destination, wrap_for_kind(event.kind, text))
    }

    async fn run_command(&self, command: &InlineCommand, prepared: &PreparedEvent, destination: &Destination) {
        let ctx = CommandContext {
            platform: self.platform.as_ref(),
            webhooks: &self.webhooks,
            destination,
            event: &prepared.event,
            avatar_url: &prepared.avatar_url,
            webhook_name: &self.settings.webhook_name,
            webhook_avatar_url: &self.settings.webhook_avatar_url,
            marker: &self.settings.reserved_marker,
        };
        if let Err(e) = commands::execute(command, &ctx).await {
            warn!(
                "command {} from {} failed for destination={}: {}",
                command.name(),
                prepared.event.source_user,
                destination.key(),
                e
            );
        }
    }

    fn forward(&self, prepared: &PreparedEvent, destination: &Destination, content: String) -> PipelineOutcome {
        PipelineOutcome::Forward(OutboundMessage {
            content,
            display_name: prepared.display_name.clone(),
            avatar_url: Some(prepared.avatar_url.clone()),
            thread_id: destination.thread_id.clone(),
            note: None,
            allow_user_mentions: true,
            suppress_notifications: true,
        })
    }
}

fn notice_text(kind: ChatEventKind, notices: &NoticesConfig) -> Option<&str> {
    match kind {
        ChatEventKind::Ban => Some(&notices.ban),
        ChatEventKind::Unban => Some(&notices.unban),
        ChatEventKind::Timeout => Some(&notices.timeout),
        ChatEventKind::Unfollow => Some(&notices.unfollow),
        _ => None,
    }
}

fn wrap_for_kind(kind: ChatEventKind, text: String) -> String {
    match kind {
        ChatEventKind::Action | ChatEventKind::Announcement => format!("*{text}*"),
        _ => text,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::{MessagePipeline, PipelineOutcome, PipelineSettings};
    use crate::config::RelayConfig;
    use crate::db::Destination;
    use crate::events::{ChatEvent, ChatEventKind, EmotePosition};
    use crate::pipeline::InlineCommand;
    use crate::platform::ChatPlatform;
    use crate::platform::fake::FakePlatform;
    use crate::providers::fake::FakeProviders;
    use crate::webhook_cache::WebhookCache;

    fn settings() -> PipelineSettings {
        let relay = RelayConfig {
            reserved_user: Some("crystalstreamer".to_string()),
            ..RelayConfig::default()
        };
        PipelineSettings::from(&relay)
    }

    fn pipeline(platform: &Arc<FakePlatform>) -> MessagePipeline {
        let webhooks = Arc::new(WebhookCache::new(platform.clone()));
        MessagePipeline::new(platform.clone(), webhooks, settings())
    }

    fn forwarded(outcome: PipelineOutcome) -> crate::platform::OutboundMessage {
        match outcome {
            PipelineOutcome::Forward(message) => message,
            other => panic!("expected a forwarded message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn emoji_and_mentions_are_rewritten() {
        let platform = Arc::new(FakePlatform::new());
        {
            let mut state = platform.state.lock();
            state.add_emoji("g1", "kappa");
            state.members.insert("alex".to_string(), "alex-id".to_string());
        }
        let pipeline = pipeline(&platform);

        let event = ChatEvent::new(ChatEventKind::Message, "chan", "viewer", "gg :kappa: !d @alex", "k1");
        let prepared = pipeline.prepare_event(event).await;
        let message = forwarded(pipeline.render(&prepared, &Destination::new("g1", "c1")).await);

        assert_eq!(message.content, "gg <emoji:kappa> <@alex-id>");
        assert_eq!(message.display_name, "viewer");
        assert!(message.suppress_notifications);
    }

    #[tokio::test]
    async fn addnote_runs_for_moderators_only() {
        let platform = Arc::new(FakePlatform::new());
        let pipeline = pipeline(&platform);
        let destination = Destination::new("g1", "c1");

        let event = ChatEvent::new(ChatEventKind::Message, "chan", "viewer", "!addnote be right back", "k1");
        let prepared = pipeline.prepare_event(event).await;
        let message = forwarded(pipeline.render(&prepared, &destination).await);
        assert_eq!(message.content, "!addnote be right back");
        assert!(platform.state.lock().pinned.is_empty());

        let mut event = ChatEvent::new(ChatEventKind::Message, "chan", "mod", "!addnote be right back", "k2");
        event.privileged = true;
        let prepared = pipeline.prepare_event(event).await;
        let outcome = pipeline.render(&prepared, &destination).await;
        assert_eq!(
            outcome,
            PipelineOutcome::CommandHandled(InlineCommand::AddNote {
                note: "be right back".to_string()
            })
        );

        let state = platform.state.lock();
        let notes = state.sent_to("c1");
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].content, "Note added:");
        assert_eq!(notes[0].display_name, "📝");
        assert_eq!(notes[0].note.as_deref(), Some("be right back"));
        assert!(!notes[0].allow_user_mentions);
        assert_eq!(state.pinned.len(), 1);
    }

    #[tokio::test]
    async fn vanish_deletes_only_the_callers_relayed_messages() {
        let platform = Arc::new(FakePlatform::new());
        let pipeline = pipeline(&platform);
        let destination = Destination::new("g1", "c1");

        for (user, text) in [("viewer", "one"), ("other", "two"), ("viewer", "three")] {
            let event = ChatEvent::new(ChatEventKind::Message, "chan", user, text, text);
            let prepared = pipeline.prepare_event(event).await;
            let message = forwarded(pipeline.render(&prepared, &destination).await);
            let handle = pipeline
                .webhooks
                .get_or_create(&destination, "Crystal Socket", "https://a")
                .await
                .expect("webhook");
            platform.send_via_webhook(&handle, &message).await.expect("send");
        }
        platform.state.lock().add_message("c1", "viewer", "typed by a human", None);

        let event = ChatEvent::new(ChatEventKind::Message, "chan", "Viewer", "!vanish", "k9");
        let prepared = pipeline.prepare_event(event).await;
        let outcome = pipeline.render(&prepared, &destination).await;
        assert_eq!(outcome, PipelineOutcome::CommandHandled(InlineCommand::Vanish));

        let state = platform.state.lock();
        assert_eq!(state.deleted_messages.len(), 1);
        assert_eq!(state.deleted_messages[0].1.len(), 2);
        let remaining: Vec<_> = state.messages["c1"].iter().map(|m| m.content.clone()).collect();
        assert_eq!(remaining, vec!["typed by a human".to_string(), "two".to_string()]);
    }

    #[tokio::test]
    async fn native_emotes_are_uploaded_and_inlined() {
        let platform = Arc::new(FakePlatform::new());
        let pipeline = pipeline(&platform);

        let mut event = ChatEvent::new(ChatEventKind::Action, "chan", "viewer", "waves Kappa Kappa", "k1");
        event.emote_positions = vec![
            EmotePosition {
                id: "25".to_string(),
                start: 6,
                end: 11,
            },
            EmotePosition {
                id: "25".to_string(),
                start: 12,
                end: 17,
            },
        ];
        let prepared = pipeline.prepare_event(event).await;
        let message = forwarded(pipeline.render(&prepared, &Destination::new("g1", "c1")).await);

        assert_eq!(message.content, "*waves <emoji:Kappa> <emoji:Kappa>*");
        assert_eq!(platform.state.lock().emoji_uploads.len(), 1);
    }

    #[tokio::test]
    async fn moderation_kinds_send_the_configured_notice() {
        let platform = Arc::new(FakePlatform::new());
        let pipeline = pipeline(&platform);

        let event = ChatEvent::new(ChatEventKind::Unfollow, "chan", "viewer", "", "k1");
        let prepared = pipeline.prepare_event(event).await;
        let message = forwarded(pipeline.render(&prepared, &Destination::new("g1", "c1")).await);
        assert_eq!(message.content, "I have left the community 💀");
    }

    #[tokio::test]
    async fn thread_destinations_carry_the_thread() {
        let platform = Arc::new(FakePlatform::new());
        let pipeline = pipeline(&platform);
        let mut destination = Destination::new("g1", "c1");
        destination.thread_id = Some("t1".to_string());

        let event = ChatEvent::new(ChatEventKind::Message, "chan", "viewer", "hello", "k1");
        let prepared = pipeline.prepare_event(event).await;
        let message = forwarded(pipeline.render(&prepared, &destination).await);
        assert_eq!(message.thread_id.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn prepare_decorates_the_author() {
        let platform = Arc::new(FakePlatform::new());
        let providers = Arc::new(FakeProviders::default());
        providers
            .pronouns
            .lock()
            .insert("CrystalStreamer".to_string(), " (She/Her)".to_string());
        providers
            .avatars
            .lock()
            .insert("CrystalStreamer".to_string(), "https://cdn/me.png".to_string());
        providers.emotes.lock().insert(
            "42".to_string(),
            [("catJAM".to_string(), "https://cdn/cat.gif".to_string())]
                .into_iter()
                .collect(),
        );
        let pipeline = pipeline(&platform)
            .with_emotes(providers.clone())
            .with_pronouns(providers.clone())
            .with_profiles(providers.clone());

        let mut event = ChatEvent::new(ChatEventKind::Message, "chan", "CrystalStreamer", "catJAM", "k1");
        event.source_channel_id = Some("42".to_string());
        let prepared = pipeline.prepare_event(event).await;

        assert_eq!(prepared.display_name, "👑 CrystalStreamer (She/Her)");
        assert_eq!(prepared.avatar_url, "https://cdn/me.png");
        assert_eq!(prepared.emote_map["catJAM"], "https://cdn/cat.gif");

        let message = forwarded(pipeline.render(&prepared, &Destination::new("g1", "c1")).await);
        assert_eq!(message.content, "<emoji:catJAM>");
    }

    #[tokio::test]
    async fn avatar_override_skips_pronoun_lookup() {
        let platform = Arc::new(FakePlatform::new());
        let providers = Arc::new(FakeProviders::default());
        let pipeline = pipeline(&platform).with_pronouns(providers.clone());

        let mut event = ChatEvent::new(
            ChatEventKind::ChannelPointRedemption,
            "chan",
            "Channel Point Redeem",
            "Redeemed Hydrate for viewer",
            "k1",
        );
        event.avatar_url = Some("https://i.imgur.com/FJUEIhs.png".to_string());
        let prepared = pipeline.prepare_event(event).await;

        assert_eq!(prepared.avatar_url, "https://i.imgur.com/FJUEIhs.png");
        assert_eq!(*providers.pronoun_calls.lock(), 0);
    }

    #[tokio::test]
    async fn slow_lookups_fall_back_to_defaults() {
        let platform = Arc::new(FakePlatform::new());
        let providers = Arc::new(FakeProviders {
            hang: true,
            ..FakeProviders::default()
        });
        let mut settings = settings();
        settings.lookup_timeout = Duration::from_millis(20);
        let default_avatar = settings.default_avatar_url.clone();
        let webhooks = Arc::new(WebhookCache::new(platform.clone()));
        let pipeline = MessagePipeline::new(platform.clone(), webhooks, settings)
            .with_emotes(providers.clone())
            .with_pronouns(providers.clone())
            .with_profiles(providers.clone());

        let mut event = ChatEvent::new(ChatEventKind::Message, "chan", "viewer", "hi", "k1");
        event.source_channel_id = Some("42".to_string());
        let prepared = pipeline.prepare_event(event).await;

        assert_eq!(prepared.display_name, "viewer");
        assert_eq!(prepared.avatar_url, default_avatar);
        assert!(prepared.emote_map.is_empty());
    }
}
