use std::ops::Range;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RedemptionConfig;
use crate::db::normalize_source_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatEventKind {
    Message,
    Action,
    Announcement,
    Ban,
    Unban,
    Timeout,
    ChannelPointRedemption,
    Unfollow,
}

impl ChatEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Action => "action",
            Self::Announcement => "announcement",
            Self::Ban => "ban",
            Self::Unban => "unban",
            Self::Timeout => "timeout",
            Self::ChannelPointRedemption => "channel_point_redemption",
            Self::Unfollow => "unfollow",
        }
    }

    /// Kinds whose text was typed by a chatter and goes through emote and
    /// command handling.
    pub fn carries_chat_text(&self) -> bool {
        matches!(
            self,
            Self::Message | Self::Action | Self::Announcement | Self::ChannelPointRedemption
        )
    }

    pub fn is_moderation(&self) -> bool {
        matches!(self, Self::Ban | Self::Unban)
    }
}

/// Byte range of a native emote inside `display_text`, end exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmotePosition {
    pub id: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEvent {
    pub kind: ChatEventKind,
    pub source_channel: String,
    #[serde(default)]
    pub source_channel_id: Option<String>,
    pub source_user: String,
    #[serde(default)]
    pub display_text: String,
    #[serde(default)]
    pub emote_positions: Vec<EmotePosition>,
    pub dedup_key: String,
    #[serde(default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl ChatEvent {
    pub fn new(
        kind: ChatEventKind,
        source_channel: &str,
        source_user: &str,
        display_text: impl Into<String>,
        dedup_key: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            source_channel: normalize_source_id(source_channel),
            source_channel_id: None,
            source_user: source_user.to_string(),
            display_text: display_text.into(),
            emote_positions: Vec::new(),
            dedup_key: dedup_key.into(),
            occurred_at: Utc::now(),
            privileged: false,
            avatar_url: None,
        }
    }

    /// The `(emote id, name)` pairs named by `emote_positions`. Ranges that are
    /// out of bounds or split a character are skipped.
    pub fn emote_slices(&self) -> impl Iterator<Item = (&str, &str)> {
        self.emote_positions.iter().filter_map(|position| {
            self.display_text
                .get(position.start..position.end)
                .filter(|name| !name.is_empty())
                .map(|name| (position.id.as_str(), name))
        })
    }
}

/// Converts a code-point range (as chat protocols report emotes) to a byte
/// range of `text`.
pub fn char_range_to_byte_range(text: &str, range: Range<usize>) -> Option<Range<usize>> {
    if range.start >= range.end {
        return None;
    }

    let mut start = None;
    for (char_index, (byte_index, _)) in text.char_indices().enumerate() {
        if char_index == range.start {
            start = Some(byte_index);
        }
        if char_index == range.end {
            return start.map(|start| start..byte_index);
        }
    }

    if text.chars().count() == range.end {
        return start.map(|start| start..text.len());
    }

    None
}

/// Events posted to the admin API by producers the chat connection cannot
/// observe, such as an EventSub forwarder.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IngestEvent {
    Unban {
        channel: String,
        user: String,
        id: String,
    },
    Unfollow {
        channel: String,
        user: String,
        id: String,
    },
    ChannelPointRedemption {
        channel: String,
        user: String,
        reward: String,
        #[serde(default)]
        input: Option<String>,
        id: String,
    },
    ChatEvent(ChatEvent),
}

impl IngestEvent {
    pub fn into_chat_events(self, redemption: &RedemptionConfig) -> Vec<ChatEvent> {
        match self {
            Self::Unban { channel, user, id } => vec![ChatEvent::new(
                ChatEventKind::Unban,
                &channel,
                &user,
                String::new(),
                format!("unban:{id}"),
            )],
            Self::Unfollow { channel, user, id } => vec![ChatEvent::new(
                ChatEventKind::Unfollow,
                &channel,
                &user,
                String::new(),
                format!("unfollow:{id}"),
            )],
            Self::ChannelPointRedemption {
                channel,
                user,
                reward,
                input,
                id,
            } => {
                let mut announcement = ChatEvent::new(
                    ChatEventKind::ChannelPointRedemption,
                    &channel,
                    &redemption.username,
                    format!("Redeemed {reward} for {user}"),
                    format!("redemption:{id}"),
                );
                announcement.avatar_url = Some(redemption.avatar_url.clone());

                let mut events = vec![announcement];
                if let Some(input) = input.filter(|input| !input.trim().is_empty()) {
                    events.push(ChatEvent::new(
                        ChatEventKind::ChannelPointRedemption,
                        &channel,
                        &user,
                        format!("*{}*", input.trim()),
                        format!("redemption:{id}:input"),
                    ));
                }
                events
            }
            Self::ChatEvent(mut event) => {
                event.source_channel = normalize_source_id(&event.source_channel);
                vec![event]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ChatEvent, ChatEventKind, EmotePosition, IngestEvent, char_range_to_byte_range};
    use crate::config::RedemptionConfig;

    #[test]
    fn char_range_maps_to_bytes_after_multibyte_text() {
        let text = "héllo Kappa";
        let range = char_range_to_byte_range(text, 6..11).expect("range");
        assert_eq!(&text[range], "Kappa");
    }

    #[test]
    fn char_range_at_start_of_text() {
        let text = "Kappa 👋";
        let range = char_range_to_byte_range(text, 0..5).expect("range");
        assert_eq!(&text[range], "Kappa");
    }

    #[test]
    fn char_range_out_of_bounds_is_rejected() {
        assert!(char_range_to_byte_range("abc", 1..9).is_none());
        assert!(char_range_to_byte_range("abc", 2..2).is_none());
    }

    #[test]
    fn emote_slices_skip_invalid_ranges() {
        let mut event = ChatEvent::new(ChatEventKind::Message, "chan", "user", "hi Kappa", "k1");
        event.emote_positions = vec![
            EmotePosition {
                id: "25".to_string(),
                start: 3,
                end: 8,
            },
            EmotePosition {
                id: "99".to_string(),
                start: 6,
                end: 40,
            },
        ];

        let slices: Vec<_> = event.emote_slices().collect();
        assert_eq!(slices, vec![("25", "Kappa")]);
    }

    #[test]
    fn redemption_with_input_becomes_two_events() {
        let payload = json!({
            "type": "channel_point_redemption",
            "channel": "#Streamer",
            "user": "viewer",
            "reward": "Hydrate",
            "input": "  drink water ",
            "id": "r-1",
        });
        let ingest: IngestEvent = serde_json::from_value(payload).expect("ingest event");
        let events = ingest.into_chat_events(&RedemptionConfig::default());

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].source_channel, "streamer");
        assert_eq!(events[0].source_user, "Channel Point Redeem");
        assert_eq!(events[0].display_text, "Redeemed Hydrate for viewer");
        assert_eq!(
            events[0].avatar_url.as_deref(),
            Some("https://i.imgur.com/FJUEIhs.png")
        );
        assert_eq!(events[1].source_user, "viewer");
        assert_eq!(events[1].display_text, "*drink water*");
        assert_ne!(events[0].dedup_key, events[1].dedup_key);
    }

    #[test]
    fn unban_ingest_has_no_text() {
        let payload = json!({ "type": "unban", "channel": "streamer", "user": "baduser", "id": "u-1" });
        let ingest: IngestEvent = serde_json::from_value(payload).expect("ingest event");
        let events = ingest.into_chat_events(&RedemptionConfig::default());

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ChatEventKind::Unban);
        assert_eq!(events[0].dedup_key, "unban:u-1");
        assert!(events[0].display_text.is_empty());
    }
}
