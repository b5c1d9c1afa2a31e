use std::collections::{BTreeSet, HashSet};

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use twitch_irc::login::StaticLoginCredentials;
use twitch_irc::message::{
    ClearChatAction, ClearChatMessage, PrivmsgMessage, ServerMessage, UserNoticeMessage,
};
use twitch_irc::{ClientConfig, SecureTCPTransport, TwitchIRCClient};

use crate::config::TwitchConfig;
use crate::events::{ChatEvent, ChatEventKind, EmotePosition, char_range_to_byte_range};

type IrcClient = TwitchIRCClient<SecureTCPTransport, StaticLoginCredentials>;

const PRIVILEGED_BADGES: [&str; 2] = ["broadcaster", "moderator"];
const MAX_LOGIN_CHARS: usize = 25;

/// Read side of the Twitch chat connection.
pub struct TwitchChat {
    client: IrcClient,
    incoming: mpsc::UnboundedReceiver<ServerMessage>,
}

impl TwitchChat {
    pub fn connect(config: &TwitchConfig) -> Self {
        let credentials = match (config.login.as_deref(), config.bearer_token()) {
            (Some(login), Some(token)) => {
                info!("connecting to twitch chat as {}", login);
                StaticLoginCredentials::new(login.to_ascii_lowercase(), Some(token.to_string()))
            }
            _ => {
                info!("connecting to twitch chat anonymously");
                StaticLoginCredentials::anonymous()
            }
        };
        let (incoming, client) = IrcClient::new(ClientConfig::new_simple(credentials));
        Self { client, incoming }
    }

    /// Forwards normalized events until the connection or the consumer goes away.
    /// The joined channel set follows `sources`.
    pub async fn run(
        mut self,
        sources: watch::Receiver<BTreeSet<String>>,
        events: mpsc::Sender<ChatEvent>,
    ) -> Result<()> {
        let sync = tokio::spawn(sync_channels(self.client.clone(), sources));

        while let Some(message) = self.incoming.recv().await {
            let Some(event) = normalize(message) else {
                continue;
            };
            debug!(
                "twitch {} in {} from {}",
                event.kind.as_str(),
                event.source_channel,
                event.source_user
            );
            if events.send(event).await.is_err() {
                info!("event consumer closed, leaving twitch chat");
                break;
            }
        }

        sync.abort();
        anyhow::bail!("twitch chat connection closed")
    }
}

async fn sync_channels(client: IrcClient, mut sources: watch::Receiver<BTreeSet<String>>) {
    loop {
        let wanted: HashSet<String> = sources
            .borrow_and_update()
            .iter()
            .filter(|login| {
                let valid = is_valid_login(login);
                if !valid {
                    warn!("not joining invalid twitch channel {:?}", login);
                }
                valid
            })
            .cloned()
            .collect();

        info!("joining {} twitch channels", wanted.len());
        if let Err(e) = client.set_wanted_channels(wanted) {
            warn!("failed to update twitch channels: {}", e);
        }

        if sources.changed().await.is_err() {
            break;
        }
    }
}

pub fn is_valid_login(login: &str) -> bool {
    !login.is_empty()
        && login.len() <= MAX_LOGIN_CHARS
        && login
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_')
}

pub fn normalize(message: ServerMessage) -> Option<ChatEvent> {
    match message {
        ServerMessage::Privmsg(msg) => Some(from_privmsg(msg)),
        ServerMessage::ClearChat(msg) => from_clearchat(msg),
        ServerMessage::UserNotice(msg) => from_usernotice(msg),
        _ => None,
    }
}

fn emote_positions<'a>(
    text: &str,
    emotes: impl IntoIterator<Item = &'a twitch_irc::message::Emote>,
) -> Vec<EmotePosition> {
    emotes
        .into_iter()
        .filter_map(|emote| {
            let range = char_range_to_byte_range(text, emote.char_range.clone())?;
            Some(EmotePosition {
                id: emote.id.clone(),
                start: range.start,
                end: range.end,
            })
        })
        .collect()
}

fn is_privileged<'a>(badges: impl IntoIterator<Item = &'a twitch_irc::message::Badge>) -> bool {
    badges
        .into_iter()
        .any(|badge| PRIVILEGED_BADGES.contains(&badge.name.as_str()))
}

fn from_privmsg(msg: PrivmsgMessage) -> ChatEvent {
    let kind = if msg.is_action {
        ChatEventKind::Action
    } else {
        ChatEventKind::Message
    };
    let mut event = ChatEvent::new(
        kind,
        &msg.channel_login,
        &msg.sender.name,
        msg.message_text.clone(),
        msg.message_id.clone(),
    );
    event.source_channel_id = Some(msg.channel_id.clone());
    event.emote_positions = emote_positions(&msg.message_text, &msg.emotes);
    event.occurred_at = msg.server_timestamp;
    event.privileged = is_privileged(&msg.badges);
    event
}

fn from_clearchat(msg: ClearChatMessage) -> Option<ChatEvent> {
    let (kind, user_login, user_id) = match msg.action {
        ClearChatAction::UserBanned { user_login, user_id } => (ChatEventKind::Ban, user_login, user_id),
        ClearChatAction::UserTimedOut {
            user_login, user_id, ..
        } => (ChatEventKind::Timeout, user_login, user_id),
        ClearChatAction::ChatCleared => return None,
    };

    let dedup_key = format!(
        "{}:{}:{}:{}",
        kind.as_str(),
        msg.channel_id,
        user_id,
        msg.server_timestamp.timestamp_millis()
    );
    let mut event = ChatEvent::new(kind, &msg.channel_login, &user_login, String::new(), dedup_key);
    event.source_channel_id = Some(msg.channel_id);
    event.occurred_at = msg.server_timestamp;
    Some(event)
}

fn from_usernotice(msg: UserNoticeMessage) -> Option<ChatEvent> {
    if msg.event_id != "announcement" {
        return None;
    }

    let text = msg.message_text.clone().unwrap_or_default();
    let mut event = ChatEvent::new(
        ChatEventKind::Announcement,
        &msg.channel_login,
        &msg.sender.name,
        text.clone(),
        msg.message_id.clone(),
    );
    event.source_channel_id = Some(msg.channel_id.clone());
    event.emote_positions = emote_positions(&text, &msg.emotes);
    event.occurred_at = msg.server_timestamp;
    event.privileged = is_privileged(&msg.badges);
    Some(event)
}

#[cfg(test)]
mod tests {
    use test_case::test_case;
    use twitch_irc::message::{IRCMessage, ServerMessage};

    use super::{is_valid_login, normalize};
    use crate::events::{ChatEvent, ChatEventKind};

    fn parse(raw: &str) -> Option<ChatEvent> {
        let irc = IRCMessage::parse(raw).expect("irc line");
        normalize(ServerMessage::try_from(irc).expect("server message"))
    }

    const PRIVMSG: &str = "@badge-info=;badges=moderator/1;client-nonce=abc;color=#0000FF;display-name=Viewer;emotes=25:6-10;first-msg=0;flags=;id=msg-1;mod=1;returning-chatter=0;room-id=11148817;subscriber=0;tmi-sent-ts=1594545155039;turbo=0;user-id=40286300;user-type=mod :viewer!viewer@viewer.tmi.twitch.tv PRIVMSG #streamer :hello Kappa";

    #[test]
    fn privmsg_becomes_message() {
        let event = parse(PRIVMSG).expect("event");

        assert_eq!(event.kind, ChatEventKind::Message);
        assert_eq!(event.source_channel, "streamer");
        assert_eq!(event.source_channel_id.as_deref(), Some("11148817"));
        assert_eq!(event.source_user, "Viewer");
        assert_eq!(event.dedup_key, "msg-1");
        assert!(event.privileged);
        let emotes: Vec<_> = event.emote_slices().collect();
        assert_eq!(emotes, vec![("25", "Kappa")]);
    }

    #[test]
    fn action_is_flagged() {
        let raw = "@badge-info=;badges=;color=;display-name=Viewer;emotes=;flags=;id=msg-2;mod=0;room-id=11148817;subscriber=0;tmi-sent-ts=1594545155039;turbo=0;user-id=40286300;user-type= :viewer!viewer@viewer.tmi.twitch.tv PRIVMSG #streamer :\u{1}ACTION waves\u{1}";
        let event = parse(raw).expect("event");

        assert_eq!(event.kind, ChatEventKind::Action);
        assert_eq!(event.display_text, "waves");
        assert!(!event.privileged);
    }

    #[test]
    fn clearchat_ban_and_timeout() {
        let ban = parse("@room-id=11148817;target-user-id=40286300;tmi-sent-ts=1594561360331 :tmi.twitch.tv CLEARCHAT #streamer :troll")
            .expect("ban");
        assert_eq!(ban.kind, ChatEventKind::Ban);
        assert_eq!(ban.source_user, "troll");
        assert_eq!(ban.dedup_key, "ban:11148817:40286300:1594561360331");

        let timeout = parse("@ban-duration=600;room-id=11148817;target-user-id=40286300;tmi-sent-ts=1594561392337 :tmi.twitch.tv CLEARCHAT #streamer :troll")
            .expect("timeout");
        assert_eq!(timeout.kind, ChatEventKind::Timeout);

        assert!(parse("@room-id=11148817;tmi-sent-ts=1594561392337 :tmi.twitch.tv CLEARCHAT #streamer").is_none());
    }

    #[test]
    fn announcement_usernotice() {
        let raw = "@badge-info=;badges=broadcaster/1;color=#8A2BE2;display-name=Streamer;emotes=;flags=;id=ann-1;login=streamer;mod=0;msg-id=announcement;msg-param-color=PRIMARY;room-id=11148817;subscriber=0;system-msg=Announcement;tmi-sent-ts=1594583782376;user-id=11148817;user-type= :tmi.twitch.tv USERNOTICE #streamer :Going live soon";
        let event = parse(raw).expect("event");

        assert_eq!(event.kind, ChatEventKind::Announcement);
        assert_eq!(event.display_text, "Going live soon");
        assert_eq!(event.dedup_key, "ann-1");
        assert!(event.privileged);
    }

    #[test]
    fn other_messages_are_ignored() {
        assert!(parse(":tmi.twitch.tv PING").is_none());
    }

    #[test_case("forsen", true ; "plain")]
    #[test_case("some_user_42", true ; "underscore and digits")]
    #[test_case("Forsen", false ; "uppercase")]
    #[test_case("", false ; "empty")]
    #[test_case("a-b", false ; "dash")]
    #[test_case("abcdefghijklmnopqrstuvwxyz", false ; "too long")]
    fn login_validation(login: &str, expected: bool) {
        assert_eq!(is_valid_login(login), expected);
    }
}
