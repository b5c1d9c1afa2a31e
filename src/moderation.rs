use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::db::Destination;
use crate::error::RelayError;
use crate::pipeline::display_name::author_matches;
use crate::platform::{ChannelMessage, ChatPlatform, WebhookHandle};
use crate::web::metrics::Metrics;
use crate::webhook_cache::WebhookCache;

const REDACTED_MARKER: &str = "BANNED:";
const REDACTED_PREFIX: &str = "BANNED: ||";
const SPOILER: &str = "||";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorReport {
    pub edited: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// `BANNED: ||content||`, or `None` when the content is already redacted.
pub fn redact(content: &str) -> Option<String> {
    if content.starts_with(REDACTED_MARKER) {
        None
    } else {
        Some(format!("{REDACTED_PREFIX}{content}{SPOILER}"))
    }
}

/// Inverse of [`redact`]; `None` for content that was never redacted.
pub fn unredact(content: &str) -> Option<String> {
    let inner = content.strip_prefix(REDACTED_PREFIX)?;
    Some(inner.strip_suffix(SPOILER).unwrap_or(inner).to_string())
}

#[derive(Clone, Copy)]
enum Mirror {
    Ban,
    Unban,
}

/// Retroactively redacts and restores relayed messages of a user.
pub struct ModerationMirror {
    platform: Arc<dyn ChatPlatform>,
    webhooks: Arc<WebhookCache>,
    webhook_name: String,
    webhook_avatar_url: String,
    marker: String,
}

impl ModerationMirror {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        webhooks: Arc<WebhookCache>,
        webhook_name: &str,
        webhook_avatar_url: &str,
        marker: &str,
    ) -> Self {
        Self {
            platform,
            webhooks,
            webhook_name: webhook_name.to_string(),
            webhook_avatar_url: webhook_avatar_url.to_string(),
            marker: marker.to_string(),
        }
    }

    /// Redacts the user's relayed messages, leaving `notice_id` (the relayed
    /// ban notice, when it was delivered) untouched.
    pub async fn on_ban(&self, destination: &Destination, user: &str, notice_id: Option<&str>) -> MirrorReport {
        self.mirror(destination, user, Mirror::Ban, notice_id).await
    }

    pub async fn on_unban(&self, destination: &Destination, user: &str) -> MirrorReport {
        self.mirror(destination, user, Mirror::Unban, None).await
    }

    async fn mirror(
        &self,
        destination: &Destination,
        user: &str,
        mode: Mirror,
        notice_id: Option<&str>,
    ) -> MirrorReport {
        let mut report = MirrorReport::default();
        let Some((handle, messages)) = self.user_messages(destination, user).await else {
            return report;
        };
        let thread_id = destination.thread_id.as_deref();

        for message in &messages {
            let (content, suppress_embeds) = match mode {
                Mirror::Ban if notice_id == Some(message.id.as_str()) => {
                    report.skipped += 1;
                    continue;
                }
                Mirror::Ban => (redact(&message.content), true),
                Mirror::Unban => (unredact(&message.content), false),
            };
            let Some(content) = content else {
                report.skipped += 1;
                continue;
            };

            match self
                .platform
                .edit_webhook_message(&handle, thread_id, &message.id, &content, suppress_embeds)
                .await
            {
                Ok(()) => {
                    report.edited += 1;
                    Metrics::moderation_edit();
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        "failed to edit message={} in destination={}: {}",
                        message.id,
                        destination.key(),
                        e
                    );
                }
            }
        }

        info!(
            "mirrored {} of {} in destination={}: edited={} skipped={} failed={}",
            match mode {
                Mirror::Ban => "ban",
                Mirror::Unban => "unban",
            },
            user,
            destination.key(),
            report.edited,
            report.skipped,
            report.failed
        );
        report
    }

    /// Relayed messages of `user` in the recent window, newest first.
    async fn user_messages(
        &self,
        destination: &Destination,
        user: &str,
    ) -> Option<(WebhookHandle, Vec<ChannelMessage>)> {
        let channel_id = destination.channel_id.as_str();

        let caps = match self
            .platform
            .channel_permissions(&destination.community_id, channel_id)
            .await
        {
            Ok(caps) => caps,
            Err(e) => {
                warn!("failed to read permissions for channel={}: {}", channel_id, e);
                return None;
            }
        };
        if !caps.can_moderate() {
            let err = RelayError::PermissionDenied {
                channel_id: channel_id.to_string(),
                missing: caps.missing_for_moderation().join(", "),
            };
            warn!("skipping moderation mirror: {}", err);
            return None;
        }

        let handle = match self
            .webhooks
            .get_or_create(destination, &self.webhook_name, &self.webhook_avatar_url)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                warn!("skipping moderation mirror: {}", e);
                return None;
            }
        };

        let window = destination.thread_id.as_deref().unwrap_or(channel_id);
        let recent = match self.platform.fetch_recent_messages(window).await {
            Ok(recent) => recent,
            Err(e) => {
                warn!("failed to fetch recent messages in channel={}: {}", window, e);
                return None;
            }
        };

        let mut messages: Vec<ChannelMessage> = recent
            .into_iter()
            .filter(|message| message.webhook_id.as_deref() == Some(handle.id.as_str()))
            .filter(|message| author_matches(&message.author_name, user, &self.marker))
            .collect();
        messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        debug!(
            "found {} relayed messages of {} in channel={}",
            messages.len(),
            user,
            window
        );
        Some((handle, messages))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use test_case::test_case;

    use super::{ModerationMirror, redact, unredact};
    use crate::db::Destination;
    use crate::platform::Capabilities;
    use crate::platform::fake::FakePlatform;
    use crate::webhook_cache::WebhookCache;

    const NAME: &str = "Crystal Socket";

    fn mirror(platform: &Arc<FakePlatform>) -> ModerationMirror {
        let webhooks = Arc::new(WebhookCache::new(platform.clone()));
        ModerationMirror::new(platform.clone(), webhooks, NAME, "https://a", "👑")
    }

    #[test_case("hello" ; "plain")]
    #[test_case("" ; "empty")]
    #[test_case("look || spoilers ||" ; "with spoilers")]
    fn redaction_round_trips(content: &str) {
        let redacted = redact(content).expect("redacted");
        assert!(redacted.starts_with("BANNED: ||"));
        assert_eq!(redact(&redacted), None);
        assert_eq!(unredact(&redacted).as_deref(), Some(content));
    }

    #[test]
    fn unredact_leaves_plain_messages() {
        assert_eq!(unredact("hello"), None);
        assert_eq!(unredact("BANNED:manual"), None);
    }

    /// Relays three messages from `troll`, one from `friend`, and a human message.
    fn seed(platform: &FakePlatform) -> (String, Vec<String>) {
        let mut state = platform.state.lock();
        let hook = state.add_webhook("c1", NAME, 5);
        let mut ids = Vec::new();
        ids.push(state.add_message("c1", "troll (He/Him)", "first", Some(&hook)));
        ids.push(state.add_message("c1", "friend", "hey", Some(&hook)));
        ids.push(state.add_message("c1", "Troll", "BANNED: ||second||", Some(&hook)));
        ids.push(state.add_message("c1", "troll", "third", Some(&hook)));
        ids.push(state.add_message("c1", "troll", "not relayed", None));
        ids.push(state.add_message("c1", "troll", "ban notice", Some(&hook)));
        (hook, ids)
    }

    #[tokio::test]
    async fn ban_redacts_all_but_the_notice() {
        let platform = Arc::new(FakePlatform::new());
        let (_, ids) = seed(&platform);

        let report = mirror(&platform)
            .on_ban(&Destination::new("g1", "c1"), "troll", Some(ids[5].as_str()))
            .await;

        assert_eq!(report.edited, 2);
        assert_eq!(report.skipped, 2);
        assert_eq!(report.failed, 0);
        let state = platform.state.lock();
        assert_eq!(state.message_content("c1", &ids[0]).as_deref(), Some("BANNED: ||first||"));
        assert_eq!(state.message_content("c1", &ids[1]).as_deref(), Some("hey"));
        assert_eq!(state.message_content("c1", &ids[2]).as_deref(), Some("BANNED: ||second||"));
        assert_eq!(state.message_content("c1", &ids[3]).as_deref(), Some("BANNED: ||third||"));
        assert_eq!(state.message_content("c1", &ids[4]).as_deref(), Some("not relayed"));
        assert_eq!(state.message_content("c1", &ids[5]).as_deref(), Some("ban notice"));
        assert!(state.edits.iter().all(|(_, _, suppress)| *suppress));
    }

    #[tokio::test]
    async fn unban_restores_redacted_messages() {
        let platform = Arc::new(FakePlatform::new());
        let (_, ids) = seed(&platform);
        let mirror = mirror(&platform);
        let destination = Destination::new("g1", "c1");

        mirror.on_ban(&destination, "troll", Some(ids[5].as_str())).await;
        let report = mirror.on_unban(&destination, "TROLL").await;

        assert_eq!(report.edited, 3);
        let state = platform.state.lock();
        assert_eq!(state.message_content("c1", &ids[0]).as_deref(), Some("first"));
        assert_eq!(state.message_content("c1", &ids[2]).as_deref(), Some("second"));
        assert_eq!(state.message_content("c1", &ids[3]).as_deref(), Some("third"));
        assert!(!state.edits.last().expect("edit").2);
    }

    #[tokio::test]
    async fn repeated_ban_changes_nothing() {
        let platform = Arc::new(FakePlatform::new());
        let (_, ids) = seed(&platform);
        let mirror = mirror(&platform);
        let destination = Destination::new("g1", "c1");

        mirror.on_ban(&destination, "troll", Some(ids[5].as_str())).await;
        let report = mirror.on_ban(&destination, "troll", Some(ids[5].as_str())).await;
        assert_eq!(report.edited, 0);
    }

    #[tokio::test]
    async fn ban_without_a_delivered_notice_redacts_everything() {
        let platform = Arc::new(FakePlatform::new());
        let (_, ids) = seed(&platform);

        let report = mirror(&platform)
            .on_ban(&Destination::new("g1", "c1"), "troll", None)
            .await;

        assert_eq!(report.edited, 3);
        let state = platform.state.lock();
        assert_eq!(
            state.message_content("c1", &ids[5]).as_deref(),
            Some("BANNED: ||ban notice||")
        );
    }

    #[tokio::test]
    async fn missing_permissions_is_a_no_op() {
        let platform = Arc::new(FakePlatform::new());
        seed(&platform);
        platform.state.lock().capabilities = Capabilities {
            view_channel: true,
            manage_messages: true,
            ..Default::default()
        };

        let report = mirror(&platform)
            .on_ban(&Destination::new("g1", "c1"), "troll", None)
            .await;

        assert_eq!(report, Default::default());
        assert!(platform.state.lock().edits.is_empty());
    }

    #[tokio::test]
    async fn edit_failures_are_counted() {
        let platform = Arc::new(FakePlatform::new());
        let (_, ids) = seed(&platform);
        platform.state.lock().failing_edits.insert(ids[0].clone());

        let report = mirror(&platform)
            .on_ban(&Destination::new("g1", "c1"), "troll", Some(ids[5].as_str()))
            .await;

        assert_eq!(report.edited, 1);
        assert_eq!(report.failed, 1);
    }
}
