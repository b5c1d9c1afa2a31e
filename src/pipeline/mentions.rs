use regex::Regex;
use tracing::{debug, warn};

use crate::platform::ChatPlatform;

/// Matches `<prefix> @username` tokens.
pub struct MentionPattern {
    pattern: Option<Regex>,
}

impl MentionPattern {
    pub fn new(prefix: &str) -> Self {
        let pattern = if prefix.is_empty() {
            None
        } else {
            Regex::new(&format!(r"{}\s+@(\w+)", regex::escape(prefix))).ok()
        };
        Self { pattern }
    }

    /// Usernames referenced by mention tokens, in order of appearance.
    pub fn usernames<'t>(&self, text: &'t str) -> Vec<&'t str> {
        let Some(pattern) = &self.pattern else {
            return Vec::new();
        };
        pattern
            .captures_iter(text)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
            .collect()
    }

    /// Replaces tokens whose username resolved; others are left as typed.
    pub fn apply(&self, text: &str, resolve: impl Fn(&str) -> Option<String>) -> String {
        let Some(pattern) = &self.pattern else {
            return text.to_string();
        };
        pattern
            .replace_all(text, |caps: &regex::Captures<'_>| match resolve(&caps[1]) {
                Some(user_id) => format!("<@{user_id}>"),
                None => caps[0].to_string(),
            })
            .into_owned()
    }
}

pub async fn resolve_mentions(
    platform: &dyn ChatPlatform,
    pattern: &MentionPattern,
    community_id: &str,
    channel_id: &str,
    text: &str,
) -> String {
    let usernames = pattern.usernames(text);
    if usernames.is_empty() {
        return text.to_string();
    }

    match platform.channel_permissions(community_id, channel_id).await {
        Ok(caps) if caps.can_mention() => {}
        Ok(_) => {
            debug!("skipping mentions, bot cannot view or send in channel={}", channel_id);
            return text.to_string();
        }
        Err(e) => {
            warn!("failed to read permissions for channel={}: {}", channel_id, e);
            return text.to_string();
        }
    }

    let mut resolved = std::collections::HashMap::new();
    for username in usernames {
        if resolved.contains_key(username) {
            continue;
        }
        match platform.resolve_member_by_username(community_id, username).await {
            Ok(Some(user_id)) => {
                resolved.insert(username.to_string(), user_id);
            }
            Ok(None) => debug!("no member named {} in community={}", username, community_id),
            Err(e) => warn!("member lookup for {} failed: {}", username, e),
        }
    }

    pattern.apply(text, |username| resolved.get(username).cloned())
}
