use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;

pub mod helix;
pub mod pronouns;
pub mod seventv;

#[cfg(test)]
pub mod fake;

pub use helix::HelixProfiles;
pub use pronouns::AlejoPronouns;
pub use seventv::SevenTvEmotes;

const USER_AGENT: &str = concat!("twitch-bridge-discord/", env!("CARGO_PKG_VERSION"));

/// Third-party emote set of a source channel, name → image URL.
#[async_trait]
pub trait EmoteProvider: Send + Sync {
    async fn fetch_channel_emote_map(&self, channel_id: &str) -> anyhow::Result<HashMap<String, String>>;
}

/// Pronoun suffix such as ` (She/Her)`; empty when unknown or on any failure.
#[async_trait]
pub trait PronounLookup: Send + Sync {
    async fn fetch_pronoun_suffix(&self, username: &str) -> String;
}

#[async_trait]
pub trait ProfileLookup: Send + Sync {
    async fn fetch_avatar_url(&self, login: &str) -> Option<String>;
}

pub struct NoEmotes;

#[async_trait]
impl EmoteProvider for NoEmotes {
    async fn fetch_channel_emote_map(&self, _channel_id: &str) -> anyhow::Result<HashMap<String, String>> {
        Ok(HashMap::new())
    }
}

pub struct NoPronouns;

#[async_trait]
impl PronounLookup for NoPronouns {
    async fn fetch_pronoun_suffix(&self, _username: &str) -> String {
        String::new()
    }
}

pub struct NoProfiles;

#[async_trait]
impl ProfileLookup for NoProfiles {
    async fn fetch_avatar_url(&self, _login: &str) -> Option<String> {
        None
    }
}

fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .context("build reqwest client")
}
