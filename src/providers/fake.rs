use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{EmoteProvider, ProfileLookup, PronounLookup};

/// Canned answers for all three lookups, counting calls.
#[derive(Default)]
pub struct FakeProviders {
    pub emotes: Mutex<HashMap<String, HashMap<String, String>>>,
    pub pronouns: Mutex<HashMap<String, String>>,
    pub avatars: Mutex<HashMap<String, String>>,
    pub emote_calls: Mutex<usize>,
    pub pronoun_calls: Mutex<usize>,
    pub hang: bool,
}

impl FakeProviders {
    async fn maybe_hang(&self) {
        if self.hang {
            futures::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl EmoteProvider for FakeProviders {
    async fn fetch_channel_emote_map(&self, channel_id: &str) -> anyhow::Result<HashMap<String, String>> {
        *self.emote_calls.lock() += 1;
        self.maybe_hang().await;
        Ok(self.emotes.lock().get(channel_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl PronounLookup for FakeProviders {
    async fn fetch_pronoun_suffix(&self, username: &str) -> String {
        *self.pronoun_calls.lock() += 1;
        self.maybe_hang().await;
        self.pronouns.lock().get(username).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl ProfileLookup for FakeProviders {
    async fn fetch_avatar_url(&self, login: &str) -> Option<String> {
        self.maybe_hang().await;
        self.avatars.lock().get(login).cloned()
    }
}
