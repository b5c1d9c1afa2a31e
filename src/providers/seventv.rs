use std::collections::HashMap;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use super::{EmoteProvider, http_client};

pub struct SevenTvEmotes {
    http: reqwest::Client,
    api_url: String,
    ttl: Duration,
    cache: Mutex<HashMap<String, CachedEmoteMap>>,
}

struct CachedEmoteMap {
    fetched_at: Instant,
    emotes: HashMap<String, String>,
}

impl SevenTvEmotes {
    pub fn new(api_url: &str, ttl: Duration, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            api_url: api_url.trim_end_matches('/').to_string(),
            ttl,
            cache: Mutex::new(HashMap::new()),
        })
    }

    fn cached(&self, channel_id: &str) -> Option<HashMap<String, String>> {
        let mut guard = self.cache.lock();
        let entry = guard.get(channel_id)?;
        if entry.fetched_at.elapsed() <= self.ttl {
            Some(entry.emotes.clone())
        } else {
            guard.remove(channel_id);
            None
        }
    }

    fn store(&self, channel_id: &str, emotes: HashMap<String, String>) {
        self.cache.lock().insert(
            channel_id.to_string(),
            CachedEmoteMap {
                fetched_at: Instant::now(),
                emotes,
            },
        );
    }
}

#[async_trait]
impl EmoteProvider for SevenTvEmotes {
    async fn fetch_channel_emote_map(&self, channel_id: &str) -> anyhow::Result<HashMap<String, String>> {
        if let Some(emotes) = self.cached(channel_id) {
            return Ok(emotes);
        }

        let url = format!("{}/users/twitch/{}", self.api_url, channel_id);
        let resp = self.http.get(&url).send().await.context("7tv user request")?;

        // channels without a 7TV account are a normal case
        let emotes = if resp.status() == StatusCode::NOT_FOUND {
            HashMap::new()
        } else {
            let user: SevenTvUser = resp
                .error_for_status()
                .context("7tv user status")?
                .json()
                .await
                .context("7tv user json")?;
            emote_map(user)
        };

        debug!("fetched {} 7tv emotes for channel={}", emotes.len(), channel_id);
        self.store(channel_id, emotes.clone());
        Ok(emotes)
    }
}

fn emote_map(user: SevenTvUser) -> HashMap<String, String> {
    user.emote_set
        .map(|set| set.emotes)
        .unwrap_or_default()
        .into_iter()
        .filter(|emote| !emote.name.is_empty() && !emote.data.host.url.is_empty())
        .map(|emote| {
            let url = format!("https:{}/1x.gif", emote.data.host.url);
            (emote.name, url)
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct SevenTvUser {
    #[serde(default)]
    emote_set: Option<SevenTvEmoteSet>,
}

#[derive(Debug, Deserialize)]
struct SevenTvEmoteSet {
    #[serde(default)]
    emotes: Vec<SevenTvEmote>,
}

#[derive(Debug, Deserialize)]
struct SevenTvEmote {
    name: String,
    data: SevenTvEmoteData,
}

#[derive(Debug, Deserialize)]
struct SevenTvEmoteData {
    host: SevenTvHost,
}

#[derive(Debug, Deserialize)]
struct SevenTvHost {
    url: String,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::{SevenTvEmotes, SevenTvUser, emote_map};

    #[test]
    fn builds_gif_urls_from_host() {
        let user: SevenTvUser = serde_json::from_value(json!({
            "id": "u1",
            "emote_set": {
                "id": "set1",
                "emotes": [
                    { "id": "e1", "name": "catJAM", "data": { "host": { "url": "//cdn.7tv.app/emote/e1" } } },
                    { "id": "e2", "name": "", "data": { "host": { "url": "//cdn.7tv.app/emote/e2" } } }
                ]
            }
        }))
        .expect("fixture");

        let map = emote_map(user);
        assert_eq!(map.len(), 1);
        assert_eq!(map["catJAM"], "https://cdn.7tv.app/emote/e1/1x.gif");
    }

    #[test]
    fn missing_emote_set_is_empty() {
        let user: SevenTvUser = serde_json::from_value(json!({ "id": "u1" })).expect("fixture");
        assert!(emote_map(user).is_empty());
    }

    #[test]
    fn cache_expires_after_ttl() {
        let provider =
            SevenTvEmotes::new("https://7tv.io/v3/", Duration::ZERO, Duration::from_secs(1))
                .expect("client");
        assert_eq!(provider.api_url, "https://7tv.io/v3");

        provider.store("123", [("a".to_string(), "b".to_string())].into_iter().collect());
        std::thread::sleep(Duration::from_millis(5));
        assert!(provider.cached("123").is_none());

        let provider =
            SevenTvEmotes::new("https://7tv.io/v3", Duration::from_secs(60), Duration::from_secs(1))
                .expect("client");
        provider.store("123", [("a".to_string(), "b".to_string())].into_iter().collect());
        assert_eq!(provider.cached("123").expect("cached")["a"], "b");
    }
}
