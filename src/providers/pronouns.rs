use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use super::{PronounLookup, http_client};

/// alejo.io pronoun ids → (subject, object).
const PRONOUNS: &[(&str, &str, &str)] = &[
    ("aeaer", "Ae", "Aer"),
    ("any", "Any", "Any"),
    ("eem", "E", "Em"),
    ("faefaer", "Fae", "Faer"),
    ("hehim", "He", "Him"),
    ("itits", "It", "Its"),
    ("other", "Other", "Other"),
    ("perper", "Per", "Per"),
    ("sheher", "She", "Her"),
    ("theythem", "They", "Them"),
    ("vever", "Ve", "Ver"),
    ("xexem", "Xe", "Xem"),
    ("ziehir", "Zie", "Hir"),
];

pub struct AlejoPronouns {
    http: reqwest::Client,
    api_url: String,
}

impl AlejoPronouns {
    pub fn new(api_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    async fn lookup(&self, username: &str) -> anyhow::Result<Option<AlejoUser>> {
        let url = format!("{}/users/{}", self.api_url, username.to_ascii_lowercase());
        let resp = self.http.get(&url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(resp.error_for_status()?.json().await?))
    }
}

#[async_trait]
impl PronounLookup for AlejoPronouns {
    async fn fetch_pronoun_suffix(&self, username: &str) -> String {
        match self.lookup(username).await {
            Ok(Some(user)) => pronoun_suffix(&user.pronoun_id, user.alt_pronoun_id.as_deref()),
            Ok(None) => String::new(),
            Err(e) => {
                debug!("pronoun lookup for {} failed: {}", username, e);
                String::new()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct AlejoUser {
    pronoun_id: String,
    #[serde(default)]
    alt_pronoun_id: Option<String>,
}

fn find(id: &str) -> Option<(&'static str, &'static str)> {
    PRONOUNS
        .iter()
        .find(|(key, _, _)| *key == id)
        .map(|(_, subject, object)| (*subject, *object))
}

/// ` (Subject/Object)`, taking the object from the alternate pronoun when set.
pub fn pronoun_suffix(main: &str, alt: Option<&str>) -> String {
    let Some((subject, object)) = find(main) else {
        return String::new();
    };
    let object = alt.and_then(find).map_or(object, |(_, alt_object)| alt_object);
    format!(" ({subject}/{object})")
}
