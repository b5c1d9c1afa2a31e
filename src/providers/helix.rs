use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;

use super::{ProfileLookup, http_client};

/// Profile pictures from the Twitch Helix users endpoint.
pub struct HelixProfiles {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    bearer_token: SecretString,
}

impl HelixProfiles {
    pub fn new(
        base_url: &str,
        client_id: &str,
        bearer_token: &str,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            http: http_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id: client_id.to_string(),
            bearer_token: SecretString::from(bearer_token.to_string()),
        })
    }

    async fn lookup(&self, login: &str) -> anyhow::Result<Option<String>> {
        let resp: HelixUsers = self
            .http
            .get(format!("{}/users", self.base_url))
            .query(&[("login", login)])
            .header("Client-Id", &self.client_id)
            .bearer_auth(self.bearer_token.expose_secret())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(first_profile_image(resp))
    }
}

#[async_trait]
impl ProfileLookup for HelixProfiles {
    async fn fetch_avatar_url(&self, login: &str) -> Option<String> {
        match self.lookup(login).await {
            Ok(url) => url,
            Err(e) => {
                debug!("profile lookup for {} failed: {}", login, e);
                None
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct HelixUsers {
    #[serde(default)]
    data: Vec<HelixUser>,
}

#[derive(Debug, Deserialize)]
struct HelixUser {
    #[serde(default)]
    profile_image_url: String,
}

fn first_profile_image(users: HelixUsers) -> Option<String> {
    users
        .data
        .into_iter()
        .map(|user| user.profile_image_url)
        .find(|url| !url.is_empty())
}
