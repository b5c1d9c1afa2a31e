use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lowercases a channel login and drops the IRC `#` prefix.
pub fn normalize_source_id(raw: &str) -> String {
    raw.trim().trim_start_matches('#').to_ascii_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DestinationKey {
    pub community_id: String,
    pub channel_id: String,
}

impl std::fmt::Display for DestinationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.community_id, self.channel_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub community_id: String,
    pub channel_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_channel_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offline_channel_name: Option<String>,
}

impl Destination {
    pub fn new(community_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            community_id: community_id.into(),
            channel_id: channel_id.into(),
            thread_id: None,
            live_channel_name: None,
            offline_channel_name: None,
        }
    }

    pub fn key(&self) -> DestinationKey {
        DestinationKey {
            community_id: self.community_id.clone(),
            channel_id: self.channel_id.clone(),
        }
    }

    pub fn matches(&self, community_id: &str, channel_id: &str) -> bool {
        self.community_id == community_id && self.channel_id == channel_id
    }

    /// Channel names come as a pair: both set or both absent.
    pub fn has_consistent_channel_names(&self) -> bool {
        self.live_channel_name.is_some() == self.offline_channel_name.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamerMapping {
    pub source_id: String,
    pub destinations: Vec<Destination>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StreamerMapping {
    pub fn new(source_id: &str) -> Self {
        let now = Utc::now();
        Self {
            source_id: normalize_source_id(source_id),
            destinations: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn find_destination(&self, community_id: &str, channel_id: &str) -> Option<&Destination> {
        self.destinations
            .iter()
            .find(|destination| destination.matches(community_id, channel_id))
    }
}
