use super::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub web: WebConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub twitch: TwitchConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub emotes: EmotesConfig,
    #[serde(default)]
    pub pronouns: PronounsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default)]
    pub admin_token: Option<String>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            admin_token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    pub bot_token: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TwitchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Anonymous (read-only) login is used when unset.
    #[serde(default)]
    pub login: Option<String>,
    #[serde(default)]
    pub oauth_token: Option<String>,
    /// Helix client id; profile pictures fall back to the default avatar without it.
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default = "default_helix_api_url")]
    pub helix_api_url: String,
}

impl Default for TwitchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            login: None,
            oauth_token: None,
            client_id: None,
            helix_api_url: default_helix_api_url(),
        }
    }
}

impl TwitchConfig {
    /// Token without the IRC-style `oauth:` prefix, as Helix expects it.
    pub fn bearer_token(&self) -> Option<&str> {
        self.oauth_token
            .as_deref()
            .map(|token| token.strip_prefix("oauth:").unwrap_or(token))
            .filter(|token| !token.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    #[serde(default = "default_webhook_name")]
    pub webhook_name: String,
    #[serde(default = "default_webhook_avatar_url")]
    pub webhook_avatar_url: String,
    #[serde(default = "default_user_avatar_url")]
    pub default_avatar_url: String,
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    #[serde(default = "default_mention_prefix")]
    pub mention_prefix: String,
    #[serde(default)]
    pub reserved_user: Option<String>,
    #[serde(default = "default_reserved_marker")]
    pub reserved_marker: String,
    #[serde(default = "default_dedup_ttl_secs")]
    pub dedup_ttl_secs: u64,
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
    #[serde(default = "default_delivery_timeout_secs")]
    pub delivery_timeout_secs: u64,
    #[serde(default = "default_lookup_timeout_secs")]
    pub lookup_timeout_secs: u64,
    #[serde(default)]
    pub notices: NoticesConfig,
    #[serde(default)]
    pub redemption: RedemptionConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            webhook_name: default_webhook_name(),
            webhook_avatar_url: default_webhook_avatar_url(),
            default_avatar_url: default_user_avatar_url(),
            command_prefix: default_command_prefix(),
            mention_prefix: default_mention_prefix(),
            reserved_user: None,
            reserved_marker: default_reserved_marker(),
            dedup_ttl_secs: default_dedup_ttl_secs(),
            dedup_capacity: default_dedup_capacity(),
            delivery_timeout_secs: default_delivery_timeout_secs(),
            lookup_timeout_secs: default_lookup_timeout_secs(),
            notices: NoticesConfig::default(),
            redemption: RedemptionConfig::default(),
        }
    }
}

/// Text relayed for events that carry no chat text of their own.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NoticesConfig {
    #[serde(default = "default_ban_notice")]
    pub ban: String,
    #[serde(default = "default_unban_notice")]
    pub unban: String,
    #[serde(default = "default_timeout_notice")]
    pub timeout: String,
    #[serde(default = "default_unfollow_notice")]
    pub unfollow: String,
}

impl Default for NoticesConfig {
    fn default() -> Self {
        Self {
            ban: default_ban_notice(),
            unban: default_unban_notice(),
            timeout: default_timeout_notice(),
            unfollow: default_unfollow_notice(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RedemptionConfig {
    #[serde(default = "default_redemption_username")]
    pub username: String,
    #[serde(default = "default_redemption_avatar_url")]
    pub avatar_url: String,
}

impl Default for RedemptionConfig {
    fn default() -> Self {
        Self {
            username: default_redemption_username(),
            avatar_url: default_redemption_avatar_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmotesConfig {
    #[serde(default = "default_true")]
    pub seventv_enabled: bool,
    #[serde(default = "default_seventv_api_url")]
    pub seventv_api_url: String,
    #[serde(default = "default_emote_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

impl Default for EmotesConfig {
    fn default() -> Self {
        Self {
            seventv_enabled: true,
            seventv_api_url: default_seventv_api_url(),
            cache_ttl_secs: default_emote_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PronounsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_pronouns_api_url")]
    pub api_url: String,
}

impl Default for PronounsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: default_pronouns_api_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(alias = "console", default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub max_connections: Option<u32>,
    #[serde(default)]
    pub min_connections: Option<u32>,
}

impl DatabaseConfig {
    pub fn db_type(&self) -> DbType {
        let url = self.connection_string();
        if url.starts_with("sqlite://") {
            DbType::Sqlite
        } else if url.starts_with("memory://") {
            DbType::Memory
        } else {
            DbType::Postgres
        }
    }

    pub fn connection_string(&self) -> String {
        if let Some(ref url) = self.url {
            url.clone()
        } else if let Some(ref file) = self.filename {
            format!("sqlite://{}", file)
        } else {
            String::new()
        }
    }

    pub fn sqlite_path(&self) -> Option<String> {
        if let DbType::Sqlite = self.db_type() {
            let url = self.connection_string();
            Some(url.strip_prefix("sqlite://").unwrap_or(&url).to_string())
        } else {
            None
        }
    }

    pub fn max_connections(&self) -> Option<u32> {
        match self.db_type() {
            DbType::Postgres => self.max_connections,
            DbType::Sqlite | DbType::Memory => Some(1),
        }
    }

    pub fn min_connections(&self) -> Option<u32> {
        match self.db_type() {
            DbType::Postgres => self.min_connections,
            DbType::Sqlite | DbType::Memory => Some(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbType {
    Postgres,
    Sqlite,
    Memory,
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::load_from_str(&content)
    }

    pub fn load_from_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: Config = serde_yaml::from_str(content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        super::validator::validate(self)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("TWITCH_BRIDGE_AUTH_BOT_TOKEN") {
            self.auth.bot_token = value;
        }
        if let Ok(value) = std::env::var("TWITCH_BRIDGE_TWITCH_OAUTH_TOKEN") {
            self.twitch.oauth_token = Some(value);
        }
        if let Ok(value) = std::env::var("TWITCH_BRIDGE_TWITCH_CLIENT_ID") {
            self.twitch.client_id = Some(value);
        }
        if let Ok(value) = std::env::var("TWITCH_BRIDGE_WEB_ADMIN_TOKEN") {
            self.web.admin_token = Some(value);
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_port() -> u16 {
    9006
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_helix_api_url() -> String {
    "https://api.twitch.tv/helix".to_string()
}

fn default_webhook_name() -> String {
    "Crystal Socket".to_string()
}

fn default_webhook_avatar_url() -> String {
    "https://i.imgur.com/nrhRy0b.png".to_string()
}

fn default_user_avatar_url() -> String {
    "https://static-cdn.jtvnw.net/user-default-pictures-uv/75305d54-c7cc-40d1-bb9c-91fbe85943c7-profile_image-300x300.png".to_string()
}

fn default_command_prefix() -> String {
    "!".to_string()
}

fn default_mention_prefix() -> String {
    "!d".to_string()
}

fn default_reserved_marker() -> String {
    "👑".to_string()
}

fn default_dedup_ttl_secs() -> u64 {
    60
}

fn default_dedup_capacity() -> usize {
    4096
}

fn default_delivery_timeout_secs() -> u64 {
    15
}

fn default_lookup_timeout_secs() -> u64 {
    5
}

fn default_ban_notice() -> String {
    "https://tenor.com/view/kaf-kafu-kamitsubaki-rim-rime-gif-27228643".to_string()
}

fn default_unban_notice() -> String {
    "https://tenor.com/view/im-back-killua-killua-zoldyck-anime-discord-gif-21123576".to_string()
}

fn default_timeout_notice() -> String {
    "https://tenor.com/view/yae-yae-miko-yae-sakura-bonk-anime-yae-bonk-gif-26001721".to_string()
}

fn default_unfollow_notice() -> String {
    "I have left the community 💀".to_string()
}

fn default_redemption_username() -> String {
    "Channel Point Redeem".to_string()
}

fn default_redemption_avatar_url() -> String {
    "https://i.imgur.com/FJUEIhs.png".to_string()
}

fn default_seventv_api_url() -> String {
    "https://7tv.io/v3".to_string()
}

fn default_emote_cache_ttl_secs() -> u64 {
    300
}

fn default_pronouns_api_url() -> String {
    "https://api.pronouns.alejo.io/v1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}
