pub use self::parser::{
    AuthConfig, Config, DatabaseConfig, DbType, EmotesConfig, LoggingConfig, NoticesConfig,
    PronounsConfig, RedemptionConfig, RelayConfig, TwitchConfig, WebConfig,
};
pub use self::validator::ConfigError;

mod parser;
mod validator;
