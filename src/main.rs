#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

mod bridge;
mod cli;
mod config;
mod db;
mod discord;
mod error;
mod events;
mod moderation;
mod pipeline;
mod platform;
mod providers;
mod registry;
mod twitch;
mod utils;
mod web;
mod webhook_cache;

use bridge::{DedupWindow, Dispatcher};
use cli::{Cli, Command};
use config::Config;
use discord::DiscordClient;
use pipeline::{MessagePipeline, PipelineSettings};
use platform::ChatPlatform;
use providers::{
    AlejoPronouns, EmoteProvider, HelixProfiles, NoEmotes, NoPronouns, NoProfiles, ProfileLookup,
    PronounLookup, SevenTvEmotes,
};
use registry::MappingRegistry;
use twitch::TwitchChat;
use web::metrics::Metrics;
use web::{WebServer, WebState};
use webhook_cache::WebhookCache;

const EVENT_QUEUE_CAPACITY: usize = 1024;

fn emote_provider(config: &Config, timeout: Duration) -> Result<Arc<dyn EmoteProvider>> {
    if !config.emotes.seventv_enabled {
        return Ok(Arc::new(NoEmotes));
    }
    let provider = SevenTvEmotes::new(
        &config.emotes.seventv_api_url,
        Duration::from_secs(config.emotes.cache_ttl_secs),
        timeout,
    )?;
    Ok(Arc::new(provider))
}

fn pronoun_lookup(config: &Config, timeout: Duration) -> Result<Arc<dyn PronounLookup>> {
    if !config.pronouns.enabled {
        return Ok(Arc::new(NoPronouns));
    }
    Ok(Arc::new(AlejoPronouns::new(&config.pronouns.api_url, timeout)?))
}

fn profile_lookup(config: &Config, timeout: Duration) -> Result<Arc<dyn ProfileLookup>> {
    match (config.twitch.client_id.as_deref(), config.twitch.bearer_token()) {
        (Some(client_id), Some(token)) => Ok(Arc::new(HelixProfiles::new(
            &config.twitch.helix_api_url,
            client_id,
            token,
            timeout,
        )?)),
        _ => {
            info!("helix credentials not configured, using the default avatar for everyone");
            Ok(Arc::new(NoProfiles))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_from_file(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;

    if cli.command() == Command::CheckConfig {
        println!("{} is valid", cli.config.display());
        return Ok(());
    }

    utils::logging::init_tracing(&config.logging);
    Metrics::start();
    info!("twitch-discord relay starting up");

    let db_manager = db::DatabaseManager::new(&config.database).await?;
    db_manager.migrate().await?;
    let registry = Arc::new(MappingRegistry::hydrate(db_manager.streamer_store()).await?);

    let discord = Arc::new(DiscordClient::new(&config.auth.bot_token));
    discord.start().await?;
    let platform: Arc<dyn ChatPlatform> = discord.clone();

    let lookup_timeout = Duration::from_secs(config.relay.lookup_timeout_secs);
    let webhooks = Arc::new(WebhookCache::new(platform.clone()));
    let pipeline = Arc::new(
        MessagePipeline::new(
            platform.clone(),
            webhooks.clone(),
            PipelineSettings::from(&config.relay),
        )
        .with_emotes(emote_provider(&config, lookup_timeout)?)
        .with_pronouns(pronoun_lookup(&config, lookup_timeout)?)
        .with_profiles(profile_lookup(&config, lookup_timeout)?),
    );
    let dispatcher = Arc::new(Dispatcher::new(
        platform,
        registry.clone(),
        pipeline,
        webhooks,
        DedupWindow::new(
            Duration::from_secs(config.relay.dedup_ttl_secs),
            config.relay.dedup_capacity,
        ),
        Duration::from_secs(config.relay.delivery_timeout_secs),
    ));

    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

    let web_server = WebServer::new(
        config.web.clone(),
        WebState::new(
            registry.clone(),
            events_tx.clone(),
            config.relay.redemption.clone(),
            config.web.admin_token.as_deref(),
        ),
    );
    let web_handle = tokio::spawn(async move {
        if let Err(e) = web_server.start().await {
            error!("web server error: {}", e);
        }
    });

    let chat_handle = if config.twitch.enabled {
        let chat = TwitchChat::connect(&config.twitch);
        let sources = registry.subscribe_sources();
        let chat_tx = events_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = chat.run(sources, chat_tx).await {
                error!("twitch chat error: {}", e);
            }
        })
    } else {
        warn!("twitch chat disabled, only admin-ingested events are relayed");
        tokio::spawn(std::future::pending::<()>())
    };
    drop(events_tx);

    let dispatcher_handle = tokio::spawn(dispatcher.run(events_rx));

    tokio::select! {
        _ = web_handle => {},
        _ = chat_handle => {},
        _ = dispatcher_handle => {},
        _ = tokio::signal::ctrl_c() => info!("interrupt received"),
    }

    if let Err(e) = discord.stop().await {
        warn!("failed to stop discord client cleanly: {}", e);
    }
    info!("twitch-discord relay shutting down");
    Ok(())
}
