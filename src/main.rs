use dotenvy::dotenv;
use serenity::gateway::ActivityData;
use serenity::prelude::*;
use songbird::SerenityInit;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

mod commands;
mod config;
mod controller;
mod error;
mod notify;
mod player;
mod queue;
mod resolver;
mod state;
mod track;

use crate::controller::Controller;
use crate::notify::DiscordNotifier;
use crate::player::SongbirdPlayer;
use crate::resolver::YtDlpResolver;
use crate::state::GuildStore;

pub struct Data {
    pub controller: Arc<Controller>,
    pub embed_color: u32,
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let token = env::var("DISCORD_TOKEN").expect("DISCORD_TOKEN not set");

    let cfg = config::load_config()
        .await
        .expect("Failed to load config.jsonc");

    resolver::ensure_media_tools()
        .await
        .expect("Failed to prepare media tools (yt-dlp)");

    let intents =
        GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES | GatewayIntents::GUILD_VOICE_STATES;

    let (end_tx, mut end_rx) = tokio::sync::mpsc::unbounded_channel();

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands::all(),
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                info!("Connected as {}", ready.user.name);
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                let manager = songbird::get(ctx)
                    .await
                    .expect("songbird registered at client init")
                    .clone();
                let player = Arc::new(SongbirdPlayer::new(manager, end_tx));
                let notifier = Arc::new(DiscordNotifier::new(ctx.http.clone(), cfg.embed_color));
                let controller = Arc::new(Controller::new(
                    GuildStore::new(cfg.playback.default_volume),
                    Arc::new(YtDlpResolver),
                    player,
                    notifier,
                    Duration::from_millis(cfg.playback.settle_ms),
                    cfg.playback.max_auto_skips,
                ));

                // End-of-track pump: one task per signal so a slow guild
                // never stalls another guild's queue advance.
                let pump = controller.clone();
                tokio::spawn(async move {
                    while let Some(guild) = end_rx.recv().await {
                        let controller = pump.clone();
                        tokio::spawn(async move {
                            controller.on_track_ended(guild).await;
                        });
                    }
                });

                ctx.set_activity(Some(ActivityData::listening("/help")));

                Ok(Data {
                    controller,
                    embed_color: cfg.embed_color,
                })
            })
        })
        .build();

    let mut client = Client::builder(&token, intents)
        .register_songbird()
        .framework(framework)
        .await
        .expect("Err creating client");

    if let Err(why) = client.start().await {
        error!("Client error: {why:?}");
    }
}
