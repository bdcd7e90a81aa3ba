use std::sync::Arc;

use serenity::async_trait;
use serenity::builder::{CreateEmbed, CreateMessage};
use serenity::http::Http;
use serenity::model::id::ChannelId;
use tracing::warn;

use crate::track::Track;

/// Delivers now-playing messages. The controller calls this for every
/// start it initiates itself; commands that already replied suppress it.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn now_playing(&self, channel: ChannelId, track: &Track);
}

pub struct DiscordNotifier {
    http: Arc<Http>,
    color: u32,
}

impl DiscordNotifier {
    pub fn new(http: Arc<Http>, color: u32) -> Self {
        Self { http, color }
    }
}

#[async_trait]
impl Notifier for DiscordNotifier {
    async fn now_playing(&self, channel: ChannelId, track: &Track) {
        let embed = CreateEmbed::new()
            .title("Now Playing")
            .description(format!("🎵 {}", track.title))
            .color(self.color);

        if let Err(e) = channel
            .send_message(&self.http, CreateMessage::new().embed(embed))
            .await
        {
            warn!("failed to send now-playing message: {e:?}");
        }
    }
}
