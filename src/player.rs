use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use reqwest::Client;
use serenity::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use songbird::events::{Event, EventContext, EventHandler as VoiceEventHandler, TrackEvent};
use songbird::tracks::PlayMode;
use songbird::Songbird;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::MusicError;

/// The external player the controller drives. The completion signal for
/// every `play` arrives exactly once on the end-event channel, whether the
/// track ended naturally or `stop` was called.
#[async_trait]
pub trait MediaPlayer: Send + Sync {
    async fn join(&self, guild: GuildId, channel: ChannelId) -> Result<(), MusicError>;
    async fn leave(&self, guild: GuildId) -> Result<(), MusicError>;
    async fn is_connected(&self, guild: GuildId) -> bool;
    async fn play(&self, guild: GuildId, url: &str, volume: f32) -> Result<(), MusicError>;
    async fn stop(&self, guild: GuildId);
    async fn pause(&self, guild: GuildId) -> Result<(), MusicError>;
    async fn resume(&self, guild: GuildId) -> Result<(), MusicError>;
    async fn is_playing(&self, guild: GuildId) -> bool;
    async fn is_paused(&self, guild: GuildId) -> bool;
}

/// Songbird-backed player: one voice `Call` and at most one live
/// `TrackHandle` per guild.
pub struct SongbirdPlayer {
    manager: Arc<Songbird>,
    http: Client,
    handles: Mutex<HashMap<GuildId, songbird::tracks::TrackHandle>>,
    end_tx: UnboundedSender<GuildId>,
}

impl SongbirdPlayer {
    pub fn new(manager: Arc<Songbird>, end_tx: UnboundedSender<GuildId>) -> Self {
        Self {
            manager,
            http: Client::new(),
            handles: Mutex::new(HashMap::new()),
            end_tx,
        }
    }
}

/// Sends the guild id on the end-event channel the first time the track
/// ends or errors. Registered for both `TrackEvent::End` and
/// `TrackEvent::Error`; the flag keeps an errored-then-ended track from
/// signalling twice.
struct EndNotifier {
    guild: GuildId,
    tx: UnboundedSender<GuildId>,
    fired: Arc<AtomicBool>,
}

#[async_trait]
impl VoiceEventHandler for EndNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        if !self.fired.swap(true, Ordering::SeqCst) {
            let _ = self.tx.send(self.guild);
        }
        Some(Event::Cancel)
    }
}

#[async_trait]
impl MediaPlayer for SongbirdPlayer {
    async fn join(&self, guild: GuildId, channel: ChannelId) -> Result<(), MusicError> {
        self.manager
            .join(guild, channel)
            .await
            .map_err(|e| MusicError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn leave(&self, guild: GuildId) -> Result<(), MusicError> {
        if self.manager.get(guild).is_none() {
            return Err(MusicError::NotConnected);
        }
        self.handles.lock().await.remove(&guild);
        self.manager
            .remove(guild)
            .await
            .map_err(|e| MusicError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn is_connected(&self, guild: GuildId) -> bool {
        self.manager.get(guild).is_some()
    }

    async fn play(&self, guild: GuildId, url: &str, volume: f32) -> Result<(), MusicError> {
        let call = self.manager.get(guild).ok_or(MusicError::NotConnected)?;

        let input = songbird::input::HttpRequest::new(self.http.clone(), url.to_string());

        let handle = {
            let mut call = call.lock().await;
            call.play_input(input.into())
        };

        handle
            .make_playable_async()
            .await
            .map_err(|e| MusicError::PlayerStart(e.to_string()))?;

        let fired = Arc::new(AtomicBool::new(false));
        for event in [TrackEvent::End, TrackEvent::Error] {
            let _ = handle.add_event(
                Event::Track(event),
                EndNotifier {
                    guild,
                    tx: self.end_tx.clone(),
                    fired: fired.clone(),
                },
            );
        }

        let _ = handle.set_volume(volume);
        let _ = handle.play();

        debug!(guild = guild.get(), "playback started");
        self.handles.lock().await.insert(guild, handle);
        Ok(())
    }

    async fn stop(&self, guild: GuildId) {
        if let Some(handle) = self.handles.lock().await.remove(&guild) {
            let _ = handle.stop();
        }
    }

    async fn pause(&self, guild: GuildId) -> Result<(), MusicError> {
        let handles = self.handles.lock().await;
        let handle = handles.get(&guild).ok_or(MusicError::NothingPlaying)?;
        handle.pause().map_err(|_| MusicError::NothingPlaying)
    }

    async fn resume(&self, guild: GuildId) -> Result<(), MusicError> {
        let handles = self.handles.lock().await;
        let handle = handles.get(&guild).ok_or(MusicError::NothingPlaying)?;
        handle.play().map_err(|_| MusicError::NothingPlaying)
    }

    async fn is_playing(&self, guild: GuildId) -> bool {
        matches!(self.play_mode(guild).await, Some(PlayMode::Play))
    }

    async fn is_paused(&self, guild: GuildId) -> bool {
        matches!(self.play_mode(guild).await, Some(PlayMode::Pause))
    }
}

impl SongbirdPlayer {
    async fn play_mode(&self, guild: GuildId) -> Option<PlayMode> {
        let handle = self.handles.lock().await.get(&guild).cloned()?;
        handle.get_info().await.ok().map(|info| info.playing)
    }
}
