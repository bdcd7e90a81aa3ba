use std::collections::HashMap;
use std::sync::Arc;

use serenity::model::id::{ChannelId, GuildId};
use tokio::sync::Mutex;

use crate::queue::TrackQueue;
use crate::track::Track;

/// Governs wraparound at the end of the queue. `Single` is accepted and
/// echoed but, like the bot this replaces, only `All` affects the advance
/// logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, poise::ChoiceParameter)]
pub enum RepeatMode {
    #[default]
    #[name = "off"]
    Off,
    #[name = "all"]
    All,
    #[name = "single"]
    Single,
}

/// Display-only: stored and reported by `/loop`, never consulted by the
/// end-of-track advance. Kept pending product clarification of how it
/// should interact with repeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, poise::ChoiceParameter)]
pub enum LoopMode {
    #[default]
    #[name = "off"]
    Off,
    #[name = "on"]
    On,
    #[name = "single"]
    Single,
}

/// Per-guild repeat/loop/volume/auto-clear settings. Last write wins.
#[derive(Debug, Clone)]
pub struct Modes {
    pub repeat: RepeatMode,
    pub loop_mode: LoopMode,
    /// 0.0..=1.0
    pub volume: f32,
    pub auto_clear_on_stop: bool,
}

impl Modes {
    fn new(volume: f32) -> Self {
        Self {
            repeat: RepeatMode::Off,
            loop_mode: LoopMode::Off,
            volume,
            auto_clear_on_stop: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    /// No voice connection yet.
    #[default]
    Idle,
    /// Connected, nothing playing, cursor retained.
    Stopped,
    Playing,
    Paused,
}

/// One-shot override of the next-track decision, consumed at the next
/// natural end-of-track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredNext {
    /// Queue index to jump to.
    pub position: usize,
    /// Where the resulting now-playing message goes.
    pub channel: ChannelId,
}

/// The single mutable unit per guild. Every field here is read and written
/// only while holding this state's lock, by commands and by the
/// end-of-track signal alike.
#[derive(Debug)]
pub struct GuildState {
    pub queue: TrackQueue,
    /// Index of the "current" track; may equal `queue.len()` meaning
    /// "past the end" (finished, no repeat).
    pub cursor: usize,
    pub modes: Modes,
    pub status: PlaybackStatus,
    /// Suppresses exactly one auto-advance: set before a command-initiated
    /// stop, cleared by the very next completion signal.
    pub pending_skip: bool,
    pub deferred_next: Option<DeferredNext>,
    /// Set when the queue is cleared while a track is playing; that track
    /// keeps playing from here, detached from the queue. While set, the
    /// cursor does not determine what is playing.
    pub held_track: Option<Track>,
    /// Cursor snapshot taken by `/stop`, consulted by a bare `/play`.
    pub stopped_position: Option<usize>,
    pub now_playing: Option<Track>,
    /// Channel of the guild's most recent command; now-playing messages
    /// for natural advances go here.
    pub notify_channel: Option<ChannelId>,
}

impl GuildState {
    pub fn new(default_volume: f32) -> Self {
        Self {
            queue: TrackQueue::default(),
            cursor: 0,
            modes: Modes::new(default_volume),
            status: PlaybackStatus::Idle,
            pending_skip: false,
            deferred_next: None,
            held_track: None,
            stopped_position: None,
            now_playing: None,
            notify_channel: None,
        }
    }
}

/// Keyed store of per-guild state. Each guild gets its own lock so
/// operations on different guilds never contend; the outer map lock is
/// held only long enough to fetch or create an entry.
pub struct GuildStore {
    default_volume: f32,
    inner: Mutex<HashMap<GuildId, Arc<Mutex<GuildState>>>>,
}

impl GuildStore {
    pub fn new(default_volume: f32) -> Self {
        Self {
            default_volume,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch the guild's state, creating it lazily on first interaction.
    pub async fn entry(&self, guild: GuildId) -> Arc<Mutex<GuildState>> {
        let mut map = self.inner.lock().await;
        map.entry(guild)
            .or_insert_with(|| Arc::new(Mutex::new(GuildState::new(self.default_volume))))
            .clone()
    }

    /// Fetch without creating; used by read-only paths that should not
    /// materialize state for guilds that never played anything.
    pub async fn get(&self, guild: GuildId) -> Option<Arc<Mutex<GuildState>>> {
        self.inner.lock().await.get(&guild).cloned()
    }

    /// Drop a guild's state entirely (disconnect/eviction).
    pub async fn remove(&self, guild: GuildId) {
        self.inner.lock().await.remove(&guild);
    }
}
