use std::sync::Arc;
use std::time::Duration;

use serenity::model::id::{ChannelId, GuildId};
use tracing::{debug, info, warn};

use crate::error::MusicError;
use crate::notify::Notifier;
use crate::player::MediaPlayer;
use crate::resolver::TrackResolver;
use crate::state::{DeferredNext, GuildState, GuildStore, LoopMode, PlaybackStatus, RepeatMode};
use crate::track::Track;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipDirection {
    Forward,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    Resumed,
    AlreadyPlaying,
    Started,
}

pub struct EnqueueOutcome {
    pub added: usize,
    pub first_title: String,
    pub is_playlist: bool,
}

/// Snapshot of a guild's queue for display.
pub struct QueueView {
    pub entries: Vec<(String, bool)>,
    pub next_up: Option<String>,
}

#[derive(Default)]
struct PlayOpts {
    force_position: Option<usize>,
    /// The caller already replied with its own now-playing message.
    suppress_notify: bool,
}

/// The per-guild playback state machine. Every public operation locks the
/// guild's state for its full duration, so command-triggered transitions
/// and end-of-track transitions for one guild never interleave; guilds are
/// fully independent of each other.
pub struct Controller {
    store: GuildStore,
    resolver: Arc<dyn TrackResolver>,
    player: Arc<dyn MediaPlayer>,
    notifier: Arc<dyn Notifier>,
    /// Quiescence period between issuing a stop and the next start, giving
    /// the driver time to wind the previous track down.
    settle: Duration,
    /// Bound on consecutive skip-forward recoveries within one operation.
    max_auto_skips: usize,
}

impl Controller {
    pub fn new(
        store: GuildStore,
        resolver: Arc<dyn TrackResolver>,
        player: Arc<dyn MediaPlayer>,
        notifier: Arc<dyn Notifier>,
        settle: Duration,
        max_auto_skips: usize,
    ) -> Self {
        Self {
            store,
            resolver,
            player,
            notifier,
            settle,
            max_auto_skips,
        }
    }

    /// Record the channel a command arrived on; natural-advance
    /// now-playing messages go there.
    pub async fn touch(&self, guild: GuildId, channel: ChannelId) {
        let entry = self.store.entry(guild).await;
        entry.lock().await.notify_channel = Some(channel);
    }

    pub async fn is_connected(&self, guild: GuildId) -> bool {
        self.player.is_connected(guild).await
    }

    /// Join the given voice channel if not already connected.
    pub async fn connect(&self, guild: GuildId, channel: ChannelId) -> Result<(), MusicError> {
        if self.player.is_connected(guild).await {
            return Ok(());
        }
        self.player.join(guild, channel).await?;
        let entry = self.store.entry(guild).await;
        let mut state = entry.lock().await;
        if state.status == PlaybackStatus::Idle {
            state.status = PlaybackStatus::Stopped;
        }
        Ok(())
    }

    /// Resolve `query` and append the results. Starts playback if nothing
    /// is playing or paused and `autostart` is set.
    pub async fn enqueue(
        &self,
        guild: GuildId,
        query: &str,
        autostart: bool,
    ) -> Result<EnqueueOutcome, MusicError> {
        // Resolution is a slow network call; do it before taking the
        // guild lock so other operations aren't held up behind it.
        let resolved = self.resolver.resolve(query).await?;

        let entry = self.store.entry(guild).await;
        let mut state = entry.lock().await;

        let Some(first) = resolved.entries.first() else {
            return Err(MusicError::Resolution(format!("no results for '{query}'")));
        };
        let outcome = EnqueueOutcome {
            added: resolved.entries.len(),
            first_title: first.title.clone(),
            is_playlist: resolved.is_playlist,
        };
        state.queue.extend(resolved.entries);

        // Judge idleness from our own state, not the live handle: a track
        // whose completion signal is still in flight counts as playing.
        let idle = state.now_playing.is_none()
            && !matches!(state.status, PlaybackStatus::Playing | PlaybackStatus::Paused);
        if autostart && idle {
            if let Err(e) = self.play_current(guild, &mut state, PlayOpts::default()).await {
                warn!(guild = guild.get(), "autostart after enqueue failed: {e}");
            }
        }
        Ok(outcome)
    }

    /// Bare `/play`: resume a paused track, or restart from the retained
    /// cursor when stopped.
    pub async fn play_resume(&self, guild: GuildId) -> Result<ResumeOutcome, MusicError> {
        let entry = self.store.entry(guild).await;
        let mut state = entry.lock().await;

        if state.status == PlaybackStatus::Paused {
            self.player.resume(guild).await?;
            state.status = PlaybackStatus::Playing;
            return Ok(ResumeOutcome::Resumed);
        }
        if state.status == PlaybackStatus::Playing {
            return Ok(ResumeOutcome::AlreadyPlaying);
        }
        if state.held_track.is_none() && state.queue.is_empty() {
            return Err(MusicError::EmptyQueue);
        }

        if let Some(stopped) = state.stopped_position.take() {
            state.cursor = stopped.min(state.queue.len());
        }
        self.play_current(guild, &mut state, PlayOpts::default()).await?;
        Ok(ResumeOutcome::Started)
    }

    /// `/play position:N` — jump straight to a queue position. The caller
    /// replies with its own now-playing message, so notification is
    /// suppressed here.
    pub async fn play_at(&self, guild: GuildId, position: usize) -> Result<Track, MusicError> {
        let entry = self.store.entry(guild).await;
        let mut state = entry.lock().await;

        let len = state.queue.len();
        if position < 1 || position > len {
            return Err(MusicError::InvalidPosition { given: position, len });
        }
        let index = position - 1;
        state.cursor = index;
        self.play_current(
            guild,
            &mut state,
            PlayOpts {
                force_position: Some(index),
                suppress_notify: true,
            },
        )
        .await?;
        state
            .now_playing
            .clone()
            .ok_or(MusicError::NothingPlaying)
    }

    /// `/next` and `/previous`. The target cursor is computed before the
    /// running track is stopped; the skip flag (set inside
    /// [`Self::play_current`] before the stop is issued) keeps the stale
    /// completion from advancing a second time.
    pub async fn skip(&self, guild: GuildId, direction: SkipDirection) -> Result<Track, MusicError> {
        let entry = self.store.entry(guild).await;
        let mut state = entry.lock().await;

        let len = state.queue.len();
        if len == 0 {
            return Err(MusicError::EmptyQueue);
        }

        let target = match direction {
            SkipDirection::Forward => {
                let next = state.cursor + 1;
                if next < len {
                    next
                } else if state.modes.repeat == RepeatMode::All {
                    0
                } else {
                    return Err(MusicError::NoNext);
                }
            }
            SkipDirection::Back => {
                if state.cursor > 0 {
                    state.cursor - 1
                } else if state.modes.repeat == RepeatMode::All {
                    len - 1
                } else {
                    return Err(MusicError::NoPrevious);
                }
            }
        };

        state.cursor = target;
        self.play_current(
            guild,
            &mut state,
            PlayOpts {
                force_position: Some(target),
                suppress_notify: true,
            },
        )
        .await?;
        state
            .now_playing
            .clone()
            .ok_or(MusicError::NothingPlaying)
    }

    /// `/stop`: snapshot the cursor for a later resume and stop the
    /// player without tearing down the voice connection. Idempotent —
    /// a second stop with nothing running changes nothing.
    pub async fn request_stop(&self, guild: GuildId) -> Result<(), MusicError> {
        let entry = self.store.entry(guild).await;
        let mut state = entry.lock().await;

        if !matches!(state.status, PlaybackStatus::Playing | PlaybackStatus::Paused) {
            return Ok(());
        }

        state.stopped_position = Some(state.cursor);
        // Must be visible before the stop so the completion it provokes
        // does not auto-advance.
        state.pending_skip = true;

        if state.modes.auto_clear_on_stop {
            if state.held_track.is_none() {
                state.held_track = state.now_playing.clone();
            }
            state.queue.clear();
            state.cursor = 0;
        }

        self.player.stop(guild).await;
        state.status = PlaybackStatus::Stopped;
        state.now_playing = None;
        Ok(())
    }

    pub async fn pause(&self, guild: GuildId) -> Result<(), MusicError> {
        let entry = self.store.entry(guild).await;
        let mut state = entry.lock().await;
        if !self.player.is_playing(guild).await {
            return Err(MusicError::NothingPlaying);
        }
        self.player.pause(guild).await?;
        state.status = PlaybackStatus::Paused;
        Ok(())
    }

    /// `/queue position:N` — one-shot override: when the current track
    /// ends naturally, jump to `position` instead of cursor+1. Does not
    /// touch current playback.
    pub async fn defer_play(
        &self,
        guild: GuildId,
        position: usize,
        channel: ChannelId,
    ) -> Result<Track, MusicError> {
        let entry = self.store.entry(guild).await;
        let mut state = entry.lock().await;

        let len = state.queue.len();
        if position < 1 || position > len {
            return Err(MusicError::InvalidPosition { given: position, len });
        }
        let index = position - 1;
        let track = state
            .queue
            .get(index)
            .cloned()
            .ok_or(MusicError::InvalidPosition { given: position, len })?;
        state.deferred_next = Some(DeferredNext {
            position: index,
            channel,
        });
        Ok(track)
    }

    pub async fn set_repeat(&self, guild: GuildId, mode: RepeatMode) -> usize {
        let entry = self.store.entry(guild).await;
        let mut state = entry.lock().await;
        state.modes.repeat = mode;
        state.queue.len()
    }

    pub async fn set_loop(&self, guild: GuildId, mode: LoopMode) -> Option<String> {
        let entry = self.store.entry(guild).await;
        let mut state = entry.lock().await;
        state.modes.loop_mode = mode;
        state.now_playing.as_ref().map(|t| t.title.clone())
    }

    pub async fn queue_view(&self, guild: GuildId) -> Option<QueueView> {
        let entry = self.store.get(guild).await?;
        let state = entry.lock().await;
        if state.queue.is_empty() {
            return None;
        }
        // While a held track plays, the cursor does not say what is
        // playing, so no queue entry gets the current marker.
        let current = if state.held_track.is_some() {
            None
        } else {
            Some(state.cursor)
        };
        let entries = state
            .queue
            .iter()
            .enumerate()
            .map(|(i, t)| {
                (
                    format!("{} ({})", t.title, t.duration_display()),
                    Some(i) == current,
                )
            })
            .collect();
        let next_up = state
            .deferred_next
            .as_ref()
            .and_then(|d| state.queue.get(d.position))
            .map(|t| t.title.clone());
        Some(QueueView { entries, next_up })
    }

    /// `/clearqueue`: empty the queue. A currently playing track survives
    /// detached as the held track and keeps playing until it ends.
    pub async fn clear_queue(&self, guild: GuildId) -> Result<bool, MusicError> {
        let entry = self.store.entry(guild).await;
        let mut state = entry.lock().await;

        if state.queue.is_empty() && state.held_track.is_none() {
            return Err(MusicError::EmptyQueue);
        }

        let playing = matches!(state.status, PlaybackStatus::Playing | PlaybackStatus::Paused);
        let kept = if playing && state.now_playing.is_some() {
            if state.held_track.is_none() {
                state.held_track = state.now_playing.clone();
            }
            true
        } else {
            false
        };
        state.queue.clear();
        state.cursor = 0;
        state.deferred_next = None;
        Ok(kept)
    }

    pub async fn toggle_auto_clear(&self, guild: GuildId) -> bool {
        let entry = self.store.entry(guild).await;
        let mut state = entry.lock().await;
        state.modes.auto_clear_on_stop = !state.modes.auto_clear_on_stop;
        state.modes.auto_clear_on_stop
    }

    pub async fn shuffle(&self, guild: GuildId) -> Result<(), MusicError> {
        let entry = self.store.entry(guild).await;
        let mut state = entry.lock().await;
        if state.queue.is_empty() {
            return Err(MusicError::EmptyQueue);
        }
        let cursor = state.cursor;
        state.queue.shuffle_keeping_current(cursor);
        Ok(())
    }

    /// Tear down the voice connection and evict the guild's state.
    pub async fn disconnect(&self, guild: GuildId) -> Result<(), MusicError> {
        self.player.leave(guild).await?;
        self.store.remove(guild).await;
        Ok(())
    }

    /// Completion signal from the media player: fires exactly once per
    /// started track, on natural end and on stop alike. This is the
    /// asynchronous reentry point the skip flag exists for.
    pub async fn on_track_ended(&self, guild: GuildId) {
        let Some(entry) = self.store.get(guild).await else {
            return;
        };
        let mut state = entry.lock().await;
        debug!(guild = guild.get(), "track ended");

        if state.held_track.is_some() {
            if state.pending_skip {
                // A command already stopped the held track; keep it around
                // so a later play can resume it.
                state.pending_skip = false;
                state.now_playing = None;
                state.status = PlaybackStatus::Stopped;
                return;
            }
            state.held_track = None;
            state.now_playing = None;
            if state.queue.is_empty() {
                state.status = PlaybackStatus::Stopped;
            } else {
                state.cursor = 0;
                if let Err(e) = self.play_current(guild, &mut state, PlayOpts::default()).await {
                    warn!(guild = guild.get(), "failed to resume queue after held track: {e}");
                }
            }
            return;
        }

        if state.pending_skip {
            // A command-initiated stop already handled this transition.
            state.pending_skip = false;
            return;
        }

        // The track this completion belongs to is done.
        state.now_playing = None;

        if let Some(deferred) = state.deferred_next.take() {
            state.cursor = deferred.position;
            state.notify_channel = Some(deferred.channel);
            if let Err(e) = self.play_current(guild, &mut state, PlayOpts::default()).await {
                warn!(guild = guild.get(), "deferred play failed: {e}");
            }
            return;
        }

        let len = state.queue.len();
        if len == 0 {
            state.status = PlaybackStatus::Stopped;
            return;
        }

        let next = state.cursor + 1;
        if next < len {
            state.cursor = next;
        } else if state.modes.repeat == RepeatMode::All {
            state.cursor = 0;
        } else {
            // End of queue: park the cursor past the end and go quiet.
            state.cursor = len;
            state.status = PlaybackStatus::Stopped;
            return;
        }
        if let Err(e) = self.play_current(guild, &mut state, PlayOpts::default()).await {
            warn!(guild = guild.get(), "auto-advance failed: {e}");
        }
    }

    /// Start playing the selected track: held track if set, else the
    /// forced position, else the cursor (wrapping a past-end cursor to 0).
    /// Stops any running track first and waits out the settle period. On
    /// resolution or start failure, steps forward one position and tries
    /// again, up to `max_auto_skips` times.
    async fn play_current(
        &self,
        guild: GuildId,
        state: &mut GuildState,
        opts: PlayOpts,
    ) -> Result<(), MusicError> {
        if state.now_playing.is_some()
            || self.player.is_playing(guild).await
            || self.player.is_paused(guild).await
        {
            // A completion is still owed for the current track even when
            // the player already reports idle (its signal may be in flight
            // on the end-event channel). The flag must be visible to that
            // completion, and the settle delay lets the driver actually
            // wind down before the next start.
            state.pending_skip = true;
            self.player.stop(guild).await;
            tokio::time::sleep(self.settle).await;
        }

        let mut force = opts.force_position;
        let mut last_err = MusicError::EmptyQueue;

        for _ in 0..self.max_auto_skips {
            let (track, from_held) = if let Some(held) = state.held_track.clone() {
                (held, true)
            } else {
                let len = state.queue.len();
                if len == 0 {
                    state.status = PlaybackStatus::Stopped;
                    return Err(last_err);
                }
                let mut position = force.take().unwrap_or(state.cursor);
                if position >= len {
                    position = 0;
                }
                state.cursor = position;
                let Some(track) = state.queue.get(position).cloned() else {
                    state.status = PlaybackStatus::Stopped;
                    return Err(last_err);
                };
                (track, false)
            };

            let started = match self.resolver.stream_url(&track).await {
                Ok(url) => self.player.play(guild, &url, state.modes.volume).await,
                Err(e) => Err(e),
            };

            match started {
                Ok(()) => {
                    info!(guild = guild.get(), title = %track.title, "started playing");
                    state.now_playing = Some(track.clone());
                    state.status = PlaybackStatus::Playing;
                    if !opts.suppress_notify {
                        if let Some(channel) = state.notify_channel {
                            self.notifier.now_playing(channel, &track).await;
                        }
                    }
                    return Ok(());
                }
                Err(e) => {
                    warn!(guild = guild.get(), title = %track.title, "skipping unavailable track: {e}");
                    if from_held {
                        // A dead held track can only fall back to the queue.
                        state.held_track = None;
                        last_err = e;
                        continue;
                    }
                    let next = state.cursor + 1;
                    if next >= state.queue.len() {
                        state.status = PlaybackStatus::Stopped;
                        return Err(e);
                    }
                    state.cursor = next;
                    last_err = e;
                }
            }
        }

        state.status = PlaybackStatus::Stopped;
        warn!(guild = guild.get(), "gave up after {} consecutive unavailable tracks", self.max_auto_skips);
        Err(last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::Notifier;
    use crate::player::MediaPlayer;
    use crate::resolver::{Resolved, TrackResolver};
    use serenity::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    const GUILD: GuildId = GuildId::new(1);
    const CHANNEL: ChannelId = ChannelId::new(9);

    #[derive(Default)]
    struct FakePlayer {
        connected: AtomicBool,
        playing: AtomicBool,
        paused: AtomicBool,
        plays: StdMutex<Vec<String>>,
        stops: AtomicUsize,
    }

    #[async_trait]
    impl MediaPlayer for FakePlayer {
        async fn join(&self, _guild: GuildId, _channel: ChannelId) -> Result<(), MusicError> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn leave(&self, _guild: GuildId) -> Result<(), MusicError> {
            self.connected.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn is_connected(&self, _guild: GuildId) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn play(&self, _guild: GuildId, url: &str, _volume: f32) -> Result<(), MusicError> {
            self.plays.lock().unwrap().push(url.to_string());
            self.playing.store(true, Ordering::SeqCst);
            self.paused.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self, _guild: GuildId) {
            self.playing.store(false, Ordering::SeqCst);
            self.paused.store(false, Ordering::SeqCst);
            self.stops.fetch_add(1, Ordering::SeqCst);
        }

        async fn pause(&self, _guild: GuildId) -> Result<(), MusicError> {
            self.playing.store(false, Ordering::SeqCst);
            self.paused.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn resume(&self, _guild: GuildId) -> Result<(), MusicError> {
            self.playing.store(true, Ordering::SeqCst);
            self.paused.store(false, Ordering::SeqCst);
            Ok(())
        }

        async fn is_playing(&self, _guild: GuildId) -> bool {
            self.playing.load(Ordering::SeqCst)
        }

        async fn is_paused(&self, _guild: GuildId) -> bool {
            self.paused.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct FakeResolver {
        // Watch-page URLs whose stream extraction should fail.
        dead: StdMutex<HashSet<String>>,
    }

    impl FakeResolver {
        fn kill(&self, title: &str) {
            self.dead.lock().unwrap().insert(page(title));
        }
    }

    #[async_trait]
    impl TrackResolver for FakeResolver {
        async fn resolve(&self, query: &str) -> Result<Resolved, MusicError> {
            Ok(Resolved {
                entries: vec![Track::new(page(query), query, 60)],
                is_playlist: false,
            })
        }

        async fn stream_url(&self, track: &Track) -> Result<String, MusicError> {
            if self.dead.lock().unwrap().contains(&track.url) {
                return Err(MusicError::Resolution(format!("'{}' unavailable", track.title)));
            }
            Ok(format!("stream://{}", track.url))
        }
    }

    #[derive(Default)]
    struct FakeNotifier {
        sent: StdMutex<Vec<(ChannelId, String)>>,
    }

    #[async_trait]
    impl Notifier for FakeNotifier {
        async fn now_playing(&self, channel: ChannelId, track: &Track) {
            self.sent.lock().unwrap().push((channel, track.title.clone()));
        }
    }

    fn page(title: &str) -> String {
        format!("https://yt/{title}")
    }

    fn stream(title: &str) -> String {
        format!("stream://{}", page(title))
    }

    struct Harness {
        controller: Controller,
        player: Arc<FakePlayer>,
        resolver: Arc<FakeResolver>,
        notifier: Arc<FakeNotifier>,
    }

    fn harness() -> Harness {
        let player = Arc::new(FakePlayer::default());
        let resolver = Arc::new(FakeResolver::default());
        let notifier = Arc::new(FakeNotifier::default());
        let controller = Controller::new(
            GuildStore::new(1.0),
            resolver.clone(),
            player.clone(),
            notifier.clone(),
            Duration::ZERO,
            5,
        );
        Harness {
            controller,
            player,
            resolver,
            notifier,
        }
    }

    impl Harness {
        async fn seed(&self, titles: &[&str]) {
            let entry = self.controller.store.entry(GUILD).await;
            let mut state = entry.lock().await;
            for t in titles {
                state.queue.append(Track::new(page(t), *t, 60));
            }
            state.status = PlaybackStatus::Stopped;
            state.notify_channel = Some(CHANNEL);
        }

        /// Put the guild in "track at `index` is playing" shape.
        async fn mark_playing(&self, index: usize) {
            let entry = self.controller.store.entry(GUILD).await;
            let mut state = entry.lock().await;
            state.cursor = index;
            state.now_playing = state.queue.get(index).cloned();
            state.status = PlaybackStatus::Playing;
            self.player.playing.store(true, Ordering::SeqCst);
        }

        /// Simulate the running track finishing and its completion
        /// signal arriving.
        async fn end_track(&self) {
            self.player.playing.store(false, Ordering::SeqCst);
            self.controller.on_track_ended(GUILD).await;
        }

        async fn state<T>(&self, f: impl FnOnce(&GuildState) -> T) -> T {
            let entry = self.controller.store.entry(GUILD).await;
            let state = entry.lock().await;
            f(&state)
        }

        fn plays(&self) -> Vec<String> {
            self.player.plays.lock().unwrap().clone()
        }
    }

    #[tokio::test]
    async fn natural_advance_walks_queue_then_stops() {
        let h = harness();
        h.seed(&["t1", "t2", "t3"]).await;
        h.mark_playing(0).await;

        h.end_track().await;
        assert_eq!(h.state(|s| s.cursor).await, 1);
        h.end_track().await;
        assert_eq!(h.state(|s| s.cursor).await, 2);
        h.end_track().await;

        // Past-end marker, no further start.
        assert_eq!(h.state(|s| s.cursor).await, 3);
        assert_eq!(h.state(|s| s.status).await, PlaybackStatus::Stopped);
        assert_eq!(h.plays(), vec![stream("t2"), stream("t3")]);
    }

    #[tokio::test]
    async fn repeat_all_wraps_to_the_front() {
        let h = harness();
        h.seed(&["t1", "t2", "t3"]).await;
        h.controller.set_repeat(GUILD, RepeatMode::All).await;
        h.mark_playing(0).await;

        h.end_track().await;
        h.end_track().await;
        h.end_track().await;
        assert_eq!(h.state(|s| s.cursor).await, 0);
        assert_eq!(h.plays().last().unwrap(), &stream("t1"));

        h.end_track().await;
        assert_eq!(h.state(|s| s.cursor).await, 1);
        assert_eq!(h.state(|s| s.status).await, PlaybackStatus::Playing);
    }

    #[tokio::test]
    async fn deferred_play_jumps_and_is_consumed_once() {
        let h = harness();
        h.seed(&["t1", "t2", "t3"]).await;
        h.mark_playing(0).await;

        let other = ChannelId::new(42);
        let track = h.controller.defer_play(GUILD, 3, other).await.unwrap();
        assert_eq!(track.title, "t3");
        // Current playback untouched.
        assert_eq!(h.state(|s| s.cursor).await, 0);

        h.end_track().await;
        assert_eq!(h.state(|s| s.cursor).await, 2);
        assert_eq!(h.plays(), vec![stream("t3")]);
        assert!(h.state(|s| s.deferred_next.is_none()).await);
        // Notified on the channel stored with the deferral.
        assert_eq!(
            h.notifier.sent.lock().unwrap().as_slice(),
            &[(other, "t3".to_string())]
        );

        // The next end is a plain advance, not a second jump.
        h.end_track().await;
        assert_eq!(h.state(|s| s.cursor).await, 3);
        assert_eq!(h.state(|s| s.status).await, PlaybackStatus::Stopped);
    }

    #[tokio::test]
    async fn held_track_bridges_a_cleared_queue() {
        let h = harness();
        h.seed(&["t1"]).await;
        h.mark_playing(0).await;

        let kept = h.controller.clear_queue(GUILD).await.unwrap();
        assert!(kept);
        assert_eq!(h.state(|s| s.held_track.as_ref().unwrap().title.clone()).await, "t1");
        assert!(h.state(|s| s.queue.is_empty()).await);
        // t1 is still audibly playing.
        assert!(h.player.is_playing(GUILD).await);

        // Refill the queue while the held track plays out.
        {
            let entry = h.controller.store.entry(GUILD).await;
            entry.lock().await.queue.append(Track::new(page("t4"), "t4", 60));
        }

        h.end_track().await;
        assert!(h.state(|s| s.held_track.is_none()).await);
        assert_eq!(h.state(|s| s.cursor).await, 0);
        assert_eq!(h.plays(), vec![stream("t4")]);
    }

    #[tokio::test]
    async fn clearing_an_empty_queue_is_rejected() {
        let h = harness();
        h.seed(&[]).await;
        assert!(matches!(
            h.controller.clear_queue(GUILD).await,
            Err(MusicError::EmptyQueue)
        ));
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let h = harness();
        h.seed(&["t1", "t2", "t3"]).await;
        h.mark_playing(1).await;

        h.controller.request_stop(GUILD).await.unwrap();
        let snapshot = h
            .state(|s| (s.cursor, s.pending_skip, s.stopped_position, s.queue.len()))
            .await;
        assert_eq!(snapshot, (1, true, Some(1), 3));
        assert_eq!(h.player.stops.load(Ordering::SeqCst), 1);

        h.controller.request_stop(GUILD).await.unwrap();
        let again = h
            .state(|s| (s.cursor, s.pending_skip, s.stopped_position, s.queue.len()))
            .await;
        assert_eq!(again, snapshot);
        assert_eq!(h.player.stops.load(Ordering::SeqCst), 1);

        // The completion the stop provoked consumes the flag and nothing
        // else happens.
        h.end_track().await;
        assert!(!h.state(|s| s.pending_skip).await);
        assert_eq!(h.state(|s| s.cursor).await, 1);
        assert!(h.plays().is_empty());
    }

    #[tokio::test]
    async fn stop_with_auto_clear_holds_current_once() {
        let h = harness();
        h.seed(&["t1", "t2"]).await;
        h.controller.toggle_auto_clear(GUILD).await;
        h.mark_playing(1).await;

        h.controller.request_stop(GUILD).await.unwrap();
        h.controller.request_stop(GUILD).await.unwrap();
        assert_eq!(h.state(|s| s.held_track.as_ref().unwrap().title.clone()).await, "t2");
        assert!(h.state(|s| s.queue.is_empty()).await);

        // Completion from the stop: flag wins, held track retained.
        h.end_track().await;
        assert!(h.state(|s| s.held_track.is_some()).await);
        assert!(!h.state(|s| s.pending_skip).await);
        assert_eq!(h.state(|s| s.status).await, PlaybackStatus::Stopped);

        // A bare /play resumes the held track.
        let outcome = h.controller.play_resume(GUILD).await.unwrap();
        assert_eq!(outcome, ResumeOutcome::Started);
        assert_eq!(h.plays(), vec![stream("t2")]);
    }

    #[tokio::test]
    async fn skip_and_stale_completion_advance_exactly_once() {
        let h = harness();
        h.seed(&["t1", "t2", "t3"]).await;
        h.mark_playing(0).await;

        let track = h.controller.skip(GUILD, SkipDirection::Forward).await.unwrap();
        assert_eq!(track.title, "t2");
        assert_eq!(h.state(|s| s.cursor).await, 1);
        assert!(h.state(|s| s.pending_skip).await);
        assert_eq!(h.plays(), vec![stream("t2")]);

        // The stop that the skip issued now delivers its completion.
        h.controller.on_track_ended(GUILD).await;
        assert!(!h.state(|s| s.pending_skip).await);
        assert_eq!(h.state(|s| s.cursor).await, 1);
        assert_eq!(h.plays(), vec![stream("t2")]);
    }

    #[tokio::test]
    async fn skip_during_an_in_flight_completion_advances_exactly_once() {
        let h = harness();
        h.seed(&["t1", "t2", "t3"]).await;
        h.mark_playing(0).await;

        // t1 has ended but its completion signal has not been delivered yet.
        h.player.playing.store(false, Ordering::SeqCst);

        let track = h.controller.skip(GUILD, SkipDirection::Forward).await.unwrap();
        assert_eq!(track.title, "t2");
        assert_eq!(h.state(|s| s.cursor).await, 1);
        assert!(h.state(|s| s.pending_skip).await);

        // The late completion for t1 lands now; it must not advance again.
        h.controller.on_track_ended(GUILD).await;
        assert_eq!(h.state(|s| s.cursor).await, 1);
        assert!(!h.state(|s| s.pending_skip).await);
        assert_eq!(h.plays(), vec![stream("t2")]);
    }

    #[tokio::test]
    async fn enqueue_does_not_autostart_over_an_in_flight_completion() {
        let h = harness();
        h.controller.touch(GUILD, CHANNEL).await;
        h.controller.enqueue(GUILD, "t1", true).await.unwrap();
        assert_eq!(h.plays(), vec![stream("t1")]);

        // t1 has ended but its completion signal has not been delivered yet.
        h.player.playing.store(false, Ordering::SeqCst);
        h.controller.enqueue(GUILD, "t2", true).await.unwrap();
        assert_eq!(h.plays(), vec![stream("t1")]);

        // The late completion performs the single advance.
        h.controller.on_track_ended(GUILD).await;
        assert_eq!(h.state(|s| s.cursor).await, 1);
        assert_eq!(h.plays(), vec![stream("t1"), stream("t2")]);
    }

    #[tokio::test]
    async fn queue_marker_is_suppressed_while_a_held_track_plays() {
        let h = harness();
        h.seed(&["t1"]).await;
        h.mark_playing(0).await;
        h.controller.clear_queue(GUILD).await.unwrap();
        {
            let entry = h.controller.store.entry(GUILD).await;
            entry.lock().await.queue.append(Track::new(page("t4"), "t4", 60));
        }

        let view = h.controller.queue_view(GUILD).await.unwrap();
        assert!(view.entries.iter().all(|(_, current)| !current));

        // Held track finished: the queue takes over and the marker returns.
        h.end_track().await;
        let view = h.controller.queue_view(GUILD).await.unwrap();
        assert!(view.entries[0].1);
    }

    #[tokio::test]
    async fn previous_at_queue_start_is_rejected() {
        let h = harness();
        h.seed(&["t1", "t2"]).await;
        h.mark_playing(0).await;

        assert!(matches!(
            h.controller.skip(GUILD, SkipDirection::Back).await,
            Err(MusicError::NoPrevious)
        ));
        assert_eq!(h.state(|s| s.cursor).await, 0);
        assert!(!h.state(|s| s.pending_skip).await);
    }

    #[tokio::test]
    async fn previous_wraps_under_repeat_all() {
        let h = harness();
        h.seed(&["t1", "t2", "t3"]).await;
        h.controller.set_repeat(GUILD, RepeatMode::All).await;
        h.mark_playing(0).await;

        let track = h.controller.skip(GUILD, SkipDirection::Back).await.unwrap();
        assert_eq!(track.title, "t3");
        assert_eq!(h.state(|s| s.cursor).await, 2);
    }

    #[tokio::test]
    async fn unresolvable_track_is_skipped_forward() {
        let h = harness();
        h.seed(&["t1", "t2", "t3"]).await;
        h.resolver.kill("t1");

        let outcome = h.controller.play_resume(GUILD).await.unwrap();
        assert_eq!(outcome, ResumeOutcome::Started);
        assert_eq!(h.plays(), vec![stream("t2")]);
        assert_eq!(h.state(|s| s.cursor).await, 1);
    }

    #[tokio::test]
    async fn fully_unresolvable_queue_gives_up() {
        let h = harness();
        h.seed(&["t1", "t2", "t3"]).await;
        for t in ["t1", "t2", "t3"] {
            h.resolver.kill(t);
        }

        assert!(h.controller.play_resume(GUILD).await.is_err());
        assert!(h.plays().is_empty());
        assert_eq!(h.state(|s| s.status).await, PlaybackStatus::Stopped);
    }

    #[tokio::test]
    async fn deferred_play_validates_bounds() {
        let h = harness();
        h.seed(&["t1", "t2", "t3"]).await;

        assert!(matches!(
            h.controller.defer_play(GUILD, 0, CHANNEL).await,
            Err(MusicError::InvalidPosition { given: 0, len: 3 })
        ));
        assert!(matches!(
            h.controller.defer_play(GUILD, 4, CHANNEL).await,
            Err(MusicError::InvalidPosition { given: 4, len: 3 })
        ));
    }

    #[tokio::test]
    async fn bare_play_resumes_from_the_stopped_position() {
        let h = harness();
        h.seed(&["t1", "t2", "t3"]).await;
        h.mark_playing(1).await;

        h.controller.request_stop(GUILD).await.unwrap();
        h.end_track().await;

        let outcome = h.controller.play_resume(GUILD).await.unwrap();
        assert_eq!(outcome, ResumeOutcome::Started);
        assert_eq!(h.plays(), vec![stream("t2")]);
        assert!(h.state(|s| s.stopped_position.is_none()).await);
    }

    #[tokio::test]
    async fn bare_play_resumes_a_paused_track() {
        let h = harness();
        h.seed(&["t1"]).await;
        h.mark_playing(0).await;

        h.controller.pause(GUILD).await.unwrap();
        assert_eq!(h.state(|s| s.status).await, PlaybackStatus::Paused);

        let outcome = h.controller.play_resume(GUILD).await.unwrap();
        assert_eq!(outcome, ResumeOutcome::Resumed);
        assert!(h.player.is_playing(GUILD).await);
        // No new input was started.
        assert!(h.plays().is_empty());
    }

    #[tokio::test]
    async fn enqueue_autostarts_only_when_idle() {
        let h = harness();
        h.controller.touch(GUILD, CHANNEL).await;

        let outcome = h.controller.enqueue(GUILD, "t1", true).await.unwrap();
        assert_eq!(outcome.added, 1);
        assert_eq!(h.plays(), vec![stream("t1")]);
        assert_eq!(
            h.notifier.sent.lock().unwrap().as_slice(),
            &[(CHANNEL, "t1".to_string())]
        );

        // Already playing: the new track is queued, not started.
        let outcome = h.controller.enqueue(GUILD, "t2", true).await.unwrap();
        assert_eq!(outcome.added, 1);
        assert_eq!(h.plays(), vec![stream("t1")]);
        assert_eq!(h.state(|s| s.queue.len()).await, 2);
    }

    #[tokio::test]
    async fn play_at_suppresses_the_duplicate_notification() {
        let h = harness();
        h.seed(&["t1", "t2", "t3"]).await;
        h.mark_playing(0).await;

        let track = h.controller.play_at(GUILD, 3).await.unwrap();
        assert_eq!(track.title, "t3");
        assert_eq!(h.state(|s| s.cursor).await, 2);
        assert_eq!(h.plays(), vec![stream("t3")]);
        assert!(h.notifier.sent.lock().unwrap().is_empty());

        assert!(matches!(
            h.controller.play_at(GUILD, 7).await,
            Err(MusicError::InvalidPosition { given: 7, len: 3 })
        ));
    }

    #[tokio::test]
    async fn cursor_never_leaves_queue_bounds() {
        let h = harness();
        h.seed(&["t1", "t2"]).await;
        h.mark_playing(0).await;

        h.end_track().await;
        h.end_track().await;
        let (cursor, len) = h.state(|s| (s.cursor, s.queue.len())).await;
        assert!(cursor <= len);

        // Starting again from a past-end cursor wraps to the front.
        h.controller.play_resume(GUILD).await.unwrap();
        assert_eq!(h.state(|s| s.cursor).await, 0);
    }

    #[tokio::test]
    async fn shuffle_requires_a_queue() {
        let h = harness();
        h.seed(&[]).await;
        assert!(matches!(
            h.controller.shuffle(GUILD).await,
            Err(MusicError::EmptyQueue)
        ));
    }
}
