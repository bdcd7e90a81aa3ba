use poise::CreateReply;
use serenity::builder::CreateEmbed;
use serenity::gateway::ActivityData;
use serenity::model::id::ChannelId;
use tracing::error;

use crate::controller::{ResumeOutcome, SkipDirection};
use crate::error::MusicError;
use crate::state::{LoopMode, RepeatMode};
use crate::track::Track;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, crate::Data, Error>;
pub type CommandResult = Result<(), Error>;

pub fn all() -> Vec<poise::Command<crate::Data, Error>> {
    vec![
        play(),
        next(),
        previous(),
        stop(),
        pause(),
        repeat(),
        loop_mode(),
        disconnect(),
        queue(),
        clearqueue(),
        shuffle(),
        setstatus(),
        help(),
    ]
}

async fn reply(ctx: Context<'_>, desc: &str) -> CommandResult {
    let embed = CreateEmbed::new()
        .title("Music")
        .description(desc)
        .color(ctx.data().embed_color);
    ctx.send(CreateReply::default().embed(embed)).await?;
    Ok(())
}

async fn reply_now_playing(ctx: Context<'_>, track: &Track) -> CommandResult {
    let embed = CreateEmbed::new()
        .title("Now Playing")
        .description(format!("🎵 {}", track.title))
        .color(ctx.data().embed_color);
    ctx.send(CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Voice channel the invoking user currently sits in, from the cache.
fn user_voice_channel(ctx: &Context<'_>) -> Option<ChannelId> {
    let guild = ctx.guild()?;
    guild
        .voice_states
        .get(&ctx.author().id)
        .and_then(|vs| vs.channel_id)
}

/// Join the caller's voice channel if the bot is not connected yet.
/// Replies with the failure itself; `Ok(false)` means "already handled,
/// bail out".
async fn ensure_connected(ctx: Context<'_>) -> Result<bool, Error> {
    let guild_id = ctx.guild_id().ok_or("guild-only command used outside a guild")?;
    let controller = &ctx.data().controller;
    if controller.is_connected(guild_id).await {
        return Ok(true);
    }
    let Some(voice) = user_voice_channel(&ctx) else {
        reply(ctx, "You need to be in a voice channel!").await?;
        return Ok(false);
    };
    if let Err(e) = controller.connect(guild_id, voice).await {
        error!(guild = guild_id.get(), "failed to connect to voice channel: {e}");
        reply(ctx, "Failed to connect to voice channel!").await?;
        return Ok(false);
    }
    Ok(true)
}

/// Play a song from YouTube, resume, or jump to a queue position.
#[poise::command(slash_command, guild_only, category = "Music")]
pub async fn play(
    ctx: Context<'_>,
    #[description = "Song name or URL"] query: Option<String>,
    #[description = "Queue position to play right now"] position: Option<usize>,
) -> CommandResult {
    let guild_id = ctx.guild_id().ok_or("guild-only command used outside a guild")?;
    ctx.defer().await?;
    let controller = ctx.data().controller.clone();
    controller.touch(guild_id, ctx.channel_id()).await;

    if !ensure_connected(ctx).await? {
        return Ok(());
    }

    if let Some(position) = position {
        return match controller.play_at(guild_id, position).await {
            Ok(track) => reply_now_playing(ctx, &track).await,
            Err(MusicError::InvalidPosition { len, .. }) => {
                reply(ctx, &format!("Invalid position! Please choose between 1 and {len}")).await
            }
            Err(MusicError::EmptyQueue) => reply(ctx, "Queue is empty!").await,
            Err(e) => reply(ctx, &format!("Failed to play: {e}")).await,
        };
    }

    let Some(query) = query else {
        return match controller.play_resume(guild_id).await {
            Ok(ResumeOutcome::Resumed) => reply(ctx, "Resumed playback!").await,
            Ok(ResumeOutcome::AlreadyPlaying) => {
                reply(ctx, "Already playing! Use /queue to see the current queue.").await
            }
            Ok(ResumeOutcome::Started) => reply(ctx, "Playing from queue!").await,
            Err(MusicError::EmptyQueue) => {
                reply(ctx, "Queue is empty! Provide a song to play.").await
            }
            Err(e) => reply(ctx, &format!("Failed to play: {e}")).await,
        };
    };

    match controller.enqueue(guild_id, &query, true).await {
        Ok(o) if o.is_playlist => {
            reply(ctx, &format!("Added playlist: {} tracks", o.added)).await
        }
        Ok(o) => reply(ctx, &format!("Added to queue: {}", o.first_title)).await,
        Err(e) => reply(ctx, &format!("An error occurred: {e}")).await,
    }
}

/// Play the next song.
#[poise::command(slash_command, guild_only, category = "Music")]
pub async fn next(ctx: Context<'_>) -> CommandResult {
    let guild_id = ctx.guild_id().ok_or("guild-only command used outside a guild")?;
    let controller = ctx.data().controller.clone();
    if !controller.is_connected(guild_id).await {
        return reply(ctx, "I'm not playing anything!").await;
    }
    ctx.defer().await?;
    controller.touch(guild_id, ctx.channel_id()).await;

    match controller.skip(guild_id, SkipDirection::Forward).await {
        Ok(track) => reply(ctx, &format!("Playing next song: {}", track.title)).await,
        Err(MusicError::EmptyQueue) => reply(ctx, "Queue is empty!").await,
        Err(MusicError::NoNext) => reply(ctx, "No more songs in queue!").await,
        Err(e) => reply(ctx, &format!("Failed to skip: {e}")).await,
    }
}

/// Play the previous song.
#[poise::command(slash_command, guild_only, category = "Music")]
pub async fn previous(ctx: Context<'_>) -> CommandResult {
    let guild_id = ctx.guild_id().ok_or("guild-only command used outside a guild")?;
    let controller = ctx.data().controller.clone();
    if !controller.is_connected(guild_id).await {
        return reply(ctx, "I'm not playing anything!").await;
    }
    ctx.defer().await?;
    controller.touch(guild_id, ctx.channel_id()).await;

    match controller.skip(guild_id, SkipDirection::Back).await {
        Ok(track) => reply(ctx, &format!("Playing previous song: {}", track.title)).await,
        Err(MusicError::EmptyQueue) => reply(ctx, "Queue is empty!").await,
        Err(MusicError::NoPrevious) => reply(ctx, "No previous songs in queue!").await,
        Err(e) => reply(ctx, &format!("Failed to skip: {e}")).await,
    }
}

/// Stop the current song; the queue and position are preserved.
#[poise::command(slash_command, guild_only, category = "Music")]
pub async fn stop(ctx: Context<'_>) -> CommandResult {
    let guild_id = ctx.guild_id().ok_or("guild-only command used outside a guild")?;
    let controller = ctx.data().controller.clone();
    if !controller.is_connected(guild_id).await {
        return reply(ctx, "I'm not playing anything!").await;
    }
    controller.request_stop(guild_id).await?;
    reply(ctx, "Stopped playing! Use `/play` to resume from where you left off.").await
}

/// Pause the current song.
#[poise::command(slash_command, guild_only, category = "Music")]
pub async fn pause(ctx: Context<'_>) -> CommandResult {
    let guild_id = ctx.guild_id().ok_or("guild-only command used outside a guild")?;
    let controller = ctx.data().controller.clone();
    if !controller.is_connected(guild_id).await {
        return reply(ctx, "I'm not playing anything!").await;
    }
    match controller.pause(guild_id).await {
        Ok(()) => reply(ctx, "Paused the current song! Use `/play` to resume.").await,
        Err(MusicError::NothingPlaying) => reply(ctx, "Nothing is playing!").await,
        Err(e) => reply(ctx, &format!("Failed to pause: {e}")).await,
    }
}

/// Set repeat mode for the queue.
#[poise::command(slash_command, guild_only, category = "Music")]
pub async fn repeat(
    ctx: Context<'_>,
    #[description = "Repeat mode"] mode: RepeatMode,
) -> CommandResult {
    let guild_id = ctx.guild_id().ok_or("guild-only command used outside a guild")?;
    let queue_len = ctx.data().controller.set_repeat(guild_id, mode).await;

    let message = match mode {
        RepeatMode::Off => "Repeat mode disabled".to_string(),
        RepeatMode::All => "Repeating entire queue until turned off".to_string(),
        RepeatMode::Single => {
            format!("Will repeat the queue one more time ({queue_len} songs)")
        }
    };
    reply(ctx, &message).await
}

/// Loop the current song.
#[poise::command(slash_command, guild_only, category = "Music", rename = "loop")]
pub async fn loop_mode(
    ctx: Context<'_>,
    #[description = "Loop mode"] mode: LoopMode,
) -> CommandResult {
    let guild_id = ctx.guild_id().ok_or("guild-only command used outside a guild")?;
    let current = ctx
        .data()
        .controller
        .set_loop(guild_id, mode)
        .await
        .unwrap_or_else(|| "Nothing".to_string());

    let message = match mode {
        LoopMode::Off => "Loop mode disabled".to_string(),
        LoopMode::On => format!("Now looping: {current} until turned off"),
        LoopMode::Single => format!("Will play {current} one more time"),
    };
    reply(ctx, &message).await
}

/// Disconnect the bot from the voice channel.
#[poise::command(slash_command, guild_only, category = "Music")]
pub async fn disconnect(ctx: Context<'_>) -> CommandResult {
    let guild_id = ctx.guild_id().ok_or("guild-only command used outside a guild")?;
    match ctx.data().controller.disconnect(guild_id).await {
        Ok(()) => reply(ctx, "Disconnected from voice channel!").await,
        Err(MusicError::NotConnected) => reply(ctx, "I'm not in a voice channel!").await,
        Err(e) => reply(ctx, &format!("Failed to disconnect: {e}")).await,
    }
}

/// Show the queue, add a song to it, or pick what plays next.
#[poise::command(slash_command, guild_only, category = "Music")]
pub async fn queue(
    ctx: Context<'_>,
    #[description = "Song name or URL to add"] query: Option<String>,
    #[description = "Queue position to play after the current song"] position: Option<usize>,
) -> CommandResult {
    let guild_id = ctx.guild_id().ok_or("guild-only command used outside a guild")?;
    ctx.defer().await?;
    let controller = ctx.data().controller.clone();
    controller.touch(guild_id, ctx.channel_id()).await;

    if let Some(position) = position {
        return match controller.defer_play(guild_id, position, ctx.channel_id()).await {
            Ok(track) => {
                reply(
                    ctx,
                    &format!("Next up: {} (will play after current song ends)", track.title),
                )
                .await
            }
            Err(MusicError::InvalidPosition { len, .. }) => {
                reply(ctx, &format!("Invalid position! Please choose between 1 and {len}")).await
            }
            Err(MusicError::EmptyQueue) => reply(ctx, "Queue is empty!").await,
            Err(e) => reply(ctx, &format!("An error occurred: {e}")).await,
        };
    }

    let Some(query) = query else {
        let Some(view) = controller.queue_view(guild_id).await else {
            return reply(ctx, "Queue is empty!").await;
        };
        let mut listing = String::new();
        for (i, (title, current)) in view.entries.iter().enumerate() {
            if *current {
                listing.push_str(&format!("▶️ {title}\n"));
            } else {
                listing.push_str(&format!("{}. {title}\n", i + 1));
            }
        }
        if let Some(next_up) = view.next_up {
            listing.push_str(&format!("\nNext up: {next_up}"));
        }
        let embed = CreateEmbed::new()
            .title("Current Queue")
            .description(listing)
            .color(ctx.data().embed_color);
        ctx.send(CreateReply::default().embed(embed)).await?;
        return Ok(());
    };

    if !ensure_connected(ctx).await? {
        return Ok(());
    }

    // Add without starting playback.
    match controller.enqueue(guild_id, &query, false).await {
        Ok(o) if o.is_playlist => {
            reply(ctx, &format!("Added playlist: {} tracks", o.added)).await
        }
        Ok(o) => reply(ctx, &format!("Added to queue: {}", o.first_title)).await,
        Err(e) => reply(ctx, &format!("An error occurred: {e}")).await,
    }
}

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum ClearScope {
    #[name = "now"]
    Now,
    #[name = "on-stop"]
    OnStop,
}

/// Clear the queue; the current song keeps playing.
#[poise::command(slash_command, guild_only, category = "Music")]
pub async fn clearqueue(
    ctx: Context<'_>,
    #[description = "Clear now, or toggle clearing automatically on stop"] scope: Option<ClearScope>,
) -> CommandResult {
    let guild_id = ctx.guild_id().ok_or("guild-only command used outside a guild")?;
    let controller = ctx.data().controller.clone();

    if matches!(scope, Some(ClearScope::OnStop)) {
        let enabled = controller.toggle_auto_clear(guild_id).await;
        return if enabled {
            reply(ctx, "Queue will now be cleared automatically on stop.").await
        } else {
            reply(ctx, "Automatic clear on stop disabled.").await
        };
    }

    match controller.clear_queue(guild_id).await {
        Ok(true) => reply(ctx, "Queue cleared! Kept current song playing.").await,
        Ok(false) => reply(ctx, "Queue cleared!").await,
        Err(MusicError::EmptyQueue) => reply(ctx, "Queue is already empty!").await,
        Err(e) => reply(ctx, &format!("An error occurred: {e}")).await,
    }
}

/// Shuffle the queue; the current song stays where it is.
#[poise::command(slash_command, guild_only, category = "Music")]
pub async fn shuffle(ctx: Context<'_>) -> CommandResult {
    let guild_id = ctx.guild_id().ok_or("guild-only command used outside a guild")?;
    match ctx.data().controller.shuffle(guild_id).await {
        Ok(()) => reply(ctx, "Queue shuffled!").await,
        Err(MusicError::EmptyQueue) => reply(ctx, "Queue is empty!").await,
        Err(e) => reply(ctx, &format!("An error occurred: {e}")).await,
    }
}

/// Set the bot status (Admin only).
#[poise::command(
    slash_command,
    guild_only,
    category = "Music",
    required_permissions = "ADMINISTRATOR"
)]
pub async fn setstatus(
    ctx: Context<'_>,
    #[description = "Status text"] status: String,
) -> CommandResult {
    ctx.serenity_context()
        .set_activity(Some(ActivityData::playing(&status)));
    reply(ctx, &format!("Status updated to: {status}")).await
}

/// Show all available commands.
#[poise::command(slash_command, category = "Music")]
pub async fn help(ctx: Context<'_>) -> CommandResult {
    let fields: Vec<(&str, &str, bool)> = vec![
        ("/help", "Shows this help message", false),
        (
            "/play",
            "Plays music from YouTube or the queue. Usage: /play [song name/URL] [position]",
            false,
        ),
        ("/pause", "Pauses the current song", false),
        ("/next", "Plays the next song", false),
        ("/previous", "Plays the previous song", false),
        ("/stop", "Stops the current song (queue preserved)", false),
        ("/clearqueue", "Clears all songs from queue except current", false),
        ("/repeat", "Repeats the queue. Usage: /repeat off/all/single", false),
        ("/loop", "Loops current song. Usage: /loop off/on/single", false),
        ("/disconnect", "Disconnects the bot from the channel", false),
        (
            "/queue",
            "Shows the queue or adds a song. Usage: /queue [song/URL] [position to play next]",
            false,
        ),
        ("/shuffle", "Shuffles songs in the queue", false),
        ("/setstatus", "Sets the bot status (Admin only)", false),
    ];

    let embed = CreateEmbed::new()
        .title("Music Bot Commands")
        .description("Here are all available commands:")
        .color(ctx.data().embed_color)
        .fields(fields);
    ctx.send(CreateReply::default().embed(embed)).await?;
    Ok(())
}
