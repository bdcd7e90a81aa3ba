use thiserror::Error;

/// Boxed-error result used by the command layer and bootstrap code.
pub type MusicResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Everything that can go wrong inside the playback machinery.
///
/// `Resolution` and `PlayerStart` are recovered by the controller's
/// skip-forward logic; the validation variants are surfaced to the user by
/// the command layer and never reach the controller. None of these are
/// fatal to the process.
#[derive(Debug, Error)]
pub enum MusicError {
    #[error("could not resolve track: {0}")]
    Resolution(String),

    #[error("player refused to start: {0}")]
    PlayerStart(String),

    #[error("invalid position {given}, queue has {len} tracks")]
    InvalidPosition { given: usize, len: usize },

    #[error("queue is empty")]
    EmptyQueue,

    #[error("not connected to a voice channel")]
    NotConnected,

    #[error("nothing is playing")]
    NothingPlaying,

    #[error("no previous songs in queue")]
    NoPrevious,

    #[error("no more songs in queue")]
    NoNext,

    #[error("failed to join voice channel: {0}")]
    Connection(String),
}
