//! Local audio playback through external OS players.
//!
//! The sink consumes an ordered byte stream of a declared format and renders
//! it with whatever player the platform offers (`afplay`, `ffplay`, `play`,
//! `aplay`, `paplay`, or PowerShell's `MediaPlayer`). One sink is one
//! playback channel; the coordinator mints extra sinks for parallel
//! playback.

use std::time::Duration;

use serde::Serialize;

pub mod command;
pub mod format;
pub mod sink;

pub use format::AudioFormat;
pub use sink::{AudioSink, ProcessSink};

/// Errors raised while spawning or feeding an external player.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no compatible audio player found (tried: {0})")]
    Spawn(String),

    #[error("audio playback is not supported on {0}")]
    Platform(String),

    #[error("io failure")]
    Io(#[from] std::io::Error),
}

/// Lifecycle state of a playback channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    Idle,
    Playing,
    Paused,
    Stopped,
}

/// A point-in-time snapshot of a sink, derived on every query.
#[derive(Debug, Clone, Serialize)]
pub struct PlaybackInfo {
    /// Current lifecycle state.
    pub status: PlaybackStatus,

    /// Number of enqueued, not-yet-dispatched items, as pushed by the
    /// coordinator.
    pub queue_len: usize,

    /// Text of the item currently being rendered, if any.
    pub now_playing: Option<String>,

    /// Volume applied to the next `play`, in `0.0..=1.0`.
    pub volume: f64,

    /// Estimated total duration, when a file size was available to
    /// estimate from.
    pub duration: Option<Duration>,

    /// Estimated position, capped at the estimated duration.
    pub position: Option<Duration>,
}
