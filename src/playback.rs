//! Playback arbitration: the three disciplines and the pipeline that
//! couples synthesis, the tee, and the audio sink.

use serde::{Deserialize, Serialize};

use crate::{audio, history, synth, tee};

pub mod coordinator;

pub use coordinator::{Coordinator, Settings, SinkFactory};

/// The three playback disciplines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackMode {
    /// Pre-empt: stop whatever is playing, clear the queue, play now.
    Immediate,

    /// Serialize: append to the FIFO queue behind ongoing playback.
    Queue,

    /// Parallel: play on an independent sink, untracked by the queue.
    NoQueue,
}

/// One playback request, consumed exactly once by the coordinator.
#[derive(Debug, Clone)]
pub struct PlaybackRequest {
    /// The synthesis to run and render.
    pub tts: synth::SynthesisRequest,

    /// Discipline; resolved against the configured default when unset.
    pub mode: Option<PlaybackMode>,

    /// Whether the call blocks until playback completes.
    pub wait_for_end: bool,

    /// Per-playback volume override, `0.0..=1.0`.
    pub volume: Option<f64>,
}

impl PlaybackRequest {
    /// An asynchronous request for `tts` with no overrides.
    pub const fn new(tts: synth::SynthesisRequest) -> Self {
        Self {
            tts,
            mode: None,
            wait_for_end: false,
            volume: None,
        }
    }
}

/// Errors surfaced by the coordinator.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid request")]
    Validation(#[from] synth::request::Error),

    #[error("playback queue is full")]
    QueueFull,

    #[error("playback was cancelled")]
    Cancelled,

    #[error("audio playback failed")]
    Audio(#[from] audio::Error),

    #[error("synthesis failed")]
    Synthesis(#[from] synth::Error),

    #[error("history access failed")]
    History(#[from] history::Error),

    #[error("io failure")]
    Io(#[from] std::io::Error),

    #[error("playback task failed")]
    Join(#[from] tokio::task::JoinError),
}

impl From<tee::Error> for Error {
    fn from(error: tee::Error) -> Self {
        match error {
            tee::Error::Synthesis(error) => Self::Synthesis(error),
            tee::Error::Io(error) => Self::Io(error),
            tee::Error::Cancelled => Self::Cancelled,
        }
    }
}
