//! Application-wide error type.
//!
//! This module exposes a single `Error` enum that aggregates the error
//! kinds of the individual subsystems (validation, synthesis, audio,
//! history, playback, configuration). Higher-level functions generally
//! return `crate::error::Result<T>` to keep error handling consistent.

use crate::{audio, config, history, playback, synth};

/// Result alias using the crate-wide `Error` type.
pub type Result<T> = std::result::Result<T, Error>;

/// Central application error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("configuration failure")]
    Config(#[from] config::Error),

    #[error("invalid request")]
    Validation(#[from] synth::request::Error),

    #[error("synthesis failed")]
    Synthesis(#[from] synth::Error),

    #[error("audio playback failed")]
    Audio(#[from] audio::Error),

    #[error("history failure")]
    History(#[from] history::Error),

    #[error("playback failure")]
    Playback(#[from] playback::Error),

    #[error("io error")]
    Io(#[from] std::io::Error),
}
