//! The synthesis request model and its parameter validation.
//!
//! Optional scalars serialize with omit-if-absent semantics, so persisted
//! request snapshots survive future field additions.

use serde::{Deserialize, Serialize};

use crate::audio::AudioFormat;

/// Longest accepted input text, in characters.
pub const MAX_TEXT_LEN: usize = 3000;

/// Highest style id the API accepts.
pub const MAX_STYLE_ID: u32 = 31;

/// Sampling rates the Opus encoder supports.
pub const OPUS_SAMPLING_RATES: [u32; 5] = [8_000, 12_000, 16_000, 24_000, 48_000];

/// Longest leading/trailing silence, in seconds.
pub const MAX_SILENCE_SECONDS: f64 = 10.0;

/// Output channel layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Channels {
    Mono,
    Stereo,
}

/// A parameter that violates a documented range or exclusion rule.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("model uuid must not be empty")]
    EmptyModel,

    #[error("text must not be empty")]
    EmptyText,

    #[error("text has {0} characters, limit is {MAX_TEXT_LEN}")]
    TextTooLong(usize),

    #[error("style id and style name are mutually exclusive")]
    StyleConflict,

    #[error("style id {0} is outside 0..={MAX_STYLE_ID}")]
    StyleId(u32),

    #[error("speaking rate {0} is outside 0.5..=2.0")]
    SpeakingRate(f64),

    #[error("pitch {0} is outside -1.0..=1.0")]
    Pitch(f64),

    #[error("volume {0} is outside 0.0..=2.0")]
    Volume(f64),

    #[error("emotional intensity {0} is outside 0.0..=2.0")]
    EmotionalIntensity(f64),

    #[error("tempo dynamics {0} is outside 0.0..=2.0")]
    TempoDynamics(f64),

    #[error("sampling rate must be positive")]
    SamplingRate,

    #[error("bitrate must be positive")]
    Bitrate,

    #[error("opus output requires a sampling rate in {OPUS_SAMPLING_RATES:?}, got {0}")]
    OpusSamplingRate(u32),

    #[error("silence of {0}s is outside 0.0..={MAX_SILENCE_SECONDS}")]
    Silence(f64),
}

/// One synthesis request, as posted to the API and as snapshotted into
/// history records. Immutable once submitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    /// The voice model to synthesize with.
    pub model_uuid: String,

    /// The text (or SSML document) to speak.
    pub text: String,

    /// Style selected by numeric id. Mutually exclusive with `style_name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_id: Option<u32>,

    /// Style selected by name. Mutually exclusive with `style_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_name: Option<String>,

    /// Whether `text` is SSML.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_ssml: Option<bool>,

    /// Audio container to produce.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<AudioFormat>,

    /// Output sampling rate in Hz.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_sampling_rate: Option<u32>,

    /// Output channel layout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_audio_channels: Option<Channels>,

    /// Output bitrate in kbps, for lossy formats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_bitrate: Option<u32>,

    /// Speaking rate multiplier, `0.5..=2.0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaking_rate: Option<f64>,

    /// Pitch shift, `-1.0..=1.0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f64>,

    /// Synthesis-side gain, `0.0..=2.0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,

    /// Emotional intensity, `0.0..=2.0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotional_intensity: Option<f64>,

    /// Tempo dynamics, `0.0..=2.0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tempo_dynamics: Option<f64>,

    /// Silence prepended to the audio, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leading_silence_seconds: Option<f64>,

    /// Silence appended to the audio, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trailing_silence_seconds: Option<f64>,

    /// Silence inserted at line breaks, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_break_silence_seconds: Option<f64>,
}

impl SynthesisRequest {
    /// A minimal request for `text` on `model_uuid`, everything else at the
    /// API's defaults.
    pub fn new(model_uuid: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            model_uuid: model_uuid.into(),
            text: text.into(),
            ..Self::default()
        }
    }

    /// The output format, falling back to the API default.
    pub fn format(&self) -> AudioFormat {
        self.output_format.unwrap_or_default()
    }

    /// Checks every documented range and exclusion rule.
    pub fn validate(&self) -> Result<(), Error> {
        if self.model_uuid.is_empty() {
            return Err(Error::EmptyModel);
        }

        if self.text.is_empty() {
            return Err(Error::EmptyText);
        }

        let chars = self.text.chars().count();
        if chars > MAX_TEXT_LEN {
            return Err(Error::TextTooLong(chars));
        }

        if self.style_id.is_some() && self.style_name.is_some() {
            return Err(Error::StyleConflict);
        }

        if let Some(style_id) = self.style_id {
            if style_id > MAX_STYLE_ID {
                return Err(Error::StyleId(style_id));
            }
        }

        range(self.speaking_rate, 0.5, 2.0, Error::SpeakingRate)?;
        range(self.pitch, -1.0, 1.0, Error::Pitch)?;
        range(self.volume, 0.0, 2.0, Error::Volume)?;
        range(self.emotional_intensity, 0.0, 2.0, Error::EmotionalIntensity)?;
        range(self.tempo_dynamics, 0.0, 2.0, Error::TempoDynamics)?;

        if self.output_sampling_rate == Some(0) {
            return Err(Error::SamplingRate);
        }

        if self.output_bitrate == Some(0) {
            return Err(Error::Bitrate);
        }

        if self.output_format == Some(AudioFormat::Opus) {
            if let Some(rate) = self.output_sampling_rate {
                if !OPUS_SAMPLING_RATES.contains(&rate) {
                    return Err(Error::OpusSamplingRate(rate));
                }
            }
        }

        range(
            self.leading_silence_seconds,
            0.0,
            MAX_SILENCE_SECONDS,
            Error::Silence,
        )?;
        range(
            self.trailing_silence_seconds,
            0.0,
            MAX_SILENCE_SECONDS,
            Error::Silence,
        )?;
        range(
            self.line_break_silence_seconds,
            0.0,
            MAX_SILENCE_SECONDS,
            Error::Silence,
        )?;

        Ok(())
    }
}

/// Rejects a present value outside `min..=max`.
fn range(
    value: Option<f64>,
    min: f64,
    max: f64,
    error: impl FnOnce(f64) -> Error,
) -> Result<(), Error> {
    match value {
        Some(value) if !(min..=max).contains(&value) => Err(error(value)),
        _ => Ok(()),
    }
}
