//! The configuration surface consumed by the core.
//!
//! The struct deserializes permissively (unknown keys are ignored) so an
//! embedding environment can hand over a superset. The history path
//! accepts `~` and `$VAR`/`${VAR}` references, expanded by hand, and must
//! be absolute after expansion.

use std::{env, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::{
    audio::AudioFormat,
    playback::PlaybackMode,
    synth::{client::DEFAULT_BASE_URL, request::Channels, SynthesisRequest},
};

/// Errors while resolving configured paths.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("couldn't find home directory")]
    Home,

    #[error("couldn't find data directory")]
    DataDir,

    #[error("history path must be absolute after expansion: {0}")]
    Relative(String),
}

/// Everything the core reads from configuration. Owned by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bearer token for the synthesis API.
    pub api_key: Option<String>,

    /// Synthesis API endpoint base.
    pub api_base_url: String,

    /// Model used when a request names none. There is deliberately no
    /// built-in fallback model.
    pub default_model_uuid: Option<String>,

    /// Coordinator discipline when a request doesn't set one.
    pub default_playback_mode: Option<PlaybackMode>,

    /// When false, no history files or index entries are written.
    pub history_enabled: bool,

    /// Retention bound applied after each persisted synthesis.
    pub history_max_count: Option<usize>,

    /// History base directory; `~` and env vars are expanded.
    pub history_store_path: Option<String>,

    /// Synthesis-side gain default, `0.0..=2.0`.
    pub default_volume: Option<f64>,

    /// Speaking rate default, `0.5..=2.0`.
    pub default_rate: Option<f64>,

    /// Pitch default, `-1.0..=1.0`.
    pub default_pitch: Option<f64>,

    /// Output container default.
    pub default_format: Option<AudioFormat>,

    /// Output channel layout default.
    pub default_channels: Option<Channels>,

    /// Whether text is treated as SSML by default.
    pub default_ssml: Option<bool>,

    /// Emotional intensity default, `0.0..=2.0`.
    pub default_emotional_intensity: Option<f64>,

    /// Tempo dynamics default, `0.0..=2.0`.
    pub default_tempo_dynamics: Option<f64>,

    /// Leading silence default, seconds.
    pub default_leading_silence: Option<f64>,

    /// Trailing silence default, seconds.
    pub default_trailing_silence: Option<f64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base_url: DEFAULT_BASE_URL.to_owned(),
            default_model_uuid: None,
            default_playback_mode: None,
            history_enabled: true,
            history_max_count: None,
            history_store_path: None,
            default_volume: None,
            default_rate: None,
            default_pitch: None,
            default_format: None,
            default_channels: None,
            default_ssml: None,
            default_emotional_intensity: None,
            default_tempo_dynamics: None,
            default_leading_silence: None,
            default_trailing_silence: None,
        }
    }
}

impl Config {
    /// Fills request fields the caller left unset. Runs before
    /// validation, so configured defaults are validated like explicit
    /// values.
    pub fn apply_defaults(&self, request: &mut SynthesisRequest) {
        if request.model_uuid.is_empty() {
            if let Some(model) = &self.default_model_uuid {
                request.model_uuid.clone_from(model);
            }
        }

        request.volume = request.volume.or(self.default_volume);
        request.speaking_rate = request.speaking_rate.or(self.default_rate);
        request.pitch = request.pitch.or(self.default_pitch);
        request.output_format = request.output_format.or(self.default_format);
        request.output_audio_channels = request.output_audio_channels.or(self.default_channels);
        request.use_ssml = request.use_ssml.or(self.default_ssml);
        request.emotional_intensity = request
            .emotional_intensity
            .or(self.default_emotional_intensity);
        request.tempo_dynamics = request.tempo_dynamics.or(self.default_tempo_dynamics);
        request.leading_silence_seconds = request
            .leading_silence_seconds
            .or(self.default_leading_silence);
        request.trailing_silence_seconds = request
            .trailing_silence_seconds
            .or(self.default_trailing_silence);
    }

    /// Resolves the history base directory.
    ///
    /// A configured path is expanded and must come out absolute; without
    /// one, the platform data directory is used.
    pub fn history_root(&self) -> Result<PathBuf, Error> {
        match &self.history_store_path {
            Some(raw) => {
                let expanded = expand(raw)?;
                let path = PathBuf::from(&expanded);

                if path.is_absolute() {
                    Ok(path)
                } else {
                    Err(Error::Relative(expanded))
                }
            }
            None => Ok(data_dir()?.join("history")),
        }
    }
}

/// Gets the application's data directory.
pub fn data_dir() -> Result<PathBuf, Error> {
    dirs::data_dir()
        .map(|dir| dir.join("aivis"))
        .ok_or(Error::DataDir)
}

/// Expands a leading `~` and any `$VAR`/`${VAR}` references.
fn expand(path: &str) -> Result<String, Error> {
    let mut path = path.to_owned();

    if path.starts_with('~') {
        let home = dirs::home_dir().ok_or(Error::Home)?;
        path = path.replacen('~', &home.to_string_lossy(), 1);
    }

    Ok(expand_env(&path))
}

/// Substitutes environment variables; unset ones are left as-is.
fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(idx) = rest.find('$') {
        out.push_str(&rest[..idx]);
        rest = &rest[idx + 1..];

        let (name, tail) = if let Some(braced) = rest.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], &braced[end + 1..]),
                None => {
                    out.push('$');
                    continue;
                }
            }
        } else {
            let end = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(rest.len());
            (&rest[..end], &rest[end..])
        };

        if name.is_empty() {
            out.push('$');
            continue;
        }

        match env::var(name) {
            Ok(value) => out.push_str(&value),
            Err(_) => {
                out.push('$');
                out.push_str(name);
            }
        }

        rest = tail;
    }

    out.push_str(rest);
    out
}
