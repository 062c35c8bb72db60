//! Audio output formats and their playback characteristics.

use std::{fmt, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

/// An audio container the synthesis API can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    Flac,
    Mp3,
    Aac,
    Opus,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::Mp3
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl AudioFormat {
    /// The file extension used for history artifacts, without the dot.
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Flac => "flac",
            Self::Mp3 => "mp3",
            Self::Aac => "aac",
            Self::Opus => "opus",
        }
    }

    /// Parses an extension (without the dot, any case) back into a format.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "wav" => Some(Self::Wav),
            "flac" => Some(Self::Flac),
            "mp3" => Some(Self::Mp3),
            "aac" | "m4a" => Some(Self::Aac),
            "opus" | "ogg" => Some(Self::Opus),
            _ => None,
        }
    }

    /// Determines the format from a file path's extension.
    ///
    /// Uses [`Path::extension`], so five-character extensions such as
    /// `.flac` and `.opus` classify correctly.
    pub fn from_file_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// Whether a file in this format can be handed to a player while it is
    /// still being appended to. Container formats with a fixed up-front
    /// header (WAV, FLAC) truncate when read early.
    pub const fn tail_safe(self) -> bool {
        matches!(self, Self::Mp3 | Self::Aac | Self::Opus)
    }

    /// Whether this is an uncompressed PCM container.
    pub const fn is_pcm(self) -> bool {
        matches!(self, Self::Wav)
    }

    /// Approximate data rate in bytes per second, used only to estimate a
    /// duration from a file size for status reporting.
    pub const fn bytes_per_second(self) -> u64 {
        match self {
            Self::Wav => 176_400,
            Self::Flac => 88_000,
            Self::Mp3 | Self::Aac => 16_000,
            Self::Opus => 8_000,
        }
    }

    /// Estimates the playback duration of `size` bytes of this format.
    pub fn estimate_duration(self, size: u64) -> Duration {
        Duration::from_secs_f64(size as f64 / self.bytes_per_second() as f64)
    }
}
