//! The persisted shape of one synthesis.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{audio::AudioFormat, synth::SynthesisRequest};

/// One persisted synthesis: the request snapshot plus where its rendered
/// audio lives. Addressable by a monotonic integer id that is never
/// reused, even after deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Monotonic id, `>= 1` once assigned. `0` means "assign on save".
    pub id: u64,

    /// Opaque internal identifier, filled on save when empty.
    #[serde(default)]
    pub internal_uuid: String,

    /// Full snapshot of the request that produced the audio.
    pub request: SynthesisRequest,

    /// Absolute path of the audio artifact.
    pub file_path: PathBuf,

    /// Container format of the artifact.
    pub file_format: AudioFormat,

    /// Size of the artifact in bytes; always `> 0` in the index.
    pub file_size_bytes: u64,

    /// When the synthesis completed.
    pub created_at: DateTime<Utc>,

    /// Denormalized from the request, for listing without deserializing
    /// the whole snapshot.
    pub text: String,

    /// Denormalized from the request.
    pub model_uuid: String,

    /// Credits the synthesis consumed, when the API reported them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credits: Option<f64>,
}

impl HistoryRecord {
    /// Builds an unsaved record (id `0`) for a finished synthesis.
    pub fn from_request(
        request: SynthesisRequest,
        file_path: PathBuf,
        file_size_bytes: u64,
        credits: Option<f64>,
    ) -> Self {
        let file_format = request.format();
        let text = request.text.clone();
        let model_uuid = request.model_uuid.clone();

        Self {
            id: 0,
            internal_uuid: String::new(),
            request,
            file_path,
            file_format,
            file_size_bytes,
            created_at: Utc::now(),
            text,
            model_uuid,
            credits,
        }
    }
}
