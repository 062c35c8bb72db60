//! Replaying persisted records through the playback coordinator.

use bytes::Bytes;
use tokio::fs;
use tracing::debug;

use crate::playback::{Coordinator, Error, PlaybackMode, PlaybackRequest};

use super::Store;

/// Options for replaying one record.
#[derive(Debug, Clone)]
pub struct Replay {
    /// Id of the record to replay.
    pub id: u64,

    /// Playback discipline; defaults to queueing, so a replay never
    /// interrupts ongoing playback.
    pub mode: Option<PlaybackMode>,

    /// Whether to block until playback completes.
    pub wait_for_end: bool,

    /// Per-playback volume override, `0.0..=1.0`.
    pub volume: Option<f64>,
}

impl Replay {
    /// Replay options for `id` with everything else at its default.
    pub const fn new(id: u64) -> Self {
        Self {
            id,
            mode: None,
            wait_for_end: false,
            volume: None,
        }
    }
}

/// Replays one record's audio through the coordinator.
///
/// The file is read fully into memory first (stability over memory
/// efficiency), its format is taken from the record's tag, and no new
/// record is created.
pub async fn replay(coordinator: &Coordinator, store: &Store, replay: Replay) -> Result<(), Error> {
    let record = store.get(replay.id).await?;

    if fs::metadata(&record.file_path).await.is_err() {
        return Err(crate::history::Error::FileMissing(record.file_path).into());
    }

    let bytes = Bytes::from(
        fs::read(&record.file_path)
            .await
            .map_err(crate::history::Error::Io)?,
    );

    debug!(id = record.id, bytes = bytes.len(), "replaying history record");

    let request = PlaybackRequest {
        tts: record.request,
        mode: replay.mode,
        wait_for_end: replay.wait_for_end,
        volume: replay.volume,
    };

    coordinator
        .play_buffer(bytes, record.file_format, request)
        .await
}
