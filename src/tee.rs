//! Stream duplication: one chunk source, two downstream sinks.
//!
//! Every chunk is written fully to the audio pipe and best-effort to the
//! history file; a one-shot ready signal fires after the first chunk has
//! been handled. Neither side aborts the other: a dead history file is
//! dropped and playback continues, and a dead audio pipe (a pre-empted
//! player) drops the audio side while the history file keeps filling, so
//! "synthesize once, persist" holds even when playback is cut short.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::{
    fs::File,
    io::{AsyncWrite, AsyncWriteExt},
    sync::oneshot,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::synth;

/// Ways a tee run can end early.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("synthesis stream failed")]
    Synthesis(#[from] synth::Error),

    #[error("audio pipe failed")]
    Io(#[from] std::io::Error),

    #[error("playback was cancelled")]
    Cancelled,
}

/// Duplicates `chunks` into `audio` and (optionally) `history`.
///
/// Holds at most one chunk beyond whatever blocking on `audio` imposes.
/// Returns the total number of bytes drained from the source.
pub async fn tee<S, W>(
    mut chunks: S,
    audio: W,
    mut history: Option<File>,
    ready: oneshot::Sender<()>,
    cancel: &CancellationToken,
) -> Result<u64, Error>
where
    S: Stream<Item = Result<Bytes, synth::Error>> + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut audio = Some(audio);
    let mut ready = Some(ready);
    let mut total = 0u64;

    loop {
        let next = tokio::select! {
            next = chunks.next() => next,
            () = cancel.cancelled() => {
                close(audio.as_mut(), history.as_mut()).await;
                return Err(Error::Cancelled);
            }
        };

        let Some(next) = next else { break };

        let chunk = match next {
            Ok(chunk) => chunk,
            Err(error) => {
                close(audio.as_mut(), history.as_mut()).await;
                return Err(error.into());
            }
        };

        let mut cancelled = false;
        let mut audio_closed = false;
        if let Some(pipe) = audio.as_mut() {
            let write = tokio::select! {
                write = write_chunk(pipe, &chunk) => Some(write),
                () = cancel.cancelled() => None,
            };

            match write {
                None => cancelled = true,
                Some(Err(error)) => {
                    if history.is_none() {
                        // Nothing left downstream; no point draining the
                        // source.
                        return Err(error.into());
                    }
                    debug!(%error, "audio pipe closed, continuing history persistence");
                    audio_closed = true;
                }
                Some(Ok(())) => {}
            }
        }

        if cancelled {
            close(audio.as_mut(), history.as_mut()).await;
            return Err(Error::Cancelled);
        }
        if audio_closed {
            audio = None;
        }

        let mut history_closed = false;
        if let Some(file) = history.as_mut() {
            if let Err(error) = file.write_all(&chunk).await {
                if audio.is_none() {
                    return Err(error.into());
                }
                warn!(%error, "history write failed, continuing playback without it");
                history_closed = true;
            }
        }
        if history_closed {
            history = None;
        }

        total += chunk.len() as u64;

        if let Some(ready) = ready.take() {
            let _ = ready.send(());
        }
    }

    if let Some(pipe) = audio.as_mut() {
        let _ = pipe.shutdown().await;
    }

    if let Some(file) = history.as_mut() {
        if let Err(error) = file.flush().await {
            warn!(%error, "flushing the history file failed");
        }
    }

    Ok(total)
}

/// Writes and flushes one chunk to the audio pipe.
async fn write_chunk<W: AsyncWrite + Unpin>(pipe: &mut W, chunk: &Bytes) -> std::io::Result<()> {
    pipe.write_all(chunk).await?;
    pipe.flush().await
}

/// Best-effort teardown of both sinks on an abnormal exit.
async fn close<W: AsyncWrite + Unpin>(audio: Option<&mut W>, history: Option<&mut File>) {
    if let Some(pipe) = audio {
        let _ = pipe.shutdown().await;
    }

    if let Some(file) = history {
        let _ = file.flush().await;
    }
}
