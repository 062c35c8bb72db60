//! The audio sink: one playback channel over an external player process.
//!
//! Three strategies, tried in order per [`AudioSink::play`] call:
//!
//! 1. stdin streaming — pipe the byte stream straight into a player that
//!    reads from standard input;
//! 2. progressive tailing — for formats safe to read while growing, copy
//!    into a temp file and start the player once 32 KiB (or EOF) landed;
//! 3. deferred — buffer the whole stream to a temp file first.
//!
//! Each playback is watched by a supervisor task. `stop` is a handshake:
//! it cancels the supervisor and waits for the idle notification rather
//! than sleeping a fixed interval.

use std::{
    env,
    process::Stdio,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::{Duration, Instant},
};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use tempfile::TempPath;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    process::Child,
    sync::watch,
    time,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{command, AudioFormat, Error, PlaybackInfo, PlaybackStatus};

/// Environment variable that keeps temp audio files around after playback,
/// for debugging or resuming with external tools.
pub const KEEP_TEMP_ENV: &str = "AIVIS_KEEP_TEMP_FILES";

/// Bytes that must land in a tailed file before the player is started.
const TAIL_THRESHOLD: u64 = 32 * 1024;

/// Upper bound on how long `stop` waits for the teardown handshake.
const STOP_GRACE: Duration = Duration::from_millis(100);

/// The byte source handed to a sink.
pub type AudioReader = Box<dyn AsyncRead + Send + Unpin>;

/// A playback channel with lifecycle control.
///
/// `pause`/`resume` only mark internal state: external players are never
/// actually suspended, and position keeps advancing.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Starts rendering `reader` as `format`.
    ///
    /// Returns once the external player is running; completion is
    /// asynchronous and observable through [`AudioSink::status`] or
    /// awaitable through [`AudioSink::wait_until_idle`].
    async fn play(&self, reader: AudioReader, format: AudioFormat) -> Result<(), Error>;

    /// Terminates playback, confirming teardown before returning.
    /// Idempotent.
    async fn stop(&self);

    /// Marks playback paused. Best-effort only.
    fn pause(&self);

    /// Clears a previous [`AudioSink::pause`]. Best-effort only.
    fn resume(&self);

    /// Sets the volume applied to subsequent `play` calls, clamped to
    /// `0.0..=1.0`. Does not affect a stream already underway.
    fn set_volume(&self, volume: f64);

    /// Derives a snapshot of the channel.
    fn status(&self) -> PlaybackInfo;

    /// Whether a playback (possibly nominally paused) is underway.
    fn is_playing(&self) -> bool;

    /// Resolves once no playback is underway.
    async fn wait_until_idle(&self);

    /// Status text pushed by the coordinator.
    fn set_now_playing(&self, text: Option<String>);

    /// Queue depth pushed by the coordinator.
    fn set_queue_len(&self, len: usize);

    /// Equivalent to [`AudioSink::stop`].
    async fn close(&self) {
        self.stop().await;
    }
}

/// Mutable channel state, all under one lock.
struct State {
    /// Lifecycle state reported by `status`.
    status: PlaybackStatus,

    /// Volume applied to the next `play`.
    volume: f64,

    /// Wall-clock start of the current playback.
    started_at: Option<Instant>,

    /// Duration estimate, once a file size is known.
    duration: Option<Duration>,

    /// Cancels the current supervisor, if one is running.
    cancel: Option<CancellationToken>,
}

/// Shared internals, cloned into supervisor tasks.
struct Inner {
    /// All mutable state; never held across an await.
    state: Mutex<State>,

    /// `true` from child spawn until the supervisor confirms teardown.
    busy: watch::Sender<bool>,

    /// Text of the current item, pushed by the coordinator.
    now_playing: ArcSwapOption<String>,

    /// Queue depth, pushed by the coordinator.
    queue_len: AtomicUsize,

    /// Whether temp files are retained after playback.
    keep_temp: bool,
}

/// The production [`AudioSink`], driving external player processes.
pub struct ProcessSink {
    /// Shared with per-playback supervisor tasks.
    inner: Arc<Inner>,
}

impl Default for ProcessSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSink {
    /// Creates an idle sink. Reads [`KEEP_TEMP_ENV`] once, at construction.
    pub fn new() -> Self {
        let keep_temp = env::var(KEEP_TEMP_ENV)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    status: PlaybackStatus::Idle,
                    volume: 1.0,
                    started_at: None,
                    duration: None,
                    cancel: None,
                }),
                busy: watch::Sender::new(false),
                now_playing: ArcSwapOption::empty(),
                queue_len: AtomicUsize::new(0),
                keep_temp,
            }),
        }
    }
}

impl Inner {
    /// Locks the state, recovering from a poisoned lock.
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks the channel busy and records the supervisor's cancel token.
    fn begin(&self, cancel: CancellationToken) {
        let mut state = self.state();
        state.status = PlaybackStatus::Playing;
        state.started_at = Some(Instant::now());
        state.duration = None;
        state.cancel = Some(cancel);
        drop(state);

        self.busy.send_replace(true);
    }

    /// Marks the channel idle again. Called exactly once per playback, by
    /// its supervisor (or by `play` itself when startup fails).
    fn finish(&self, status: PlaybackStatus) {
        let mut state = self.state();
        state.status = status;
        state.started_at = None;
        state.duration = None;
        state.cancel = None;
        drop(state);

        self.busy.send_replace(false);
    }

    /// Updates the duration estimate once a byte count is known.
    fn set_estimate(&self, format: AudioFormat, bytes: u64) {
        self.state().duration = Some(format.estimate_duration(bytes));
    }

    /// Disposes of a temp file according to the retention policy.
    fn dispose(&self, path: TempPath) {
        if self.keep_temp {
            match path.keep() {
                Ok(kept) => debug!(path = %kept.display(), "retained temp audio file"),
                Err(error) => warn!(%error, "failed to retain temp audio file"),
            }
        }
        // Dropping the TempPath otherwise removes the file.
    }
}

#[async_trait]
impl AudioSink for ProcessSink {
    async fn play(&self, reader: AudioReader, format: AudioFormat) -> Result<(), Error> {
        // Never overlap children on one channel: stop whatever runs and
        // wait for its supervisor to confirm teardown.
        self.stop().await;
        self.wait_until_idle().await;

        let volume = self.inner.state().volume;
        let cancel = CancellationToken::new();
        self.inner.begin(cancel.clone());

        let result = if let Some(invocation) = command::streaming(volume) {
            play_stdin(&self.inner, &invocation, reader, cancel).await
        } else if format.tail_safe() && command::tail_supported() {
            play_tailed(&self.inner, reader, format, volume, cancel).await
        } else {
            play_deferred(&self.inner, reader, format, volume, cancel).await
        };

        if let Err(ref error) = result {
            warn!(%error, "failed to start playback");
            self.inner.finish(PlaybackStatus::Stopped);
        }

        result
    }

    async fn stop(&self) {
        let cancel = self.inner.state().cancel.take();

        if let Some(cancel) = cancel {
            cancel.cancel();
            // Handshake: wait for the supervisor to confirm the child is
            // gone, so a follow-up `play` cannot overlap it.
            let _ = time::timeout(STOP_GRACE, self.wait_until_idle()).await;
        }

        let mut state = self.inner.state();
        if matches!(state.status, PlaybackStatus::Playing | PlaybackStatus::Paused) {
            state.status = PlaybackStatus::Stopped;
        }
    }

    fn pause(&self) {
        let mut state = self.inner.state();
        if state.status == PlaybackStatus::Playing {
            state.status = PlaybackStatus::Paused;
        }
    }

    fn resume(&self) {
        let mut state = self.inner.state();
        if state.status == PlaybackStatus::Paused {
            state.status = PlaybackStatus::Playing;
        }
    }

    fn set_volume(&self, volume: f64) {
        self.inner.state().volume = volume.clamp(0.0, 1.0);
    }

    fn status(&self) -> PlaybackInfo {
        let state = self.inner.state();

        let position = state.started_at.map(|started| {
            let elapsed = started.elapsed();
            state
                .duration
                .map_or(elapsed, |duration| elapsed.min(duration))
        });

        PlaybackInfo {
            status: state.status,
            queue_len: self.inner.queue_len.load(Ordering::Relaxed),
            now_playing: self.inner.now_playing.load().as_deref().map(String::clone),
            volume: state.volume,
            duration: state.duration,
            position,
        }
    }

    fn is_playing(&self) -> bool {
        *self.inner.busy.borrow()
    }

    async fn wait_until_idle(&self) {
        let mut busy = self.inner.busy.subscribe();

        while *busy.borrow_and_update() {
            if busy.changed().await.is_err() {
                return;
            }
        }
    }

    fn set_now_playing(&self, text: Option<String>) {
        self.inner.now_playing.store(text.map(Arc::new));
    }

    fn set_queue_len(&self, len: usize) {
        self.inner.queue_len.store(len, Ordering::Relaxed);
    }
}

/// Kills `child` and reaps it.
async fn kill_child(child: &mut Child) -> PlaybackStatus {
    let _ = child.start_kill();
    let _ = child.wait().await;
    PlaybackStatus::Stopped
}

/// Waits for `child` to exit on its own, killing it on cancellation.
async fn wait_child(child: &mut Child, cancel: &CancellationToken) -> PlaybackStatus {
    let finished = tokio::select! {
        _ = child.wait() => true,
        () = cancel.cancelled() => false,
    };

    if finished {
        PlaybackStatus::Idle
    } else {
        kill_child(child).await
    }
}

/// Strategy 1: pipe the stream into the player's stdin.
async fn play_stdin(
    inner: &Arc<Inner>,
    invocation: &command::Invocation,
    reader: AudioReader,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let mut child = invocation
        .command()
        .stdin(Stdio::piped())
        // The child's stdout must stay off ours: a server speaking a
        // protocol over stdio cannot share it with a player.
        .stdout(Stdio::null())
        .spawn()?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| Error::Io(std::io::Error::other("child stdin unavailable")))?;

    debug!(program = %invocation.program.display(), "streaming to player stdin");

    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        let status = supervise_stdin(child, stdin, reader, &cancel).await;
        inner.finish(status);
    });

    Ok(())
}

/// Feeds the child's stdin and waits for it, reporting the terminal status.
async fn supervise_stdin(
    mut child: Child,
    mut stdin: tokio::process::ChildStdin,
    mut reader: AudioReader,
    cancel: &CancellationToken,
) -> PlaybackStatus {
    let mut buffer = vec![0u8; 16 * 1024];
    let mut fed = true;

    loop {
        let read = tokio::select! {
            read = reader.read(&mut buffer) => read,
            () = cancel.cancelled() => return kill_child(&mut child).await,
        };

        let count = match read {
            Ok(0) => break,
            Ok(count) => count,
            Err(error) => {
                warn!(%error, "reading the audio stream failed");
                fed = false;
                break;
            }
        };

        let write = tokio::select! {
            write = stdin.write_all(&buffer[..count]) => write,
            () = cancel.cancelled() => return kill_child(&mut child).await,
        };

        if let Err(error) = write {
            // The player went away mid-stream.
            warn!(%error, "writing to player stdin failed");
            fed = false;
            break;
        }
    }

    let _ = stdin.shutdown().await;
    drop(stdin);

    let status = wait_child(&mut child, cancel).await;
    if fed || status == PlaybackStatus::Stopped {
        status
    } else {
        PlaybackStatus::Stopped
    }
}

/// Strategy 2: copy into a growing temp file, start the player early.
async fn play_tailed(
    inner: &Arc<Inner>,
    reader: AudioReader,
    format: AudioFormat,
    volume: f64,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let path = temp_audio_path(format)?;

    let file = tokio::fs::File::create(&path).await?;
    let (progress_tx, mut progress_rx) = watch::channel((0u64, false));
    let mut writer = tokio::spawn(copy_to_file(reader, file, progress_tx));

    // Give the player enough of a head start that it won't hit EOF on a
    // nearly-empty file.
    let written = loop {
        let (written, done) = *progress_rx.borrow_and_update();
        if written >= TAIL_THRESHOLD || done {
            break written;
        }
        if progress_rx.changed().await.is_err() {
            break 0;
        }
    };

    let invocation = command::file(&path, format, volume)?;
    let mut child = invocation.command().stdout(Stdio::null()).spawn()?;

    inner.set_estimate(format, written.max(1));
    debug!(program = %invocation.program.display(), bytes = written, "tailing temp file");

    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        let abort_writer = writer.abort_handle();

        let status = tokio::select! {
            copied = &mut writer => {
                match copied {
                    Ok(Ok(total)) => {
                        inner.set_estimate(format, total);
                        wait_child(&mut child, &cancel).await
                    }
                    _ => {
                        warn!("writing the tailed audio file failed");
                        let status = wait_child(&mut child, &cancel).await;
                        if status == PlaybackStatus::Idle {
                            PlaybackStatus::Stopped
                        } else {
                            status
                        }
                    }
                }
            }
            () = cancel.cancelled() => {
                abort_writer.abort();
                kill_child(&mut child).await
            }
        };

        inner.dispose(path);
        inner.finish(status);
    });

    Ok(())
}

/// Strategy 3: buffer the entire stream, then play the complete file.
async fn play_deferred(
    inner: &Arc<Inner>,
    mut reader: AudioReader,
    format: AudioFormat,
    volume: f64,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let path = temp_audio_path(format)?;

    let mut file = tokio::fs::File::create(&path).await?;
    let total = tokio::io::copy(&mut reader, &mut file).await?;
    file.flush().await?;
    drop(file);

    let invocation = command::file(&path, format, volume)?;
    let mut child = invocation.command().stdout(Stdio::null()).spawn()?;

    inner.set_estimate(format, total);
    debug!(program = %invocation.program.display(), bytes = total, "playing buffered file");

    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        let status = wait_child(&mut child, &cancel).await;
        inner.dispose(path);
        inner.finish(status);
    });

    Ok(())
}

/// Creates an empty temp file with the right extension for `format`.
fn temp_audio_path(format: AudioFormat) -> Result<TempPath, Error> {
    let file = tempfile::Builder::new()
        .prefix("aivis-")
        .suffix(&format!(".{}", format.extension()))
        .tempfile()?;

    Ok(file.into_temp_path())
}

/// Copies `reader` into `file`, reporting `(bytes, done)` through `progress`.
async fn copy_to_file(
    mut reader: AudioReader,
    mut file: tokio::fs::File,
    progress: watch::Sender<(u64, bool)>,
) -> std::io::Result<u64> {
    let mut buffer = vec![0u8; 16 * 1024];
    let mut written = 0u64;

    loop {
        let read = reader.read(&mut buffer).await?;
        if read == 0 {
            break;
        }

        file.write_all(&buffer[..read]).await?;
        written += read as u64;
        progress.send_replace((written, false));
    }

    file.flush().await?;
    progress.send_replace((written, true));
    Ok(written)
}
