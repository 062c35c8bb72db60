//! The playback coordinator: one primary sink, a FIFO queue, and the
//! synth→tee→sink pipeline behind all three disciplines.
//!
//! Playback always runs on detached tasks; a caller abandoning its wait
//! never cancels audio. The only external ways to end playback are
//! [`Coordinator::stop`] and [`Coordinator::clear_queue`].

use std::{collections::VecDeque, io::Cursor, sync::Arc, time::Duration};

use bytes::Bytes;
use tokio::{
    fs::File,
    io::duplex,
    sync::{oneshot, Mutex, Notify},
    task::JoinHandle,
    time,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{
    audio::{AudioFormat, AudioSink, PlaybackInfo},
    history::{HistoryRecord, Store},
    synth::{SynthesisRequest, Synthesizer},
    tee,
};

use super::{Error, PlaybackMode, PlaybackRequest};

/// Most items the queue will hold before rejecting with `QueueFull`.
const QUEUE_LIMIT: usize = 100;

/// How often the worker re-checks the queue between explicit kicks.
const WORKER_TICK: Duration = Duration::from_millis(100);

/// Capacity of the synthesis→sink byte pipe.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Mints independent sinks for `no_queue` playback.
pub type SinkFactory = Box<dyn Fn() -> Arc<dyn AudioSink> + Send + Sync>;

/// Coordinator behavior resolved from configuration at construction.
pub struct Settings {
    /// Discipline used when a request doesn't set one.
    pub default_mode: Option<PlaybackMode>,

    /// Whether live syntheses are persisted to history at all.
    pub history_enabled: bool,

    /// Retention bound applied after each persisted synthesis.
    pub history_max_count: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_mode: None,
            history_enabled: true,
            history_max_count: None,
        }
    }
}

/// What a dispatched item plays.
enum Source {
    /// Live synthesis of the embedded request.
    Synthesis,

    /// A pre-read buffer (history replay). Never persisted again.
    Buffer {
        bytes: Bytes,
        format: AudioFormat,
    },
}

/// One enqueued, not-yet-dispatched unit of playback.
struct QueueItem {
    /// The request, consumed exactly once.
    request: PlaybackRequest,

    /// Where the audio bytes come from.
    source: Source,

    /// Completion signal for a synchronously-waiting caller.
    done: Option<oneshot::Sender<Result<(), Error>>>,
}

/// Queue state, all under one lock.
#[derive(Default)]
struct State {
    /// Items waiting for the worker.
    queue: VecDeque<QueueItem>,

    /// Whether the worker is mid-item.
    processing: bool,
}

/// Internals shared with the worker and detached pipelines.
struct Inner {
    /// The primary sink, shared across queue items.
    sink: Arc<dyn AudioSink>,

    /// The synthesis boundary.
    synth: Arc<dyn Synthesizer>,

    /// History store, when persistence is configured.
    store: Option<Arc<Store>>,

    /// Mints independent sinks for `no_queue`.
    factory: Option<SinkFactory>,

    /// Resolved configuration.
    settings: Settings,

    /// Queue and processing flag.
    state: Mutex<State>,

    /// Wakes the worker without waiting for the next tick.
    kick: Notify,
}

/// The process-root playback arbiter. Construct exactly one and pass it
/// by handle; the worker dies with it.
pub struct Coordinator {
    /// Shared internals.
    inner: Arc<Inner>,

    /// The queue worker, aborted on drop.
    worker: JoinHandle<()>,
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

impl Coordinator {
    /// Creates a coordinator and starts its queue worker.
    pub fn new(
        sink: Arc<dyn AudioSink>,
        synth: Arc<dyn Synthesizer>,
        store: Option<Arc<Store>>,
        settings: Settings,
        factory: Option<SinkFactory>,
    ) -> Self {
        let inner = Arc::new(Inner {
            sink,
            synth,
            store,
            factory,
            settings,
            state: Mutex::new(State::default()),
            kick: Notify::new(),
        });

        let worker = tokio::spawn(worker(Arc::clone(&inner)));

        Self { inner, worker }
    }

    /// Synthesizes and plays `request` per its mode and wait flag.
    pub async fn play(&self, request: PlaybackRequest) -> Result<(), Error> {
        self.play_cancellable(request, CancellationToken::new()).await
    }

    /// Like [`Coordinator::play`], but a synchronous wait returns
    /// `Cancelled` when `caller` fires — without affecting playback,
    /// which runs detached.
    pub async fn play_cancellable(
        &self,
        request: PlaybackRequest,
        caller: CancellationToken,
    ) -> Result<(), Error> {
        // Boundary validation: no side effects on a bad request.
        request.tts.validate()?;

        let mode = request
            .mode
            .or(self.inner.settings.default_mode)
            .unwrap_or(PlaybackMode::Immediate);

        self.dispatch(request, Source::Synthesis, mode, caller).await
    }

    /// Plays an in-memory buffer (the history resume path). Defaults to
    /// `queue` so a replay never interrupts ongoing playback.
    pub async fn play_buffer(
        &self,
        bytes: Bytes,
        format: AudioFormat,
        request: PlaybackRequest,
    ) -> Result<(), Error> {
        let mode = request
            .mode
            .or(self.inner.settings.default_mode)
            .unwrap_or(PlaybackMode::Queue);

        self.dispatch(
            request,
            Source::Buffer { bytes, format },
            mode,
            CancellationToken::new(),
        )
        .await
    }

    /// Routes one item per the dispatch table.
    async fn dispatch(
        &self,
        request: PlaybackRequest,
        source: Source,
        mode: PlaybackMode,
        caller: CancellationToken,
    ) -> Result<(), Error> {
        let wait = request.wait_for_end;

        match mode {
            PlaybackMode::Immediate => {
                self.stop().await;

                let handle = spawn_item(&self.inner, Arc::clone(&self.inner.sink), request, source);
                if wait {
                    await_detached(handle, &caller).await
                } else {
                    Ok(())
                }
            }
            PlaybackMode::Queue => {
                let (done_tx, done_rx) = if wait {
                    let (tx, rx) = oneshot::channel();
                    (Some(tx), Some(rx))
                } else {
                    (None, None)
                };

                {
                    let mut state = self.inner.state.lock().await;
                    if state.queue.len() >= QUEUE_LIMIT {
                        return Err(Error::QueueFull);
                    }

                    state.queue.push_back(QueueItem {
                        request,
                        source,
                        done: done_tx,
                    });
                    self.inner.sink.set_queue_len(state.queue.len());
                }
                self.inner.kick.notify_one();

                match done_rx {
                    Some(done_rx) => tokio::select! {
                        result = done_rx => result.unwrap_or(Err(Error::Cancelled)),
                        () = caller.cancelled() => Err(Error::Cancelled),
                    },
                    None => Ok(()),
                }
            }
            PlaybackMode::NoQueue => {
                // A fresh, short-lived sink so the primary channel is
                // untouched; the shared sink is only a fallback.
                let sink = self
                    .inner
                    .factory
                    .as_ref()
                    .map_or_else(|| Arc::clone(&self.inner.sink), |factory| factory());

                let handle = spawn_item(&self.inner, sink, request, source);
                if wait {
                    await_detached(handle, &caller).await
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Stops current playback and clears the queue. Waiting callers of
    /// cleared items observe `Cancelled`.
    pub async fn stop(&self) {
        {
            let mut state = self.inner.state.lock().await;
            state.queue.clear();
            state.processing = false;
            self.inner.sink.set_queue_len(0);
        }

        self.inner.sink.stop().await;
    }

    /// Empties the queue but leaves current playback running.
    pub async fn clear_queue(&self) {
        let mut state = self.inner.state.lock().await;
        state.queue.clear();
        self.inner.sink.set_queue_len(0);
    }

    /// Number of enqueued, not-yet-dispatched items.
    pub async fn queue_len(&self) -> usize {
        self.inner.state.lock().await.queue.len()
    }

    /// Snapshot of the primary sink.
    pub fn status(&self) -> PlaybackInfo {
        self.inner.sink.status()
    }

    /// The primary sink handle, for volume and pause control.
    pub fn sink(&self) -> &Arc<dyn AudioSink> {
        &self.inner.sink
    }
}

/// Waits for a detached playback task, letting the caller's own
/// cancellation abandon the wait without touching playback.
async fn await_detached(
    handle: JoinHandle<Result<(), Error>>,
    caller: &CancellationToken,
) -> Result<(), Error> {
    tokio::select! {
        joined = handle => joined?,
        () = caller.cancelled() => Err(Error::Cancelled),
    }
}

/// Spawns one item's pipeline on its own task.
fn spawn_item(
    inner: &Arc<Inner>,
    sink: Arc<dyn AudioSink>,
    request: PlaybackRequest,
    source: Source,
) -> JoinHandle<Result<(), Error>> {
    let inner = Arc::clone(inner);
    tokio::spawn(async move { run_item(&inner, &sink, request, source).await })
}

/// The queue worker: drains one item at a time whenever the primary sink
/// is free, re-kicking itself after each completion.
async fn worker(inner: Arc<Inner>) {
    let mut tick = time::interval(WORKER_TICK);

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            () = inner.kick.notified() => {}
        }

        let item = {
            let mut state = inner.state.lock().await;
            if state.processing || inner.sink.is_playing() || state.queue.is_empty() {
                None
            } else {
                state.processing = true;
                let item = state.queue.pop_front();
                inner.sink.set_queue_len(state.queue.len());
                item
            }
        };

        let Some(item) = item else { continue };

        let QueueItem {
            request,
            source,
            done,
        } = item;

        debug!(text = %request.tts.text, "dispatching queued playback item");

        let handle = spawn_item(&inner, Arc::clone(&inner.sink), request, source);
        let result = match handle.await {
            Ok(result) => result,
            Err(join) => Err(Error::Join(join)),
        };

        if let Some(done) = done {
            let _ = done.send(result);
        }

        inner.state.lock().await.processing = false;
        inner.kick.notify_one();
    }
}

/// Runs one item end to end on `sink`.
async fn run_item(
    inner: &Inner,
    sink: &Arc<dyn AudioSink>,
    request: PlaybackRequest,
    source: Source,
) -> Result<(), Error> {
    if let Some(volume) = request.volume {
        sink.set_volume(volume);
    }
    sink.set_now_playing(Some(request.tts.text.clone()));

    let result = match source {
        Source::Buffer { bytes, format } => play_buffer_item(sink, bytes, format).await,
        Source::Synthesis => play_synthesis_item(inner, sink, &request.tts).await,
    };

    sink.set_now_playing(None);

    if let Err(ref error) = result {
        error!(%error, "playback item failed");
    }
    result
}

/// Plays a pre-read buffer to completion.
async fn play_buffer_item(
    sink: &Arc<dyn AudioSink>,
    bytes: Bytes,
    format: AudioFormat,
) -> Result<(), Error> {
    sink.play(Box::new(Cursor::new(bytes)), format).await?;
    sink.wait_until_idle().await;
    Ok(())
}

/// The live pipeline: synthesis chunks → tee → (sink pipe, history file).
async fn play_synthesis_item(
    inner: &Inner,
    sink: &Arc<dyn AudioSink>,
    request: &SynthesisRequest,
) -> Result<(), Error> {
    let format = request.format();

    // Boundary errors from the service surface before anything spawns.
    let synthesis = inner.synth.synthesize(request).await?;
    let credits = synthesis.billing.credits_used;

    let store = inner
        .settings
        .history_enabled
        .then(|| inner.store.clone())
        .flatten();

    // The audio lands in a staging file first; it is renamed to its final
    // `audio/<id>.<ext>` name and indexed only once complete, so the
    // index never references a partial artifact.
    let mut staging = None;
    let mut history_file = None;
    if let Some(store) = store.as_ref() {
        let path = store.staging_path(format);
        match File::create(&path).await {
            Ok(file) => {
                staging = Some(path);
                history_file = Some(file);
            }
            Err(error) => warn!(%error, "failed to open a history file, skipping persistence"),
        }
    }

    let (reader, writer) = duplex(PIPE_CAPACITY);
    let (ready_tx, ready_rx) = oneshot::channel();
    let cancel = CancellationToken::new();

    // Reserve the id as soon as the first chunk lands, so ids order by
    // first-chunk time across concurrent pipelines.
    let id_task = store.clone().map(|store| {
        tokio::spawn(async move {
            ready_rx.await.ok()?;
            match store.next_id().await {
                Ok(id) => Some(id),
                Err(error) => {
                    warn!(%error, "failed to reserve a history id");
                    None
                }
            }
        })
    });

    let feed_cancel = cancel.clone();
    let chunks = synthesis.chunks;
    let feed = tokio::spawn(async move {
        tee::tee(chunks, writer, history_file, ready_tx, &feed_cancel).await
    });

    if let Err(error) = sink.play(Box::new(reader), format).await {
        // The pipe's read half is gone; shut the feed down and clean up.
        cancel.cancel();
        let _ = feed.await;
        discard_staging(staging.as_deref()).await;
        return Err(error.into());
    }

    let fed = match feed.await {
        Ok(fed) => fed,
        Err(join) => {
            discard_staging(staging.as_deref()).await;
            return Err(Error::Join(join));
        }
    };

    sink.wait_until_idle().await;

    let total = match fed {
        Ok(total) => total,
        Err(error) => {
            discard_staging(staging.as_deref()).await;
            return Err(error.into());
        }
    };

    if let (Some(store), Some(staging)) = (store, staging) {
        let id = match id_task {
            Some(task) => task.await.ok().flatten(),
            None => None,
        };

        finalize_history(inner, &store, staging, id, request, format, total, credits).await;
    }

    Ok(())
}

/// Moves a completed staging file into place and indexes it. Failures
/// here are logged and never abort the (already finished) playback.
#[allow(clippy::too_many_arguments)]
async fn finalize_history(
    inner: &Inner,
    store: &Arc<Store>,
    staging: std::path::PathBuf,
    id: Option<u64>,
    request: &SynthesisRequest,
    format: AudioFormat,
    total: u64,
    credits: Option<f64>,
) {
    let Some(id) = id else {
        discard_staging(Some(&staging)).await;
        return;
    };

    if total == 0 {
        // An empty synthesis never enters the index.
        discard_staging(Some(&staging)).await;
        return;
    }

    let size = match tokio::fs::metadata(&staging).await {
        Ok(metadata) => metadata.len(),
        Err(error) => {
            warn!(%error, "failed to stat the history artifact");
            return;
        }
    };

    if size == 0 {
        discard_staging(Some(&staging)).await;
        return;
    }

    let file_path = store.audio_path(id, format);
    if let Err(error) = tokio::fs::rename(&staging, &file_path).await {
        warn!(%error, "failed to move the history artifact into place");
        discard_staging(Some(&staging)).await;
        return;
    }

    let mut record = HistoryRecord::from_request(request.clone(), file_path, size, credits);
    record.id = id;

    if let Err(error) = store.save(record).await {
        warn!(%error, "failed to index the history record");
        return;
    }

    if let Some(max_count) = inner.settings.history_max_count {
        if let Err(error) = store.cleanup(max_count, None).await {
            warn!(%error, "history retention cleanup failed");
        }
    }
}

/// Removes an abandoned staging file, quietly.
async fn discard_staging(staging: Option<&std::path::Path>) {
    if let Some(path) = staging {
        let _ = tokio::fs::remove_file(path).await;
    }
}
