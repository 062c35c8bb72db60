#[cfg(test)]
mod coordinator {
    use std::{
        sync::{Arc, Mutex},
        time::Duration,
    };

    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    use crate::{
        audio::{AudioFormat, AudioSink},
        history::{self, player::Replay, HistoryRecord, Store},
        playback::{Coordinator, Error, PlaybackMode, PlaybackRequest, Settings, SinkFactory},
        synth::SynthesisRequest,
        tests::mock::{eventually, MockSink, Script, ScriptedSynth},
    };

    /// A coordinator over a mock sink, a scripted synthesizer, and a real
    /// store in a temp directory.
    struct Harness {
        coordinator: Coordinator,
        sink: Arc<MockSink>,
        store: Arc<Store>,
        _dir: TempDir,
    }

    async fn harness(scripts: Vec<Script>) -> Harness {
        harness_with(scripts, Settings::default(), None).await
    }

    async fn harness_with(
        scripts: Vec<Script>,
        settings: Settings,
        factory: Option<SinkFactory>,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).await.unwrap());
        let sink = MockSink::new();

        let primary: Arc<dyn AudioSink> = sink.clone();
        let coordinator = Coordinator::new(
            primary,
            ScriptedSynth::new(scripts),
            Some(Arc::clone(&store)),
            settings,
            factory,
        );

        Harness {
            coordinator,
            sink,
            store,
            _dir: dir,
        }
    }

    /// A playback request for `text` on model `m1`.
    fn request(text: &str, mode: PlaybackMode, wait: bool) -> PlaybackRequest {
        PlaybackRequest {
            tts: SynthesisRequest::new("m1", text),
            mode: Some(mode),
            wait_for_end: wait,
            volume: None,
        }
    }

    #[tokio::test]
    async fn synthesize_and_save_wav() {
        let h = harness(vec![Script::ok(&["ab", "cd", "ef"])]).await;

        let mut playback = request("hello", PlaybackMode::Immediate, true);
        playback.tts.output_format = Some(AudioFormat::Wav);
        h.coordinator.play(playback).await.unwrap();

        assert_eq!(h.sink.fed(), b"abcdef".to_vec());

        let record = h.store.get(1).await.unwrap();
        assert_eq!(record.file_format, AudioFormat::Wav);
        assert_eq!(record.file_size_bytes, 6);
        assert_eq!(record.text, "hello");
        assert_eq!(
            tokio::fs::read(&record.file_path).await.unwrap(),
            b"abcdef"
        );

        // The counter has moved past the assigned id.
        let counter =
            tokio::fs::read_to_string(h.store.root().join("counter.json")).await.unwrap();
        assert!(counter.contains("\"next_id\": 2"));
    }

    #[tokio::test]
    async fn validation_rejects_before_any_side_effect() {
        let h = harness(vec![]).await;

        let mut playback = request("hi", PlaybackMode::Immediate, true);
        playback.tts.speaking_rate = Some(9.0);

        let result = h.coordinator.play(playback).await;
        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(h.sink.plays(), 0);
        assert_eq!(h.store.count().await, 0);
    }

    #[tokio::test]
    async fn queue_preserves_submission_order() {
        let h = harness(vec![
            Script::ok(&["A"]),
            Script::ok(&["B"]),
            Script::ok(&["C"]),
        ])
        .await;

        for text in ["one", "two", "three"] {
            h.coordinator
                .play(request(text, PlaybackMode::Queue, false))
                .await
                .unwrap();
        }

        eventually(|| async { h.store.count().await == 3 }).await;

        assert_eq!(
            h.sink.segments(),
            vec![b"A".to_vec(), b"B".to_vec(), b"C".to_vec()]
        );

        for (id, text, body) in [(1, "one", b"A"), (2, "two", b"B"), (3, "three", b"C")] {
            let record = h.store.get(id).await.unwrap();
            assert_eq!(record.text, text);
            assert_eq!(
                tokio::fs::read(&record.file_path).await.unwrap(),
                body.to_vec()
            );
        }

        assert_eq!(h.coordinator.queue_len().await, 0);
    }

    #[tokio::test]
    async fn queued_wait_blocks_until_completion() {
        let h = harness(vec![Script::ok(&["body"])]).await;

        h.coordinator
            .play(request("waited", PlaybackMode::Queue, true))
            .await
            .unwrap();

        // Completion implies the record is already in the index.
        assert_eq!(h.store.count().await, 1);
        assert_eq!(h.sink.fed(), b"body".to_vec());
    }

    #[tokio::test]
    async fn immediate_preempts_and_both_records_survive() {
        let h = harness(vec![
            Script::slow(&["aaaa"; 10], Duration::from_millis(30)),
            Script::ok(&["BB"]),
        ])
        .await;

        h.coordinator
            .play(request("first", PlaybackMode::Immediate, false))
            .await
            .unwrap();
        eventually(|| async { !h.sink.fed().is_empty() }).await;

        h.coordinator
            .play(request("second", PlaybackMode::Immediate, true))
            .await
            .unwrap();

        // The first playback was stopped within the grace window and is
        // not in the queue; the second one rendered fully.
        assert!(h.sink.stops() >= 2);
        assert_eq!(h.coordinator.queue_len().await, 0);
        assert_eq!(h.sink.segments().last().unwrap(), &b"BB".to_vec());

        // Both syntheses persist, ordered by first-chunk time.
        eventually(|| async { h.store.count().await == 2 }).await;
        let first = h.store.get(1).await.unwrap();
        assert_eq!(first.text, "first");
        assert_eq!(first.file_size_bytes, 40);
        let second = h.store.get(2).await.unwrap();
        assert_eq!(second.text, "second");
        assert_eq!(
            tokio::fs::read(&second.file_path).await.unwrap(),
            b"BB"
        );
    }

    #[tokio::test]
    async fn no_queue_playback_runs_on_independent_sinks() {
        let minted: Arc<Mutex<Vec<Arc<MockSink>>>> = Arc::default();

        let factory_minted = Arc::clone(&minted);
        let factory: SinkFactory = Box::new(move || {
            let sink = MockSink::new();
            factory_minted.lock().unwrap().push(Arc::clone(&sink));
            let minted: Arc<dyn AudioSink> = sink;
            minted
        });

        let h = harness_with(
            vec![
                Script::slow(&["xx"; 5], Duration::from_millis(30)),
                Script::slow(&["yy"; 5], Duration::from_millis(30)),
            ],
            Settings::default(),
            Some(factory),
        )
        .await;

        h.coordinator
            .play(request("left", PlaybackMode::NoQueue, false))
            .await
            .unwrap();
        h.coordinator
            .play(request("right", PlaybackMode::NoQueue, false))
            .await
            .unwrap();

        // Two distinct sinks are active at the same time while the
        // primary sink stays untouched.
        eventually(|| async {
            let minted = minted.lock().unwrap();
            minted.len() == 2 && minted.iter().all(|sink| sink.is_playing())
        })
        .await;
        assert!(!h.sink.is_playing());
        assert_eq!(h.sink.plays(), 0);

        eventually(|| async { h.store.count().await == 2 }).await;
    }

    #[tokio::test]
    async fn replay_feeds_the_sink_without_new_records() {
        let h = harness(vec![]).await;

        let path = h.store.audio_dir().join("7.mp3");
        tokio::fs::write(&path, b"XY").await.unwrap();

        let mut record = HistoryRecord::from_request(
            SynthesisRequest::new("m1", "resume me"),
            path,
            2,
            None,
        );
        record.id = 7;
        h.store.save(record).await.unwrap();

        history::player::replay(
            &h.coordinator,
            &h.store,
            Replay {
                id: 7,
                mode: Some(PlaybackMode::Immediate),
                wait_for_end: true,
                volume: Some(0.4),
            },
        )
        .await
        .unwrap();

        assert_eq!(h.sink.fed(), b"XY".to_vec());
        assert!((h.sink.volume() - 0.4).abs() < f64::EPSILON);
        assert_eq!(h.store.count().await, 1);
    }

    #[tokio::test]
    async fn replay_of_an_unknown_id_is_not_found() {
        let h = harness(vec![]).await;

        let result =
            history::player::replay(&h.coordinator, &h.store, Replay::new(99)).await;
        assert!(matches!(
            result,
            Err(Error::History(history::Error::NotFound(99)))
        ));
    }

    #[tokio::test]
    async fn replay_with_a_missing_file_fails_cleanly() {
        let h = harness(vec![]).await;

        let mut record = HistoryRecord::from_request(
            SynthesisRequest::new("m1", "gone"),
            h.store.audio_dir().join("ghost.mp3"),
            2,
            None,
        );
        record.id = 1;
        h.store.save(record).await.unwrap();

        let result = history::player::replay(&h.coordinator, &h.store, Replay::new(1)).await;
        assert!(matches!(
            result,
            Err(Error::History(history::Error::FileMissing(_)))
        ));
    }

    #[tokio::test]
    async fn caller_cancellation_abandons_the_wait_not_the_playback() {
        let h = harness(vec![Script::slow(&["zz"; 5], Duration::from_millis(40))]).await;

        let caller = CancellationToken::new();
        let canceller = caller.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            canceller.cancel();
        });

        let result = h
            .coordinator
            .play_cancellable(request("keep going", PlaybackMode::Queue, true), caller)
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));

        // The pipeline keeps running to completion regardless.
        eventually(|| async { h.store.count().await == 1 }).await;
        assert_eq!(h.sink.fed(), b"zzzzzzzzzz".to_vec());
    }

    #[tokio::test]
    async fn stop_clears_the_queue_and_cancels_waiters() {
        let h = harness(vec![Script::slow(&["11"; 10], Duration::from_millis(30))]).await;

        h.coordinator
            .play(request("running", PlaybackMode::Queue, false))
            .await
            .unwrap();
        eventually(|| async { h.sink.is_playing() }).await;

        // A second item sits behind the first; its waiter must observe
        // cancellation when the queue is cleared.
        let waiter = {
            let second = request("queued", PlaybackMode::Queue, true);
            let coordinator = &h.coordinator;
            async move { coordinator.play(second).await }
        };

        let stop = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            h.coordinator.stop().await;
        };

        let (waited, ()) = tokio::join!(waiter, stop);
        assert!(matches!(waited, Err(Error::Cancelled)));
        assert_eq!(h.coordinator.queue_len().await, 0);
        assert!(!h.sink.is_playing());
    }

    #[tokio::test]
    async fn history_can_be_disabled() {
        let h = harness_with(
            vec![Script::ok(&["quiet"])],
            Settings {
                history_enabled: false,
                ..Settings::default()
            },
            None,
        )
        .await;

        h.coordinator
            .play(request("no trace", PlaybackMode::Immediate, true))
            .await
            .unwrap();

        assert_eq!(h.sink.fed(), b"quiet".to_vec());
        assert_eq!(h.store.count().await, 0);
    }

    #[tokio::test]
    async fn retention_prunes_after_each_synthesis() {
        let h = harness_with(
            vec![
                Script::ok(&["1"]),
                Script::ok(&["2"]),
                Script::ok(&["3"]),
            ],
            Settings {
                history_max_count: Some(2),
                ..Settings::default()
            },
            None,
        )
        .await;

        for text in ["a", "b", "c"] {
            h.coordinator
                .play(request(text, PlaybackMode::Immediate, true))
                .await
                .unwrap();
        }

        eventually(|| async { h.store.count().await == 2 }).await;
        assert!(matches!(
            h.store.get(1).await,
            Err(history::Error::NotFound(_))
        ));
        assert!(h.store.get(3).await.is_ok());
    }

    #[tokio::test]
    async fn synthesis_failures_skip_history() {
        let h = harness(vec![Script::failing(
            &["partial"],
            crate::synth::Error::Upstream(503),
        )])
        .await;

        let result = h
            .coordinator
            .play(request("doomed", PlaybackMode::Immediate, true))
            .await;

        assert!(matches!(result, Err(Error::Synthesis(_))));
        eventually(|| async { h.store.count().await == 0 }).await;

        // No stray staging files are left behind.
        let mut entries = tokio::fs::read_dir(h.store.audio_dir()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }
}
