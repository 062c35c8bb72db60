#[cfg(test)]
mod store {
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::TempDir;
    use tokio::fs;

    use crate::{
        audio::AudioFormat,
        history::{filter::Filter, Error, HistoryRecord, Store},
        synth::SynthesisRequest,
    };

    /// A fresh store in its own temp directory.
    async fn fresh() -> (TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path()).await.unwrap();
        (dir, store)
    }

    /// An unsaved record whose audio file actually exists in the store.
    async fn record_with_file(store: &Store, name: &str, body: &[u8]) -> HistoryRecord {
        let path = store.audio_dir().join(format!("{name}.mp3"));
        fs::write(&path, body).await.unwrap();

        HistoryRecord::from_request(
            SynthesisRequest::new("m1", name),
            path,
            body.len() as u64,
            None,
        )
    }

    #[tokio::test]
    async fn ids_start_at_one_and_stay_monotonic() {
        let (_dir, store) = fresh().await;

        for expected in 1..=3 {
            let record = record_with_file(&store, &format!("t{expected}"), b"x").await;
            assert_eq!(store.save(record).await.unwrap(), expected);
        }

        // Deletion never frees an id.
        store.delete(2).await.unwrap();
        let record = record_with_file(&store, "t4", b"x").await;
        assert_eq!(store.save(record).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn counter_survives_restarts() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = Store::open(dir.path()).await.unwrap();
            assert_eq!(store.next_id().await.unwrap(), 1);
            assert_eq!(store.next_id().await.unwrap(), 2);
        }

        let store = Store::open(dir.path()).await.unwrap();
        assert_eq!(store.next_id().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn save_then_get_preserves_every_field() {
        let (_dir, store) = fresh().await;

        let mut record = record_with_file(&store, "hello", b"audio").await;
        record.request.speaking_rate = Some(1.5);
        record.request.output_format = Some(AudioFormat::Mp3);
        record.credits = Some(0.25);

        let id = store.save(record.clone()).await.unwrap();
        let loaded = store.get(id).await.unwrap();

        assert_eq!(loaded.id, id);
        assert!(!loaded.internal_uuid.is_empty());
        assert_eq!(loaded.request, record.request);
        assert_eq!(loaded.file_path, record.file_path);
        assert_eq!(loaded.file_size_bytes, 5);
        assert_eq!(loaded.created_at, record.created_at);
        assert_eq!(loaded.text, "hello");
        assert_eq!(loaded.model_uuid, "m1");
        assert_eq!(loaded.credits, Some(0.25));
    }

    #[tokio::test]
    async fn explicit_ids_are_kept() {
        let (_dir, store) = fresh().await;

        let mut record = record_with_file(&store, "seven", b"x").await;
        record.id = 7;
        assert_eq!(store.save(record).await.unwrap(), 7);
        assert_eq!(store.get(7).await.unwrap().text, "seven");
    }

    #[tokio::test]
    async fn get_unknown_id_is_not_found() {
        let (_dir, store) = fresh().await;
        assert!(matches!(store.get(42).await, Err(Error::NotFound(42))));
    }

    #[tokio::test]
    async fn delete_removes_record_and_file() {
        let (_dir, store) = fresh().await;

        let record = record_with_file(&store, "bye", b"zzz").await;
        let path = record.file_path.clone();
        let id = store.save(record).await.unwrap();

        store.delete(id).await.unwrap();

        assert!(matches!(store.get(id).await, Err(Error::NotFound(_))));
        assert!(fs::metadata(&path).await.is_err());

        // A second delete finds nothing and changes nothing.
        assert!(matches!(store.delete(id).await, Err(Error::NotFound(_))));
        assert_eq!(store.count().await, 0);
    }

    #[tokio::test]
    async fn delete_tolerates_a_missing_file() {
        let (_dir, store) = fresh().await;

        let mut record = record_with_file(&store, "gone", b"x").await;
        record.file_path = store.audio_dir().join("never-existed.mp3");
        let id = store.save(record).await.unwrap();

        store.delete(id).await.unwrap();
        assert_eq!(store.count().await, 0);
    }

    #[tokio::test]
    async fn delete_many_rewrites_once_and_skips_unknowns() {
        let (_dir, store) = fresh().await;

        let mut paths = Vec::new();
        for name in ["a", "b", "c"] {
            let record = record_with_file(&store, name, b"x").await;
            paths.push(record.file_path.clone());
            store.save(record).await.unwrap();
        }

        let removed = store.delete_many(&[1, 3, 99]).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.count().await, 1);
        assert!(fs::metadata(&paths[0]).await.is_err());
        assert!(fs::metadata(&paths[1]).await.is_ok());
        assert!(fs::metadata(&paths[2]).await.is_err());
    }

    #[tokio::test]
    async fn clear_empties_everything_and_resets_the_counter() {
        let (_dir, store) = fresh().await;

        for name in ["a", "b"] {
            let record = record_with_file(&store, name, b"x").await;
            store.save(record).await.unwrap();
        }

        store.clear().await.unwrap();

        assert_eq!(store.count().await, 0);
        let mut entries = fs::read_dir(store.audio_dir()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
        assert_eq!(store.next_id().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn corrupt_index_reads_as_empty() {
        let (dir, store) = fresh().await;

        let record = record_with_file(&store, "x", b"x").await;
        store.save(record).await.unwrap();

        // Simulate a truncated write.
        fs::write(dir.path().join("metadata.json"), b"{\"records\": [{")
            .await
            .unwrap();

        assert_eq!(store.count().await, 0);

        // The store stays writable afterwards.
        let record = record_with_file(&store, "y", b"y").await;
        store.save(record).await.unwrap();
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn cleanup_keeps_the_newest_by_creation() {
        let (_dir, store) = fresh().await;

        let mut paths = Vec::new();
        for day in 1..=5 {
            let mut record = record_with_file(&store, &format!("d{day}"), b"x").await;
            record.created_at = Utc.with_ymd_and_hms(2025, 6, day, 0, 0, 0).unwrap();
            paths.push(record.file_path.clone());
            store.save(record).await.unwrap();
        }

        let removed = store.cleanup(3, None).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.count().await, 3);

        // The two oldest are gone, files included.
        assert!(matches!(store.get(1).await, Err(Error::NotFound(_))));
        assert!(matches!(store.get(2).await, Err(Error::NotFound(_))));
        assert!(fs::metadata(&paths[0]).await.is_err());
        assert!(fs::metadata(&paths[1]).await.is_err());
        assert!(store.get(3).await.is_ok());
        assert!(store.get(5).await.is_ok());
    }

    #[tokio::test]
    async fn cleanup_applies_the_age_bound() {
        let (_dir, store) = fresh().await;

        let mut old = record_with_file(&store, "old", b"x").await;
        old.created_at = Utc::now() - Duration::days(30);
        store.save(old).await.unwrap();

        let fresh_record = record_with_file(&store, "fresh", b"x").await;
        store.save(fresh_record).await.unwrap();

        let removed = store.cleanup(0, Some(Duration::days(7))).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.get(2).await.unwrap().text, "fresh");
    }

    #[tokio::test]
    async fn cleanup_below_the_bound_is_a_no_op() {
        let (_dir, store) = fresh().await;

        let record = record_with_file(&store, "only", b"x").await;
        store.save(record).await.unwrap();

        assert_eq!(store.cleanup(3, None).await.unwrap(), 0);
        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn list_integrates_filtering_and_sorting() {
        let (_dir, store) = fresh().await;

        for name in ["alpha", "beta", "gamma"] {
            let record = record_with_file(&store, name, b"x").await;
            store.save(record).await.unwrap();
        }

        let page = store.list(&Filter::default()).await;
        let ids: Vec<u64> = page.records.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);

        let page = store
            .list(&Filter {
                text_contains: Some("ALPHA".into()),
                ..Filter::default()
            })
            .await;
        assert_eq!(page.total, 1);
        assert_eq!(page.records[0].text, "alpha");
    }
}
