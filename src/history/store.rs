//! The on-disk history store: a JSON index, an id counter, and the audio
//! directory, all under one configurable base directory.
//!
//! Writers are serialized by a per-store mutex and rewrite whole files via
//! a temp-file-and-rename, so a crash can lose at most the in-flight
//! write. Readers go straight to disk on every call and treat a missing
//! or unparseable index as empty.

use std::path::{Path, PathBuf};

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::{fs, sync::Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::audio::AudioFormat;

use super::{
    filter::{Filter, Page},
    Error, HistoryRecord,
};

/// Serialized shape of `metadata.json`.
#[derive(Debug, Default, Deserialize)]
struct Index {
    /// Every record, in insertion order.
    #[serde(default)]
    records: Vec<HistoryRecord>,
}

/// Borrowing counterpart of [`Index`] for writing.
#[derive(Serialize)]
struct IndexRef<'a> {
    records: &'a [HistoryRecord],
}

/// Serialized shape of `counter.json`.
#[derive(Debug, Serialize, Deserialize)]
struct Counter {
    next_id: u64,
}

/// A single-writer persistent index over synthesis records.
pub struct Store {
    /// Base directory holding `metadata.json`, `counter.json`, `audio/`.
    root: PathBuf,

    /// Serializes writers. Readers don't take it.
    write_lock: Mutex<()>,
}

impl Store {
    /// Opens (creating if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        fs::create_dir_all(root.join("audio")).await?;

        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// The store's base directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the record index.
    fn index_path(&self) -> PathBuf {
        self.root.join("metadata.json")
    }

    /// Path of the id counter.
    fn counter_path(&self) -> PathBuf {
        self.root.join("counter.json")
    }

    /// The directory holding audio artifacts.
    pub fn audio_dir(&self) -> PathBuf {
        self.root.join("audio")
    }

    /// Final artifact path for a record id.
    pub fn audio_path(&self, id: u64, format: AudioFormat) -> PathBuf {
        self.audio_dir()
            .join(format!("{id}.{}", format.extension()))
    }

    /// A unique staging path for an artifact whose id isn't assigned yet.
    pub fn staging_path(&self, format: AudioFormat) -> PathBuf {
        self.audio_dir()
            .join(format!(".partial-{}.{}", Uuid::new_v4(), format.extension()))
    }

    /// Reads the full index; missing or corrupt files read as empty.
    async fn load_records(&self) -> Vec<HistoryRecord> {
        match fs::read(self.index_path()).await {
            Ok(bytes) => match serde_json::from_slice::<Index>(&bytes) {
                Ok(index) => index.records,
                Err(error) => {
                    warn!(%error, "unreadable history index, treating as empty");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        }
    }

    /// Rewrites the index with `records`.
    async fn store_records(&self, records: &[HistoryRecord]) -> Result<(), Error> {
        write_json(&self.index_path(), &IndexRef { records }).await
    }

    /// Reads the counter, defaulting to `1`.
    async fn read_counter(&self) -> u64 {
        match fs::read(self.counter_path()).await {
            Ok(bytes) => serde_json::from_slice::<Counter>(&bytes)
                .map(|counter| counter.next_id)
                .unwrap_or(1),
            Err(_) => 1,
        }
    }

    /// Consumes the current id, persisting the increment. Never locked.
    async fn next_id_unlocked(&self) -> Result<u64, Error> {
        let id = self.read_counter().await;
        write_json(&self.counter_path(), &Counter { next_id: id + 1 }).await?;
        Ok(id)
    }

    /// Assigns the next monotonic id. Ids are never reused, even after
    /// every record is deleted.
    pub async fn next_id(&self) -> Result<u64, Error> {
        let _guard = self.write_lock.lock().await;
        self.next_id_unlocked().await
    }

    /// Appends `record` to the index, assigning an id when `record.id`
    /// is `0` and filling `internal_uuid` when empty. Returns the id.
    pub async fn save(&self, mut record: HistoryRecord) -> Result<u64, Error> {
        let _guard = self.write_lock.lock().await;

        if record.id == 0 {
            record.id = self.next_id_unlocked().await?;
        }

        if record.internal_uuid.is_empty() {
            record.internal_uuid = Uuid::new_v4().to_string();
        }

        let id = record.id;
        let mut records = self.load_records().await;
        records.push(record);
        self.store_records(&records).await?;

        debug!(id, "history record saved");
        Ok(id)
    }

    /// Fetches one record by id.
    pub async fn get(&self, id: u64) -> Result<HistoryRecord, Error> {
        self.load_records()
            .await
            .into_iter()
            .find(|record| record.id == id)
            .ok_or(Error::NotFound(id))
    }

    /// Filters, sorts, and paginates the index.
    pub async fn list(&self, filter: &Filter) -> Page {
        filter.page(self.load_records().await)
    }

    /// Number of records in the index.
    pub async fn count(&self) -> usize {
        self.load_records().await.len()
    }

    /// Removes one record and, best-effort, its audio file.
    pub async fn delete(&self, id: u64) -> Result<(), Error> {
        let file_path = {
            let _guard = self.write_lock.lock().await;

            let mut records = self.load_records().await;
            let position = records
                .iter()
                .position(|record| record.id == id)
                .ok_or(Error::NotFound(id))?;

            let removed = records.remove(position);
            self.store_records(&records).await?;
            removed.file_path
        };

        remove_artifact(&file_path).await;
        Ok(())
    }

    /// Removes several records in a single index rewrite; audio files go
    /// after the index is updated. Unknown ids are skipped. Returns how
    /// many records were removed.
    pub async fn delete_many(&self, ids: &[u64]) -> Result<usize, Error> {
        let doomed_paths = {
            let _guard = self.write_lock.lock().await;

            let records = self.load_records().await;
            let (doomed, kept): (Vec<HistoryRecord>, Vec<HistoryRecord>) = records
                .into_iter()
                .partition(|record| ids.contains(&record.id));

            if doomed.is_empty() {
                return Ok(0);
            }

            self.store_records(&kept).await?;
            doomed
                .into_iter()
                .map(|record| record.file_path)
                .collect::<Vec<_>>()
        };

        let removed = doomed_paths.len();
        for path in doomed_paths {
            remove_artifact(&path).await;
        }

        Ok(removed)
    }

    /// Empties the index, removes everything under `audio/`, and resets
    /// the counter to `1`.
    pub async fn clear(&self) -> Result<(), Error> {
        {
            let _guard = self.write_lock.lock().await;
            self.store_records(&[]).await?;
            write_json(&self.counter_path(), &Counter { next_id: 1 }).await?;
        }

        let mut entries = fs::read_dir(self.audio_dir()).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Err(error) = fs::remove_file(entry.path()).await {
                warn!(path = %entry.path().display(), %error, "failed to remove audio file");
            }
        }

        Ok(())
    }

    /// Applies the retention policy: drop records older than `max_age`,
    /// then, when `max_count > 0`, the oldest-by-creation excess beyond
    /// it. One bulk delete. Returns how many records were removed.
    pub async fn cleanup(&self, max_count: usize, max_age: Option<Duration>) -> Result<usize, Error> {
        let records = self.load_records().await;
        let now = Utc::now();
        let mut doomed: Vec<u64> = Vec::new();

        if let Some(max_age) = max_age {
            doomed.extend(
                records
                    .iter()
                    .filter(|record| now - record.created_at > max_age)
                    .map(|record| record.id),
            );
        }

        if max_count > 0 {
            let mut remaining: Vec<&HistoryRecord> = records
                .iter()
                .filter(|record| !doomed.contains(&record.id))
                .collect();

            if remaining.len() > max_count {
                remaining.sort_by_key(|record| record.created_at);
                let excess = remaining.len() - max_count;
                doomed.extend(remaining[..excess].iter().map(|record| record.id));
            }
        }

        if doomed.is_empty() {
            return Ok(0);
        }

        debug!(count = doomed.len(), "pruning history records");
        self.delete_many(&doomed).await
    }
}

/// Whole-file JSON write through a temp file and rename, so a crash never
/// leaves a truncated document behind.
async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), Error> {
    let json = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");

    fs::write(&tmp, &json).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

/// Removes an audio artifact; a missing file is not an error.
async fn remove_artifact(path: &Path) {
    if let Err(error) = fs::remove_file(path).await {
        if error.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), %error, "failed to remove audio file");
        }
    }
}
