//! Durable storage for terminal solve outcomes
//!
//! Two file layouts are provided. [`SnapshotStore`] keeps a single JSON object
//! mapping task id to result and rewrites it on every outcome; it reads and
//! writes the same document older deployments produced. [`JournalStore`]
//! appends one JSON line per outcome and compacts the file when it loads, so a
//! busy server does not pay for a full rewrite on every task.

use crate::{CaptchaError, Config, SolveRecord, StoreKind, TaskId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Key-value persistence for task outcomes.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Read every stored outcome.
    async fn load_all(&self) -> Result<Vec<(TaskId, SolveRecord)>, CaptchaError>;

    /// Insert or replace the outcome of one task.
    async fn upsert(&self, id: TaskId, record: &SolveRecord) -> Result<(), CaptchaError>;
}

/// Build the durable store selected in the configuration.
pub fn open_store(config: &Config) -> Arc<dyn DurableStore> {
    match config.store_kind {
        StoreKind::Snapshot => Arc::new(SnapshotStore::new(&config.results_path)),
        StoreKind::Journal => Arc::new(JournalStore::new(&config.results_path)),
    }
}

fn parse_task_id(key: &str) -> Option<TaskId> {
    match key.parse() {
        Ok(id) => Some(id),
        Err(_) => {
            warn!("Skipping stored result with invalid task id {:?}", key);
            None
        }
    }
}

async fn replace_file(path: &Path, contents: &[u8]) -> Result<(), CaptchaError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

/// Single JSON document, rewritten atomically on every upsert.
pub struct SnapshotStore {
    path: PathBuf,
    snapshot: Mutex<BTreeMap<String, SolveRecord>>,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            snapshot: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DurableStore for SnapshotStore {
    async fn load_all(&self) -> Result<Vec<(TaskId, SolveRecord)>, CaptchaError> {
        if !fs::try_exists(&self.path).await? {
            debug!("No result file at {}", self.path.display());
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path).await?;
        let document: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&content)?;

        let mut snapshot = self.snapshot.lock().await;
        let mut records = Vec::with_capacity(document.len());

        for (key, value) in document {
            // Pending markers were written as bare strings; they never resolve.
            let record: SolveRecord = match serde_json::from_value(value) {
                Ok(record) => record,
                Err(_) => continue,
            };
            if let Some(id) = parse_task_id(&key) {
                snapshot.insert(key, record.clone());
                records.push((id, record));
            }
        }

        Ok(records)
    }

    async fn upsert(&self, id: TaskId, record: &SolveRecord) -> Result<(), CaptchaError> {
        let mut snapshot = self.snapshot.lock().await;
        snapshot.insert(id.to_string(), record.clone());

        let contents = serde_json::to_vec_pretty(&*snapshot)?;
        replace_file(&self.path, &contents)
            .await
            .map_err(|e| CaptchaError::Persistence(e.to_string()))
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct JournalEntry {
    id: TaskId,
    #[serde(flatten)]
    record: SolveRecord,
}

/// Append-only JSON lines journal, compacted on load.
pub struct JournalStore {
    path: PathBuf,
    // Serialises appends with each other and with compaction.
    file: Mutex<()>,
}

impl JournalStore {
    /// Journals shorter than this are never compacted.
    pub const COMPACTION_MIN_LINES: usize = 64;

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn compact(&self, live: &BTreeMap<TaskId, SolveRecord>) -> Result<(), CaptchaError> {
        let mut contents = Vec::new();
        for (id, record) in live {
            let entry = JournalEntry {
                id: *id,
                record: record.clone(),
            };
            serde_json::to_writer(&mut contents, &entry)?;
            contents.push(b'\n');
        }
        replace_file(&self.path, &contents).await
    }
}

#[async_trait]
impl DurableStore for JournalStore {
    async fn load_all(&self) -> Result<Vec<(TaskId, SolveRecord)>, CaptchaError> {
        let _file = self.file.lock().await;

        if !fs::try_exists(&self.path).await? {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path).await?;
        let mut live = BTreeMap::new();
        let mut total = 0;

        for (number, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            total += 1;
            match serde_json::from_str::<JournalEntry>(line) {
                Ok(entry) => {
                    live.insert(entry.id, entry.record);
                }
                Err(e) => warn!("Skipping journal line {}: {}", number + 1, e),
            }
        }

        if total >= Self::COMPACTION_MIN_LINES && total > live.len() * 2 {
            info!(
                "Compacting result journal: {} lines, {} live entries",
                total,
                live.len()
            );
            self.compact(&live).await?;
        }

        Ok(live.into_iter().collect())
    }

    async fn upsert(&self, id: TaskId, record: &SolveRecord) -> Result<(), CaptchaError> {
        let mut line = serde_json::to_vec(&JournalEntry {
            id,
            record: record.clone(),
        })?;
        line.push(b'\n');

        let _file = self.file.lock().await;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| CaptchaError::Persistence(e.to_string()))?;
        file.write_all(&line)
            .await
            .map_err(|e| CaptchaError::Persistence(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| CaptchaError::Persistence(e.to_string()))?;

        Ok(())
    }
}

/// Volatile store, for tests and throwaway runs.
#[derive(Default)]
pub struct MemoryStore {
    records: std::sync::Mutex<HashMap<TaskId, SolveRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = (TaskId, SolveRecord)>) -> Self {
        Self {
            records: std::sync::Mutex::new(records.into_iter().collect()),
        }
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn load_all(&self) -> Result<Vec<(TaskId, SolveRecord)>, CaptchaError> {
        let records = self
            .records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(records.iter().map(|(id, r)| (*id, r.clone())).collect())
    }

    async fn upsert(&self, id: TaskId, record: &SolveRecord) -> Result<(), CaptchaError> {
        self.records
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(id, record.clone());
        Ok(())
    }
}
