//! Task outcomes and the in-memory result store backed by durable storage

use crate::{CaptchaError, DurableStore};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub type TaskId = Uuid;

/// Token value reported for every failed solve.
pub const FAILED_TOKEN: &str = "CAPTCHA_FAIL";

/// State of one task. Leaves `Pending` at most once.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Pending,
    Success {
        token: String,
        elapsed_time: f64,
    },
    Failure {
        reason: Option<String>,
        elapsed_time: f64,
    },
}

impl Outcome {
    pub fn success(token: impl Into<String>, elapsed: Duration) -> Self {
        Outcome::Success {
            token: token.into(),
            elapsed_time: round_seconds(elapsed),
        }
    }

    pub fn failure(reason: Option<String>, elapsed: Duration) -> Self {
        Outcome::Failure {
            reason,
            elapsed_time: round_seconds(elapsed),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Outcome::Pending)
    }

    /// Response/persisted body of a terminal outcome.
    pub fn to_record(&self) -> Option<SolveRecord> {
        match self {
            Outcome::Pending => None,
            Outcome::Success {
                token,
                elapsed_time,
            } => Some(SolveRecord {
                token: token.clone(),
                elapsed_time: *elapsed_time,
                error: None,
            }),
            Outcome::Failure {
                reason,
                elapsed_time,
            } => Some(SolveRecord {
                token: FAILED_TOKEN.to_string(),
                elapsed_time: *elapsed_time,
                error: reason.clone(),
            }),
        }
    }
}

impl From<SolveRecord> for Outcome {
    fn from(record: SolveRecord) -> Self {
        if record.token == FAILED_TOKEN {
            Outcome::Failure {
                reason: record.error,
                elapsed_time: record.elapsed_time,
            }
        } else {
            Outcome::Success {
                token: record.token,
                elapsed_time: record.elapsed_time,
            }
        }
    }
}

/// Terminal outcome as it appears on the wire and on disk.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SolveRecord {
    pub token: String,
    pub elapsed_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn round_seconds(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 1000.0).round() / 1000.0
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub pending: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Task id -> outcome map. Terminal outcomes are written through to durable
/// storage; pending markers live only in memory.
#[derive(Clone)]
pub struct ResultStore {
    entries: Arc<DashMap<TaskId, Outcome>>,
    durable: Arc<dyn DurableStore>,
}

impl ResultStore {
    /// Load every persisted outcome. A broken or missing backing store is not
    /// fatal: the store starts empty.
    pub async fn load(durable: Arc<dyn DurableStore>) -> Self {
        let entries = DashMap::new();

        match durable.load_all().await {
            Ok(records) => {
                for (id, record) in records {
                    entries.insert(id, Outcome::from(record));
                }
                info!("Loaded {} stored results", entries.len());
            }
            Err(e) => {
                warn!(
                    "Error loading results: {}. Starting with an empty result store.",
                    e
                );
            }
        }

        Self {
            entries: Arc::new(entries),
            durable,
        }
    }

    pub fn put_pending(&self, id: TaskId) -> Result<(), CaptchaError> {
        match self.entries.entry(id) {
            Entry::Occupied(_) => Err(CaptchaError::DuplicateTask(id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Outcome::Pending);
                Ok(())
            }
        }
    }

    /// Record a terminal outcome and flush it to durable storage.
    ///
    /// A task that already finished keeps its first outcome. Persistence
    /// failures are logged and leave the in-memory state authoritative.
    pub async fn put_outcome(&self, id: TaskId, outcome: Outcome) -> Result<(), CaptchaError> {
        let record = outcome.to_record().ok_or_else(|| {
            CaptchaError::Validation("cannot record a pending outcome".to_string())
        })?;

        match self.entries.entry(id) {
            Entry::Occupied(mut existing) => {
                if existing.get().is_terminal() {
                    return Err(CaptchaError::DuplicateTask(id.to_string()));
                }
                existing.insert(outcome);
            }
            Entry::Vacant(slot) => {
                debug!(task_id = %id, "Recording outcome without pending marker");
                slot.insert(outcome);
            }
        }

        if let Err(e) = self.durable.upsert(id, &record).await {
            error!(task_id = %id, "Error saving result: {}", e);
        }

        Ok(())
    }

    pub fn get(&self, id: &TaskId) -> Option<Outcome> {
        self.entries.get(id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn counts(&self) -> StoreCounts {
        let mut counts = StoreCounts::default();
        for entry in self.entries.iter() {
            match entry.value() {
                Outcome::Pending => counts.pending += 1,
                Outcome::Success { .. } => counts.succeeded += 1,
                Outcome::Failure { .. } => counts.failed += 1,
            }
        }
        counts
    }
}
