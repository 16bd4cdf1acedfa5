//! Per-document status tracking.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::loader::DocumentSource;
use crate::model::{Checksum, DocumentId, DocumentStatus};
use crate::{Error, Result};

/// Handle returned by `submit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackingId(pub Uuid);

impl TrackingId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TrackingId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TrackingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TrackingId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(TrackingId)
            .map_err(|_| Error::NotFound(format!("ingestion {s}")))
    }
}

/// One execution of an ingestion. A retry starts a new generation; writes
/// from an older generation are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Run {
    pub id: TrackingId,
    pub generation: u64,
}

impl std::fmt::Display for Run {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.id, self.generation)
    }
}

/// Where one document is, and how it got there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionStatus {
    pub tracking_id: TrackingId,
    pub source_uri: String,
    pub document_id: Option<DocumentId>,
    pub checksum: Option<Checksum>,
    pub stage: DocumentStatus,
    /// Stage retries spent in the current run.
    pub attempts: u32,
    /// Manual re-runs after failure.
    pub retries: u32,
    /// Content was already committed; nothing was written.
    pub skipped: bool,
    pub error: Option<String>,
    pub entities: usize,
    pub relations: usize,
    pub low_confidence: usize,
    pub commit_version: Option<u64>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The report of an inline ingestion is its final status.
pub type IngestionReport = IngestionStatus;

impl IngestionStatus {
    fn new(tracking_id: TrackingId, source_uri: String) -> Self {
        let now = Utc::now();
        Self {
            tracking_id,
            source_uri,
            document_id: None,
            checksum: None,
            stage: DocumentStatus::Pending,
            attempts: 0,
            retries: 0,
            skipped: false,
            error: None,
            entities: 0,
            relations: 0,
            low_confidence: 0,
            commit_version: None,
            submitted_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    pub fn is_committed(&self) -> bool {
        self.stage == DocumentStatus::Committed
    }
}

struct Entry {
    status: watch::Sender<IngestionStatus>,
    source: DocumentSource,
    abort: Option<AbortHandle>,
    cancelled: bool,
    generation: u64,
}

impl Entry {
    fn accepts(&self, run: Run) -> bool {
        !self.cancelled && self.generation == run.generation
    }
}

/// All tracked ingestions. One lock guards every transition so cancel and
/// the start of a commit cannot interleave.
#[derive(Default)]
pub(crate) struct StatusTracker {
    entries: RwLock<HashMap<TrackingId, Entry>>,
}

impl StatusTracker {
    pub fn register(&self, source: &DocumentSource) -> Run {
        let id = TrackingId::new();
        let (tx, _) = watch::channel(IngestionStatus::new(id, source.uri()));
        self.entries.write().insert(
            id,
            Entry { status: tx, source: source.clone(), abort: None, cancelled: false, generation: 0 },
        );
        Run { id, generation: 0 }
    }

    pub fn status(&self, id: TrackingId) -> Option<IngestionStatus> {
        self.entries.read().get(&id).map(|e| e.status.borrow().clone())
    }

    pub fn all(&self) -> Vec<IngestionStatus> {
        let mut all: Vec<IngestionStatus> =
            self.entries.read().values().map(|e| e.status.borrow().clone()).collect();
        all.sort_by_key(|s| s.submitted_at);
        all
    }

    pub fn subscribe(&self, id: TrackingId) -> Option<watch::Receiver<IngestionStatus>> {
        self.entries.read().get(&id).map(|e| e.status.subscribe())
    }

    pub fn set_abort(&self, run: Run, handle: AbortHandle) {
        if let Some(entry) = self.entries.write().get_mut(&run.id) {
            if entry.generation == run.generation {
                entry.abort = Some(handle);
            }
        }
    }

    /// Apply `f` unless the run was cancelled or superseded by a retry.
    /// Returns false when the write was ignored.
    pub fn update(&self, run: Run, f: impl FnOnce(&mut IngestionStatus)) -> bool {
        let entries = self.entries.read();
        let Some(entry) = entries.get(&run.id) else {
            return false;
        };
        if !entry.accepts(run) {
            return false;
        }
        entry.status.send_modify(|s| {
            f(s);
            s.updated_at = Utc::now();
        });
        true
    }

    pub fn transition(&self, run: Run, stage: DocumentStatus) -> bool {
        let moved = self.update(run, |s| s.stage = stage);
        if moved {
            tracing::info!(tracking_id = %run.id, generation = run.generation, %stage, "stage transition");
        }
        moved
    }

    /// Enter `Committing`. Once this returns true the run can no longer be
    /// cancelled.
    pub fn begin_commit(&self, run: Run) -> bool {
        self.transition(run, DocumentStatus::Committing)
    }

    pub fn fail(&self, run: Run, error: &Error) {
        let message = error.to_string();
        if self.update(run, |s| {
            s.stage = DocumentStatus::Failed;
            s.error = Some(message.clone());
        }) {
            tracing::warn!(tracking_id = %run.id, error = %message, "ingestion failed");
        }
    }

    /// Cancel a run that has not started committing.
    pub fn cancel(&self, id: TrackingId) -> Result<IngestionStatus> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("ingestion {id}")))?;
        let stage = entry.status.borrow().stage;
        if stage.is_terminal() || stage == DocumentStatus::Committing {
            return Err(Error::InvalidState(format!("ingestion {id} is {stage}, cannot cancel")));
        }
        entry.cancelled = true;
        if let Some(handle) = entry.abort.take() {
            handle.abort();
        }
        entry.status.send_modify(|s| {
            s.stage = DocumentStatus::Failed;
            s.error = Some(Error::Cancelled(format!("ingestion {id}")).to_string());
            s.updated_at = Utc::now();
        });
        tracing::info!(tracking_id = %id, "ingestion cancelled");
        Ok(entry.status.borrow().clone())
    }

    /// Reset a failed run for another attempt, bounded by `max_retries`.
    /// Returns the new run and the source to re-run. Any task still left
    /// over from an earlier run can no longer write.
    pub fn prepare_retry(&self, id: TrackingId, max_retries: u32) -> Result<(Run, DocumentSource)> {
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("ingestion {id}")))?;
        let current = entry.status.borrow().clone();
        if current.stage != DocumentStatus::Failed {
            return Err(Error::InvalidState(format!(
                "ingestion {id} is {}, only failed ingestions can be retried",
                current.stage
            )));
        }
        if current.retries >= max_retries {
            return Err(Error::InvalidState(format!(
                "ingestion {id} already retried {} times",
                current.retries
            )));
        }
        entry.generation += 1;
        entry.cancelled = false;
        if let Some(stale) = entry.abort.take() {
            stale.abort();
        }
        entry.status.send_modify(|s| {
            s.stage = DocumentStatus::Pending;
            s.retries += 1;
            s.attempts = 0;
            s.error = None;
            s.updated_at = Utc::now();
        });
        Ok((Run { id, generation: entry.generation }, entry.source.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_then_updates_ignored() {
        let tracker = StatusTracker::default();
        let run = tracker.register(&DocumentSource::text("a.txt", "x"));
        assert!(tracker.transition(run, DocumentStatus::Parsing));
        let status = tracker.cancel(run.id).unwrap();
        assert_eq!(status.stage, DocumentStatus::Failed);
        assert!(!tracker.begin_commit(run));
        assert_eq!(tracker.status(run.id).unwrap().stage, DocumentStatus::Failed);
    }

    #[test]
    fn test_cannot_cancel_while_committing() {
        let tracker = StatusTracker::default();
        let run = tracker.register(&DocumentSource::text("a.txt", "x"));
        assert!(tracker.begin_commit(run));
        assert!(matches!(tracker.cancel(run.id), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_retry_is_bounded() {
        let tracker = StatusTracker::default();
        let first = tracker.register(&DocumentSource::text("a.txt", "x"));
        assert!(matches!(tracker.prepare_retry(first.id, 1), Err(Error::InvalidState(_))));

        tracker.fail(first, &Error::Unavailable("boom".into()));
        let (second, _) = tracker.prepare_retry(first.id, 1).unwrap();
        let status = tracker.status(first.id).unwrap();
        assert_eq!(status.stage, DocumentStatus::Pending);
        assert_eq!(status.retries, 1);

        tracker.fail(second, &Error::Unavailable("boom".into()));
        assert!(matches!(tracker.prepare_retry(first.id, 1), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_superseded_run_cannot_write() {
        let tracker = StatusTracker::default();
        let stale = tracker.register(&DocumentSource::text("a.txt", "x"));
        assert!(tracker.transition(stale, DocumentStatus::Extracting));
        tracker.cancel(stale.id).unwrap();
        let (fresh, _) = tracker.prepare_retry(stale.id, 3).unwrap();
        assert_eq!(fresh.generation, stale.generation + 1);

        // the cancelled task has not reached its next await yet
        assert!(!tracker.transition(stale, DocumentStatus::Validating));
        assert!(!tracker.begin_commit(stale));
        tracker.fail(stale, &Error::Unavailable("late".into()));
        let status = tracker.status(stale.id).unwrap();
        assert_eq!(status.stage, DocumentStatus::Pending);
        assert_eq!(status.error, None);

        assert!(tracker.transition(fresh, DocumentStatus::Parsing));
        assert!(tracker.begin_commit(fresh));
    }

    #[test]
    fn test_tracking_id_parse() {
        let id = TrackingId::new();
        assert_eq!(id.to_string().parse::<TrackingId>().unwrap(), id);
        assert!("nope".parse::<TrackingId>().is_err());
    }
}
