//! In-memory graph store.
//!
//! This is the reference implementation of `GraphStore`.
//! The committed graph is an immutable [`GraphSnapshot`] behind an
//! `ArcSwap`; readers load it without locking.
//!
//! ## Commit protocol
//!
//! - **Memory only**: optimistic. A commit builds the next snapshot from
//!   the one it loaded and publishes it with compare-and-swap. If another
//!   commit got there first, the batch is re-merged onto the newer
//!   snapshot. Concurrent writers to the same entity id therefore
//!   serialize at publication and the later one wins on properties.
//! - **Journaled**: the journal lock is held across merge, append and
//!   publish, so journal order is commit order and a batch is on disk
//!   before anyone can read it.
//!
//! Each commit clones the snapshot's maps (cheap `Arc` clones of the
//! facts, but linear in graph size). Fine for embedding and tests; a
//! large deployment wants a persistent-map snapshot.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::model::*;
use crate::tx::{CommitToken, Transaction, TxId, TxMode, WriteBatch};
use crate::Result;
use super::journal::{Journal, JournalEntry};
use super::{BackendConfig, GraphSnapshot, GraphStore, StoreError};

/// How many times a commit re-merges after losing a publication race.
const MAX_PUBLISH_ATTEMPTS: u32 = 64;

// ============================================================================
// MemoryStore
// ============================================================================

/// In-memory knowledge graph with snapshot isolation.
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    snapshot: ArcSwap<GraphSnapshot>,
    journal: Option<Mutex<Journal>>,
    next_tx_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                snapshot: ArcSwap::from_pointee(GraphSnapshot::empty()),
                journal: None,
                next_tx_id: AtomicU64::new(1),
            }),
        }
    }

    /// Open a journaled store, replaying whatever the journal holds.
    pub fn open_journal(path: &std::path::Path) -> Result<Self> {
        let (journal, entries) = Journal::open(path)?;
        let mut snapshot = GraphSnapshot::empty();
        let mut max_tx = 0;
        for entry in &entries {
            let (next, _) = snapshot.apply(&entry.batch, entry.committed_at)?;
            snapshot = next;
            max_tx = max_tx.max(entry.tx.0);
        }
        tracing::info!(
            path = %path.display(),
            batches = entries.len(),
            entities = snapshot.entity_count(),
            relations = snapshot.relation_count(),
            "replayed graph journal"
        );
        Ok(Self {
            inner: Arc::new(MemoryInner {
                snapshot: ArcSwap::from_pointee(snapshot),
                journal: Some(Mutex::new(journal)),
                next_tx_id: AtomicU64::new(max_tx + 1),
            }),
        })
    }

    pub fn open(config: &BackendConfig) -> Result<Self> {
        match config {
            BackendConfig::Memory => Ok(Self::new()),
            BackendConfig::Journal { path } => Self::open_journal(path),
        }
    }

    pub fn is_durable(&self) -> bool {
        self.inner.journal.is_some()
    }

    fn publish(&self, tx: TxId, batch: &WriteBatch) -> std::result::Result<CommitToken, StoreError> {
        if let Some(journal) = &self.inner.journal {
            let mut journal = journal.lock();
            let current = self.inner.snapshot.load_full();
            let committed_at = Utc::now();
            let (next, stats) = current.apply(batch, committed_at)?;
            journal.append(&JournalEntry {
                version: next.version(),
                tx,
                committed_at,
                batch: batch.clone(),
            })?;
            let version = next.version();
            self.inner.snapshot.store(Arc::new(next));
            tracing::debug!(%tx, version, ?stats, "committed batch (journaled)");
            return Ok(token(tx, version, committed_at, batch));
        }

        for attempt in 1..=MAX_PUBLISH_ATTEMPTS {
            let current = self.inner.snapshot.load_full();
            let committed_at = Utc::now();
            let (next, stats) = current.apply(batch, committed_at)?;
            let version = next.version();
            let prev = self.inner.snapshot.compare_and_swap(&current, Arc::new(next));
            if Arc::ptr_eq(&*prev, &current) {
                tracing::debug!(%tx, version, attempt, ?stats, "committed batch");
                return Ok(token(tx, version, committed_at, batch));
            }
            tracing::trace!(%tx, attempt, "lost publication race, re-merging");
        }
        Err(StoreError::Conflict { attempts: MAX_PUBLISH_ATTEMPTS })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn token(tx: TxId, version: u64, committed_at: chrono::DateTime<Utc>, batch: &WriteBatch) -> CommitToken {
    CommitToken {
        tx,
        version,
        committed_at,
        entities: batch.entities.len(),
        relations: batch.relations.len(),
    }
}

// ============================================================================
// MemoryTx
// ============================================================================

/// Transaction: a pinned snapshot plus a private write buffer.
pub struct MemoryTx {
    id: TxId,
    mode: TxMode,
    snapshot: Arc<GraphSnapshot>,
    staged: WriteBatch,
}

impl MemoryTx {
    fn staged_mut(&mut self) -> std::result::Result<&mut WriteBatch, StoreError> {
        match self.mode {
            TxMode::ReadWrite => Ok(&mut self.staged),
            TxMode::ReadOnly => Err(StoreError::ReadOnlyTransaction),
        }
    }
}

impl Transaction for MemoryTx {
    fn mode(&self) -> TxMode { self.mode }
    fn id(&self) -> TxId { self.id }
    fn snapshot(&self) -> &Arc<GraphSnapshot> { &self.snapshot }
}

// ============================================================================
// GraphStore impl
// ============================================================================

#[async_trait]
impl GraphStore for MemoryStore {
    type Tx = MemoryTx;

    async fn shutdown(&self) -> Result<()> { Ok(()) }

    async fn begin_tx(&self, mode: TxMode) -> Result<MemoryTx> {
        let id = TxId(self.inner.next_tx_id.fetch_add(1, Ordering::Relaxed));
        Ok(MemoryTx {
            id,
            mode,
            snapshot: self.inner.snapshot.load_full(),
            staged: WriteBatch::new(),
        })
    }

    async fn commit_tx(&self, tx: MemoryTx) -> Result<CommitToken> {
        if tx.mode == TxMode::ReadOnly || tx.staged.is_empty() {
            return Ok(token(tx.id, tx.snapshot.version(), Utc::now(), &tx.staged));
        }
        Ok(self.publish(tx.id, &tx.staged)?)
    }

    async fn rollback_tx(&self, tx: MemoryTx) -> Result<()> {
        tracing::debug!(tx = %tx.id, entities = tx.staged.entities.len(), "rolled back");
        Ok(())
    }

    async fn stage_entities(&self, tx: &mut MemoryTx, entities: Vec<Entity>) -> Result<()> {
        tx.staged_mut()?.entities.extend(entities);
        Ok(())
    }

    async fn stage_relations(&self, tx: &mut MemoryTx, relations: Vec<Relation>) -> Result<()> {
        tx.staged_mut()?.relations.extend(relations);
        Ok(())
    }

    async fn stage_document(&self, tx: &mut MemoryTx, document: Document) -> Result<()> {
        tx.staged_mut()?.document = Some(document);
        Ok(())
    }

    fn snapshot(&self) -> Arc<GraphSnapshot> {
        self.inner.snapshot.load_full()
    }
}

// ============================================================================
// Tests
// ============================================================================
