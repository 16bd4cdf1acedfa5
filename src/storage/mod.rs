//! # Graph Store Trait
//!
//! This is THE contract between the ingestion pipeline / query engine and
//! any graph storage engine.
//!
//! ## Guarantees every store must give
//!
//! - **Batch atomicity**: `commit_tx` publishes all staged facts or none.
//! - **Snapshot isolation**: a transaction reads the snapshot that was
//!   current when it began; readers never see in-flight writes and never
//!   block writers.
//! - **Explicit merge**: an id that already exists is merged with
//!   last-committer-wins properties and unioned provenance, never
//!   replaced wholesale.
//!
//! ## Implementations
//!
//! | Store | Module | Description |
//! |-------|--------|-------------|
//! | `MemoryStore` | `memory` | In-memory snapshots, optional durable journal |

pub mod journal;
pub mod memory;
pub mod snapshot;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::model::*;
use crate::query::{RowStream, TraversalPlan};
use crate::tx::{CommitToken, Transaction, TxMode, WriteBatch};
use crate::Result;

pub use memory::MemoryStore;
pub use snapshot::{ApplyStats, GraphSnapshot};

// ============================================================================
// Store Configuration
// ============================================================================

/// Which store to open.
#[derive(Debug, Clone, Default)]
pub enum BackendConfig {
    /// In-memory (no persistence)
    #[default]
    Memory,

    /// In-memory snapshots backed by a JSON-lines commit journal
    Journal { path: PathBuf },
}

// ============================================================================
// Errors
// ============================================================================

/// Transaction or commit failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// Concurrent commits kept winning; retry later.
    #[error("commit conflict after {attempts} attempts")]
    Conflict { attempts: u32 },

    #[error("relation {relation} references missing entity {missing}")]
    DanglingRelation { relation: RelationId, missing: EntityId },

    #[error("cannot write in a read-only transaction")]
    ReadOnlyTransaction,

    #[error("journal: {0}")]
    Journal(String),

    #[error("corrupt journal: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Contention is worth retrying; everything else is not.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

// ============================================================================
// GraphStore Trait
// ============================================================================

/// The universal storage contract.
#[async_trait]
pub trait GraphStore: Send + Sync + 'static {
    /// The transaction type for this store.
    type Tx: Transaction;

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Shut down the store, flushing any pending writes.
    async fn shutdown(&self) -> Result<()>;

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begin a new transaction pinned to the current snapshot.
    async fn begin_tx(&self, mode: TxMode) -> Result<Self::Tx>;

    /// Publish everything staged in `tx` atomically.
    async fn commit_tx(&self, tx: Self::Tx) -> Result<CommitToken>;

    /// Discard everything staged in `tx`.
    async fn rollback_tx(&self, tx: Self::Tx) -> Result<()>;

    // ========================================================================
    // Staging (buffered until commit)
    // ========================================================================

    async fn stage_entities(&self, tx: &mut Self::Tx, entities: Vec<Entity>) -> Result<()>;

    async fn stage_relations(&self, tx: &mut Self::Tx, relations: Vec<Relation>) -> Result<()>;

    /// Record the source document; committed together with its facts.
    async fn stage_document(&self, tx: &mut Self::Tx, document: Document) -> Result<()>;

    /// Stage a whole batch and commit it, all-or-nothing.
    ///
    /// Default: begin, stage each part, commit.
    async fn upsert_batch(&self, batch: WriteBatch) -> Result<CommitToken> {
        let mut tx = self.begin_tx(TxMode::ReadWrite).await?;
        self.stage_entities(&mut tx, batch.entities).await?;
        self.stage_relations(&mut tx, batch.relations).await?;
        if let Some(doc) = batch.document {
            self.stage_document(&mut tx, doc).await?;
        }
        self.commit_tx(tx).await
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// The last fully committed snapshot.
    fn snapshot(&self) -> Arc<GraphSnapshot>;

    /// Run a traversal plan against the current snapshot.
    ///
    /// Rows are produced lazily. The stream is finite; re-issuing the query
    /// restarts it against whatever snapshot is current then.
    fn query(&self, plan: &TraversalPlan) -> RowStream {
        RowStream::new(self.snapshot(), plan.clone())
    }

    /// Get an entity by id as seen by `tx`.
    async fn get_entity(&self, tx: &Self::Tx, id: &EntityId) -> Result<Option<Entity>> {
        Ok(tx.snapshot().entity(id).cloned())
    }

    /// Relations of an entity as seen by `tx`.
    async fn get_relations(
        &self,
        tx: &Self::Tx,
        id: &EntityId,
        dir: Direction,
        predicate: Option<&str>,
    ) -> Result<Vec<Relation>> {
        Ok(tx
            .snapshot()
            .relations_of(id, dir, predicate)
            .into_iter()
            .cloned()
            .collect())
    }

    async fn document_by_checksum(&self, checksum: &Checksum) -> Result<Option<Document>> {
        Ok(self.snapshot().document_by_checksum(checksum).cloned())
    }

    async fn entity_count(&self) -> Result<u64> {
        Ok(self.snapshot().entity_count() as u64)
    }

    async fn relation_count(&self) -> Result<u64> {
        Ok(self.snapshot().relation_count() as u64)
    }
}
