//! Transaction management.
//!
//! A write transaction buffers one document's facts; nothing it stages is
//! visible until `commit_tx` publishes the whole batch at once.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Document, Entity, Relation};
use crate::storage::GraphSnapshot;

/// Transaction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxMode {
    ReadOnly,
    ReadWrite,
}

/// Opaque transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxId(pub u64);

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tx-{}", self.0)
    }
}

/// Transaction trait that all stores must implement.
pub trait Transaction: Send + Sync {
    fn mode(&self) -> TxMode;
    fn id(&self) -> TxId;
    /// The committed snapshot this transaction reads from.
    fn snapshot(&self) -> &Arc<GraphSnapshot>;
}

/// Everything one document contributes to the graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteBatch {
    pub document: Option<Document>,
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, document: Document) -> Self {
        self.document = Some(document);
        self
    }

    pub fn with_entity(mut self, entity: Entity) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn with_relation(mut self, relation: Relation) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.document.is_none() && self.entities.is_empty() && self.relations.is_empty()
    }
}

/// Proof that a batch was published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitToken {
    pub tx: TxId,
    /// Snapshot version that first contains the batch.
    pub version: u64,
    pub committed_at: DateTime<Utc>,
    pub entities: usize,
    pub relations: usize,
}
