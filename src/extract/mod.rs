//! # Entity & Relation Extraction
//!
//! Turns canonical text spans into candidate facts. Every candidate carries
//! a confidence in `[0, 1]` and provenance pointing back at the span it was
//! read from. Candidates below the configured threshold are kept but
//! flagged `low_confidence`; nothing is silently dropped.
//!
//! | Extractor | Module | Description |
//! |-----------|--------|-------------|
//! | `RuleExtractor` | `rules` | Deterministic patterns for regulatory prose |
//! | `ModelExtractor` | `model` | External completion model behind a strict output boundary |

pub mod candidate;
pub mod model;
pub mod rules;

use std::time::Duration;

use async_trait::async_trait;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use crate::model::{DocumentId, Entity, EntityId, Relation, RelationId, TextSpan};

pub use candidate::CandidateFact;
pub use model::{ModelClient, ModelExtractor, RetryPolicy};
pub use rules::RuleExtractor;

/// Default threshold below which facts are flagged.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.5;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExtractionError {
    /// The model endpoint refused or could not be reached.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),

    /// The model answered with something that is not a list of facts.
    #[error("malformed model output: {0}")]
    MalformedOutput(String),

    #[error("extraction timed out after {0:?}")]
    Timeout(Duration),
}

impl ExtractionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ExtractionError::ModelUnavailable(_) | ExtractionError::Timeout(_))
    }
}

// ============================================================================
// Extraction result
// ============================================================================

/// Candidate facts for one document, deduplicated by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

impl Extraction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }

    pub fn entity(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id == *id)
    }

    /// Fold duplicates of the same fact into one, merging provenance the
    /// same way the store does.
    pub fn dedup(&mut self) {
        self.entities = dedup_by_id(std::mem::take(&mut self.entities), |e| e.id.clone(), Entity::absorb);
        self.relations =
            dedup_by_id(std::mem::take(&mut self.relations), |r| r.id.clone(), Relation::absorb);
    }

    /// Flag every provenance entry below `threshold` and recompute each
    /// fact's own flag from its evidence.
    pub fn flag_low_confidence(&mut self, threshold: f64) {
        for e in &mut self.entities {
            for p in &mut e.provenance {
                p.low_confidence = p.confidence < threshold;
            }
            e.low_confidence = !e.provenance.is_empty() && e.provenance.iter().all(|p| p.low_confidence);
        }
        for r in &mut self.relations {
            for p in &mut r.provenance {
                p.low_confidence = p.confidence < threshold;
            }
            r.low_confidence = !r.provenance.is_empty() && r.provenance.iter().all(|p| p.low_confidence);
        }
    }

    pub fn low_confidence_count(&self) -> usize {
        self.entities.iter().filter(|e| e.low_confidence).count()
            + self.relations.iter().filter(|r| r.low_confidence).count()
    }
}

fn dedup_by_id<T, K>(items: Vec<T>, key: impl Fn(&T) -> K, absorb: impl Fn(&mut T, &T)) -> Vec<T>
where
    K: std::hash::Hash + Eq,
{
    let mut index: HashMap<K, usize> = HashMap::new();
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        match index.get(&key(&item)) {
            Some(&i) => absorb(&mut out[i], &item),
            None => {
                index.insert(key(&item), out.len());
                out.push(item);
            }
        }
    }
    out
}

// ============================================================================
// Extractor trait
// ============================================================================

/// Produce candidate facts from one document's spans.
///
/// Dropping the returned future cancels any in-flight work.
#[async_trait]
pub trait Extractor: Send + Sync + 'static {
    /// Recorded on every provenance entry this extractor produces.
    fn name(&self) -> &str;

    async fn extract(
        &self,
        document_id: &DocumentId,
        spans: &[TextSpan],
    ) -> Result<Extraction, ExtractionError>;
}

/// Ids referenced by relations but not produced as entities.
pub(crate) fn unresolved_endpoints(extraction: &Extraction) -> Vec<(RelationId, EntityId)> {
    let known: hashbrown::HashSet<&EntityId> = extraction.entities.iter().map(|e| &e.id).collect();
    extraction
        .relations
        .iter()
        .flat_map(|r| [(&r.id, &r.subject), (&r.id, &r.object)])
        .filter(|(_, id)| !known.contains(id))
        .map(|(rid, id)| (rid.clone(), id.clone()))
        .collect()
}
