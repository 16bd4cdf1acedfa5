//! Immutable committed views of the graph.
//!
//! A `GraphSnapshot` is never mutated once published. Commits build the
//! next snapshot from the current one with [`GraphSnapshot::apply`] and
//! swap it in; readers holding the old `Arc` keep a consistent view.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use hashbrown::HashMap;

use crate::model::*;
use crate::tx::WriteBatch;
use super::StoreError;

/// Counts of what one `apply` changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub entities_created: usize,
    pub entities_merged: usize,
    pub relations_created: usize,
    pub relations_merged: usize,
}

/// All committed entities, relations and documents at one version.
#[derive(Debug, Clone, Default)]
pub struct GraphSnapshot {
    version: u64,
    committed_at: Option<DateTime<Utc>>,
    entities: HashMap<EntityId, Arc<Entity>>,
    relations: HashMap<RelationId, Arc<Relation>>,
    /// entity id → ids of relations where it is the subject
    outgoing: HashMap<EntityId, Vec<RelationId>>,
    /// entity id → ids of relations where it is the object
    incoming: HashMap<EntityId, Vec<RelationId>>,
    /// entity type → ids (poor man's type index)
    by_type: HashMap<String, Vec<EntityId>>,
    documents: HashMap<DocumentId, Arc<Document>>,
    checksums: HashMap<Checksum, DocumentId>,
}

impl GraphSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn committed_at(&self) -> Option<DateTime<Utc>> {
        self.committed_at
    }

    // ========================================================================
    // Lookups
    // ========================================================================

    pub fn entity(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id).map(Arc::as_ref)
    }

    pub fn relation(&self, id: &RelationId) -> Option<&Relation> {
        self.relations.get(id).map(Arc::as_ref)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values().map(Arc::as_ref)
    }

    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.values().map(Arc::as_ref)
    }

    pub fn entities_of_type<'a>(&'a self, entity_type: &str) -> impl Iterator<Item = &'a Entity> + 'a {
        self.by_type
            .get(entity_type)
            .into_iter()
            .flatten()
            .filter_map(|id| self.entity(id))
    }

    /// Entity types present in committed data.
    pub fn entity_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.by_type.keys().cloned().collect();
        types.sort();
        types
    }

    /// Relations touching `id`, filtered by direction and optionally predicate.
    pub fn relations_of(
        &self,
        id: &EntityId,
        dir: Direction,
        predicate: Option<&str>,
    ) -> Vec<&Relation> {
        let out = matches!(dir, Direction::Outgoing | Direction::Both)
            .then(|| self.outgoing.get(id))
            .flatten();
        let inc = matches!(dir, Direction::Incoming | Direction::Both)
            .then(|| self.incoming.get(id))
            .flatten();

        let mut result: Vec<&Relation> = out
            .into_iter()
            .chain(inc)
            .flatten()
            .filter_map(|rid| self.relation(rid))
            .filter(|r| predicate.is_none_or(|p| r.predicate == p))
            .collect();
        // a self-loop sits in both lists
        if dir == Direction::Both {
            result.sort_by(|a, b| a.id.cmp(&b.id));
            result.dedup_by(|a, b| a.id == b.id);
        }
        result
    }

    pub fn document(&self, id: &DocumentId) -> Option<&Document> {
        self.documents.get(id).map(Arc::as_ref)
    }

    pub fn document_by_checksum(&self, checksum: &Checksum) -> Option<&Document> {
        self.checksums.get(checksum).and_then(|id| self.document(id))
    }

    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.documents.values().map(Arc::as_ref)
    }

    // ========================================================================
    // Commit
    // ========================================================================

    /// Build the next snapshot with `batch` merged in.
    ///
    /// Fails without side effects if any relation points at an entity that
    /// is neither in the batch nor already committed.
    ///
    /// Merge policy for ids that already exist: properties are
    /// last-committer-wins per key, provenance lists are unioned.
    pub fn apply(
        &self,
        batch: &WriteBatch,
        committed_at: DateTime<Utc>,
    ) -> Result<(GraphSnapshot, ApplyStats), StoreError> {
        let mut next = self.clone();
        let mut stats = ApplyStats::default();
        next.version = self.version + 1;
        next.committed_at = Some(committed_at);

        for entity in &batch.entities {
            match next.entities.get_mut(&entity.id) {
                Some(existing) => {
                    Arc::make_mut(existing).absorb(entity);
                    stats.entities_merged += 1;
                }
                None => {
                    next.by_type
                        .entry(entity.entity_type.clone())
                        .or_default()
                        .push(entity.id.clone());
                    next.entities.insert(entity.id.clone(), Arc::new(entity.clone()));
                    stats.entities_created += 1;
                }
            }
        }

        for relation in &batch.relations {
            for end in [&relation.subject, &relation.object] {
                if !next.entities.contains_key(end) {
                    return Err(StoreError::DanglingRelation {
                        relation: relation.id.clone(),
                        missing: end.clone(),
                    });
                }
            }
            match next.relations.get_mut(&relation.id) {
                Some(existing) => {
                    Arc::make_mut(existing).absorb(relation);
                    stats.relations_merged += 1;
                }
                None => {
                    next.outgoing
                        .entry(relation.subject.clone())
                        .or_default()
                        .push(relation.id.clone());
                    next.incoming
                        .entry(relation.object.clone())
                        .or_default()
                        .push(relation.id.clone());
                    next.relations.insert(relation.id.clone(), Arc::new(relation.clone()));
                    stats.relations_created += 1;
                }
            }
        }

        if let Some(doc) = &batch.document {
            next.checksums.insert(doc.checksum.clone(), doc.id.clone());
            next.documents.insert(doc.id.clone(), Arc::new(doc.clone()));
        }

        Ok((next, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prov(doc: &str, start: usize) -> Provenance {
        Provenance {
            span: SpanRef { document_id: DocumentId(doc.into()), page: 1, start, end: start + 3 },
            confidence: 0.9,
            low_confidence: false,
            extractor: "test".into(),
        }
    }

    #[test]
    fn test_apply_does_not_touch_original() {
        let base = GraphSnapshot::empty();
        let a = Entity::new("Article", "Article 5");
        let batch = WriteBatch::new().with_entity(a.clone());
        let (next, stats) = base.apply(&batch, Utc::now()).unwrap();
        assert_eq!(base.entity_count(), 0);
        assert_eq!(next.entity_count(), 1);
        assert_eq!(next.version(), 1);
        assert_eq!(stats.entities_created, 1);
    }

    #[test]
    fn test_dangling_relation_rejects_whole_batch() {
        let a = Entity::new("Article", "Article 5");
        let ghost = EntityId("ghost".into());
        let batch = WriteBatch::new()
            .with_entity(a.clone())
            .with_relation(Relation::new(a.id.clone(), "requires", ghost.clone()));
        let err = GraphSnapshot::empty().apply(&batch, Utc::now()).unwrap_err();
        assert!(matches!(err, StoreError::DanglingRelation { missing, .. } if missing == ghost));
    }

    #[test]
    fn test_merge_keeps_older_snapshot_stable() {
        let a1 = Entity::new("Concept", "risk").with_provenance(prov("d1", 0));
        let (s1, _) = GraphSnapshot::empty()
            .apply(&WriteBatch::new().with_entity(a1.clone()), Utc::now())
            .unwrap();
        let a2 = Entity::new("Concept", "risk").with_provenance(prov("d2", 7));
        let (s2, stats) = s1.apply(&WriteBatch::new().with_entity(a2), Utc::now()).unwrap();

        assert_eq!(stats.entities_merged, 1);
        assert_eq!(s1.entity(&a1.id).unwrap().provenance.len(), 1);
        assert_eq!(s2.entity(&a1.id).unwrap().provenance.len(), 2);
    }

    #[test]
    fn test_relations_of_directions() {
        let a = Entity::new("Article", "Article 5");
        let b = Entity::new("Article", "Article 6");
        let c = Entity::new("Concept", "risk");
        let batch = WriteBatch::new()
            .with_entity(a.clone())
            .with_entity(b.clone())
            .with_entity(c.clone())
            .with_relation(Relation::new(a.id.clone(), "refers_to", b.id.clone()))
            .with_relation(Relation::new(b.id.clone(), "requires", c.id.clone()));
        let (s, _) = GraphSnapshot::empty().apply(&batch, Utc::now()).unwrap();

        assert_eq!(s.relations_of(&b.id, Direction::Outgoing, None).len(), 1);
        assert_eq!(s.relations_of(&b.id, Direction::Incoming, None).len(), 1);
        assert_eq!(s.relations_of(&b.id, Direction::Both, None).len(), 2);
        assert_eq!(s.relations_of(&b.id, Direction::Both, Some("requires")).len(), 1);
        assert_eq!(s.entities_of_type("Article").count(), 2);
    }
}
