//! Entities: typed nodes of the knowledge graph.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{PropertyMap, SpanRef, Value};

/// Content-derived entity identifier.
///
/// Two mentions with the same type and normalized label always map to the
/// same id, which is what makes re-ingestion deduplicate instead of
/// duplicating.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn derive(entity_type: &str, label: &str) -> Self {
        Self(content_hash(&[entity_type, &normalize_label(label)]))
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercase, trim, and collapse internal whitespace.
pub fn normalize_label(label: &str) -> String {
    label
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Truncated SHA-256 over NUL-separated parts.
pub(crate) fn content_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0u8]);
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(&hasher.finalize()[..16])
}

/// Where a fact came from and how sure the extractor was.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub span: SpanRef,
    pub confidence: f64,
    /// Below the extraction threshold. Kept for auditability, not dropped.
    pub low_confidence: bool,
    pub extractor: String,
}

/// Union `incoming` into `base`, deduplicating by span. A repeated span
/// keeps the higher confidence.
pub fn merge_provenance(base: &mut Vec<Provenance>, incoming: &[Provenance]) {
    for p in incoming {
        match base.iter_mut().find(|b| b.span == p.span) {
            Some(existing) => {
                if p.confidence > existing.confidence {
                    existing.confidence = p.confidence;
                    existing.low_confidence = p.low_confidence;
                    existing.extractor = p.extractor.clone();
                }
            }
            None => base.push(p.clone()),
        }
    }
}

/// A typed node in the knowledge graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub entity_type: String,
    /// Display label as first extracted, e.g. `"Article 5"`.
    pub label: String,
    pub properties: PropertyMap,
    pub provenance: Vec<Provenance>,
    pub confidence: f64,
    pub low_confidence: bool,
    /// Schema version the latest write was validated against.
    pub schema_version: u32,
}

impl Entity {
    pub fn new(entity_type: impl Into<String>, label: impl Into<String>) -> Self {
        let entity_type = entity_type.into();
        let label = label.into();
        Self {
            id: EntityId::derive(&entity_type, &label),
            entity_type,
            label,
            properties: PropertyMap::new(),
            provenance: Vec::new(),
            confidence: 1.0,
            low_confidence: false,
            schema_version: 0,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.confidence = provenance.confidence;
        self.low_confidence = provenance.low_confidence;
        self.provenance.push(provenance);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Property lookup that also resolves the `label` pseudo-property.
    pub fn attribute(&self, key: &str) -> Option<Value> {
        if key == "label" {
            return Some(Value::String(self.label.clone()));
        }
        self.properties.get(key).cloned()
    }

    /// Fold a later write of the same entity into this one.
    ///
    /// Properties: last committer wins per key. Provenance: union.
    pub fn absorb(&mut self, newer: &Entity) {
        super::property_map::merge_properties(&mut self.properties, &newer.properties);
        merge_provenance(&mut self.provenance, &newer.provenance);
        self.confidence = self.confidence.max(newer.confidence);
        self.low_confidence =
            !self.provenance.is_empty() && self.provenance.iter().all(|p| p.low_confidence);
        self.schema_version = newer.schema_version;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DocumentId;

    fn prov(doc: &str, start: usize, confidence: f64) -> Provenance {
        Provenance {
            span: SpanRef { document_id: DocumentId(doc.into()), page: 1, start, end: start + 5 },
            confidence,
            low_confidence: confidence < 0.5,
            extractor: "test".into(),
        }
    }

    #[test]
    fn test_id_ignores_case_and_spacing() {
        let a = Entity::new("Article", "Article 5");
        let b = Entity::new("Article", "  article   5 ");
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, Entity::new("Concept", "Article 5").id);
    }

    #[test]
    fn test_absorb_unions_provenance() {
        let mut a = Entity::new("Concept", "risk").with_provenance(prov("d1", 0, 0.9));
        let b = Entity::new("Concept", "risk")
            .with_property("note", "x")
            .with_provenance(prov("d2", 10, 0.4));
        a.absorb(&b);
        assert_eq!(a.provenance.len(), 2);
        assert_eq!(a.get("note"), Some(&Value::from("x")));
        assert!(!a.low_confidence);
        assert_eq!(a.confidence, 0.9);

        // same span again: no growth
        a.absorb(&b);
        assert_eq!(a.provenance.len(), 2);
    }

    #[test]
    fn test_low_confidence_clears_with_better_evidence() {
        let mut a = Entity::new("Concept", "risk").with_provenance(prov("d1", 0, 0.2));
        assert!(a.low_confidence);
        a.absorb(&Entity::new("Concept", "risk").with_provenance(prov("d1", 40, 0.8)));
        assert!(!a.low_confidence);
    }

    #[test]
    fn test_absorb_without_provenance_is_not_low_confidence() {
        let mut a = Entity::new("Article", "Article 5").with_property("number", 5);
        a.absorb(&Entity::new("Article", "Article 5").with_property("title", "Scope"));
        assert!(a.provenance.is_empty());
        assert!(!a.low_confidence);
        assert_eq!(a.properties.len(), 2);
    }
}
