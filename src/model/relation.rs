//! Relations: typed, directed edges between entities.

use serde::{Deserialize, Serialize};

use super::entity::{content_hash, merge_provenance};
use super::{EntityId, PropertyMap, Provenance, Value};

/// Relation identifier, derived from `(subject, predicate, object)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationId(pub String);

impl RelationId {
    pub fn derive(subject: &EntityId, predicate: &str, object: &EntityId) -> Self {
        Self(content_hash(&[&subject.0, predicate, &object.0]))
    }
}

impl std::fmt::Display for RelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Traversal direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Outgoing,
    Incoming,
    Both,
}

/// A directed edge `subject -predicate-> object`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub id: RelationId,
    pub subject: EntityId,
    pub predicate: String,
    pub object: EntityId,
    pub properties: PropertyMap,
    pub provenance: Vec<Provenance>,
    pub confidence: f64,
    pub low_confidence: bool,
    pub schema_version: u32,
}

impl Relation {
    pub fn new(subject: EntityId, predicate: impl Into<String>, object: EntityId) -> Self {
        let predicate = predicate.into();
        Self {
            id: RelationId::derive(&subject, &predicate, &object),
            subject,
            predicate,
            object,
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

    /// The "other" end of the relation from the given entity.
    pub fn other_end(&self, from: &EntityId) -> Option<&EntityId> {
        if *from == self.subject { Some(&self.object) }
        else if *from == self.object { Some(&self.subject) }
        else { None }
    }

    /// Same merge policy as [`super::Entity::absorb`].
    pub fn absorb(&mut self, newer: &Relation) {
        super::property_map::merge_properties(&mut self.properties, &newer.properties);
        merge_provenance(&mut self.provenance, &newer.provenance);
        self.confidence = self.confidence.max(newer.confidence);
        self.low_confidence =
            !self.provenance.is_empty() && self.provenance.iter().all(|p| p.low_confidence);
        self.schema_version = newer.schema_version;
    }
}
