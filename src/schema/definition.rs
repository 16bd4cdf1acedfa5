//! Schema definitions: entity types, property kinds, relation rules.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::model::{Entity, PropertyMap, Relation, Value};
use crate::{Error, Result};

/// Kind of value a declared property accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    String,
    Integer,
    /// Integers are accepted too.
    Float,
    Boolean,
    Any,
}

impl ValueKind {
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (ValueKind::Any, _) => true,
            (ValueKind::String, Value::String(_)) => true,
            (ValueKind::Integer, Value::Int(_)) => true,
            (ValueKind::Float, Value::Float(_) | Value::Int(_)) => true,
            (ValueKind::Boolean, Value::Bool(_)) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ValueKind::String => "string",
            ValueKind::Integer => "integer",
            ValueKind::Float => "float",
            ValueKind::Boolean => "boolean",
            ValueKind::Any => "any",
        };
        f.write_str(s)
    }
}

/// An allowed entity type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityTypeDef {
    pub properties: BTreeMap<String, ValueKind>,
    pub required: Vec<String>,
}

impl EntityTypeDef {
    pub fn with_property(mut self, key: impl Into<String>, kind: ValueKind) -> Self {
        self.properties.insert(key.into(), kind);
        self
    }
}

/// A predicate permitted between one entity type pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationRule {
    pub predicate: String,
    pub subject_type: String,
    pub object_type: String,
    #[serde(default)]
    pub properties: BTreeMap<String, ValueKind>,
}

impl RelationRule {
    pub fn new(predicate: &str, subject_type: &str, object_type: &str) -> Self {
        Self {
            predicate: predicate.into(),
            subject_type: subject_type.into(),
            object_type: object_type.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, kind: ValueKind) -> Self {
        self.properties.insert(key.into(), kind);
        self
    }
}

/// Why a fact was rejected. Facts are never coerced to fit.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaViolation {
    #[error("unknown entity type '{0}'")]
    UnknownEntityType(String),

    #[error("unknown predicate '{0}'")]
    UnknownPredicate(String),

    #[error("predicate '{predicate}' is not permitted from {subject_type} to {object_type}")]
    PredicateNotPermitted { predicate: String, subject_type: String, object_type: String },

    #[error("{owner}: undeclared property '{key}'")]
    UndeclaredProperty { owner: String, key: String },

    #[error("{owner}: property '{key}' expects {expected}, got {got}")]
    PropertyKind { owner: String, key: String, expected: ValueKind, got: &'static str },

    #[error("{owner}: missing required property '{key}'")]
    MissingProperty { owner: String, key: String },

    #[error("relation endpoint {0} has no known type")]
    UnresolvedEndpoint(String),
}

/// The full set of allowed types and predicates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaDefinition {
    pub entity_types: BTreeMap<String, EntityTypeDef>,
    pub relations: Vec<RelationRule>,
}

impl SchemaDefinition {
    /// Built-in schema for regulatory text: articles and the concepts they
    /// govern.
    pub fn regulatory() -> Self {
        let mut entity_types = BTreeMap::new();
        entity_types.insert(
            "Article".to_string(),
            EntityTypeDef::default()
                .with_property("number", ValueKind::Integer)
                .with_property("suffix", ValueKind::String)
                .with_property("title", ValueKind::String)
                .with_property("regulation", ValueKind::String),
        );
        entity_types.insert(
            "Concept".to_string(),
            EntityTypeDef::default()
                .with_property("definition", ValueKind::String)
                .with_property("category", ValueKind::String),
        );
        Self {
            entity_types,
            relations: vec![
                RelationRule::new("requires", "Article", "Concept").with_property("scope", ValueKind::String),
                RelationRule::new("prohibits", "Article", "Concept").with_property("scope", ValueKind::String),
                RelationRule::new("defines", "Article", "Concept"),
                RelationRule::new("applies_to", "Article", "Concept"),
                RelationRule::new("refers_to", "Article", "Article"),
                RelationRule::new("amends", "Article", "Article"),
            ],
        }
    }

    /// Load from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(serde_json::from_str(&text)?),
            _ => toml::from_str(&text)
                .map_err(|e| Error::Config(format!("schema file {}: {e}", path.display()))),
        }
    }

    pub fn with_entity_type(mut self, name: impl Into<String>, def: EntityTypeDef) -> Self {
        self.entity_types.insert(name.into(), def);
        self
    }

    pub fn with_relation(mut self, rule: RelationRule) -> Self {
        self.relations.push(rule);
        self
    }

    pub fn has_entity_type(&self, name: &str) -> bool {
        self.entity_types.contains_key(name)
    }

    pub fn has_predicate(&self, predicate: &str) -> bool {
        self.relations.iter().any(|r| r.predicate == predicate)
    }

    /// Check internal consistency: rules must reference declared types.
    pub fn check(&self) -> Result<()> {
        for name in self.entity_types.keys() {
            if name.trim().is_empty() {
                return Err(Error::SchemaAdmin("entity type name must not be empty".into()));
            }
        }
        for rule in &self.relations {
            if rule.predicate.trim().is_empty() {
                return Err(Error::SchemaAdmin("predicate must not be empty".into()));
            }
            for t in [&rule.subject_type, &rule.object_type] {
                if !self.has_entity_type(t) {
                    return Err(Error::SchemaAdmin(format!(
                        "relation '{}' references undeclared type '{t}'",
                        rule.predicate
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn validate_entity(&self, entity: &Entity) -> std::result::Result<(), SchemaViolation> {
        let def = self
            .entity_types
            .get(&entity.entity_type)
            .ok_or_else(|| SchemaViolation::UnknownEntityType(entity.entity_type.clone()))?;
        let owner = format!("{} '{}'", entity.entity_type, entity.label);
        check_properties(&owner, &def.properties, &entity.properties)?;
        for key in &def.required {
            if !entity.properties.contains_key(key) {
                return Err(SchemaViolation::MissingProperty { owner, key: key.clone() });
            }
        }
        Ok(())
    }

    pub fn validate_relation(
        &self,
        relation: &Relation,
        subject_type: &str,
        object_type: &str,
    ) -> std::result::Result<(), SchemaViolation> {
        if !self.has_predicate(&relation.predicate) {
            return Err(SchemaViolation::UnknownPredicate(relation.predicate.clone()));
        }
        let rule = self
            .relations
            .iter()
            .find(|r| {
                r.predicate == relation.predicate
                    && r.subject_type == subject_type
                    && r.object_type == object_type
            })
            .ok_or_else(|| SchemaViolation::PredicateNotPermitted {
                predicate: relation.predicate.clone(),
                subject_type: subject_type.to_string(),
                object_type: object_type.to_string(),
            })?;
        let owner = format!("relation '{}'", relation.predicate);
        check_properties(&owner, &rule.properties, &relation.properties)
    }
}

fn check_properties(
    owner: &str,
    declared: &BTreeMap<String, ValueKind>,
    props: &PropertyMap,
) -> std::result::Result<(), SchemaViolation> {
    for (key, value) in props {
        let kind = declared.get(key).ok_or_else(|| SchemaViolation::UndeclaredProperty {
            owner: owner.to_string(),
            key: key.clone(),
        })?;
        if !kind.accepts(value) {
            return Err(SchemaViolation::PropertyKind {
                owner: owner.to_string(),
                key: key.clone(),
                expected: *kind,
                got: value.type_name(),
            });
        }
    }
    Ok(())
}
