//! # Schema Registry
//!
//! An append-only list of immutable, numbered schema versions plus one
//! "active version" pointer. Every consumer resolves the active version
//! through [`SchemaRegistry::active`]; the pointer only moves through
//! [`SchemaRegistry::activate`], which is serialized.
//!
//! Committed facts record the version they were validated under.
//! Activating a later version never touches them.

pub mod definition;

use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::{Error, Result};

pub use definition::{EntityTypeDef, RelationRule, SchemaDefinition, SchemaViolation, ValueKind};

/// An immutable, numbered snapshot of allowed types and predicates.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaVersion {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub definition: SchemaDefinition,
}

impl std::ops::Deref for SchemaVersion {
    type Target = SchemaDefinition;

    fn deref(&self) -> &SchemaDefinition {
        &self.definition
    }
}

/// Versioned schema registry.
pub struct SchemaRegistry {
    versions: RwLock<Vec<Arc<SchemaVersion>>>,
    active: ArcSwap<SchemaVersion>,
    /// Serializes everything that derives from or moves the active pointer.
    migration: Mutex<()>,
}

impl SchemaRegistry {
    /// Create a registry whose version 1 is `initial`, already active.
    pub fn new(initial: SchemaDefinition) -> Result<Self> {
        initial.check()?;
        let v1 = Arc::new(SchemaVersion {
            version: 1,
            created_at: Utc::now(),
            definition: initial,
        });
        Ok(Self {
            versions: RwLock::new(vec![v1.clone()]),
            active: ArcSwap::new(v1),
            migration: Mutex::new(()),
        })
    }

    /// Registry seeded with [`SchemaDefinition::regulatory`].
    pub fn regulatory() -> Self {
        let v1 = Arc::new(SchemaVersion {
            version: 1,
            created_at: Utc::now(),
            definition: SchemaDefinition::regulatory(),
        });
        Self {
            versions: RwLock::new(vec![v1.clone()]),
            active: ArcSwap::new(v1),
            migration: Mutex::new(()),
        }
    }

    /// The active schema version.
    pub fn active(&self) -> Arc<SchemaVersion> {
        self.active.load_full()
    }

    pub fn active_version(&self) -> u32 {
        self.active.load().version
    }

    pub fn get(&self, version: u32) -> Option<Arc<SchemaVersion>> {
        self.versions
            .read()
            .iter()
            .find(|v| v.version == version)
            .cloned()
    }

    pub fn versions(&self) -> Vec<Arc<SchemaVersion>> {
        self.versions.read().clone()
    }

    /// Append a new version. It is not active until [`Self::activate`].
    pub fn register(&self, definition: SchemaDefinition) -> Result<u32> {
        definition.check()?;
        let mut versions = self.versions.write();
        let version = versions.last().map_or(1, |v| v.version + 1);
        versions.push(Arc::new(SchemaVersion {
            version,
            created_at: Utc::now(),
            definition,
        }));
        tracing::info!(version, "registered schema version");
        Ok(version)
    }

    /// Append a version equal to the active one plus `name`.
    pub fn register_type(&self, name: &str, def: EntityTypeDef) -> Result<u32> {
        let _guard = self.migration.lock();
        let next = self.active().definition.clone().with_entity_type(name, def);
        self.register(next)
    }

    /// Append a version equal to the active one plus `rule`.
    pub fn register_relation(&self, rule: RelationRule) -> Result<u32> {
        let _guard = self.migration.lock();
        let next = self.active().definition.clone().with_relation(rule);
        self.register(next)
    }

    /// Make `version` the active schema. Returns the previously active
    /// version number. Committed facts are not revalidated.
    pub fn activate(&self, version: u32) -> Result<u32> {
        let _guard = self.migration.lock();
        let target = self
            .get(version)
            .ok_or_else(|| Error::SchemaAdmin(format!("unknown schema version {version}")))?;
        let previous = self.active.swap(target);
        tracing::info!(from = previous.version, to = version, "activated schema version");
        Ok(previous.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Entity, EntityId, Relation};

    #[test]
    fn test_versions_are_append_only_and_numbered() {
        let reg = SchemaRegistry::regulatory();
        assert_eq!(reg.active_version(), 1);

        let v2 = reg
            .register_type("Regulation", EntityTypeDef::default())
            .unwrap();
        assert_eq!(v2, 2);
        // registering does not activate
        assert_eq!(reg.active_version(), 1);
        assert!(!reg.active().has_entity_type("Regulation"));

        reg.activate(2).unwrap();
        assert!(reg.active().has_entity_type("Regulation"));
        // the old version is untouched
        assert!(!reg.get(1).unwrap().has_entity_type("Regulation"));
        assert_eq!(reg.versions().len(), 2);
    }

    #[test]
    fn test_activate_unknown_version_fails() {
        let reg = SchemaRegistry::regulatory();
        assert!(matches!(reg.activate(9), Err(Error::SchemaAdmin(_))));
        assert_eq!(reg.active_version(), 1);
    }

    #[test]
    fn test_register_relation_extends_active() {
        let reg = SchemaRegistry::regulatory();
        let v = reg
            .register_relation(RelationRule::new("related_to", "Concept", "Concept"))
            .unwrap();
        reg.activate(v).unwrap();

        let r = Relation::new(EntityId("a".into()), "related_to", EntityId("b".into()));
        assert!(reg.active().validate_relation(&r, "Concept", "Concept").is_ok());
        assert!(reg.get(1).unwrap().validate_relation(&r, "Concept", "Concept").is_err());
    }

    #[test]
    fn test_rollback_to_older_version_is_explicit() {
        let reg = SchemaRegistry::regulatory();
        let v2 = reg.register_type("Obligation", EntityTypeDef::default()).unwrap();
        reg.activate(v2).unwrap();
        assert_eq!(reg.activate(1).unwrap(), 2);
        let e = Entity::new("Obligation", "report incidents");
        assert!(reg.active().validate_entity(&e).is_err());
    }
}
