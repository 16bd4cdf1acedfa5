//! Paths and subgraphs: the shapes query results come back in.

use serde::{Deserialize, Serialize};
use super::{Entity, Relation};

/// A path in the graph: entity -[rel]-> entity -[rel]-> entity ...
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    /// Entities along the path. Always has one more element than `relations`.
    pub entities: Vec<Entity>,
    /// Relations connecting consecutive entities.
    pub relations: Vec<Relation>,
}

impl Path {
    pub fn single(entity: Entity) -> Self {
        Self { entities: vec![entity], relations: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    pub fn start(&self) -> &Entity {
        self.entities.first().expect("Path always has at least one entity")
    }

    pub fn end(&self) -> &Entity {
        self.entities.last().expect("Path always has at least one entity")
    }

    /// Extend path with a relation and its target entity.
    pub fn append(&mut self, rel: Relation, entity: Entity) {
        self.relations.push(rel);
        self.entities.push(entity);
    }
}

/// One query result row: a root entity and the paths reached from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subgraph {
    pub root: Entity,
    pub paths: Vec<Path>,
}

impl Subgraph {
    /// Distinct entities reached from the root (root excluded).
    pub fn reached(&self) -> Vec<&Entity> {
        let mut seen = std::collections::BTreeSet::new();
        let mut out = Vec::new();
        for path in &self.paths {
            for e in path.entities.iter().skip(1) {
                if seen.insert(&e.id) {
                    out.push(e);
                }
            }
        }
        out
    }
}
