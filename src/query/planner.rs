//! Query planner: checks a structured query against a schema version and
//! produces a traversal plan.
//!
//! The plan is store-agnostic: it names types and predicates, never ids.
//! Everything that can be rejected without touching data is rejected here,
//! so an unknown type is an error rather than an empty result.

use serde::Serialize;
use smallvec::SmallVec;

use crate::model::Direction;
use crate::schema::SchemaVersion;
use super::QueryError;
use super::ast::{PropertyFilter, StructuredQuery};

pub const DEFAULT_DEPTH: u32 = 3;
pub const MAX_DEPTH: u32 = 10;

/// One hop of a traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanStep {
    pub predicate: String,
    pub direction: Direction,
}

/// A compiled query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraversalPlan {
    /// `None` scans every type.
    pub root_type: Option<String>,
    pub filters: Vec<PropertyFilter>,
    pub steps: SmallVec<[PlanStep; 4]>,
    /// Maximum hop count.
    pub depth: u32,
    pub limit: Option<usize>,
    /// Schema version the plan was checked against.
    pub schema_version: u32,
}

impl TraversalPlan {
    /// The step used for hop `hop` (0-based). The last step repeats.
    pub fn step(&self, hop: usize) -> Option<&PlanStep> {
        self.steps.get(hop).or_else(|| self.steps.last())
    }

    /// Hops actually taken: no path means roots only.
    pub fn max_hops(&self) -> usize {
        if self.steps.is_empty() { 0 } else { self.depth as usize }
    }
}

/// Check `query` against `schema` and build a plan.
pub fn plan(query: &StructuredQuery, schema: &SchemaVersion) -> Result<TraversalPlan, QueryError> {
    let root_type = match query.entity_type.as_deref().map(str::trim) {
        None | Some("*") | Some("") => None,
        Some(t) => {
            if !schema.has_entity_type(t) {
                return Err(QueryError::UnknownType { kind: "entity type", name: t.to_string() });
            }
            Some(t.to_string())
        }
    };

    // Without an explicit depth the whole path is followed at least once.
    let path_len = query.relation_path.as_ref().map_or(0, Vec::len);
    let depth = match query.depth {
        Some(depth) => depth,
        None => u32::try_from(path_len).unwrap_or(u32::MAX).max(DEFAULT_DEPTH),
    };
    if !(1..=MAX_DEPTH).contains(&depth) {
        return Err(QueryError::InvalidDepth(depth));
    }
    if path_len > depth as usize {
        return Err(QueryError::PathExceedsDepth { steps: path_len, depth });
    }

    let mut steps = SmallVec::new();
    for step in query.relation_path.iter().flatten() {
        let predicate = step.predicate().trim();
        if !schema.has_predicate(predicate) {
            return Err(QueryError::UnknownType { kind: "predicate", name: predicate.to_string() });
        }
        steps.push(PlanStep { predicate: predicate.to_string(), direction: step.direction() });
    }

    let filters = query
        .property_filters
        .clone()
        .map(|f| f.into_conditions())
        .unwrap_or_default();

    let plan = TraversalPlan {
        root_type,
        filters,
        steps,
        depth,
        limit: query.limit,
        schema_version: schema.version,
    };
    tracing::debug!(?plan, "compiled query");
    Ok(plan)
}
