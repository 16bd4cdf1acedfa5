//! Structured query object.
//!
//! This is both the JSON shape accepted by the service and the target of
//! the textual parser:
//!
//! ```json
//! { "entityType": "Article", "relationPath": ["requires"], "depth": 1 }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{Direction, Value};

/// A query before it is checked against a schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StructuredQuery {
    /// Root entity type. `None` (or `"*"`) means every type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    /// Predicates to follow. Hop *i* uses item *i*; the last item repeats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation_path: Option<Vec<PathStep>>,

    /// Conditions every root must satisfy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_filters: Option<PropertyFilters>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl StructuredQuery {
    pub fn of_type(entity_type: impl Into<String>) -> Self {
        Self { entity_type: Some(entity_type.into()), ..Self::default() }
    }

    pub fn follow(mut self, step: impl Into<PathStep>) -> Self {
        self.relation_path.get_or_insert_with(Vec::new).push(step.into());
        self
    }

    pub fn filter(mut self, key: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        let condition = PropertyFilter { key: key.into(), op, value: value.into() };
        let mut conditions = self.property_filters.take().map(PropertyFilters::into_conditions).unwrap_or_default();
        conditions.push(condition);
        self.property_filters = Some(PropertyFilters::Conditions(conditions));
        self
    }

    pub fn depth(mut self, depth: u32) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// One hop: a bare predicate name or a predicate with a direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathStep {
    Predicate(String),
    Directed {
        predicate: String,
        #[serde(default)]
        direction: Direction,
    },
}

impl PathStep {
    pub fn predicate(&self) -> &str {
        match self {
            PathStep::Predicate(p) => p,
            PathStep::Directed { predicate, .. } => predicate,
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            PathStep::Predicate(_) => Direction::Outgoing,
            PathStep::Directed { direction, .. } => *direction,
        }
    }
}

impl From<&str> for PathStep {
    fn from(p: &str) -> Self {
        PathStep::Predicate(p.to_string())
    }
}

impl From<(&str, Direction)> for PathStep {
    fn from((predicate, direction): (&str, Direction)) -> Self {
        PathStep::Directed { predicate: predicate.to_string(), direction }
    }
}

/// Filters as JSON: either `{ "key": value }` equalities or a list of
/// conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyFilters {
    Equals(BTreeMap<String, Value>),
    Conditions(Vec<PropertyFilter>),
}

impl PropertyFilters {
    pub fn into_conditions(self) -> Vec<PropertyFilter> {
        match self {
            PropertyFilters::Equals(map) => map
                .into_iter()
                .map(|(key, value)| PropertyFilter { key, op: CompareOp::Eq, value })
                .collect(),
            PropertyFilters::Conditions(c) => c,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyFilter {
    pub key: String,
    #[serde(default)]
    pub op: CompareOp,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    #[default]
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    /// Case-insensitive substring.
    Contains,
    /// Case-insensitive prefix.
    StartsWith,
}

impl std::fmt::Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CompareOp::Eq => "=",
            CompareOp::Neq => "<>",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Contains => "CONTAINS",
            CompareOp::StartsWith => "STARTS WITH",
        };
        f.write_str(s)
    }
}
