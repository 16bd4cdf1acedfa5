//! Query execution engine.
//!
//! Executes traversal plans against one committed snapshot. Root ids are
//! selected and ordered up front; each row's subgraph is expanded only when
//! the stream is polled.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::model::{Entity, EntityId, Path, Subgraph, Value};
use crate::storage::GraphSnapshot;
use super::ast::{CompareOp, PropertyFilter};
use super::planner::TraversalPlan;

/// Query execution result.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub rows: Vec<Subgraph>,
    pub stats: QueryStats,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Every distinct entity reached from any root, excluding the roots.
    pub fn reached(&self) -> Vec<&Entity> {
        let mut seen = std::collections::BTreeSet::new();
        self.rows
            .iter()
            .flat_map(|row| row.reached())
            .filter(|e| seen.insert(e.id.clone()))
            .collect()
    }
}

/// Execution statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryStats {
    pub snapshot_version: u64,
    pub rows: usize,
    pub paths: usize,
    pub relations_traversed: usize,
    pub execution_time_ms: u64,
}

/// Lazy, finite stream of result rows over a pinned snapshot.
///
/// Re-running a query means building a new stream; it then sees whatever
/// snapshot is current at that time.
pub struct RowStream {
    snapshot: Arc<GraphSnapshot>,
    plan: TraversalPlan,
    roots: std::vec::IntoIter<EntityId>,
    relations_traversed: usize,
}

impl RowStream {
    pub fn new(snapshot: Arc<GraphSnapshot>, plan: TraversalPlan) -> Self {
        let roots = select_roots(&snapshot, &plan);
        Self { snapshot, plan, roots: roots.into_iter(), relations_traversed: 0 }
    }

    pub fn snapshot_version(&self) -> u64 {
        self.snapshot.version()
    }

    /// Drain the stream into a [`QueryResult`].
    pub fn collect_result(mut self) -> QueryResult {
        let started = Instant::now();
        let rows: Vec<Subgraph> = self.by_ref().collect();
        QueryResult {
            stats: QueryStats {
                snapshot_version: self.snapshot.version(),
                rows: rows.len(),
                paths: rows.iter().map(|r| r.paths.len()).sum(),
                relations_traversed: self.relations_traversed,
                execution_time_ms: started.elapsed().as_millis() as u64,
            },
            rows,
        }
    }

    fn expand(&mut self, root: &Entity) -> Vec<Path> {
        let mut out = Vec::new();
        let max_hops = self.plan.max_hops();
        if max_hops == 0 {
            return out;
        }
        let mut stack = vec![Path::single(root.clone())];
        while let Some(path) = stack.pop() {
            let hop = path.len();
            let extensions = if hop < max_hops { self.extensions(&path, hop) } else { Vec::new() };
            if extensions.is_empty() {
                if !path.is_empty() {
                    out.push(path);
                }
                continue;
            }
            // reversed so the stack pops them in order
            for (rel, next) in extensions.into_iter().rev() {
                let mut longer = path.clone();
                longer.append(rel, next);
                stack.push(longer);
            }
        }
        out
    }

    /// Relations leaving the end of `path` for hop `hop`, skipping entities
    /// already on the path.
    fn extensions(&mut self, path: &Path, hop: usize) -> Vec<(crate::model::Relation, Entity)> {
        let Some(step) = self.plan.step(hop) else {
            return Vec::new();
        };
        let end = path.end();
        let mut found: Vec<(crate::model::Relation, Entity)> = self
            .snapshot
            .relations_of(&end.id, step.direction, Some(&step.predicate))
            .into_iter()
            .filter_map(|rel| {
                let other = rel.other_end(&end.id)?;
                if path.entities.iter().any(|e| e.id == *other) {
                    return None;
                }
                let entity = self.snapshot.entity(other)?;
                Some((rel.clone(), entity.clone()))
            })
            .collect();
        self.relations_traversed += found.len();
        found.sort_by(|a, b| entity_order(&a.1, &b.1).then_with(|| a.0.id.cmp(&b.0.id)));
        found
    }
}

impl Iterator for RowStream {
    type Item = Subgraph;

    fn next(&mut self) -> Option<Subgraph> {
        loop {
            let id = self.roots.next()?;
            // roots were selected from this snapshot, but stay defensive
            let Some(root) = self.snapshot.entity(&id).cloned() else {
                continue;
            };
            let paths = self.expand(&root);
            return Some(Subgraph { root, paths });
        }
    }
}

/// Execute `plan` against `snapshot`, collecting every row.
pub fn execute(plan: &TraversalPlan, snapshot: Arc<GraphSnapshot>) -> QueryResult {
    RowStream::new(snapshot, plan.clone()).collect_result()
}

fn select_roots(snapshot: &GraphSnapshot, plan: &TraversalPlan) -> Vec<EntityId> {
    let mut roots: Vec<&Entity> = match &plan.root_type {
        Some(t) => snapshot.entities_of_type(t).collect(),
        None => snapshot.entities().collect(),
    };
    roots.retain(|e| plan.filters.iter().all(|f| matches_filter(e, f)));
    roots.sort_by(|a, b| entity_order(a, b));
    if let Some(limit) = plan.limit {
        roots.truncate(limit);
    }
    roots.into_iter().map(|e| e.id.clone()).collect()
}

fn entity_order(a: &Entity, b: &Entity) -> Ordering {
    a.entity_type
        .cmp(&b.entity_type)
        .then_with(|| a.label.cmp(&b.label))
        .then_with(|| a.id.cmp(&b.id))
}

/// A missing attribute never matches, not even `<>`.
pub(crate) fn matches_filter(entity: &Entity, filter: &PropertyFilter) -> bool {
    let Some(actual) = entity.attribute(&filter.key) else {
        return false;
    };
    match filter.op {
        CompareOp::Eq => actual.compare(&filter.value) == Some(Ordering::Equal),
        CompareOp::Neq => actual.compare(&filter.value).is_some_and(|o| o != Ordering::Equal),
        CompareOp::Lt => actual.compare(&filter.value) == Some(Ordering::Less),
        CompareOp::Lte => matches!(actual.compare(&filter.value), Some(Ordering::Less | Ordering::Equal)),
        CompareOp::Gt => actual.compare(&filter.value) == Some(Ordering::Greater),
        CompareOp::Gte => matches!(actual.compare(&filter.value), Some(Ordering::Greater | Ordering::Equal)),
        CompareOp::Contains | CompareOp::StartsWith => match (&actual, &filter.value) {
            (Value::String(a), Value::String(needle)) => {
                let a = a.to_lowercase();
                let needle = needle.to_lowercase();
                if filter.op == CompareOp::Contains { a.contains(&needle) } else { a.starts_with(&needle) }
            }
            _ => false,
        },
    }
}
