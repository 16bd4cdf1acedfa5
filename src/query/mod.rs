//! # Query Engine
//!
//! Structured queries (or their textual form) are compiled against the
//! active schema into a [`TraversalPlan`], then executed over one
//! committed snapshot:
//!
//! ```text
//! "MATCH Article -[requires]-> DEPTH 1"
//!        │ lexer + parser
//!        ▼
//!   StructuredQuery ──planner (schema)──▶ TraversalPlan ──execution (snapshot)──▶ RowStream
//! ```

pub mod ast;
pub mod execution;
pub mod lexer;
pub mod parser;
pub mod planner;

use std::sync::Arc;

use crate::schema::SchemaVersion;
use crate::storage::GraphSnapshot;

pub use ast::{CompareOp, PathStep, PropertyFilter, PropertyFilters, StructuredQuery};
pub use execution::{QueryResult, QueryStats, RowStream};
pub use planner::{DEFAULT_DEPTH, MAX_DEPTH, PlanStep, TraversalPlan};

/// Why a query was rejected before touching any data.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    /// Malformed textual query. `position` is a byte offset into the input.
    #[error("syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },

    /// An entity type or predicate the schema does not declare.
    #[error("unknown {kind} '{name}'")]
    UnknownType { kind: &'static str, name: String },

    #[error("depth {0} is outside 1..={MAX_DEPTH}")]
    InvalidDepth(u32),

    /// An explicit depth too small to follow every step of the path.
    #[error("depth {depth} cannot follow a relation path of {steps} steps")]
    PathExceedsDepth { steps: usize, depth: u32 },
}

/// Compile a structured query against `schema`.
pub fn compile(query: &StructuredQuery, schema: &SchemaVersion) -> Result<TraversalPlan, QueryError> {
    planner::plan(query, schema)
}

/// Parse and compile the textual form.
pub fn compile_text(text: &str, schema: &SchemaVersion) -> Result<TraversalPlan, QueryError> {
    let query = parser::parse(text)?;
    planner::plan(&query, schema)
}

/// Run a compiled plan against a snapshot, lazily.
pub fn execute(plan: &TraversalPlan, snapshot: Arc<GraphSnapshot>) -> RowStream {
    RowStream::new(snapshot, plan.clone())
}
