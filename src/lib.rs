//! # cortex-kg: Knowledge-Graph Construction & Query Engine
//!
//! Turns unstructured documents (regulatory text, articles, reports) into a
//! typed, schema-validated knowledge graph, and answers structured and
//! textual queries over it.
//!
//! ## Design Principles
//!
//! 1. **Trait-first**: `DocumentLoader`, `Extractor` and `GraphStore` are the seams
//! 2. **Clean DTOs**: `Entity`, `Relation`, `Value` cross all boundaries
//! 3. **Parser owns nothing**: query text → `StructuredQuery` is a pure function
//! 4. **Snapshot reads**: queries run against one committed snapshot, never a partial write
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cortex_kg::{DocumentSource, KnowledgeGraph, StructuredQuery};
//!
//! # async fn example() -> cortex_kg::Result<()> {
//! let kg = KnowledgeGraph::in_memory();
//!
//! let report = kg
//!     .ingest(DocumentSource::text(
//!         "article-5.txt",
//!         "Article 5 requires a risk management system for high-risk AI systems.",
//!     ))
//!     .await?;
//! assert!(report.is_committed());
//!
//! let result = kg.query(&StructuredQuery::of_type("Article").follow("requires").depth(1))?;
//! for row in &result.rows {
//!     println!("{} -> {:?}", row.root.label, row.reached());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Components
//!
//! | Module | Description |
//! |--------|-------------|
//! | `loader` | PDF / HTML / Markdown / text → canonical pages and spans |
//! | `extract` | Rule-based and model-backed candidate fact extraction |
//! | `schema` | Versioned entity and relation type registry |
//! | `storage` | Snapshot-isolated graph store, optional commit journal |
//! | `pipeline` | Per-document ingestion state machine |
//! | `query` | Structured and textual graph queries |
//! | `http` | axum service surface (feature `http`) |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod loader;
pub mod extract;
pub mod schema;
pub mod storage;
pub mod tx;
pub mod query;
pub mod pipeline;
pub mod config;
pub mod telemetry;
pub mod export;

#[cfg(feature = "http")]
pub mod http;

use std::sync::Arc;

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{
    Checksum, Direction, Document, DocumentId, DocumentStatus, Entity, EntityId, Path,
    PropertyMap, Provenance, Relation, RelationId, SourceFormat, Subgraph, TextSpan, Value,
};

// ============================================================================
// Re-exports: Components
// ============================================================================

pub use config::Config;
pub use extract::{Extraction, ExtractionError, Extractor, ModelExtractor, RuleExtractor};
pub use loader::{CanonicalDocument, DocumentLoader, DocumentSource, FileLoader, LoadError};
pub use pipeline::{IngestionReport, IngestionStatus, Pipeline, TrackingId};
pub use query::{QueryError, QueryResult, RowStream, StructuredQuery, TraversalPlan};
pub use schema::{SchemaDefinition, SchemaRegistry, SchemaVersion, SchemaViolation};
pub use storage::{BackendConfig, GraphSnapshot, GraphStore, MemoryStore, StoreError};
pub use tx::{CommitToken, Transaction, TxId, TxMode, WriteBatch};

// ============================================================================
// Top-level KnowledgeGraph handle
// ============================================================================

/// Parsed documents kept by the default loader.
const LOADER_CACHE: usize = 64;

/// The primary entry point. Wires a store, the schema registry and the
/// ingestion pipeline, and compiles queries against the active schema.
pub struct KnowledgeGraph<S: GraphStore = MemoryStore> {
    store: Arc<S>,
    schema: Arc<SchemaRegistry>,
    pipeline: Pipeline<S>,
}

impl<S: GraphStore> Clone for KnowledgeGraph<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            schema: Arc::clone(&self.schema),
            pipeline: self.pipeline.clone(),
        }
    }
}

impl<S: GraphStore> KnowledgeGraph<S> {
    pub fn new(
        store: Arc<S>,
        schema: Arc<SchemaRegistry>,
        loader: Arc<dyn DocumentLoader>,
        extractor: Arc<dyn Extractor>,
        config: config::PipelineConfig,
    ) -> Self {
        let pipeline = Pipeline::new(
            Arc::clone(&store),
            Arc::clone(&schema),
            loader,
            extractor,
            config,
        );
        Self { store, schema, pipeline }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn schema(&self) -> &Arc<SchemaRegistry> {
        &self.schema
    }

    pub fn pipeline(&self) -> &Pipeline<S> {
        &self.pipeline
    }

    /// The current committed snapshot.
    pub fn snapshot(&self) -> Arc<GraphSnapshot> {
        self.store.snapshot()
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// Ingest one document inline.
    pub async fn ingest(&self, source: DocumentSource) -> Result<IngestionReport> {
        self.pipeline.ingest(source).await
    }

    /// Queue one document on the worker pool.
    pub fn submit(&self, source: DocumentSource) -> TrackingId {
        self.pipeline.submit(source)
    }

    pub fn status(&self, id: TrackingId) -> Result<IngestionStatus> {
        self.pipeline.status(id)
    }

    pub async fn wait(&self, id: TrackingId) -> Result<IngestionStatus> {
        self.pipeline.wait(id).await
    }

    pub fn cancel(&self, id: TrackingId) -> Result<IngestionStatus> {
        self.pipeline.cancel(id)
    }

    pub fn retry(&self, id: TrackingId) -> Result<()> {
        self.pipeline.retry(id)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Compile against the active schema.
    pub fn compile(&self, query: &StructuredQuery) -> Result<TraversalPlan> {
        Ok(query::compile(query, &self.schema.active())?)
    }

    pub fn compile_text(&self, text: &str) -> Result<TraversalPlan> {
        Ok(query::compile_text(text, &self.schema.active())?)
    }

    /// Rows are produced lazily from the snapshot current at call time.
    pub fn stream(&self, query: &StructuredQuery) -> Result<RowStream> {
        let plan = self.compile(query)?;
        Ok(self.store.query(&plan))
    }

    pub fn query(&self, query: &StructuredQuery) -> Result<QueryResult> {
        Ok(self.stream(query)?.collect_result())
    }

    pub fn query_text(&self, text: &str) -> Result<QueryResult> {
        let plan = self.compile_text(text)?;
        Ok(self.store.query(&plan).collect_result())
    }

    /// Stop accepting documents and flush the store.
    pub async fn shutdown(&self) -> Result<()> {
        self.pipeline.close();
        self.store.shutdown().await
    }
}

impl KnowledgeGraph<MemoryStore> {
    /// Volatile graph with the regulatory schema and rule extraction.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SchemaRegistry::regulatory()),
            Arc::new(FileLoader::with_cache(LOADER_CACHE)),
            Arc::new(RuleExtractor::new()),
            config::PipelineConfig::default(),
        )
    }

    /// Build everything a [`Config`] describes.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = MemoryStore::open(&config.backend())?;
        let schema = match &config.schema.path {
            Some(path) => SchemaRegistry::new(SchemaDefinition::from_file(path)?)?,
            None => SchemaRegistry::regulatory(),
        };
        let extractor = build_extractor(&config.extraction)?;
        let mut loader = FileLoader::with_cache(LOADER_CACHE);
        if let Some(root) = &config.ingest.root {
            loader = loader.with_root(root);
        }
        tracing::info!(
            extractor = extractor.name(),
            schema_version = schema.active_version(),
            durable = store.is_durable(),
            "knowledge graph ready"
        );
        Ok(Self::new(
            Arc::new(store),
            Arc::new(schema),
            Arc::new(loader),
            extractor,
            config.pipeline.clone(),
        ))
    }
}

fn build_extractor(config: &config::ExtractionConfig) -> Result<Arc<dyn Extractor>> {
    match config.mode {
        config::ExtractionMode::Rules => {
            Ok(Arc::new(RuleExtractor::new().with_threshold(config.confidence_threshold)))
        }
        #[cfg(feature = "remote-model")]
        config::ExtractionMode::Model => {
            let endpoint = config
                .endpoint
                .as_deref()
                .ok_or_else(|| Error::Config("extraction.endpoint is required in model mode".into()))?;
            let api_key = std::env::var(&config.api_key_env).ok();
            let client = extract::model::HttpModelClient::new(endpoint, config.model.clone(), api_key)?;
            Ok(Arc::new(
                ModelExtractor::new(Arc::new(client), &config.model)
                    .with_policy(config.retry_policy())
                    .with_threshold(config.confidence_threshold),
            ))
        }
        #[cfg(not(feature = "remote-model"))]
        config::ExtractionMode::Model => Err(Error::Config(
            "extraction.mode = \"model\" needs the `remote-model` feature".into(),
        )),
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("load error: {0}")]
    Load(#[from] LoadError),

    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("schema violation: {0}")]
    Schema(#[from] SchemaViolation),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("query error: {0}")]
    Query(#[from] QueryError),

    #[error("schema administration: {0}")]
    SchemaAdmin(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Worth retrying the same stage after a backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Extraction(e) => e.is_transient(),
            Error::Store(e) => e.is_transient(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_transient_classification() {
        assert!(Error::from(ExtractionError::Timeout(Duration::from_secs(1))).is_transient());
        assert!(Error::from(StoreError::Conflict { attempts: 64 }).is_transient());
        assert!(!Error::from(LoadError::Truncated("x".into())).is_transient());
        assert!(!Error::from(ExtractionError::MalformedOutput("x".into())).is_transient());
        assert!(!Error::NotFound("x".into()).is_transient());
    }

    #[tokio::test]
    async fn test_in_memory_round_trip() {
        let kg = KnowledgeGraph::in_memory();
        kg.ingest(DocumentSource::text(
            "a5.txt",
            "Article 5 requires a risk management system for high-risk AI systems.",
        ))
        .await
        .unwrap();
        let result = kg.query_text("MATCH Article -[requires]-> DEPTH 1").unwrap();
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].paths.len(), 1);
        assert!(matches!(kg.query_text("MATCH Regulation"), Err(Error::Query(QueryError::UnknownType { .. }))));
    }

    #[test]
    fn test_model_mode_needs_endpoint() {
        let mut config = Config::default();
        config.extraction.mode = config::ExtractionMode::Model;
        assert!(matches!(build_extractor(&config.extraction), Err(Error::Config(_))));
    }
}
