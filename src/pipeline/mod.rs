//! # Ingestion Pipeline
//!
//! Drives each document through
//!
//! ```text
//! Pending → Parsing → Extracting → Validating → Committing → Committed
//!              └───────────┴────────────┴────────────┴──────→ Failed
//! ```
//!
//! A document's facts become visible to queries in one atomic commit, or
//! not at all. Content already committed (same checksum) is skipped.
//! Transient stage failures are retried with exponential backoff up to
//! `max_stage_retries`; everything else fails the document. Failed
//! documents can be re-run with [`Pipeline::retry`].

mod status;

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Semaphore;

use crate::config::PipelineConfig;
use crate::extract::{self, Extraction, ExtractionError, Extractor};
use crate::loader::{CanonicalDocument, DocumentLoader, DocumentSource};
use crate::model::{Checksum, Document, DocumentStatus, EntityId};
use crate::schema::{SchemaRegistry, SchemaVersion, SchemaViolation};
use crate::storage::{GraphSnapshot, GraphStore};
use crate::tx::WriteBatch;
use crate::{Error, Result};

pub use status::{IngestionReport, IngestionStatus, TrackingId};
use status::{Run, StatusTracker};

/// Ingestion orchestrator. Cheap to clone; clones share all state.
pub struct Pipeline<S: GraphStore> {
    inner: Arc<Inner<S>>,
}

impl<S: GraphStore> Clone for Pipeline<S> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

struct Inner<S: GraphStore> {
    store: Arc<S>,
    schema: Arc<SchemaRegistry>,
    loader: Arc<dyn DocumentLoader>,
    extractor: Arc<dyn Extractor>,
    config: PipelineConfig,
    workers: Arc<Semaphore>,
    tracker: StatusTracker,
    /// Serializes runs over identical content.
    in_flight: Mutex<HashMap<Checksum, Arc<tokio::sync::Mutex<()>>>>,
    last_success: RwLock<Option<DateTime<Utc>>>,
}

impl<S: GraphStore> Pipeline<S> {
    pub fn new(
        store: Arc<S>,
        schema: Arc<SchemaRegistry>,
        loader: Arc<dyn DocumentLoader>,
        extractor: Arc<dyn Extractor>,
        config: PipelineConfig,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.workers.max(1)));
        Self {
            inner: Arc::new(Inner {
                store,
                schema,
                loader,
                extractor,
                config,
                workers,
                tracker: StatusTracker::default(),
                in_flight: Mutex::new(HashMap::new()),
                last_success: RwLock::new(None),
            }),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.inner.store
    }

    pub fn extractor_name(&self) -> &str {
        self.inner.extractor.name()
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Queue a document and return immediately. Must be called from within
    /// a Tokio runtime.
    pub fn submit(&self, source: DocumentSource) -> TrackingId {
        let run = self.inner.tracker.register(&source);
        tracing::info!(tracking_id = %run.id, source = %source.uri(), "document submitted");
        self.spawn(run, source);
        run.id
    }

    /// Ingest a document and wait for its terminal state. A failed
    /// document is reported, not returned as an error.
    pub async fn ingest(&self, source: DocumentSource) -> Result<IngestionReport> {
        let run = self.inner.tracker.register(&source);
        let _permit = Arc::clone(&self.inner.workers)
            .acquire_owned()
            .await
            .map_err(|_| Error::Unavailable("ingestion pipeline is shut down".into()))?;
        self.inner.run(run, source).await;
        self.status(run.id)
    }

    pub fn status(&self, id: TrackingId) -> Result<IngestionStatus> {
        self.inner
            .tracker
            .status(id)
            .ok_or_else(|| Error::NotFound(format!("ingestion {id}")))
    }

    /// Every tracked ingestion, oldest first.
    pub fn statuses(&self) -> Vec<IngestionStatus> {
        self.inner.tracker.all()
    }

    /// Wait until `id` reaches `Committed` or `Failed`.
    pub async fn wait(&self, id: TrackingId) -> Result<IngestionStatus> {
        let mut rx = self
            .inner
            .tracker
            .subscribe(id)
            .ok_or_else(|| Error::NotFound(format!("ingestion {id}")))?;
        let status = rx
            .wait_for(|s| s.is_terminal())
            .await
            .map_err(|_| Error::Unavailable(format!("ingestion {id} was dropped")))?;
        Ok(status.clone())
    }

    /// Stop a document that has not started committing. Nothing it
    /// produced becomes visible.
    pub fn cancel(&self, id: TrackingId) -> Result<IngestionStatus> {
        self.inner.tracker.cancel(id)
    }

    /// Re-run a failed document in the background.
    pub fn retry(&self, id: TrackingId) -> Result<()> {
        let (run, source) = self.inner.tracker.prepare_retry(id, self.inner.config.max_document_retries)?;
        tracing::info!(tracking_id = %id, generation = run.generation, "retrying ingestion");
        self.spawn(run, source);
        Ok(())
    }

    /// Time of the most recent committed (or skipped) document.
    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        *self.inner.last_success.read()
    }

    /// Stop accepting work. Running documents finish.
    pub fn close(&self) {
        self.inner.workers.close();
    }

    fn spawn(&self, run: Run, source: DocumentSource) {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            match Arc::clone(&inner.workers).acquire_owned().await {
                Ok(_permit) => inner.run(run, source).await,
                Err(_) => inner
                    .tracker
                    .fail(run, &Error::Unavailable("ingestion pipeline is shut down".into())),
            }
        });
        self.inner.tracker.set_abort(run, handle.abort_handle());
    }
}

// ============================================================================
// Stages
// ============================================================================

impl<S: GraphStore> Inner<S> {
    #[tracing::instrument(skip_all, fields(tracking_id = %run.id))]
    async fn run(&self, run: Run, source: DocumentSource) {
        if let Err(e) = self.stages(run, &source).await {
            self.tracker.fail(run, &e);
        }
    }

    async fn stages(&self, run: Run, source: &DocumentSource) -> Result<()> {
        if !self.tracker.transition(run, DocumentStatus::Parsing) {
            return Ok(());
        }
        let raw = self
            .with_retries(run, DocumentStatus::Parsing, || async {
                self.loader.fetch(source).await.map_err(Error::from)
            })
            .await?;
        let checksum = raw.checksum.clone();
        self.tracker.update(run, |s| {
            s.checksum = Some(checksum.clone());
            s.document_id = Some(raw.document_id());
        });

        let gate = self.checksum_gate(&checksum);
        let result = {
            let _held = gate.lock().await;
            self.stages_for_content(run, &raw).await
        };
        self.release_gate(&checksum, gate);
        result
    }

    async fn stages_for_content(&self, run: Run, raw: &crate::loader::RawDocument) -> Result<()> {
        if self.store.document_by_checksum(&raw.checksum).await?.is_some() {
            tracing::info!(checksum = %raw.checksum, "content already committed, skipping");
            if self.tracker.update(run, |s| {
                s.stage = DocumentStatus::Committed;
                s.skipped = true;
            }) {
                *self.last_success.write() = Some(Utc::now());
            }
            return Ok(());
        }

        let canonical = self.loader.parse(raw)?;
        tracing::debug!(pages = canonical.page_count(), spans = canonical.spans.len(), "parsed");

        if !self.tracker.transition(run, DocumentStatus::Extracting) {
            return Ok(());
        }
        let mut extraction = self
            .with_retries(run, DocumentStatus::Extracting, || self.extract(&canonical))
            .await?;
        extraction.dedup();

        if !self.tracker.transition(run, DocumentStatus::Validating) {
            return Ok(());
        }
        let schema = self.schema.active();
        let snapshot = self.store.snapshot();
        validate(&extraction, &schema, &snapshot)?;
        for e in &mut extraction.entities {
            e.schema_version = schema.version;
        }
        for r in &mut extraction.relations {
            r.schema_version = schema.version;
        }

        let retries = self.tracker.status(run.id).map_or(0, |s| s.retries);
        let document = Document {
            id: canonical.document_id.clone(),
            source_uri: raw.source_uri.clone(),
            checksum: raw.checksum.clone(),
            format: canonical.format,
            ingested_at: Utc::now(),
            status: DocumentStatus::Committed,
            retries,
            page_count: canonical.page_count(),
        };
        let low_confidence = extraction.low_confidence_count();
        let batch = WriteBatch {
            document: Some(document),
            entities: extraction.entities,
            relations: extraction.relations,
        };

        if !self.tracker.begin_commit(run) {
            return Ok(());
        }
        let token = self
            .with_retries(run, DocumentStatus::Committing, || async {
                self.store.upsert_batch(batch.clone()).await
            })
            .await?;
        tracing::info!(
            version = token.version,
            entities = token.entities,
            relations = token.relations,
            low_confidence,
            "document committed"
        );
        self.tracker.update(run, |s| {
            s.stage = DocumentStatus::Committed;
            s.entities = token.entities;
            s.relations = token.relations;
            s.low_confidence = low_confidence;
            s.commit_version = Some(token.version);
        });
        *self.last_success.write() = Some(token.committed_at);
        Ok(())
    }

    async fn extract(&self, canonical: &CanonicalDocument) -> Result<Extraction> {
        let limit = self.config.extraction_timeout();
        match tokio::time::timeout(
            limit,
            self.extractor.extract(&canonical.document_id, &canonical.spans),
        )
        .await
        {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(ExtractionError::Timeout(limit).into()),
        }
    }

    /// Run `op`, retrying transient failures with exponential backoff.
    async fn with_retries<T, F, Fut>(&self, run: Run, stage: DocumentStatus, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && retries < self.config.max_stage_retries => {
                    let delay = self.config.retry_delay(retries);
                    retries += 1;
                    tracing::warn!(%stage, retry = retries, ?delay, error = %e, "transient failure, retrying");
                    self.tracker.update(run, |s| s.attempts += 1);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn checksum_gate(&self, checksum: &Checksum) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.in_flight.lock().entry(checksum.clone()).or_default())
    }

    fn release_gate(&self, checksum: &Checksum, gate: Arc<tokio::sync::Mutex<()>>) {
        let mut in_flight = self.in_flight.lock();
        // the map holds one reference and we hold the other
        if Arc::strong_count(&gate) <= 2 {
            in_flight.remove(checksum);
        }
    }
}

/// Check every candidate against `schema`. Relation endpoints resolve
/// against the batch first, then the committed graph. Every violation is
/// logged; the first one is returned.
fn validate(extraction: &Extraction, schema: &SchemaVersion, snapshot: &GraphSnapshot) -> Result<()> {
    let mut violations: Vec<SchemaViolation> = Vec::new();
    for entity in &extraction.entities {
        if let Err(v) = schema.validate_entity(entity) {
            violations.push(v);
        }
    }
    for (relation, missing) in extract::unresolved_endpoints(extraction) {
        if snapshot.entity(&missing).is_none() {
            tracing::debug!(%relation, %missing, "endpoint not in batch or graph");
            violations.push(SchemaViolation::UnresolvedEndpoint(missing.to_string()));
        }
    }

    let type_of = |id: &EntityId| -> Option<String> {
        extraction
            .entity(id)
            .map(|e| e.entity_type.clone())
            .or_else(|| snapshot.entity(id).map(|e| e.entity_type.clone()))
    };
    for relation in &extraction.relations {
        let (Some(subject), Some(object)) = (type_of(&relation.subject), type_of(&relation.object)) else {
            continue;
        };
        if let Err(v) = schema.validate_relation(relation, &subject, &object) {
            violations.push(v);
        }
    }

    for v in &violations {
        tracing::warn!(schema_version = schema.version, violation = %v, "schema violation");
    }
    match violations.into_iter().next() {
        Some(first) => Err(first.into()),
        None => Ok(()),
    }
}
