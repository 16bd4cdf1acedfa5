//! End-to-end ingestion tests.
//!
//! Each test drives documents through load -> extract -> validate -> commit
//! via `KnowledgeGraph` and inspects the committed snapshot.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cortex_kg::config::PipelineConfig;
use cortex_kg::{
    DocumentId, DocumentSource, DocumentStatus, Entity, EntityId, Extraction, ExtractionError,
    Extractor, FileLoader, KnowledgeGraph, MemoryStore, Relation, RuleExtractor, SchemaRegistry,
    TextSpan, Value,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

const ARTICLE_5: &str = "Article 5 requires conformity assessment for high-risk AI systems";

fn graph_with(extractor: Arc<dyn Extractor>) -> KnowledgeGraph {
    KnowledgeGraph::new(
        Arc::new(MemoryStore::new()),
        Arc::new(SchemaRegistry::regulatory()),
        Arc::new(FileLoader::new()),
        extractor,
        PipelineConfig { retry_base_delay_ms: 1, ..PipelineConfig::default() },
    )
}

// ============================================================================
// 1. The Article 5 example
// ============================================================================

#[tokio::test]
async fn test_article_5_example() {
    let kg = KnowledgeGraph::in_memory();
    let report = kg.ingest(DocumentSource::text("article-5.txt", ARTICLE_5)).await.unwrap();
    assert_eq!(report.stage, DocumentStatus::Committed);
    assert_eq!(report.entities, 3);
    assert_eq!(report.relations, 1);

    let snapshot = kg.snapshot();
    let mut entities: Vec<(String, String)> = snapshot
        .entities()
        .map(|e| (e.entity_type.clone(), e.label.clone()))
        .collect();
    entities.sort();
    assert_eq!(
        entities,
        vec![
            ("Article".to_string(), "Article 5".to_string()),
            ("Concept".to_string(), "conformity assessment".to_string()),
            ("Concept".to_string(), "high-risk AI system".to_string()),
        ]
    );

    let relations: Vec<&Relation> = snapshot.relations().collect();
    assert_eq!(relations.len(), 1);
    assert_eq!(relations[0].subject, EntityId::derive("Article", "Article 5"));
    assert_eq!(relations[0].predicate, "requires");
    assert_eq!(relations[0].object, EntityId::derive("Concept", "conformity assessment"));

    // every committed fact points back at the document it came from
    let doc_id = report.document_id.unwrap();
    for e in snapshot.entities() {
        assert!(!e.provenance.is_empty());
        assert!(e.provenance.iter().all(|p| p.span.document_id == doc_id));
        assert_eq!(e.schema_version, 1);
    }
    let document = snapshot.document(&doc_id).unwrap();
    assert_eq!(document.status, DocumentStatus::Committed);
    assert_eq!(document.page_count, 1);
}

#[tokio::test]
async fn test_markdown_and_html_sources() {
    let kg = KnowledgeGraph::in_memory();
    let md = "# Chapter II\n\nArticle 9 prohibits social scoring.\n";
    let html = "<html><body><p>Article 10 defines the provider.</p><p>'provider' means a natural or legal person.</p></body></html>";

    let a = kg.ingest(DocumentSource::inline("chapter.md", md.as_bytes())).await.unwrap();
    let b = kg.ingest(DocumentSource::inline("page.html", html.as_bytes())).await.unwrap();
    assert!(a.is_committed(), "{:?}", a.error);
    assert!(b.is_committed(), "{:?}", b.error);

    let snapshot = kg.snapshot();
    assert!(snapshot.entity(&EntityId::derive("Concept", "social scoring")).is_some());
    let provider = snapshot.entity(&EntityId::derive("Concept", "provider")).unwrap();
    assert_eq!(provider.get("definition"), Some(&Value::from("a natural or legal person")));
}

// ============================================================================
// 2. Idempotence
// ============================================================================

#[tokio::test]
async fn test_reingest_is_noop() {
    let kg = KnowledgeGraph::in_memory();
    kg.ingest(DocumentSource::text("a.txt", ARTICLE_5)).await.unwrap();
    let before = kg.snapshot();

    let again = kg.ingest(DocumentSource::text("renamed.txt", ARTICLE_5)).await.unwrap();
    assert_eq!(again.stage, DocumentStatus::Committed);
    assert!(again.skipped);

    let after = kg.snapshot();
    assert_eq!(after.version(), before.version());
    assert_eq!(after.entity_count(), before.entity_count());
    assert_eq!(after.relation_count(), before.relation_count());
    assert_eq!(after.documents().count(), 1);
}

#[tokio::test]
async fn test_file_source_is_idempotent_across_paths() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("a.txt");
    let second = dir.path().join("b.txt");
    std::fs::write(&first, ARTICLE_5).unwrap();
    std::fs::write(&second, ARTICLE_5).unwrap();

    let kg = KnowledgeGraph::in_memory();
    assert!(!kg.ingest(DocumentSource::path(&first)).await.unwrap().skipped);
    assert!(kg.ingest(DocumentSource::path(&second)).await.unwrap().skipped);
}

// ============================================================================
// 3. Provenance only grows
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_provenance_only_grows(variants in prop::collection::vec(0usize..4, 1..6)) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let kg = KnowledgeGraph::in_memory();
            let article = EntityId::derive("Article", "Article 5");
            let mut seen: Vec<cortex_kg::model::SpanRef> = Vec::new();
            let mut confidence = 0.0;
            for (i, v) in variants.iter().enumerate() {
                let text = match v {
                    0 => format!("Section {i}. Article 5 requires risk management."),
                    1 => format!("Section {i}. See Article 5."),
                    2 => format!("Section {i}. Article 5 prohibits manipulation."),
                    _ => format!("Section {i}. Nothing relevant here."),
                };
                let report = kg.ingest(DocumentSource::text(format!("doc-{i}.txt"), &text)).await.unwrap();
                prop_assert!(report.is_committed());

                let snapshot = kg.snapshot();
                if let Some(entity) = snapshot.entity(&article) {
                    let spans: Vec<_> = entity.provenance.iter().map(|p| p.span.clone()).collect();
                    for old in &seen {
                        prop_assert!(spans.contains(old), "lost provenance {old}");
                    }
                    prop_assert!(entity.confidence >= confidence);
                    confidence = entity.confidence;
                    seen = spans;
                }
            }
            Ok(())
        })?;
    }
}

// ============================================================================
// 4. Failures leave nothing behind
// ============================================================================

/// Produces an entity of a type the regulatory schema does not declare.
struct OffSchema;

#[async_trait]
impl Extractor for OffSchema {
    fn name(&self) -> &str {
        "off-schema"
    }

    async fn extract(&self, _: &DocumentId, _: &[TextSpan]) -> Result<Extraction, ExtractionError> {
        let article = Entity::new("Article", "Article 1");
        let regulation = Entity::new("Regulation", "AI Act");
        Ok(Extraction {
            relations: vec![Relation::new(article.id.clone(), "part_of", regulation.id.clone())],
            entities: vec![article, regulation],
        })
    }
}

#[tokio::test]
async fn test_invalid_document_commits_nothing() {
    let kg = graph_with(Arc::new(OffSchema));
    let report = kg.ingest(DocumentSource::text("x.txt", "irrelevant")).await.unwrap();
    assert_eq!(report.stage, DocumentStatus::Failed);
    assert!(report.error.as_deref().unwrap().contains("schema violation"));

    let snapshot = kg.snapshot();
    assert_eq!(snapshot.version(), 0);
    assert_eq!(snapshot.entity_count(), 0);
    // the valid Article was not committed on its own either
    assert!(snapshot.entity(&EntityId::derive("Article", "Article 1")).is_none());
}

#[tokio::test]
async fn test_unreadable_and_truncated_sources_fail() {
    let kg = KnowledgeGraph::in_memory();

    let missing = kg.ingest(DocumentSource::path("/no/such/file.txt")).await.unwrap();
    assert_eq!(missing.stage, DocumentStatus::Failed);
    assert!(missing.error.unwrap().contains("unreadable"));

    let truncated = kg
        .ingest(DocumentSource::inline("broken.pdf", b"%PDF-1.4\n1 0 obj\n<< /Type /Page".to_vec()))
        .await
        .unwrap();
    assert_eq!(truncated.stage, DocumentStatus::Failed);
    assert_eq!(kg.snapshot().entity_count(), 0);
}

// ============================================================================
// 5. Cancel and retry
// ============================================================================

/// Hangs on the first call; delegates to the rule extractor afterwards.
struct HangsOnce {
    calls: AtomicU32,
}

#[async_trait]
impl Extractor for HangsOnce {
    fn name(&self) -> &str {
        "hangs-once"
    }

    async fn extract(&self, id: &DocumentId, spans: &[TextSpan]) -> Result<Extraction, ExtractionError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            std::future::pending::<()>().await;
        }
        RuleExtractor::new().extract(id, spans).await
    }
}

async fn wait_for_stage(kg: &KnowledgeGraph, id: cortex_kg::TrackingId, stage: DocumentStatus) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while kg.status(id).unwrap().stage != stage {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("stage reached");
}

#[tokio::test]
async fn test_cancel_then_retry() {
    let kg = graph_with(Arc::new(HangsOnce { calls: AtomicU32::new(0) }));
    let id = kg.submit(DocumentSource::text("a5.txt", ARTICLE_5));
    wait_for_stage(&kg, id, DocumentStatus::Extracting).await;

    let cancelled = kg.cancel(id).unwrap();
    assert_eq!(cancelled.stage, DocumentStatus::Failed);
    assert!(cancelled.error.unwrap().contains("cancelled"));
    assert_eq!(kg.snapshot().entity_count(), 0);
    // already terminal
    assert!(kg.cancel(id).is_err());

    kg.retry(id).unwrap();
    let status = kg.wait(id).await.unwrap();
    assert_eq!(status.stage, DocumentStatus::Committed);
    assert_eq!(status.retries, 1);

    let doc = kg.snapshot().document(status.document_id.as_ref().unwrap()).cloned().unwrap();
    assert_eq!(doc.retries, 1);
    assert_eq!(kg.snapshot().entity_count(), 3);
}

#[tokio::test]
async fn test_extraction_timeout_fails_document() {
    let kg = KnowledgeGraph::new(
        Arc::new(MemoryStore::new()),
        Arc::new(SchemaRegistry::regulatory()),
        Arc::new(FileLoader::new()),
        Arc::new(HangsOnce { calls: AtomicU32::new(0) }),
        PipelineConfig {
            extraction_timeout_secs: 1,
            max_stage_retries: 0,
            ..PipelineConfig::default()
        },
    );
    let report = kg.ingest(DocumentSource::text("a5.txt", ARTICLE_5)).await.unwrap();
    assert_eq!(report.stage, DocumentStatus::Failed);
    assert!(report.error.unwrap().contains("timed out"));
}

// ============================================================================
// 6. Journal recovery
// ============================================================================

#[tokio::test]
async fn test_journal_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let journal = dir.path().join("kg.jsonl");
    let open = || {
        KnowledgeGraph::new(
            Arc::new(MemoryStore::open_journal(&journal).unwrap()),
            Arc::new(SchemaRegistry::regulatory()),
            Arc::new(FileLoader::new()),
            Arc::new(RuleExtractor::new()),
            PipelineConfig::default(),
        )
    };

    let kg = open();
    kg.ingest(DocumentSource::text("a5.txt", ARTICLE_5)).await.unwrap();
    let version = kg.snapshot().version();
    kg.shutdown().await.unwrap();
    drop(kg);

    let kg = open();
    assert_eq!(kg.snapshot().version(), version);
    assert_eq!(kg.snapshot().entity_count(), 3);
    let again = kg.ingest(DocumentSource::text("a5.txt", ARTICLE_5)).await.unwrap();
    assert!(again.skipped);
}
