//! End-to-end schema registry tests: versioning, activation, and how the
//! active version gates ingestion and queries.

use std::sync::Arc;

use async_trait::async_trait;
use cortex_kg::config::PipelineConfig;
use cortex_kg::query::QueryError;
use cortex_kg::schema::{EntityTypeDef, RelationRule, ValueKind};
use cortex_kg::{
    DocumentId, DocumentSource, DocumentStatus, Entity, EntityId, Error, Extraction,
    ExtractionError, Extractor, FileLoader, KnowledgeGraph, MemoryStore, Relation,
    SchemaDefinition, SchemaRegistry, SchemaViolation, StructuredQuery, TextSpan,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

/// Emits an Article that is part of a Regulation.
struct RegulationFacts;

#[async_trait]
impl Extractor for RegulationFacts {
    fn name(&self) -> &str {
        "regulation-facts"
    }

    async fn extract(&self, _: &DocumentId, _: &[TextSpan]) -> Result<Extraction, ExtractionError> {
        let article = Entity::new("Article", "Article 1").with_property("number", 1);
        let regulation = Entity::new("Regulation", "AI Act");
        Ok(Extraction {
            relations: vec![Relation::new(article.id.clone(), "part_of", regulation.id.clone())],
            entities: vec![article, regulation],
        })
    }
}

fn graph() -> KnowledgeGraph {
    KnowledgeGraph::new(
        Arc::new(MemoryStore::new()),
        Arc::new(SchemaRegistry::regulatory()),
        Arc::new(FileLoader::new()),
        Arc::new(RegulationFacts),
        PipelineConfig::default(),
    )
}

fn with_regulation(schema: &SchemaRegistry) -> u32 {
    let next = schema
        .active()
        .definition
        .clone()
        .with_entity_type("Regulation", EntityTypeDef::default())
        .with_relation(RelationRule::new("part_of", "Article", "Regulation"));
    schema.register(next).unwrap()
}

// ============================================================================
// 1. Registration does not activate
// ============================================================================

#[tokio::test]
async fn test_registered_version_is_inactive_until_activated() {
    let kg = graph();
    let schema = kg.schema();
    let v2 = with_regulation(schema);
    assert_eq!(v2, 2);
    assert_eq!(schema.active_version(), 1);

    let q = StructuredQuery::of_type("Regulation");
    assert!(matches!(kg.query(&q), Err(Error::Query(QueryError::UnknownType { .. }))));
    let report = kg.ingest(DocumentSource::text("a.txt", "first")).await.unwrap();
    assert_eq!(report.stage, DocumentStatus::Failed);

    assert_eq!(schema.activate(v2).unwrap(), 1);
    assert!(kg.query(&q).unwrap().is_empty());
    let report = kg.ingest(DocumentSource::text("b.txt", "second")).await.unwrap();
    assert!(report.is_committed(), "{:?}", report.error);

    let snapshot = kg.snapshot();
    let regulation = snapshot.entity(&EntityId::derive("Regulation", "AI Act")).unwrap();
    assert_eq!(regulation.schema_version, 2);
    assert_eq!(kg.query(&q).unwrap().rows.len(), 1);
}

#[tokio::test]
async fn test_rollback_keeps_committed_facts() {
    let kg = graph();
    let schema = kg.schema();
    let v2 = with_regulation(schema);
    schema.activate(v2).unwrap();
    kg.ingest(DocumentSource::text("b.txt", "facts")).await.unwrap();

    assert_eq!(schema.activate(1).unwrap(), v2);
    // queries compile against v1 again
    assert!(kg.query(&StructuredQuery::of_type("Regulation")).is_err());
    // but nothing committed under v2 was touched
    assert!(kg.snapshot().entity(&EntityId::derive("Regulation", "AI Act")).is_some());
    assert_eq!(schema.versions().len(), 2);
}

#[test]
fn test_invalid_definitions_are_rejected() {
    let schema = SchemaRegistry::regulatory();
    let dangling = schema
        .active()
        .definition
        .clone()
        .with_relation(RelationRule::new("part_of", "Article", "Regulation"));
    assert!(matches!(schema.register(dangling), Err(Error::SchemaAdmin(_))));
    assert!(matches!(schema.activate(7), Err(Error::SchemaAdmin(_))));
    assert_eq!(schema.versions().len(), 1);
}

#[test]
fn test_incremental_registration() {
    let schema = SchemaRegistry::regulatory();
    let v2 = schema
        .register_type("Obligation", EntityTypeDef::default().with_property("deadline", ValueKind::String))
        .unwrap();
    schema.activate(v2).unwrap();
    let v3 = schema.register_relation(RelationRule::new("imposes", "Article", "Obligation")).unwrap();
    assert_eq!(v3, 3);
    let def = &schema.get(v3).unwrap().definition;
    assert!(def.has_entity_type("Obligation"));
    assert!(def.has_predicate("imposes"));
    assert!(!schema.get(1).unwrap().definition.has_entity_type("Obligation"));
}

#[tokio::test]
async fn test_schema_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("schema.toml");
    std::fs::write(
        &path,
        r#"
        [entity_types.Article]
        properties = { number = "integer", suffix = "string" }

        [entity_types.Concept]
        properties = { definition = "string" }

        [[relations]]
        predicate = "requires"
        subject_type = "Article"
        object_type = "Concept"
        properties = { scope = "string" }
        "#,
    )
    .unwrap();

    let mut config = cortex_kg::Config::default();
    config.schema.path = Some(path);
    let kg = KnowledgeGraph::from_config(&config).unwrap();
    assert!(kg.schema().active().has_predicate("requires"));
    assert!(!kg.schema().active().has_predicate("amends"));

    // "amends" is not declared in this schema, so the document is rejected
    let report = kg
        .ingest(DocumentSource::text("a.txt", "Article 12 amends Article 5."))
        .await
        .unwrap();
    assert_eq!(report.stage, DocumentStatus::Failed);
    assert_eq!(kg.snapshot().entity_count(), 0);
}

// ============================================================================
// 2. Relation rules hold for every registered version
// ============================================================================

const TYPES: &[&str] = &["Article", "Concept", "Regulation"];
const PREDICATES: &[&str] = &["requires", "prohibits", "defines", "refers_to", "amends", "part_of"];

proptest! {
    #[test]
    fn prop_relations_only_between_permitted_pairs(
        p in 0..PREDICATES.len(),
        s in 0..TYPES.len(),
        o in 0..TYPES.len(),
    ) {
        let schema = SchemaRegistry::regulatory();
        with_regulation(&schema);
        for version in schema.versions() {
            let def: &SchemaDefinition = &version.definition;
            let relation = Relation::new(
                EntityId::derive(TYPES[s], "x"),
                PREDICATES[p],
                EntityId::derive(TYPES[o], "y"),
            );
            let permitted = def.relations.iter().any(|r| {
                r.predicate == PREDICATES[p] && r.subject_type == TYPES[s] && r.object_type == TYPES[o]
            });
            let result = def.validate_relation(&relation, TYPES[s], TYPES[o]);
            prop_assert_eq!(result.is_ok(), permitted);
            if !def.has_predicate(PREDICATES[p]) {
                prop_assert!(matches!(result, Err(SchemaViolation::UnknownPredicate(_))), "unknown predicate accepted");
            }
        }
    }
}
