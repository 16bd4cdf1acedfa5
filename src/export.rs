//! Cypher dump export: serialize a committed snapshot as Cypher statements.
//!
//! Produces an idempotent script (MERGE, not CREATE) that can be replayed
//! into Neo4j or any Cypher-compatible database:
//!
//! ```text
//! GraphSnapshot → export_cypher_dump() → MERGE statements
//!   → pipe into cypher-shell, or paste into Neo4j Browser
//! ```
//!
//! Entities are keyed by their content-derived id, so replaying a newer
//! dump over an older one updates rather than duplicates.

use std::io::Write;

use serde::Serialize;

use crate::model::{Entity, PropertyMap, Provenance, Relation, Value};
use crate::storage::GraphSnapshot;
use crate::Result;

/// What a dump contained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExportStats {
    pub snapshot_version: u64,
    pub documents: usize,
    pub entities: usize,
    pub relations: usize,
}

/// Write `snapshot` as a Cypher script.
///
/// Output order is deterministic: documents by id, entities by
/// (type, label, id), relations by id.
pub fn export_cypher_dump(snapshot: &GraphSnapshot, writer: &mut dyn Write) -> Result<ExportStats> {
    let mut documents: Vec<_> = snapshot.documents().collect();
    documents.sort_by(|a, b| a.id.cmp(&b.id));
    let mut entities: Vec<&Entity> = snapshot.entities().collect();
    entities.sort_by(|a, b| {
        (&a.entity_type, &a.label, &a.id).cmp(&(&b.entity_type, &b.label, &b.id))
    });
    let mut relations: Vec<&Relation> = snapshot.relations().collect();
    relations.sort_by(|a, b| a.id.cmp(&b.id));

    // Header
    writeln!(writer, "// cortex-kg Cypher dump")?;
    writeln!(writer, "// Snapshot version: {}", snapshot.version())?;
    writeln!(writer, "// Documents: {}", documents.len())?;
    writeln!(writer, "// Entities: {}", entities.len())?;
    writeln!(writer, "// Relations: {}", relations.len())?;
    writeln!(writer)?;

    for doc in &documents {
        writeln!(
            writer,
            "MERGE (d:Document {{id: {}}}) SET d.source_uri = {}, d.checksum = {}, d.format = {}, d.ingested_at = {}, d.page_count = {};",
            quote(&doc.id.0),
            quote(&doc.source_uri),
            quote(&doc.checksum.0),
            quote(doc.format.as_str()),
            quote(&doc.ingested_at.to_rfc3339()),
            doc.page_count,
        )?;
    }
    if !documents.is_empty() {
        writeln!(writer)?;
    }

    for entity in &entities {
        writeln!(
            writer,
            "MERGE (n:{} {{id: {}}}) SET n.label = {}, n.confidence = {}, n.low_confidence = {}, n.schema_version = {}, n.sources = {}{};",
            identifier(&entity.entity_type),
            quote(&entity.id.0),
            quote(&entity.label),
            format_value(&Value::Float(entity.confidence)),
            entity.low_confidence,
            entity.schema_version,
            format_sources(&entity.provenance),
            format_assignments("n", &entity.properties),
        )?;
    }

    writeln!(writer)?;
    writeln!(writer, "// Relations")?;

    for rel in &relations {
        writeln!(
            writer,
            "MATCH (a {{id: {}}}), (b {{id: {}}}) MERGE (a)-[r:{} {{id: {}}}]->(b) SET r.confidence = {}, r.low_confidence = {}, r.schema_version = {}, r.sources = {}{};",
            quote(&rel.subject.0),
            quote(&rel.object.0),
            identifier(&rel.predicate),
            quote(&rel.id.0),
            format_value(&Value::Float(rel.confidence)),
            rel.low_confidence,
            rel.schema_version,
            format_sources(&rel.provenance),
            format_assignments("r", &rel.properties),
        )?;
    }

    tracing::info!(
        version = snapshot.version(),
        entities = entities.len(),
        relations = relations.len(),
        "exported cypher dump"
    );
    Ok(ExportStats {
        snapshot_version: snapshot.version(),
        documents: documents.len(),
        entities: entities.len(),
        relations: relations.len(),
    })
}

/// `, n.key = value` for each user property.
fn format_assignments(var: &str, props: &PropertyMap) -> String {
    props
        .iter()
        .map(|(key, value)| format!(", {var}.{} = {}", identifier(key), format_value(value)))
        .collect()
}

fn format_sources(provenance: &[Provenance]) -> String {
    let refs: Vec<String> = provenance.iter().map(|p| quote(&p.span.to_string())).collect();
    format!("[{}]", refs.join(", "))
}

/// Format a Value as a Cypher literal.
fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => quote(s),
        Value::Int(i) => i.to_string(),
        Value::Float(f) if f.is_finite() => format!("{f:?}"),
        Value::Float(_) | Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
    }
}

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Bare identifier when possible, backtick-quoted otherwise.
fn identifier(name: &str) -> String {
    let simple = name.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if simple {
        name.to_string()
    } else {
        format!("`{}`", name.replace('`', "``"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::WriteBatch;
    use chrono::Utc;

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&Value::String("it's".into())), r"'it\'s'");
        assert_eq!(format_value(&Value::Int(42)), "42");
        assert_eq!(format_value(&Value::Float(1.0)), "1.0");
        assert_eq!(format_value(&Value::Float(f64::NAN)), "null");
        assert_eq!(format_value(&Value::Bool(true)), "true");
    }

    #[test]
    fn test_identifier_quoting() {
        assert_eq!(identifier("Article"), "Article");
        assert_eq!(identifier("applies_to"), "applies_to");
        assert_eq!(identifier("high-risk"), "`high-risk`");
        assert_eq!(identifier("9lives"), "`9lives`");
    }

    #[test]
    fn test_dump_is_merge_and_ordered() {
        let article = Entity::new("Article", "Article 5").with_property("number", 5);
        let concept = Entity::new("Concept", "risk management system");
        let batch = WriteBatch::new()
            .with_relation(
                Relation::new(article.id.clone(), "requires", concept.id.clone())
                    .with_property("scope", "high-risk AI system"),
            )
            .with_entity(concept)
            .with_entity(article);
        let (snapshot, _) = GraphSnapshot::empty().apply(&batch, Utc::now()).unwrap();

        let mut out = Vec::new();
        let stats = export_cypher_dump(&snapshot, &mut out).unwrap();
        assert_eq!(stats.entities, 2);
        assert_eq!(stats.relations, 1);

        let text = String::from_utf8(out).unwrap();
        assert!(!text.contains("CREATE"));
        let article_at = text.find("MERGE (n:Article").unwrap();
        let concept_at = text.find("MERGE (n:Concept").unwrap();
        assert!(article_at < concept_at);
        assert!(text.contains("n.number = 5"));
        assert!(text.contains("MERGE (a)-[r:requires"));
        assert!(text.contains("r.scope = 'high-risk AI system'"));
    }
}
