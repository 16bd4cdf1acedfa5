//! Strict boundary for model output.
//!
//! Model text is untrusted. It must deserialize into a list of
//! [`CandidateFact`]s with no unknown fields, every confidence must lie in
//! `[0, 1]`, and every span index must name a span that was sent. Anything
//! else is `MalformedOutput`.

use serde::Deserialize;

use crate::model::{Entity, EntityId, PropertyMap, Provenance, Relation, TextSpan};
use super::{Extraction, ExtractionError};

/// One fact as the model reports it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CandidateFact {
    Entity(CandidateEntity),
    Relation(CandidateRelation),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CandidateEntity {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub label: String,
    #[serde(default)]
    pub properties: PropertyMap,
    pub confidence: f64,
    /// Index into the spans sent with the prompt.
    pub span: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CandidateRelation {
    pub subject: EndpointRef,
    pub predicate: String,
    pub object: EndpointRef,
    #[serde(default)]
    pub properties: PropertyMap,
    pub confidence: f64,
    pub span: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointRef {
    #[serde(rename = "type")]
    pub entity_type: String,
    pub label: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CandidateBatch {
    facts: Vec<CandidateFact>,
}

/// Parse raw model text into candidate facts.
///
/// Accepts `{"facts": [...]}` or a bare array, optionally wrapped in a
/// Markdown code fence.
pub fn parse_candidates(text: &str) -> Result<Vec<CandidateFact>, ExtractionError> {
    let body = strip_fence(text.trim());
    let parsed = if body.starts_with('[') {
        serde_json::from_str::<Vec<CandidateFact>>(body)
    } else {
        serde_json::from_str::<CandidateBatch>(body).map(|b| b.facts)
    };
    parsed.map_err(|e| ExtractionError::MalformedOutput(e.to_string()))
}

fn strip_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    // drop an info string such as ```json
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Turn validated candidates into facts with provenance.
///
/// Relation endpoints are emitted as entities too, carrying the relation's
/// provenance, so every relation in the result has typed endpoints.
pub fn resolve(
    facts: Vec<CandidateFact>,
    spans: &[TextSpan],
    extractor: &str,
) -> Result<Extraction, ExtractionError> {
    let mut out = Extraction::new();
    for fact in facts {
        match fact {
            CandidateFact::Entity(c) => {
                let provenance = provenance(spans, c.span, c.confidence, extractor)?;
                require_text("label", &c.label)?;
                require_text("type", &c.entity_type)?;
                let mut entity = Entity::new(c.entity_type, c.label.trim()).with_provenance(provenance);
                entity.properties = c.properties;
                out.entities.push(entity);
            }
            CandidateFact::Relation(c) => {
                let provenance = provenance(spans, c.span, c.confidence, extractor)?;
                require_text("predicate", &c.predicate)?;
                let mut ids: [EntityId; 2] = [EntityId(String::new()), EntityId(String::new())];
                for (slot, end) in ids.iter_mut().zip([&c.subject, &c.object]) {
                    require_text("label", &end.label)?;
                    require_text("type", &end.entity_type)?;
                    let entity = Entity::new(end.entity_type.clone(), end.label.trim())
                        .with_provenance(provenance.clone());
                    *slot = entity.id.clone();
                    out.entities.push(entity);
                }
                let [subject, object] = ids;
                let mut relation = Relation::new(subject, c.predicate.trim(), object).with_provenance(provenance);
                relation.properties = c.properties;
                out.relations.push(relation);
            }
        }
    }
    out.dedup();
    Ok(out)
}

fn provenance(
    spans: &[TextSpan],
    index: usize,
    confidence: f64,
    extractor: &str,
) -> Result<Provenance, ExtractionError> {
    if !(0.0..=1.0).contains(&confidence) {
        return Err(ExtractionError::MalformedOutput(format!(
            "confidence {confidence} outside [0, 1]"
        )));
    }
    let span = spans.get(index).ok_or_else(|| {
        ExtractionError::MalformedOutput(format!("span index {index} out of range ({} spans)", spans.len()))
    })?;
    Ok(Provenance {
        span: span.span_ref(),
        confidence,
        low_confidence: false,
        extractor: extractor.to_string(),
    })
}

fn require_text(field: &str, value: &str) -> Result<(), ExtractionError> {
    if value.trim().is_empty() {
        return Err(ExtractionError::MalformedOutput(format!("empty {field}")));
    }
    Ok(())
}
