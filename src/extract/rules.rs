//! Deterministic extraction for regulatory prose.
//!
//! Recognized per sentence:
//!
//! ```text
//! Article N requires|prohibits <concept> [for <scope>]   -> Concept, scope Concept, relation(scope=)
//! Article N defines|applies to <concept>                 -> Concept, relation
//! Article N refers to|amends Article M                   -> Article, relation
//! "<term>" means <definition>                            -> Concept(definition=)
//! Article N  (anywhere else)                             -> Article mention
//! ```

use std::ops::Range;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::{Captures, Regex};

use crate::model::{DocumentId, Entity, Provenance, Relation, TextSpan};
use super::{DEFAULT_CONFIDENCE_THRESHOLD, Extraction, ExtractionError, Extractor};

/// Confidence of a fact matched by a complete sentence pattern.
pub const PATTERN_CONFIDENCE: f64 = 0.9;
/// Confidence of an article that is only mentioned.
pub const MENTION_CONFIDENCE: f64 = 0.6;

static ARTICLE_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bArticle\s+(\d+)([a-z])?\b").expect("static regex"));

static STATEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\bArticle\s+(\d+)([a-z])?(?:\(\d+\))*\s+(requires|prohibits|defines|applies\s+to|refers\s+to|amends)\s+(\S.*)$",
    )
    .expect("static regex")
});

static DEFINITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"['"“‘]([^'"“”‘’]{2,80})['"”’]\s+means\s+(\S.*)$"#).expect("static regex")
});

const DETERMINERS: &[&str] = &["a ", "an ", "the ", "all ", "any ", "each "];

/// Pattern-based extractor. Same input, same output.
#[derive(Debug, Clone)]
pub struct RuleExtractor {
    threshold: f64,
}

impl Default for RuleExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleExtractor {
    pub fn new() -> Self {
        Self { threshold: DEFAULT_CONFIDENCE_THRESHOLD }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Extract from spans synchronously.
    pub fn extract_spans(&self, spans: &[TextSpan]) -> Extraction {
        let mut out = Extraction::new();
        for span in spans {
            for (offset, sentence) in sentences(&span.text) {
                self.scan_sentence(span, offset, sentence, &mut out);
            }
        }
        out.dedup();
        out.flag_low_confidence(self.threshold);
        out
    }

    fn scan_sentence(&self, span: &TextSpan, offset: usize, sentence: &str, out: &mut Extraction) {
        let mut covered: Vec<Range<usize>> = Vec::new();

        if let Some(caps) = STATEMENT.captures(sentence) {
            if let Some(subject) = self.article(span, offset, &caps, PATTERN_CONFIDENCE) {
                covered.push(caps.get(0).map_or(0, |m| m.start())..caps.get(1).map_or(0, |m| m.end()));
                let predicate = caps[3].split_whitespace().collect::<Vec<_>>().join("_");
                if let Some(tail) = caps.get(4) {
                    let tail_offset = offset + tail.start();
                    let relation = match predicate.as_str() {
                        "refers_to" | "amends" => {
                            self.article_object(span, tail_offset, tail.as_str(), &mut covered, tail.start(), out)
                                .map(|object| Relation::new(subject.id.clone(), &predicate, object.id))
                        }
                        _ => self.concept_object(span, tail_offset, tail.as_str(), &predicate, &subject, out),
                    };
                    if let Some(relation) = relation {
                        let range = caps.get(0).map_or(0..0, |m| m.range());
                        out.relations.push(relation.with_provenance(self.provenance(
                            span,
                            offset + range.start..offset + range.end,
                            PATTERN_CONFIDENCE,
                        )));
                    }
                }
                out.entities.push(subject);
            }
        }

        if let Some(caps) = DEFINITION.captures(sentence) {
            if let (Some(term), Some(definition)) = (caps.get(1), caps.get(2)) {
                let label = term.as_str().trim();
                if !label.is_empty() {
                    let concept = Entity::new("Concept", label)
                        .with_property("definition", definition.as_str().trim())
                        .with_provenance(self.provenance(
                            span,
                            offset + term.start()..offset + term.end(),
                            PATTERN_CONFIDENCE,
                        ));
                    out.entities.push(concept);
                }
            }
        }

        for caps in ARTICLE_REF.captures_iter(sentence) {
            let start = caps.get(0).map_or(0, |m| m.start());
            if covered.iter().any(|r| r.contains(&start)) {
                continue;
            }
            if let Some(article) = self.article(span, offset, &caps, MENTION_CONFIDENCE) {
                out.entities.push(article);
            }
        }
    }

    /// Article entity from captures whose groups 1 and 2 are number and
    /// optional suffix. `offset` locates the haystack within the span.
    fn article(&self, span: &TextSpan, offset: usize, caps: &Captures<'_>, confidence: f64) -> Option<Entity> {
        let whole = caps.get(0)?;
        let number = caps.get(1)?;
        let n: i64 = number.as_str().parse().ok()?;
        let suffix = caps.get(2);
        let end = suffix.unwrap_or(number).end();
        let mut entity = Entity::new("Article", format!("Article {n}{}", suffix.map_or("", |m| m.as_str())))
            .with_property("number", n);
        if let Some(s) = suffix {
            entity = entity.with_property("suffix", s.as_str());
        }
        Some(entity.with_provenance(self.provenance(span, offset + whole.start()..offset + end, confidence)))
    }

    fn article_object(
        &self,
        span: &TextSpan,
        tail_offset: usize,
        tail: &str,
        covered: &mut Vec<Range<usize>>,
        tail_start: usize,
        out: &mut Extraction,
    ) -> Option<Entity> {
        let caps = ARTICLE_REF.captures(tail)?;
        let m = caps.get(0)?;
        if m.start() != 0 {
            return None;
        }
        let object = self.article(span, tail_offset, &caps, PATTERN_CONFIDENCE)?;
        covered.push(tail_start..tail_start + m.end());
        out.entities.push(object.clone());
        Some(object)
    }

    fn concept_object(
        &self,
        span: &TextSpan,
        tail_offset: usize,
        tail: &str,
        predicate: &str,
        subject: &Entity,
        out: &mut Extraction,
    ) -> Option<Relation> {
        let scoped = matches!(predicate, "requires" | "prohibits");
        let (object_raw, scope) = match tail.split_once(" for ") {
            Some((object, scope)) if scoped => (object, Some((object.len() + " for ".len(), scope))),
            _ => (tail, None),
        };
        if ARTICLE_REF.find(object_raw).is_some_and(|m| m.start() == 0) {
            return None;
        }

        let (range, label) = noun_phrase(object_raw)?;
        let object = Entity::new("Concept", label).with_provenance(self.provenance(
            span,
            tail_offset + range.start..tail_offset + range.end,
            PATTERN_CONFIDENCE,
        ));
        let mut relation = Relation::new(subject.id.clone(), predicate, object.id.clone());
        out.entities.push(object);

        if let Some((scope_start, scope_raw)) = scope {
            if let Some((range, label)) = noun_phrase(scope_raw) {
                let base = tail_offset + scope_start;
                out.entities.push(Entity::new("Concept", label.clone()).with_provenance(self.provenance(
                    span,
                    base + range.start..base + range.end,
                    PATTERN_CONFIDENCE,
                )));
                relation = relation.with_property("scope", label);
            }
        }
        Some(relation)
    }

    fn provenance(&self, span: &TextSpan, range: Range<usize>, confidence: f64) -> Provenance {
        Provenance {
            span: span.sub_ref(range.start, range.end),
            confidence,
            low_confidence: confidence < self.threshold,
            extractor: "rules".to_string(),
        }
    }
}

#[async_trait]
impl Extractor for RuleExtractor {
    fn name(&self) -> &str {
        "rules"
    }

    async fn extract(
        &self,
        _document_id: &DocumentId,
        spans: &[TextSpan],
    ) -> Result<Extraction, ExtractionError> {
        Ok(self.extract_spans(spans))
    }
}

// ============================================================================
// Text helpers
// ============================================================================

/// Sentences with their byte offset. Terminal punctuation is excluded.
fn sentences(text: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();
    let mut push = |from: usize, to: usize| {
        let s = &text[from..to];
        let trimmed = s.trim_start();
        if !trimmed.trim().is_empty() {
            out.push((from + s.len() - trimmed.len(), trimmed.trim_end()));
        }
    };
    for (i, c) in text.char_indices() {
        if matches!(c, '.' | ';' | '!' | '?') && bytes.get(i + 1).is_none_or(|b| b.is_ascii_whitespace()) {
            push(start, i);
            start = i + 1;
        }
    }
    if start < text.len() {
        push(start, text.len());
    }
    out
}

/// The noun phrase at the start of `raw`: cut at clause punctuation,
/// leading determiner removed, head noun singularized. Returns the byte
/// range of the phrase within `raw` and its label.
fn noun_phrase(raw: &str) -> Option<(Range<usize>, String)> {
    let cut = raw.find([',', ';', ':', '(']).unwrap_or(raw.len());
    let mut rest = raw[..cut].trim_start();
    for det in DETERMINERS {
        if rest.get(..det.len()).is_some_and(|p| p.eq_ignore_ascii_case(det)) {
            rest = rest[det.len()..].trim_start();
            break;
        }
    }
    let start = cut - rest.len();
    let core = rest.trim_end_matches(|c: char| c.is_whitespace() || matches!(c, '.' | '"' | '\'' | ')'));
    if core.is_empty() || core.len() > 120 {
        return None;
    }
    Some((start..start + core.len(), singularize_head(core)))
}

/// Singularize the head noun: the word before " of ", else the last word.
fn singularize_head(phrase: &str) -> String {
    let head_end = phrase.find(" of ").unwrap_or(phrase.len());
    let head = &phrase[..head_end];
    let (prefix, last) = match head.rfind(' ') {
        Some(i) => (&head[..=i], &head[i + 1..]),
        None => ("", head),
    };
    format!("{prefix}{}{}", singular(last), &phrase[head_end..])
}

fn singular(word: &str) -> String {
    if word.len() <= 3 || !word.chars().any(char::is_lowercase) {
        return word.to_string();
    }
    if let Some(stem) = word.strip_suffix("ies") {
        return format!("{stem}y");
    }
    if ["sses", "shes", "ches", "xes"].iter().any(|s| word.ends_with(s)) {
        return word[..word.len() - 2].to_string();
    }
    if ["ss", "us", "is"].iter().any(|s| word.ends_with(s)) {
        return word.to_string();
    }
    word.strip_suffix('s').unwrap_or(word).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityId, SpanKind, Value};
    use pretty_assertions::assert_eq;

    fn span(text: &str) -> TextSpan {
        TextSpan {
            document_id: DocumentId("doc-r".into()),
            page: 1,
            start: 100,
            end: 100 + text.len(),
            text: text.to_string(),
            kind: SpanKind::Paragraph,
        }
    }

    fn labels(ex: &Extraction) -> Vec<String> {
        let mut l: Vec<String> = ex.entities.iter().map(|e| e.label.clone()).collect();
        l.sort();
        l
    }

    #[test]
    fn test_requires_with_scope() {
        let ex = RuleExtractor::new().extract_spans(&[span(
            "Article 5 requires conformity assessment for high-risk AI systems.",
        )]);
        assert_eq!(
            labels(&ex),
            vec!["Article 5", "conformity assessment", "high-risk AI system"]
        );
        assert_eq!(ex.relations.len(), 1);

        let rel = &ex.relations[0];
        assert_eq!(rel.predicate, "requires");
        assert_eq!(rel.subject, EntityId::derive("Article", "Article 5"));
        assert_eq!(rel.object, EntityId::derive("Concept", "conformity assessment"));
        assert_eq!(rel.properties.get("scope"), Some(&Value::from("high-risk AI system")));
        assert_eq!(rel.confidence, PATTERN_CONFIDENCE);

        let article = ex.entity(&EntityId::derive("Article", "Article 5")).unwrap();
        assert_eq!(article.get("number"), Some(&Value::Int(5)));
        assert_eq!(article.confidence, PATTERN_CONFIDENCE);
    }

    #[test]
    fn test_provenance_points_at_phrase() {
        let s = span("Under this Regulation, Article 5 requires a conformity assessment.");
        let ex = RuleExtractor::new().extract_spans(std::slice::from_ref(&s));
        let concept = ex.entity(&EntityId::derive("Concept", "conformity assessment")).unwrap();
        let p = &concept.provenance[0].span;
        assert_eq!(&s.text[p.start - s.start..p.end - s.start], "conformity assessment");
        let article = ex.entity(&EntityId::derive("Article", "Article 5")).unwrap();
        let p = &article.provenance[0].span;
        assert_eq!(&s.text[p.start - s.start..p.end - s.start], "Article 5");
    }

    #[test]
    fn test_article_to_article_predicates() {
        let ex = RuleExtractor::new().extract_spans(&[span(
            "Article 7 refers to Article 6. Article 12a amends Article 3(2).",
        )]);
        let mut preds: Vec<&str> = ex.relations.iter().map(|r| r.predicate.as_str()).collect();
        preds.sort();
        assert_eq!(preds, vec!["amends", "refers_to"]);
        let a12 = ex.entity(&EntityId::derive("Article", "Article 12a")).unwrap();
        assert_eq!(a12.get("suffix"), Some(&Value::from("a")));
        assert_eq!(ex.entities.len(), 4);
    }

    #[test]
    fn test_applies_to_singularizes_head() {
        let ex = RuleExtractor::new().extract_spans(&[span("Article 2 applies to providers of AI systems.")]);
        assert_eq!(ex.relations[0].predicate, "applies_to");
        assert!(ex.entity(&EntityId::derive("Concept", "provider of AI systems")).is_some());
    }

    #[test]
    fn test_bare_mentions_are_lower_confidence() {
        let ex = RuleExtractor::new()
            .with_threshold(0.7)
            .extract_spans(&[span("Article 9")]);
        assert_eq!(ex.entities.len(), 1);
        assert!(ex.relations.is_empty());
        assert_eq!(ex.entities[0].confidence, MENTION_CONFIDENCE);
        assert!(ex.entities[0].low_confidence);
    }

    #[test]
    fn test_definition_sentence() {
        let ex = RuleExtractor::new()
            .extract_spans(&[span("'AI system' means a machine-based system designed to operate with autonomy.")]);
        let c = ex.entity(&EntityId::derive("Concept", "AI system")).unwrap();
        assert_eq!(
            c.get("definition"),
            Some(&Value::from("a machine-based system designed to operate with autonomy"))
        );
    }

    #[test]
    fn test_repeated_mentions_merge() {
        let ex = RuleExtractor::new().extract_spans(&[
            span("Article 5 requires risk management."),
            span("See Article 5."),
        ]);
        let a = ex.entity(&EntityId::derive("Article", "Article 5")).unwrap();
        assert_eq!(a.provenance.len(), 2);
        assert_eq!(a.confidence, PATTERN_CONFIDENCE);
        assert_eq!(ex.entities.iter().filter(|e| e.entity_type == "Article").count(), 1);
    }

    #[test]
    fn test_singular() {
        assert_eq!(singular("systems"), "system");
        assert_eq!(singular("authorities"), "authority");
        assert_eq!(singular("processes"), "process");
        assert_eq!(singular("analysis"), "analysis");
        assert_eq!(singular("AI"), "AI");
        assert_eq!(singular("assessment"), "assessment");
    }
}
