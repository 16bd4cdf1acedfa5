//! Text spans and the references facts keep to them.

use serde::{Deserialize, Serialize};
use super::DocumentId;

/// Layout role of a span within its page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    Heading,
    Paragraph,
    ListItem,
}

/// A run of canonical text on one page.
///
/// `start..end` is a byte range into the canonical text of `page`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSpan {
    pub document_id: DocumentId,
    /// 1-based page number.
    pub page: u32,
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub kind: SpanKind,
}

impl TextSpan {
    pub fn span_ref(&self) -> SpanRef {
        SpanRef {
            document_id: self.document_id.clone(),
            page: self.page,
            start: self.start,
            end: self.end,
        }
    }

    /// Reference to a sub-range of this span, given byte offsets into `text`.
    pub fn sub_ref(&self, from: usize, to: usize) -> SpanRef {
        SpanRef {
            document_id: self.document_id.clone(),
            page: self.page,
            start: self.start + from.min(self.text.len()),
            end: self.start + to.min(self.text.len()),
        }
    }
}

/// Pointer from a committed fact back to its source text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpanRef {
    pub document_id: DocumentId,
    pub page: u32,
    pub start: usize,
    pub end: usize,
}

impl std::fmt::Display for SpanRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#p{}:{}..{}", self.document_id, self.page, self.start, self.end)
    }
}
