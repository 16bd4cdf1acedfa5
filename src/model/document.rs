//! Source documents and their processing status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Stable document identifier, derived from the content checksum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn from_checksum(checksum: &Checksum) -> Self {
        Self(format!("doc-{}", &checksum.0[..16.min(checksum.0.len())]))
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// SHA-256 of the raw source bytes, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(pub String);

impl Checksum {
    pub fn of(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Detected source format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Pdf,
    Html,
    Markdown,
    PlainText,
}

impl SourceFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceFormat::Pdf => "pdf",
            SourceFormat::Html => "html",
            SourceFormat::Markdown => "markdown",
            SourceFormat::PlainText => "plain_text",
        }
    }
}

/// Where a document is in the ingestion state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Parsing,
    Extracting,
    Validating,
    Committing,
    Committed,
    Failed,
}

impl DocumentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DocumentStatus::Committed | DocumentStatus::Failed)
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Parsing => "parsing",
            DocumentStatus::Extracting => "extracting",
            DocumentStatus::Validating => "validating",
            DocumentStatus::Committing => "committing",
            DocumentStatus::Committed => "committed",
            DocumentStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A source document as recorded in the graph store.
///
/// The store only ever holds `Committed` records; they are written in the
/// same batch as the document's facts and never change afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub source_uri: String,
    pub checksum: Checksum,
    pub format: SourceFormat,
    pub ingested_at: DateTime<Utc>,
    pub status: DocumentStatus,
    pub retries: u32,
    pub page_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_stable_hex() {
        let a = Checksum::of(b"Article 5");
        let b = Checksum::of(b"Article 5");
        assert_eq!(a, b);
        assert_eq!(a.0.len(), 64);
        assert_ne!(a, Checksum::of(b"Article 6"));
    }

    #[test]
    fn test_document_id_from_checksum() {
        let c = Checksum::of(b"x");
        let id = DocumentId::from_checksum(&c);
        assert!(id.0.starts_with("doc-"));
        assert_eq!(id.0.len(), 4 + 16);
    }
}
