//! # Document Loader
//!
//! Turns heterogeneous source documents into one canonical shape: numbered
//! pages of plain text, cut into spans that remember their page, byte
//! range and layout role. Everything downstream (extraction, provenance)
//! only ever sees this shape.
//!
//! Loading is split in two so the pipeline can checksum the raw bytes
//! before paying for a parse:
//!
//! ```text
//! DocumentSource ──fetch──▶ RawDocument ──parse──▶ CanonicalDocument
//! ```

pub mod html;
pub mod pdf;
pub mod text;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::HashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::model::{Checksum, DocumentId, SourceFormat, SpanKind, TextSpan};

// ============================================================================
// Errors
// ============================================================================

/// Why a source could not be turned into canonical text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("unreadable: {0}")]
    Unreadable(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("truncated: {0}")]
    Truncated(String),
}

// ============================================================================
// Sources and loaded forms
// ============================================================================

/// Where a document comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentSource {
    /// A path on the local filesystem.
    Path(PathBuf),
    /// A URI. Only `file://` is fetched.
    Uri(String),
    /// Bytes supplied by the caller.
    Inline {
        name: String,
        bytes: Vec<u8>,
        #[serde(default)]
        format: Option<SourceFormat>,
    },
}

impl DocumentSource {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        DocumentSource::Path(path.into())
    }

    pub fn inline(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        DocumentSource::Inline { name: name.into(), bytes: bytes.into(), format: None }
    }

    pub fn text(name: impl Into<String>, text: &str) -> Self {
        DocumentSource::Inline {
            name: name.into(),
            bytes: text.as_bytes().to_vec(),
            format: Some(SourceFormat::PlainText),
        }
    }

    /// URI recorded on the document.
    pub fn uri(&self) -> String {
        match self {
            DocumentSource::Path(p) => format!("file://{}", p.display()),
            DocumentSource::Uri(u) => u.clone(),
            DocumentSource::Inline { name, .. } => format!("inline:{name}"),
        }
    }
}

/// Fetched bytes, not yet parsed.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub source_uri: String,
    pub name: String,
    pub bytes: Vec<u8>,
    pub checksum: Checksum,
    pub format_hint: Option<SourceFormat>,
}

impl RawDocument {
    pub fn new(source_uri: String, name: String, bytes: Vec<u8>, format_hint: Option<SourceFormat>) -> Self {
        let checksum = Checksum::of(&bytes);
        Self { source_uri, name, bytes, checksum, format_hint }
    }

    pub fn document_id(&self) -> DocumentId {
        DocumentId::from_checksum(&self.checksum)
    }
}

/// One page of canonical text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// 1-based.
    pub number: u32,
    pub text: String,
}

/// The canonical paginated representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalDocument {
    pub document_id: DocumentId,
    pub format: SourceFormat,
    pub pages: Vec<Page>,
    pub spans: Vec<TextSpan>,
}

impl CanonicalDocument {
    pub fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }
}

/// A block of text on a page before offsets are assigned.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Block {
    pub kind: SpanKind,
    pub text: String,
}

/// Join blocks into page text (blank-line separated) and emit spans whose
/// byte ranges index into that text.
pub(crate) fn layout_page(
    document_id: &DocumentId,
    number: u32,
    blocks: Vec<Block>,
) -> (Page, Vec<TextSpan>) {
    let mut text = String::new();
    let mut spans = Vec::with_capacity(blocks.len());
    for block in blocks {
        let trimmed = block.text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !text.is_empty() {
            text.push_str("\n\n");
        }
        let start = text.len();
        text.push_str(trimmed);
        spans.push(TextSpan {
            document_id: document_id.clone(),
            page: number,
            start,
            end: text.len(),
            text: trimmed.to_string(),
            kind: block.kind,
        });
    }
    (Page { number, text }, spans)
}

// ============================================================================
// DocumentLoader trait
// ============================================================================

/// Fetch and normalize source documents. Pure: no side effects beyond
/// reading the source.
#[async_trait]
pub trait DocumentLoader: Send + Sync + 'static {
    /// Read the raw bytes of `source`.
    async fn fetch(&self, source: &DocumentSource) -> Result<RawDocument, LoadError>;

    /// Normalize fetched bytes into canonical pages and spans.
    fn parse(&self, raw: &RawDocument) -> Result<CanonicalDocument, LoadError>;

    /// `fetch` then `parse`.
    async fn load(&self, source: &DocumentSource) -> Result<CanonicalDocument, LoadError> {
        let raw = self.fetch(source).await?;
        self.parse(&raw)
    }
}

/// Loader for local files and inline bytes, with an optional parse cache
/// keyed by content checksum.
pub struct FileLoader {
    cache: Option<Mutex<ParseCache>>,
    root: Option<PathBuf>,
}

struct ParseCache {
    capacity: usize,
    entries: HashMap<Checksum, Arc<CanonicalDocument>>,
    order: std::collections::VecDeque<Checksum>,
}

impl FileLoader {
    pub fn new() -> Self {
        Self { cache: None, root: None }
    }

    /// Keep up to `capacity` parsed documents, evicting the oldest.
    pub fn with_cache(capacity: usize) -> Self {
        Self {
            cache: (capacity > 0).then(|| {
                Mutex::new(ParseCache {
                    capacity,
                    entries: HashMap::new(),
                    order: std::collections::VecDeque::new(),
                })
            }),
            root: None,
        }
    }

    /// Only read files that resolve inside `root`. Relative paths are taken
    /// relative to it.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Resolve `path` against the root, following symlinks, and refuse
    /// anything that ends up outside it.
    async fn confine(&self, path: &Path) -> Result<PathBuf, LoadError> {
        let Some(root) = &self.root else {
            return Ok(path.to_path_buf());
        };
        let root = tokio::fs::canonicalize(root)
            .await
            .map_err(|e| LoadError::Unreadable(format!("document root {}: {e}", root.display())))?;
        let resolved = tokio::fs::canonicalize(root.join(path))
            .await
            .map_err(|e| LoadError::Unreadable(format!("{}: {e}", path.display())))?;
        if !resolved.starts_with(&root) {
            tracing::warn!(path = %path.display(), root = %root.display(), "refused file outside document root");
            return Err(LoadError::Unreadable(format!(
                "{} is outside the document root",
                path.display()
            )));
        }
        Ok(resolved)
    }

    pub fn cached(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| c.lock().entries.len())
    }

    fn parse_uncached(raw: &RawDocument) -> Result<CanonicalDocument, LoadError> {
        let format = detect_format(raw)?;
        let document_id = raw.document_id();
        let pages = match format {
            SourceFormat::Pdf => pdf::parse(&raw.bytes, &document_id)?,
            SourceFormat::Html => html::parse(decode_utf8(&raw.bytes)?, &document_id),
            SourceFormat::Markdown => text::parse(decode_utf8(&raw.bytes)?, &document_id, true),
            SourceFormat::PlainText => text::parse(decode_utf8(&raw.bytes)?, &document_id, false),
        };
        let (pages, spans): (Vec<Page>, Vec<Vec<TextSpan>>) = pages.into_iter().unzip();
        Ok(CanonicalDocument {
            document_id,
            format,
            pages,
            spans: spans.into_iter().flatten().collect(),
        })
    }
}

impl Default for FileLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentLoader for FileLoader {
    async fn fetch(&self, source: &DocumentSource) -> Result<RawDocument, LoadError> {
        match source {
            DocumentSource::Path(path) => read_path(&self.confine(path).await?, source.uri()).await,
            DocumentSource::Uri(uri) => match uri.strip_prefix("file://") {
                Some(path) => read_path(&self.confine(Path::new(path)).await?, uri.clone()).await,
                None => Err(LoadError::Unreadable(format!("unsupported URI scheme: {uri}"))),
            },
            DocumentSource::Inline { name, bytes, format } => Ok(RawDocument::new(
                source.uri(),
                name.clone(),
                bytes.clone(),
                *format,
            )),
        }
    }

    fn parse(&self, raw: &RawDocument) -> Result<CanonicalDocument, LoadError> {
        let Some(cache) = &self.cache else {
            return Self::parse_uncached(raw);
        };
        if let Some(hit) = cache.lock().entries.get(&raw.checksum) {
            tracing::debug!(checksum = %raw.checksum, "parse cache hit");
            return Ok(hit.as_ref().clone());
        }
        let parsed = Arc::new(Self::parse_uncached(raw)?);
        let mut cache = cache.lock();
        if cache.entries.insert(raw.checksum.clone(), parsed.clone()).is_none() {
            cache.order.push_back(raw.checksum.clone());
        }
        while cache.order.len() > cache.capacity {
            if let Some(old) = cache.order.pop_front() {
                cache.entries.remove(&old);
            }
        }
        Ok(parsed.as_ref().clone())
    }
}

async fn read_path(path: &Path, uri: String) -> Result<RawDocument, LoadError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| LoadError::Unreadable(format!("{}: {e}", path.display())))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(RawDocument::new(uri, name, bytes, None))
}

// ============================================================================
// Format detection and decoding
// ============================================================================

const BINARY_EXTENSIONS: &[&str] = &[
    "docx", "doc", "xlsx", "pptx", "zip", "gz", "png", "jpg", "jpeg", "gif", "exe", "bin",
];

/// Magic bytes first, then the caller's hint, then the extension, then a
/// sniff of the content.
pub fn detect_format(raw: &RawDocument) -> Result<SourceFormat, LoadError> {
    if raw.bytes.is_empty() {
        return Err(LoadError::Truncated(format!("{}: empty document", raw.name)));
    }
    if raw.bytes.starts_with(b"%PDF-") {
        return Ok(SourceFormat::Pdf);
    }
    if let Some(hint) = raw.format_hint {
        return Ok(hint);
    }
    let ext = Path::new(&raw.name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("pdf") => return Ok(SourceFormat::Pdf),
        Some("html" | "htm" | "xhtml") => return Ok(SourceFormat::Html),
        Some("md" | "markdown") => return Ok(SourceFormat::Markdown),
        Some("txt" | "text") => return Ok(SourceFormat::PlainText),
        Some(e) if BINARY_EXTENSIONS.contains(&e) => {
            return Err(LoadError::UnsupportedFormat(format!("{}: .{e} files", raw.name)));
        }
        _ => {}
    }
    let head = &raw.bytes[..raw.bytes.len().min(8192)];
    if head.contains(&0) {
        return Err(LoadError::UnsupportedFormat(format!("{}: binary content", raw.name)));
    }
    let sniff = String::from_utf8_lossy(&head[..head.len().min(512)]).trim_start().to_ascii_lowercase();
    if sniff.starts_with("<!doctype html") || sniff.starts_with("<html") {
        return Ok(SourceFormat::Html);
    }
    Ok(SourceFormat::PlainText)
}

/// UTF-8 decode, telling a cut-off tail apart from garbage.
pub(crate) fn decode_utf8(bytes: &[u8]) -> Result<&str, LoadError> {
    std::str::from_utf8(bytes).map_err(|e| match e.error_len() {
        None => LoadError::Truncated(format!(
            "incomplete UTF-8 sequence at byte {}",
            e.valid_up_to()
        )),
        Some(_) => LoadError::Unreadable(format!("invalid UTF-8 at byte {}", e.valid_up_to())),
    })
}
