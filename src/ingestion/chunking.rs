//! Chunk production for the two source classes.
//!
//! Plain-text files are read directly and split on blank lines; complex
//! formats are delegated to an external [`DocumentParser`]. Both paths
//! produce the same [`DocumentChunk`] type so the rest of the pipeline never
//! cares which strategy ran.

use std::path::Path;

use async_trait::async_trait;
use tokio::fs;

use crate::types::RagError;

/// Extensions handled by the built-in paragraph chunker.
pub const PLAIN_TEXT_EXTENSIONS: &[&str] = &["txt", "sql", "md", "csv", "json", "xml"];

/// One unit of source text bound for embedding and storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentChunk {
    pub text: String,
    pub source_id: String,
    pub chunk_index: usize,
}

/// How a file will be turned into chunks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    /// Direct read + paragraph splitting.
    PlainText,
    /// Delegated to the external structural parser.
    Structured,
}

/// Classifies a path by extension.
pub fn classify(path: &Path) -> FileKind {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();
    if PLAIN_TEXT_EXTENSIONS.contains(&extension.as_str()) {
        FileKind::PlainText
    } else {
        FileKind::Structured
    }
}

/// Lowercased extension of a path, without the dot.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Output of parsing one document: its full text (when the parser can
/// provide it) and the chunk sequence.
#[derive(Clone, Debug, Default)]
pub struct ParsedDocument {
    pub full_text: Option<String>,
    pub chunks: Vec<DocumentChunk>,
}

/// External structural parser for complex formats (PDF, DOCX, …).
///
/// Out of core scope; the pipeline only requires that it yields chunk text.
#[async_trait]
pub trait DocumentParser: Send + Sync {
    async fn parse(&self, path: &Path) -> Result<ParsedDocument, RagError>;
}

/// Reads a file as UTF-8, falling back to a Latin-1 interpretation for
/// legacy exports that are not valid UTF-8.
pub async fn read_text_with_fallback(path: &Path) -> Result<String, RagError> {
    let bytes = fs::read(path).await?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(err) => Ok(err
            .into_bytes()
            .iter()
            .map(|&byte| byte as char)
            .collect()),
    }
}

/// Splits text into paragraph chunks on blank lines, skipping
/// whitespace-only paragraphs. Indices are assigned over kept chunks.
pub fn split_paragraphs(text: &str, source_id: &str) -> Vec<DocumentChunk> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|paragraph| !paragraph.is_empty())
        .enumerate()
        .map(|(chunk_index, paragraph)| DocumentChunk {
            text: paragraph.to_string(),
            source_id: source_id.to_string(),
            chunk_index,
        })
        .collect()
}
