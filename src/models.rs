//! Core data types flowing through the indexing pipeline.
//!
//! All of these live in memory for the duration of one attachment; nothing
//! is cached or shared across attachments.

use std::path::PathBuf;

use serde_json::{Map, Value};

/// One candidate row from the attachment table, ready for extraction.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub id: i32,
    /// Resolved filesystem location of the stored file.
    pub path: PathBuf,
    /// Declared MIME type; may be empty or malformed.
    pub declared_type: String,
}

/// Text and metadata the extraction service produced for one file.
///
/// `content` is valid UTF-8 after encoding repair and may be truncated by
/// the normalizer. `metadata` holds every response field except the reserved
/// text key.
#[derive(Debug, Clone, Default)]
pub struct ExtractionResult {
    pub content: String,
    pub metadata: Map<String, Value>,
}

/// One bounded slice of an attachment's extracted text.
///
/// Concatenating all segments of an attachment in `seq` order reconstructs
/// the normalized content exactly.
#[derive(Debug, Clone, Copy)]
pub struct Segment<'a> {
    /// Zero-based position within the attachment's content.
    pub seq: i16,
    pub text: &'a str,
}
