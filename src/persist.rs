//! Adaptive chunk-size persistence.
//!
//! Chunks an attachment's text and writes every segment in one transaction.
//! When the store rejects a segment's text as untokenizable, the chunk
//! length is halved and the whole attachment retried; any other failure
//! abandons the attachment. Either every segment commits or none does.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::chunk::split_at;
use crate::config::ChunkingConfig;
use crate::models::Segment;
use crate::store::{ErrorKind, StoreError};

/// Store seam for segment writes. One call writes all segments of one
/// attachment transactionally, replacing any previously indexed ones.
#[async_trait]
pub trait SegmentWriter {
    async fn write_all(
        &mut self,
        file_id: i32,
        meta: &Value,
        segments: &[Segment<'_>],
    ) -> Result<(), StoreError>;
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("segment write failed: {0}")]
    Store(StoreError),
    #[error("chunk length floor reached without storable text: {0}")]
    RetriesExhausted(#[source] StoreError),
    #[error("content would exceed {0} segments")]
    TooManySegments(usize),
    #[error("operation cancelled")]
    Cancelled,
}

/// Persist `content` for `file_id`, shrinking the chunk length on
/// invalid-text rejections until the floor is reached.
///
/// Returns the number of segments committed.
pub async fn persist<W: SegmentWriter + Send>(
    writer: &mut W,
    config: &ChunkingConfig,
    file_id: i32,
    meta: &Value,
    content: &str,
    cancel: &CancellationToken,
) -> Result<usize, PersistError> {
    let mut length = config.max_len;
    loop {
        let segments: Vec<Segment<'_>> = split_at(content, length)
            .into_iter()
            .enumerate()
            .map(|(i, text)| Segment { seq: i as i16, text })
            .collect();
        if segments.len() > config.max_segments {
            return Err(PersistError::TooManySegments(segments.len()));
        }

        let written = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PersistError::Cancelled),
            written = writer.write_all(file_id, meta, &segments) => written,
        };
        match written {
            Ok(()) => return Ok(segments.len()),
            Err(err) if err.kind == ErrorKind::InvalidText => {
                if length / 2 < config.floor_len {
                    warn!(file_id, length, "chunk length floor reached, abandoning");
                    return Err(PersistError::RetriesExhausted(err));
                }
                warn!(file_id, length, error = %err, "store rejected text, halving chunk length");
                length /= 2;
            }
            Err(err) => return Err(PersistError::Store(err)),
        }
    }
}
