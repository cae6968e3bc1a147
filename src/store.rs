//! Postgres adapter: connections, schema bootstrap, the candidate query and
//! the transactional segment writer.
//!
//! Two single connections are used, one read-only for candidate selection and
//! one read-write for DDL and inserts, so candidate rows can be streamed
//! while segments are written. The insert statement is prepared once
//! and reused across all segments of all attachments (sqlx caches it on the
//! connection).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgRow};
use sqlx::{Connection, PgConnection, Row};
use thiserror::Error;
use tracing::debug;

use crate::models::{Attachment, Segment};
use crate::persist::SegmentWriter;

const INSERT_SQL: &str = "INSERT INTO attachment_search_segment \
    (file_id, seq, meta, content, tsvec) \
    VALUES ($1, $2, $3, $4, to_tsvector($5::regconfig, $4))";

/// How an insert failure should be handled. Classification happens here, at
/// the store boundary; nothing upstream matches on SQLSTATE codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The search-vector generator rejected the text (SQLSTATE 22021,
    /// `character_not_in_repertoire`); smaller chunks may succeed.
    InvalidText,
    /// Anything else; not worth retrying for this attachment.
    Fatal,
}

#[derive(Debug, Error)]
#[error("store error ({kind:?}): {source}")]
pub struct StoreError {
    pub kind: ErrorKind,
    #[source]
    pub source: sqlx::Error,
}

impl From<sqlx::Error> for StoreError {
    fn from(source: sqlx::Error) -> Self {
        let kind = match &source {
            sqlx::Error::Database(db) if db.code().as_deref() == Some("22021") => {
                ErrorKind::InvalidText
            }
            _ => ErrorKind::Fatal,
        };
        Self { kind, source }
    }
}

/// Connect with either a URL (`postgres://...`) or a key-value DSN. A bare
/// word is shorthand for a database name on a default local connection.
pub async fn connect(conn_string: &str) -> Result<PgConnection> {
    let options = if conn_string.contains("://") || conn_string.contains('=') {
        conn_string
            .parse::<PgConnectOptions>()
            .with_context(|| format!("parse connection string {conn_string:?}"))?
    } else {
        PgConnectOptions::new().database(conn_string)
    };
    PgConnection::connect_with(&options)
        .await
        .with_context(|| format!("connect to {conn_string:?}"))
}

/// Create the segment table and its indexes. Idempotent; run once at startup
/// on the read-write connection.
pub async fn bootstrap(conn: &mut PgConnection) -> Result<()> {
    for ddl in [
        "CREATE TABLE IF NOT EXISTS attachment_search_segment \
            (file_id INTEGER NOT NULL, seq SMALLINT NOT NULL, \
             meta JSONB, content TEXT, tsvec TSVECTOR)",
        "CREATE INDEX IF NOT EXISTS attachment_search_segment_file_id_idx \
            ON attachment_search_segment (file_id)",
        "CREATE INDEX IF NOT EXISTS attachment_search_segment_tsvec_idx \
            ON attachment_search_segment USING GIN (tsvec)",
    ] {
        sqlx::query(ddl)
            .execute(&mut *conn)
            .await
            .with_context(|| ddl.to_string())?;
    }
    Ok(())
}

/// Prepare the segment insert ahead of the run. sqlx keeps the statement
/// cached on the connection for every subsequent execute.
pub async fn prepare_insert(conn: &mut PgConnection) -> Result<()> {
    use sqlx::Executor;
    conn.prepare(INSERT_SQL)
        .await
        .context("prepare segment insert")?;
    Ok(())
}

/// Build the candidate query: attachments past the indexed high-water mark,
/// optionally unioned with a random sample to catch stragglers (or, when
/// `resample_reindex` is set, to deliberately reprocess indexed files).
/// Image, video, executable and archive types are excluded outright.
pub fn candidate_sql(sample_percent: u8, resample_reindex: bool) -> String {
    let type_filter = "file_type NOT LIKE 'image/%' \
        AND file_type NOT LIKE 'video/%' \
        AND file_type NOT LIKE 'application/x-executable%' \
        AND file_type NOT IN ('application/x-java-archive')";

    let fresh = format!(
        "SELECT id, folder, diskfile, file_type FROM attachment_file a \
         WHERE {type_filter} \
           AND a.id > COALESCE((SELECT MAX(file_id) FROM attachment_search_segment), 0)"
    );
    if sample_percent == 0 {
        return fresh;
    }

    let skip_indexed = if resample_reindex {
        ""
    } else {
        " AND NOT EXISTS \
         (SELECT 1 FROM attachment_search_segment s WHERE s.file_id = a.id)"
    };
    format!(
        "SELECT id, folder, diskfile, file_type FROM attachment_file a \
         TABLESAMPLE SYSTEM ({sample_percent}) \
         WHERE {type_filter}{skip_indexed} \
         UNION {fresh}"
    )
}

/// Stream candidate attachments in query order.
pub fn fetch_candidates<'c>(
    conn: &'c mut PgConnection,
    sql: &'c str,
) -> impl Stream<Item = Result<Attachment, sqlx::Error>> + Unpin + 'c {
    sqlx::query(sql)
        .fetch(conn)
        .map(|row| row.and_then(attachment_from_row))
}

fn attachment_from_row(row: PgRow) -> Result<Attachment, sqlx::Error> {
    let id: i32 = row.try_get("id")?;
    let folder: Option<String> = row.try_get("folder")?;
    let diskfile: Option<String> = row.try_get("diskfile")?;
    let declared_type: Option<String> = row.try_get("file_type")?;
    Ok(Attachment {
        id,
        path: resolve_path(
            folder.as_deref().unwrap_or_default(),
            diskfile.as_deref().unwrap_or_default(),
        ),
        declared_type: declared_type.unwrap_or_default(),
    })
}

/// Older rows keep a bare filename in `diskfile` with its directory in
/// `folder`; newer rows store a full path in `diskfile`.
pub fn resolve_path(folder: &str, diskfile: &str) -> PathBuf {
    if !folder.is_empty() && !diskfile.contains('/') {
        Path::new(folder).join(diskfile)
    } else {
        PathBuf::from(diskfile)
    }
}

/// Transactional segment writer backed by Postgres.
///
/// The search vector is computed server-side at insert time; the text search
/// language is bound as a `regconfig` parameter rather than spliced into the
/// SQL.
pub struct PgSegmentWriter {
    conn: PgConnection,
    language: String,
}

impl PgSegmentWriter {
    pub fn new(conn: PgConnection, language: String) -> Self {
        Self { conn, language }
    }
}

#[async_trait]
impl SegmentWriter for PgSegmentWriter {
    async fn write_all(
        &mut self,
        file_id: i32,
        meta: &Value,
        segments: &[Segment<'_>],
    ) -> Result<(), StoreError> {
        let mut tx = self.conn.begin().await?;
        // a re-indexed attachment replaces its previous segments
        sqlx::query("DELETE FROM attachment_search_segment WHERE file_id = $1")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;
        for segment in segments {
            debug!(file_id, seq = segment.seq, len = segment.text.len(), "insert segment");
            sqlx::query(INSERT_SQL)
                .bind(file_id)
                .bind(segment.seq)
                .bind(meta)
                .bind(segment.text)
                .bind(&self.language)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
