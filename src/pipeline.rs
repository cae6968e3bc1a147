//! Batch driver: candidate rows → extraction → normalization → persistence.
//!
//! Attachments are processed strictly one at a time, in the order the
//! candidate query yields them. Per-attachment failures are logged and the
//! batch continues; only store-level failures (connect, bootstrap, prepare,
//! row scan) abort the whole run.

use anyhow::{Context, Result};
use futures::TryStreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::extract::{ExtractionClient, RetryPolicy};
use crate::models::{Attachment, ExtractionResult};
use crate::normalize::normalize;
use crate::persist::persist;
use crate::store::{self, PgSegmentWriter};

pub async fn run(
    config: &Config,
    tika_url: &str,
    conn_string: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut query_conn = store::connect(conn_string).await?;
    let mut index_conn = store::connect(conn_string).await?;

    store::bootstrap(&mut index_conn).await?;
    store::prepare_insert(&mut index_conn).await?;

    let mut writer = PgSegmentWriter::new(index_conn, config.indexing.language.clone());
    let client = ExtractionClient::new(tika_url, RetryPolicy::from(&config.extraction));

    let sql = store::candidate_sql(
        config.indexing.sample_percent,
        config.indexing.resample_reindex,
    );
    let mut rows = store::fetch_candidates(&mut query_conn, &sql);

    let mut indexed = 0u64;
    let mut abandoned = 0u64;
    while let Some(attachment) = rows.try_next().await.context("scan candidate row")? {
        if cancel.is_cancelled() {
            info!("interrupted, stopping");
            break;
        }
        match index_one(&client, &mut writer, config, &attachment, cancel).await {
            Ok(segments) => {
                indexed += 1;
                info!(file_id = attachment.id, segments, "indexed attachment");
            }
            Err(err) => {
                if cancel.is_cancelled() {
                    info!("interrupted, stopping");
                    break;
                }
                abandoned += 1;
                warn!(
                    file_id = attachment.id,
                    path = %attachment.path.display(),
                    error = format!("{err:#}"),
                    "attachment abandoned"
                );
            }
        }
    }

    info!(indexed, abandoned, "run complete");
    Ok(())
}

/// Everything between a candidate row and its committed segments. Errors
/// here abandon this attachment only.
async fn index_one(
    client: &ExtractionClient,
    writer: &mut PgSegmentWriter,
    config: &Config,
    attachment: &Attachment,
    cancel: &CancellationToken,
) -> Result<usize> {
    let result = client
        .extract(&attachment.path, &attachment.declared_type, cancel)
        .await
        .with_context(|| format!("extract {}", attachment.path.display()))?;

    let ExtractionResult { content, metadata } =
        normalize(result, config.indexing.max_content_bytes);
    let meta = Value::Object(metadata);

    persist(
        writer,
        &config.chunking,
        attachment.id,
        &meta,
        &content,
        cancel,
    )
    .await
    .with_context(|| format!("persist attachment {}", attachment.id))
}
