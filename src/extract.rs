//! Client for the external text-extraction service (Tika protocol).
//!
//! One call uploads the raw file bytes with a `PUT` to `<base>/tika/text`
//! and interprets the JSON response: the reserved `X-TIKA:content` key is
//! the extracted text, everything else is metadata. Transport failures and
//! busy responses are retried with exponential backoff under a fixed elapsed
//! budget; the body is re-supplied on each attempt by re-opening the file
//! instead of buffering it in memory.

use std::path::Path;
use std::time::{Duration, Instant};

use encoding_rs::{Encoding, UTF_8};
use reqwest::{Body, StatusCode};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::ExtractionConfig;
use crate::models::ExtractionResult;

/// Reserved response key holding the extracted text.
const CONTENT_KEY: &str = "X-TIKA:content";
/// Response key naming the source encoding the service detected.
const DETECTED_ENCODING_KEY: &str = "X-TIKA:detectedEncoding";

/// Backoff schedule for extraction requests.
///
/// An immutable value handed to the client at construction; there is no
/// shared mutable retry state.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Total elapsed budget across all attempts.
    pub max_duration: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            factor: 1.5,
            max_duration: Duration::from_secs(30),
        }
    }
}

impl From<&ExtractionConfig> for RetryPolicy {
    fn from(config: &ExtractionConfig) -> Self {
        Self {
            delay: Duration::from_millis(config.delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            factor: config.factor,
            max_duration: Duration::from_millis(config.max_duration_ms),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), capped at `max_delay`.
    fn backoff(&self, attempt: u32) -> Duration {
        let scaled = self.delay.as_secs_f64() * self.factor.powi(attempt as i32 - 1);
        self.max_delay.min(Duration::from_secs_f64(scaled))
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("open {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("extraction request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("extraction service returned {0}")]
    Status(StatusCode),
    #[error("decode extraction response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("extraction response lacks a usable {CONTENT_KEY} field")]
    MalformedContent,
    #[error("operation cancelled")]
    Cancelled,
}

pub struct ExtractionClient {
    base_url: String,
    policy: RetryPolicy,
    http: reqwest::Client,
}

impl ExtractionClient {
    pub fn new(base_url: &str, policy: RetryPolicy) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            policy,
            http: reqwest::Client::new(),
        }
    }

    /// Extract text and metadata from the file at `path`.
    ///
    /// Transport failures and 503 are retried with backoff until the policy
    /// budget runs out, then the last error is surfaced. 422 (unsupported
    /// content) is a soft failure: the result is a success carrying only an
    /// `error` metadata field and empty content, so the file still gets a
    /// minimal placeholder row. Any other 4xx/5xx is a hard failure.
    pub async fn extract(
        &self,
        path: &Path,
        declared_type: &str,
        cancel: &CancellationToken,
    ) -> Result<ExtractionResult, ExtractError> {
        let content_type = resolve_content_type(path, declared_type).await?;
        let started = Instant::now();
        let mut attempt: u32 = 0;

        let response = loop {
            let last_err = match self.try_request(path, &content_type, cancel).await {
                Ok(response) if response.status() != StatusCode::SERVICE_UNAVAILABLE => {
                    break response
                }
                Ok(response) => {
                    warn!(path = %path.display(), "extraction service busy");
                    ExtractError::Status(response.status())
                }
                Err(err @ ExtractError::Transport(_)) => {
                    warn!(path = %path.display(), error = %err, "extraction request failed");
                    err
                }
                Err(err) => return Err(err),
            };

            attempt += 1;
            let delay = self.policy.backoff(attempt);
            if started.elapsed() + delay > self.policy.max_duration {
                return Err(last_err);
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ExtractError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        };

        let status = response.status();
        if status.as_u16() >= 400 {
            if status == StatusCode::UNPROCESSABLE_ENTITY {
                let mut metadata = Map::new();
                metadata.insert("error".to_string(), Value::String(status.to_string()));
                return Ok(ExtractionResult {
                    content: String::new(),
                    metadata,
                });
            }
            return Err(ExtractError::Status(status));
        }

        let bytes = response.bytes().await?;
        let mut fields: Map<String, Value> = serde_json::from_slice(&bytes)?;
        let content = match fields.remove(CONTENT_KEY) {
            Some(Value::String(content)) => content,
            Some(Value::Null) => String::new(),
            _ => return Err(ExtractError::MalformedContent),
        };
        let content = repair_encoding(content, &fields);

        Ok(ExtractionResult {
            content,
            metadata: fields,
        })
    }

    /// One upload attempt. The file is opened fresh so a retry never depends
    /// on a consumed body.
    async fn try_request(
        &self,
        path: &Path,
        content_type: &str,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, ExtractError> {
        let file = File::open(path).await.map_err(|source| ExtractError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let request = self
            .http
            .put(format!("{}/tika/text", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(Body::wrap_stream(ReaderStream::new(file)))
            .send();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ExtractError::Cancelled),
            response = request => Ok(response?),
        }
    }
}

/// Re-decode `content` when the service detected a non-UTF-8 source encoding.
///
/// The service may hand back text whose bytes are still in the detected
/// encoding; decode them under the declared label. Unknown labels are logged
/// and the text kept as-is. Decoding is lossy: malformed sequences become
/// U+FFFD rather than failing the attachment.
fn repair_encoding(content: String, fields: &Map<String, Value>) -> String {
    let Some(label) = fields.get(DETECTED_ENCODING_KEY).and_then(Value::as_str) else {
        return content;
    };
    if label.is_empty() {
        return content;
    }
    let Some(encoding) = Encoding::for_label(label.as_bytes()) else {
        warn!(label, "unknown detected encoding");
        return content;
    };
    if encoding == UTF_8 {
        return content;
    }
    let (decoded, _, had_errors) = encoding.decode(content.as_bytes());
    if had_errors {
        warn!(label, "lossy transcode of extracted text");
    }
    decoded.into_owned()
}

/// Resolve the content type sent with the upload.
///
/// Cleans the declared type first; when nothing was declared, guesses from
/// the filename and finally peeks at the leading bytes.
async fn resolve_content_type(path: &Path, declared: &str) -> Result<String, ExtractError> {
    let cleaned = clean_declared_type(declared);
    if !cleaned.is_empty() {
        return Ok(cleaned);
    }
    if let Some(guessed) = mime_guess::from_path(path).first_raw() {
        return Ok(guessed.to_string());
    }
    let mut file = File::open(path).await.map_err(|source| ExtractError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut head = [0u8; 4096];
    let n = file.read(&mut head).await.map_err(|source| ExtractError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(sniff_bytes(&head[..n]).to_string())
}

/// Strip `;`-delimited parameters and repair the doubled
/// `application/application/x` artifact found in legacy rows.
fn clean_declared_type(declared: &str) -> String {
    let mut typ = declared
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();
    if let Some((pre, post)) = typ.split_once("/application/") {
        typ = format!("{pre}/{post}");
    }
    typ
}

/// Crude sniff of the leading bytes: UTF-8 reads as text, anything else is
/// an opaque binary.
fn sniff_bytes(head: &[u8]) -> &'static str {
    match std::str::from_utf8(head) {
        Ok(_) => "text/plain",
        // a multibyte char clipped by the sample window still reads as text
        Err(e) if e.error_len().is_none() => "text/plain",
        Err(_) => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn backoff_grows_by_factor_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_millis(1_500));
        assert_eq!(policy.backoff(3), Duration::from_millis(2_250));
        assert_eq!(policy.backoff(5), Duration::from_secs(5));
        assert_eq!(policy.backoff(10), Duration::from_secs(5));
    }

    #[test]
    fn declared_type_parameters_are_stripped() {
        assert_eq!(
            clean_declared_type("text/plain; charset=utf-8"),
            "text/plain"
        );
        assert_eq!(clean_declared_type("application/pdf"), "application/pdf");
        assert_eq!(clean_declared_type(""), "");
    }

    #[test]
    fn doubled_application_type_is_repaired() {
        assert_eq!(
            clean_declared_type("application/application/pdf"),
            "application/pdf"
        );
    }

    #[test]
    fn sniff_classifies_text_and_binary() {
        assert_eq!(sniff_bytes(b"plain old text"), "text/plain");
        assert_eq!(sniff_bytes(&[0x00, 0xff, 0xd8, 0xff]), "application/octet-stream");
        // clipped multibyte tail still counts as text
        let mut clipped = "tail é".as_bytes().to_vec();
        clipped.pop();
        assert_eq!(sniff_bytes(&clipped), "text/plain");
    }

    #[test]
    fn utf8_label_leaves_content_alone() {
        let mut fields = Map::new();
        fields.insert(DETECTED_ENCODING_KEY.to_string(), json!("UTF-8"));
        assert_eq!(repair_encoding("héllo".to_string(), &fields), "héllo");
    }

    #[test]
    fn unknown_label_leaves_content_alone() {
        let mut fields = Map::new();
        fields.insert(DETECTED_ENCODING_KEY.to_string(), json!("no-such-charset"));
        assert_eq!(repair_encoding("héllo".to_string(), &fields), "héllo");
    }

    #[test]
    fn missing_label_leaves_content_alone() {
        assert_eq!(repair_encoding("héllo".to_string(), &Map::new()), "héllo");
    }
}
