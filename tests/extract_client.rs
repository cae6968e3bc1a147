//! Extraction client behavior against a live HTTP server: retry on busy,
//! soft failure on unsupported content, hard failure otherwise.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum::routing::put;
use axum::Router;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use attachment_indexer::extract::{ExtractError, ExtractionClient, RetryPolicy};

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn sample_file(dir: &tempfile::TempDir) -> PathBuf {
    let path = dir.path().join("sample.txt");
    std::fs::write(&path, "attachment body for upload").unwrap();
    path
}

fn quick_policy() -> RetryPolicy {
    RetryPolicy {
        delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(200),
        factor: 1.5,
        max_duration: Duration::from_secs(5),
    }
}

fn fixed_status(status: StatusCode, hits: Arc<AtomicUsize>) -> Router {
    Router::new().route(
        "/tika/text",
        put(move || {
            hits.fetch_add(1, Ordering::SeqCst);
            async move { (status, String::new()) }
        }),
    )
}

#[tokio::test]
async fn busy_responses_are_retried_until_success() {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new().route(
        "/tika/text",
        put({
            let hits = hits.clone();
            move || {
                let n = hits.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        (StatusCode::SERVICE_UNAVAILABLE, String::new())
                    } else {
                        (
                            StatusCode::OK,
                            json!({
                                "X-TIKA:content": "hello world",
                                "Author": "someone",
                            })
                            .to_string(),
                        )
                    }
                }
            }
        }),
    );
    let base = serve(app).await;
    let dir = tempfile::TempDir::new().unwrap();
    let path = sample_file(&dir);

    let client = ExtractionClient::new(&base, quick_policy());
    let started = Instant::now();
    let result = client
        .extract(&path, "text/plain", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.content, "hello world");
    assert_eq!(result.metadata["Author"], json!("someone"));
    assert!(!result.metadata.contains_key("X-TIKA:content"));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    // two backoff sleeps: 50ms + 75ms
    assert!(started.elapsed() >= Duration::from_millis(125));
}

#[tokio::test]
async fn unsupported_content_is_a_soft_success() {
    let hits = Arc::new(AtomicUsize::new(0));
    let base = serve(fixed_status(StatusCode::UNPROCESSABLE_ENTITY, hits.clone())).await;
    let dir = tempfile::TempDir::new().unwrap();
    let path = sample_file(&dir);

    let client = ExtractionClient::new(&base, quick_policy());
    let result = client
        .extract(&path, "application/x-obscure", &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.content.is_empty());
    assert_eq!(result.metadata.len(), 1);
    let error = result.metadata["error"].as_str().unwrap();
    assert!(error.starts_with("422"), "{error:?}");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn server_error_is_a_hard_failure_without_retry() {
    let hits = Arc::new(AtomicUsize::new(0));
    let base = serve(fixed_status(StatusCode::INTERNAL_SERVER_ERROR, hits.clone())).await;
    let dir = tempfile::TempDir::new().unwrap();
    let path = sample_file(&dir);

    let client = ExtractionClient::new(&base, quick_policy());
    let err = client
        .extract(&path, "text/plain", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(
        matches!(err, ExtractError::Status(status) if status == StatusCode::INTERNAL_SERVER_ERROR)
    );
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retry_budget_exhaustion_surfaces_the_last_error() {
    let hits = Arc::new(AtomicUsize::new(0));
    let base = serve(fixed_status(StatusCode::SERVICE_UNAVAILABLE, hits.clone())).await;
    let dir = tempfile::TempDir::new().unwrap();
    let path = sample_file(&dir);

    let policy = RetryPolicy {
        delay: Duration::from_millis(60),
        max_delay: Duration::from_millis(200),
        factor: 1.5,
        max_duration: Duration::from_millis(150),
    };
    let client = ExtractionClient::new(&base, policy);
    let err = client
        .extract(&path, "text/plain", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(
        matches!(err, ExtractError::Status(status) if status == StatusCode::SERVICE_UNAVAILABLE)
    );
    let attempts = hits.load(Ordering::SeqCst);
    assert!((1..=3).contains(&attempts), "attempts = {attempts}");
}

#[tokio::test]
async fn detected_encoding_stays_in_metadata() {
    let app = Router::new().route(
        "/tika/text",
        put(|| async {
            (
                StatusCode::OK,
                json!({
                    "X-TIKA:content": "body text",
                    "X-TIKA:detectedEncoding": "UTF-8",
                    "dc:title": "report",
                })
                .to_string(),
            )
        }),
    );
    let base = serve(app).await;
    let dir = tempfile::TempDir::new().unwrap();
    let path = sample_file(&dir);

    let client = ExtractionClient::new(&base, quick_policy());
    let result = client
        .extract(&path, "text/plain", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.content, "body text");
    assert_eq!(result.metadata["X-TIKA:detectedEncoding"], json!("UTF-8"));
    assert_eq!(result.metadata["dc:title"], json!("report"));
}

#[tokio::test]
async fn cancellation_aborts_before_any_request() {
    let hits = Arc::new(AtomicUsize::new(0));
    let base = serve(fixed_status(StatusCode::OK, hits.clone())).await;
    let dir = tempfile::TempDir::new().unwrap();
    let path = sample_file(&dir);

    let cancel = CancellationToken::new();
    cancel.cancel();

    let client = ExtractionClient::new(&base, quick_policy());
    let err = client
        .extract(&path, "text/plain", &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, ExtractError::Cancelled));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn missing_file_fails_without_retry() {
    let hits = Arc::new(AtomicUsize::new(0));
    let base = serve(fixed_status(StatusCode::OK, hits.clone())).await;

    let client = ExtractionClient::new(&base, quick_policy());
    let err = client
        .extract(
            std::path::Path::new("/no/such/file"),
            "text/plain",
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ExtractError::Io { .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}
