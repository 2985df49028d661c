use crate::config::{ApiConfig, PipelineMode};
use crate::error::ReelError;
use crate::ledger::ReelListing;
use crate::pipeline::{ReelPipeline, UploadQueue};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ReelPipeline>,
    pub queue: Arc<UploadQueue>,
    pub mode: PipelineMode,
}

/// Body of `POST /`
#[derive(Debug, Deserialize)]
pub struct WebhookRequest {
    pub reel_url: Option<String>,
}

/// Outcome of a webhook call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Success,
    Error,
}

/// Body returned by `POST /`
#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub status: WebhookStatus,
    pub message: String,
    /// Ledger record tracking a queued upload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
}

impl WebhookResponse {
    fn success(message: String, id: Option<Uuid>) -> Self {
        Self {
            status: WebhookStatus::Success,
            message,
            id,
        }
    }

    fn error(message: String) -> Self {
        Self {
            status: WebhookStatus::Error,
            message,
            id: None,
        }
    }
}

impl IntoResponse for ReelError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, kind = self.kind(), "Webhook request failed");
        } else {
            warn!(error = %self, kind = self.kind(), "Webhook request rejected");
        }
        (status, Json(WebhookResponse::error(self.to_string()))).into_response()
    }
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/", post(reels_webhook))
        .route("/reels", get(list_reels))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Parse the body as JSON whatever the declared content type
fn parse_reel_url(body: &[u8]) -> Result<String, ReelError> {
    let request: WebhookRequest = serde_json::from_slice(body)
        .map_err(|e| ReelError::InvalidInput(format!("Invalid JSON payload: {e}")))?;

    request
        .reel_url
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .ok_or_else(|| ReelError::InvalidInput("Missing 'reel_url' in payload".to_string()))
}

/// Receive a reel URL and store the reel
#[instrument(skip(state, body))]
async fn reels_webhook(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ReelError> {
    let reel_url = parse_reel_url(&body)?;
    info!(reel_url = %reel_url, "Webhook received");

    let reel = state.pipeline.resolve(&reel_url).await?;

    match state.mode {
        PipelineMode::Sync => {
            let stored = state.pipeline.store_now(&reel).await?;
            let message = if stored.inserted {
                format!("Saved reel and uploaded to {}", stored.url)
            } else {
                format!("Reel already saved at {}", stored.url)
            };
            Ok(Json(WebhookResponse::success(message, None)))
        }
        PipelineMode::Async => {
            let id = state.queue.submit(reel.clone()).await?;
            Ok(Json(WebhookResponse::success(
                format!("Reel {} accepted, upload in progress", reel.shortcode),
                Some(id),
            )))
        }
    }
}

/// List every reel record
async fn list_reels(
    State(state): State<AppState>,
) -> Result<Json<Vec<ReelListing>>, ReelError> {
    let records = state.pipeline.ledger().list().await?;
    Ok(Json(records.into_iter().map(ReelListing::from).collect()))
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "reel-webhook"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.pipeline.ledger().ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected",
                "uploads_in_flight": state.queue.in_flight()
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// Start the webhook API server; returns once `shutdown` resolves and open
/// connections have finished
pub async fn start_api_server<F>(state: AppState, config: &ApiConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting webhook API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Ledger, MemoryLedger, ReelStatus};
    use crate::object_store::{MockObjectStore, Payload};
    use crate::pipeline::PipelineSettings;
    use crate::resolver::{MockReelSource, Resolver};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use mockall::predicate::eq;
    use serde_json::Value;
    use tower::ServiceExt;

    const MEDIA_URL: &str = "https://cdn.example/video.mp4";
    const SIGNED_URL: &str = "https://store.example/ABC123.mp4?sig=abc";

    struct Harness {
        router: Router,
        queue: Arc<UploadQueue>,
        ledger: Arc<MemoryLedger>,
        scratch: tempfile::TempDir,
    }

    fn harness(source: MockReelSource, store: MockObjectStore, mode: PipelineMode) -> Harness {
        let scratch = tempfile::tempdir().unwrap();
        let ledger = Arc::new(MemoryLedger::new());
        let pipeline = Arc::new(ReelPipeline::new(
            Resolver::new(Arc::new(source)),
            Arc::new(store),
            ledger.clone(),
            PipelineSettings {
                retention_days: 6,
                temp_dir: scratch.path().to_path_buf(),
            },
        ));
        let queue = Arc::new(UploadQueue::new(pipeline.clone(), 4));
        let state = AppState {
            pipeline,
            queue: queue.clone(),
            mode,
        };

        Harness {
            router: create_router(state, &ApiConfig::default()),
            queue,
            ledger,
            scratch,
        }
    }

    fn resolving_source() -> MockReelSource {
        let mut source = MockReelSource::new();
        source
            .expect_media_url()
            .with(eq("ABC123"))
            .times(1)
            .returning(|_| Ok(Some(MEDIA_URL.to_string())));
        source
            .expect_download()
            .with(eq(MEDIA_URL))
            .returning(|_| Ok(bytes::Bytes::from_static(b"mp4")));
        source
    }

    fn signing_store() -> MockObjectStore {
        let mut store = MockObjectStore::new();
        store
            .expect_upload()
            .withf(|_, key| key == "ABC123.mp4")
            .times(1)
            .returning(|_, _| Ok(SIGNED_URL.to_string()));
        store
    }

    fn untouched() -> (MockReelSource, MockObjectStore) {
        let mut source = MockReelSource::new();
        source.expect_media_url().never();
        source.expect_download().never();
        let mut store = MockObjectStore::new();
        store.expect_upload().never();
        (source, store)
    }

    async fn post_raw(router: Router, body: &str, json_header: bool) -> (StatusCode, Value) {
        let mut request = Request::builder().method("POST").uri("/");
        if json_header {
            request = request.header(header::CONTENT_TYPE, "application/json");
        }
        let response = router
            .oneshot(request.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_missing_reel_url() {
        let (source, store) = untouched();
        let h = harness(source, store, PipelineMode::Async);

        let (status, body) = post_raw(h.router, r#"{"url": "x"}"#, true).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "Missing 'reel_url' in payload");
    }

    #[tokio::test]
    async fn test_non_reel_url_rejected_before_any_external_call() {
        let (source, store) = untouched();
        let h = harness(source, store, PipelineMode::Sync);

        let (status, body) = post_raw(
            h.router,
            r#"{"reel_url": "https://www.instagram.com/p/XYZ/"}"#,
            true,
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Invalid Instagram Reel URL.");
        assert!(h.ledger.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let (source, store) = untouched();
        let h = harness(source, store, PipelineMode::Async);

        let (status, body) = post_raw(h.router, "reel_url=abc", false).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn test_no_media_found_skips_storage_and_ledger() {
        let mut source = MockReelSource::new();
        source.expect_media_url().times(1).returning(|_| Ok(None));
        source.expect_download().never();
        let mut store = MockObjectStore::new();
        store.expect_upload().never();
        let h = harness(source, store, PipelineMode::Sync);

        let (status, body) = post_raw(
            h.router,
            r#"{"reel_url": "https://instagram.com/reel/ABC123/"}"#,
            true,
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "No video found for reel ABC123");
        assert!(h.ledger.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sync_end_to_end() {
        let h = harness(resolving_source(), signing_store(), PipelineMode::Sync);

        let (status, body) = post_raw(
            h.router.clone(),
            r#"{"reel_url": "https://instagram.com/reel/ABC123/?x=1"}"#,
            true,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert!(body["message"].as_str().unwrap().contains(SIGNED_URL));

        let (status, listing) = get_json(h.router, "/reels").await;
        assert_eq!(status, StatusCode::OK);
        let entries = listing.as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["url"], SIGNED_URL);
        assert_eq!(entries[0]["status"], "complete");
        assert!(entries[0].get("video_url").is_none());
        assert_eq!(std::fs::read_dir(h.scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_async_acknowledges_then_completes() {
        let h = harness(resolving_source(), signing_store(), PipelineMode::Async);

        // Raw body without a JSON content type is still accepted
        let (status, body) = post_raw(
            h.router.clone(),
            r#"{"reel_url": "https://instagram.com/reel/ABC123/?x=1"}"#,
            false,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        let id = body["id"].as_str().unwrap().to_string();

        h.queue.drain().await;

        let records = h.ledger.list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id.to_string(), id);
        assert_eq!(records[0].status, ReelStatus::Complete);
        assert_eq!(records[0].video_url.as_deref(), Some(SIGNED_URL));
    }

    #[tokio::test]
    async fn test_async_upload_failure_visible_in_listing() {
        let mut store = MockObjectStore::new();
        store
            .expect_upload()
            .returning(|_: Payload, _: &str| Err(ReelError::UploadFailed("AccessDenied".into())));
        let h = harness(resolving_source(), store, PipelineMode::Async);

        let (status, _) = post_raw(
            h.router.clone(),
            r#"{"reel_url": "https://instagram.com/reel/ABC123"}"#,
            true,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        h.queue.drain().await;

        let (_, listing) = get_json(h.router, "/reels").await;
        assert_eq!(listing[0]["status"], "failed");
        assert!(listing[0]["url"].is_null());
        assert!(listing[0]["error"].as_str().unwrap().contains("AccessDenied"));
    }

    #[tokio::test]
    async fn test_sync_storage_failure_is_server_error() {
        let mut store = MockObjectStore::new();
        store
            .expect_upload()
            .returning(|_, _| Err(ReelError::StorageUnavailable("connection refused".into())));
        let h = harness(resolving_source(), store, PipelineMode::Sync);

        let (status, body) = post_raw(
            h.router,
            r#"{"reel_url": "https://instagram.com/reel/ABC123"}"#,
            true,
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], "error");
        assert!(h.ledger.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_health_and_ready() {
        let (source, store) = untouched();
        let h = harness(source, store, PipelineMode::Async);

        let (status, body) = get_json(h.router.clone(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (status, body) = get_json(h.router, "/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");
    }

    #[test]
    fn test_parse_reel_url_trims() {
        assert_eq!(
            parse_reel_url(br#"{"reel_url": "  https://instagram.com/reel/A  "}"#).unwrap(),
            "https://instagram.com/reel/A"
        );
        assert!(parse_reel_url(br#"{"reel_url": ""}"#).is_err());
        assert!(parse_reel_url(b"[]").is_err());
    }
}
