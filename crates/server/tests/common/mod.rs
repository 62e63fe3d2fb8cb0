//! Common test utilities for API testing with mock adapters.
//!
//! This module provides a test fixture that creates an in-process server
//! with scripted capture and transfer adapters injected, so whole download
//! lifecycles run without any network.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use streamgrab_core::{
    testing::{MockCapture, MockTransfer},
    Config, DownloadScheduler, EventBroadcaster, FallbackResolver, JobRegistry, JobRunner,
    OrchestratorConfig, ResolverConfig, SchedulerConfig, SqliteJobStore,
};
use streamgrab_server::state::AppState;

/// Re-export fixtures for test convenience
#[allow(unused_imports)]
pub use streamgrab_core::testing::fixtures;
#[allow(unused_imports)]
pub use streamgrab_core::testing::{CaptureScript, TransferScript};

/// Test fixture for API testing with mock adapters.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_download_creation() {
///     let fixture = TestFixture::new().await;
///
///     let response = fixture.post("/api/downloads", json!({
///         "source": "https://example.com/watch/dune",
///         "content_type": "movie"
///     })).await;
///
///     assert_eq!(response.status, 201);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Mock capture adapter - script per endpoint
    pub capture: Arc<MockCapture>,
    /// Mock transfer adapter - script per descriptor URL
    pub transfer: Arc<MockTransfer>,
    /// Scheduler behind the router
    pub scheduler: DownloadScheduler,
    /// Event broadcaster behind the WebSocket channel
    pub events: EventBroadcaster,
    /// Temporary directory for downloads
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

/// Configuration for test fixture.
#[derive(Debug, Clone)]
pub struct TestConfig {
    /// Download slots
    pub max_concurrent_downloads: usize,
    /// Cancellation grace period in milliseconds
    pub cancel_grace_ms: u64,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 1,
            cancel_grace_ms: 200,
        }
    }
}

#[allow(dead_code)]
impl TestFixture {
    /// Create a new test fixture with default settings.
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    /// Create a test fixture with custom configuration.
    pub async fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let config = Config {
            scheduler: SchedulerConfig {
                max_concurrent_downloads: test_config.max_concurrent_downloads,
            },
            resolver: ResolverConfig {
                transfer_retry_delay_ms: 1,
                ..Default::default()
            },
            orchestrator: OrchestratorConfig {
                cancel_grace_ms: test_config.cancel_grace_ms,
                download_dir: temp_dir.path().join("downloads"),
            },
            ..Default::default()
        };

        let capture = Arc::new(MockCapture::new());
        let transfer = Arc::new(MockTransfer::new());

        let store = Arc::new(SqliteJobStore::in_memory().expect("Failed to create job store"));
        let events = EventBroadcaster::new(config.events.buffer_size);
        let registry = JobRegistry::new(store, events.clone());

        let resolver = Arc::new(FallbackResolver::new(
            Arc::clone(&capture) as Arc<dyn streamgrab_core::CaptureAdapter>,
            Arc::clone(&transfer) as Arc<dyn streamgrab_core::TransferAdapter>,
            config.resolver.clone(),
        ));
        let runner = JobRunner::new(registry, resolver, config.orchestrator.clone());
        let scheduler = DownloadScheduler::new(config.scheduler.clone(), runner);
        scheduler.start().expect("Failed to start scheduler");

        let state = Arc::new(AppState::new(config, scheduler.clone(), events.clone()));
        let router = streamgrab_server::api::create_router(state);

        Self {
            router,
            capture,
            transfer,
            scheduler,
            events,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Poll a download until it reaches `status`, panicking after a few seconds.
    pub async fn wait_for_status(&self, id: &str, status: &str) -> Value {
        let path = format!("/api/downloads/{}", id);
        for _ in 0..200 {
            let response = self.get(&path).await;
            if response.body["status"] == status {
                return response.body;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let last = self.get(&path).await;
        panic!("download {} never reached {}: {}", id, status, last.body);
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        self.send(request_builder.body(body).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body_bytes).into_owned()))
        };

        TestResponse { status, body }
    }
}
