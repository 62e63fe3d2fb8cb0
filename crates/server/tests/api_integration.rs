//! End-to-end API tests with scripted adapters.
//!
//! These tests run the full server stack in-process: router, scheduler,
//! runner and resolver, with mock capture/transfer adapters and an in-memory
//! job store.

mod common;

use axum::http::StatusCode;
use serde_json::{json, Value};

use common::{CaptureScript, TestConfig, TestFixture, TransferScript};

fn movie(name: &str, endpoints: &[&str]) -> Value {
    let candidates: Vec<Value> = endpoints
        .iter()
        .enumerate()
        .map(|(rank, endpoint)| json!({ "endpoint": endpoint, "rank": rank }))
        .collect();
    json!({
        "source": format!("https://example.com/watch/{}", name.to_lowercase()),
        "name": name,
        "content_type": "movie",
        "candidates": candidates,
    })
}

async fn create(fixture: &TestFixture, body: Value) -> String {
    let response = fixture.post("/api/downloads", body).await;
    assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
    response.body["id"].as_str().unwrap().to_string()
}

// =============================================================================
// Basic API Tests
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/health").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
}

#[tokio::test]
async fn test_config_endpoint_is_sanitized() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/config").await;

    assert_eq!(response.status, StatusCode::OK);
    assert!(response.body.get("database").is_none());
    assert_eq!(response.body["scheduler"]["max_concurrent_downloads"], 1);
}

#[tokio::test]
async fn test_status_endpoint() {
    let fixture = TestFixture::new().await;
    let response = fixture.get("/api/status").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["running"], true);
    assert_eq!(response.body["max_concurrent"], 1);
    assert_eq!(response.body["queued_count"], 0);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let fixture = TestFixture::new().await;
    fixture.get("/api/health").await;

    let response = fixture.get("/metrics").await;
    assert_eq!(response.status, StatusCode::OK);
    let text = response.body.as_str().unwrap();
    assert!(text.contains("streamgrab_http_requests_total"));
    assert!(text.contains("streamgrab_scheduler_running"));
}

// =============================================================================
// Create / Get / List
// =============================================================================

#[tokio::test]
async fn test_create_download_defaults_candidate_to_source() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post(
            "/api/downloads",
            json!({
                "source": "https://example.com/watch/1590407",
                "content_type": "movie",
                "year": 2021
            }),
        )
        .await;

    assert_eq!(response.status, StatusCode::CREATED);
    assert!(response.body["id"].is_string());
    assert_eq!(response.body["title"], "1590407");
    assert_eq!(response.body["content_type"], "movie");
    assert_eq!(
        response.body["candidates"][0]["endpoint"],
        "https://example.com/watch/1590407"
    );
}

#[tokio::test]
async fn test_create_episode_uses_name_override() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post(
            "/api/downloads",
            json!({
                "source": "https://example.com/watch/x1",
                "name": "Severance",
                "content_type": "episode",
                "episode": { "season": 2, "episode": 3 },
                "candidates": [{ "endpoint": "mirror-a" }]
            }),
        )
        .await;

    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.body["title"], "Severance");
    assert_eq!(response.body["episode"]["season"], 2);
    assert_eq!(response.body["episode"]["episode"], 3);
}

#[tokio::test]
async fn test_create_episode_without_numbers_is_rejected() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post(
            "/api/downloads",
            json!({
                "source": "https://example.com/watch/x1",
                "content_type": "episode"
            }),
        )
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(response.body["error"].as_str().unwrap().contains("episode"));
}

#[tokio::test]
async fn test_create_with_duplicate_candidates_is_rejected() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post("/api/downloads", movie("Dune", &["mirror-a", "mirror-a"]))
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(response.body["error"].as_str().unwrap().contains("duplicate"));
}

#[tokio::test]
async fn test_create_malformed_json_is_rejected() {
    let fixture = TestFixture::new().await;

    let response = fixture.post_raw("/api/downloads", "{ not json").await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(response.body["error"].is_string());
}

#[tokio::test]
async fn test_get_unknown_download_returns_404() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/downloads/does-not-exist").await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert!(response.body["error"]
        .as_str()
        .unwrap()
        .contains("does-not-exist"));
}

#[tokio::test]
async fn test_list_downloads_most_recent_first() {
    let fixture = TestFixture::new().await;

    let first = create(&fixture, movie("First", &["mirror-1"])).await;
    let second = create(&fixture, movie("Second", &["mirror-2"])).await;
    let third = create(&fixture, movie("Third", &["mirror-3"])).await;

    let response = fixture.get("/api/downloads").await;
    assert_eq!(response.status, StatusCode::OK);
    let ids: Vec<&str> = response
        .body
        .as_array()
        .unwrap()
        .iter()
        .map(|job| job["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec![third.as_str(), second.as_str(), first.as_str()]);

    let limited = fixture.get("/api/downloads?limit=2").await;
    assert_eq!(limited.body.as_array().unwrap().len(), 2);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn test_download_completes_via_fallback_mirror() {
    let fixture = TestFixture::new().await;
    fixture
        .capture
        .set_script("mirror-a", CaptureScript::SoftFail("HTTP 503".into()))
        .await;

    let id = create(&fixture, movie("Dune", &["mirror-a", "mirror-b"])).await;
    let job = fixture.wait_for_status(&id, "completed").await;

    assert_eq!(job["candidate_index"], 1);
    assert_eq!(job["progress"], 100);
    assert_eq!(job["task"], "Download completed");
    assert!(job["file_path"].as_str().unwrap().ends_with(".mp4"));
    assert_eq!(fixture.capture.calls().await, vec!["mirror-a", "mirror-b"]);
}

#[tokio::test]
async fn test_download_fails_on_hard_failure() {
    let fixture = TestFixture::new().await;
    fixture
        .capture
        .set_script("mirror-a", CaptureScript::HardFail("removed".into()))
        .await;

    let id = create(&fixture, movie("Gone", &["mirror-a", "mirror-b"])).await;
    let job = fixture.wait_for_status(&id, "failed").await;

    assert!(job["error"].as_str().unwrap().contains("removed"));
    assert!(job.get("file_path").is_none());
    assert_eq!(fixture.capture.calls().await, vec!["mirror-a"]);
}

#[tokio::test]
async fn test_cancel_queued_download_never_touches_adapters() {
    let fixture = TestFixture::new().await;
    fixture
        .transfer
        .push_script("mirror-busy", TransferScript::Cooperative)
        .await;

    let running = create(&fixture, movie("Running", &["mirror-busy"])).await;
    fixture.wait_for_status(&running, "downloading").await;

    let queued = create(&fixture, movie("Waiting", &["mirror-queued"])).await;
    let response = fixture
        .post_empty(&format!("/api/downloads/{}/cancel", queued))
        .await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "cancelled");
    assert!(!fixture
        .capture
        .calls()
        .await
        .contains(&"mirror-queued".to_string()));

    fixture
        .post_empty(&format!("/api/downloads/{}/cancel", running))
        .await;
    fixture.wait_for_status(&running, "cancelled").await;
}

#[tokio::test]
async fn test_cancel_running_download() {
    let fixture = TestFixture::new().await;
    fixture
        .transfer
        .push_script("mirror-a", TransferScript::Cooperative)
        .await;

    let id = create(&fixture, movie("Slow", &["mirror-a"])).await;
    fixture.wait_for_status(&id, "downloading").await;

    let response = fixture
        .post_empty(&format!("/api/downloads/{}/cancel", id))
        .await;
    assert_eq!(response.status, StatusCode::OK);

    let job = fixture.wait_for_status(&id, "cancelled").await;
    assert_eq!(job["task"], "Cancelled");
}

#[tokio::test]
async fn test_cancel_ignored_by_adapter_is_forced_after_grace() {
    let fixture = TestFixture::with_config(TestConfig {
        cancel_grace_ms: 50,
        ..Default::default()
    })
    .await;
    fixture
        .transfer
        .push_script("mirror-a", TransferScript::IgnoreCancel)
        .await;

    let id = create(&fixture, movie("Stubborn", &["mirror-a"])).await;
    fixture.wait_for_status(&id, "downloading").await;

    fixture
        .post_empty(&format!("/api/downloads/{}/cancel", id))
        .await;
    fixture.wait_for_status(&id, "cancelled").await;
}

#[tokio::test]
async fn test_cancel_finished_download_conflicts() {
    let fixture = TestFixture::new().await;

    let id = create(&fixture, movie("Done", &["mirror-a"])).await;
    fixture.wait_for_status(&id, "completed").await;

    let response = fixture
        .post_empty(&format!("/api/downloads/{}/cancel", id))
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_retry_failed_download_with_new_candidates() {
    let fixture = TestFixture::new().await;
    fixture
        .capture
        .set_script("mirror-dead", CaptureScript::SoftFail("timeout".into()))
        .await;

    let id = create(&fixture, movie("Arrival", &["mirror-dead"])).await;
    let failed = fixture.wait_for_status(&id, "failed").await;
    assert!(failed["error"].as_str().unwrap().contains("all 1 mirrors failed"));

    let response = fixture
        .post(
            &format!("/api/downloads/{}/retry", id),
            json!({ "candidates": [{ "endpoint": "mirror-fresh", "rank": 0 }] }),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);

    let job = fixture.wait_for_status(&id, "completed").await;
    assert_eq!(job["candidates"][0]["endpoint"], "mirror-fresh");
    assert_eq!(job["candidate_index"], 0);
    assert!(job.get("error").is_none());
}

#[tokio::test]
async fn test_retry_without_body_reuses_candidates() {
    let fixture = TestFixture::new().await;
    fixture
        .transfer
        .push_script("mirror-a", TransferScript::HardFail("403".into()))
        .await;

    let id = create(&fixture, movie("Again", &["mirror-a"])).await;
    fixture.wait_for_status(&id, "failed").await;

    let response = fixture
        .post_empty(&format!("/api/downloads/{}/retry", id))
        .await;
    assert_eq!(response.status, StatusCode::OK);

    fixture.wait_for_status(&id, "completed").await;
    assert_eq!(fixture.transfer.calls().await, vec!["mirror-a", "mirror-a"]);
}

#[tokio::test]
async fn test_retry_running_download_conflicts() {
    let fixture = TestFixture::new().await;
    fixture
        .transfer
        .push_script("mirror-a", TransferScript::Cooperative)
        .await;

    let id = create(&fixture, movie("Busy", &["mirror-a"])).await;
    fixture.wait_for_status(&id, "downloading").await;

    let response = fixture
        .post_empty(&format!("/api/downloads/{}/retry", id))
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);

    fixture
        .post_empty(&format!("/api/downloads/{}/cancel", id))
        .await;
    fixture.wait_for_status(&id, "cancelled").await;
}

#[tokio::test]
async fn test_delete_running_download_conflicts() {
    let fixture = TestFixture::new().await;
    fixture
        .transfer
        .push_script("mirror-a", TransferScript::Cooperative)
        .await;

    let id = create(&fixture, movie("Busy", &["mirror-a"])).await;
    fixture.wait_for_status(&id, "downloading").await;

    let response = fixture.delete(&format!("/api/downloads/{}", id)).await;
    assert_eq!(response.status, StatusCode::CONFLICT);

    fixture
        .post_empty(&format!("/api/downloads/{}/cancel", id))
        .await;
    fixture.wait_for_status(&id, "cancelled").await;
}

#[tokio::test]
async fn test_delete_completed_download_removes_file() {
    let fixture = TestFixture::new().await;

    let id = create(&fixture, movie("Keepsake", &["mirror-a"])).await;
    let job = fixture.wait_for_status(&id, "completed").await;
    let file_path = std::path::PathBuf::from(job["file_path"].as_str().unwrap());
    assert!(file_path.exists());

    let response = fixture.delete(&format!("/api/downloads/{}", id)).await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(!file_path.exists());

    let response = fixture.get(&format!("/api/downloads/{}", id)).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_events_published_for_api_commands() {
    let fixture = TestFixture::new().await;
    let mut subscription = fixture.events.subscribe();

    let id = create(&fixture, movie("Observed", &["mirror-a"])).await;
    fixture.wait_for_status(&id, "completed").await;

    let first = subscription.recv().await.unwrap();
    let first = serde_json::to_value(&first).unwrap();
    assert_eq!(first["type"], "new");
    assert_eq!(first["download"]["id"], id.as_str());
    assert_eq!(first["download"]["type"], "movie");

    // The final update may land just after the record becomes visible
    let completed = tokio::time::timeout(std::time::Duration::from_secs(2), async {
        loop {
            let event = serde_json::to_value(subscription.recv().await.unwrap()).unwrap();
            if event["status"] == "completed" {
                return event;
            }
        }
    })
    .await
    .expect("no completion event");

    assert_eq!(completed["type"], "update");
    assert_eq!(completed["id"], id.as_str());
    assert_eq!(completed["progress"], 100);
}
