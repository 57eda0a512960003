//! Integration tests for the internal orchestrator API.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{TEST_TOKEN, TestServer};
use serde_json::{Value, json};
use strata_core::config::AppConfig;
use tower::ServiceExt;

/// Helper to make JSON requests.
async fn json_request(
    router: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    auth_token: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some(token) = auth_token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }

    let body = match body {
        Some(v) => {
            builder = builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => Body::empty(),
    };

    let request = builder.body(body).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let json: Value = if body_bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
    };

    (status, json)
}

#[tokio::test]
async fn test_endpoints_require_bearer_token() {
    let server = TestServer::new().await;

    for uri in [
        "/internal/sync",
        "/internal/storage/cleanup",
        "/internal/prepare-rotation",
    ] {
        let (status, body) = json_request(&server.router, "POST", uri, None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
        assert_eq!(body["code"], "unauthorized");

        let (status, _) =
            json_request(&server.router, "POST", uri, None, Some("wrong-token")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri} with bad token");
    }
}

#[tokio::test]
async fn test_health_is_unauthenticated() {
    let server = TestServer::new().await;
    let (status, body) = json_request(&server.router, "GET", "/internal/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["catalog"], "ok");
    assert_eq!(body["persistent_tier"], true);
}

#[tokio::test]
async fn test_sync_promotes_and_rejects() {
    let server = TestServer::new().await;
    server.seed_catalog("2026/f1", b"hello").await;
    server.put_ephemeral("2026/f1", b"hello").await;
    server.put_ephemeral("f2", b"evil").await;

    let (status, body) = json_request(
        &server.router,
        "POST",
        "/internal/sync",
        None,
        Some(TEST_TOKEN),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["files_synced"], 1);
    assert_eq!(body["files_rejected"], 1);

    // The legitimate file reached the persistent tier, the intruder is gone
    let promoted = tokio::fs::read(server.persistent_root.join("files/2026/f1"))
        .await
        .unwrap();
    assert_eq!(promoted, b"hello");
    assert!(!server.ephemeral_root.join("files/f2").exists());
}

#[tokio::test]
async fn test_cleanup_dry_run_then_real() {
    let server = TestServer::new().await;
    server.seed_catalog("keep", b"data").await;
    server.put_persistent("keep", b"data").await;
    server.put_persistent("ghost", b"old").await;

    let (status, body) = json_request(
        &server.router,
        "POST",
        "/internal/storage/cleanup",
        Some(json!({"dry_run": true})),
        Some(TEST_TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["dry_run"], true);
    assert_eq!(body["deleted_persistent"], json!(["ghost"]));
    assert!(server.persistent_root.join("files/ghost").exists());

    // No body defaults to a real run
    let (status, body) = json_request(
        &server.router,
        "POST",
        "/internal/storage/cleanup",
        None,
        Some(TEST_TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["dry_run"], false);
    assert_eq!(body["deleted_persistent"], json!(["ghost"]));
    assert!(!server.persistent_root.join("files/ghost").exists());
    assert!(server.persistent_root.join("files/keep").exists());
}

#[tokio::test]
async fn test_prepare_rotation_reports_full_run() {
    let server = TestServer::new().await;
    server.seed_catalog("a", b"alpha").await;
    server.seed_catalog("b", b"beta").await;
    server.put_ephemeral("a", b"alpha").await;
    server.put_ephemeral("b", b"beta").await;
    server.put_ephemeral("intruder", b"evil").await;

    let (status, body) = json_request(
        &server.router,
        "POST",
        "/internal/prepare-rotation",
        None,
        Some(TEST_TOKEN),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "done");
    assert_eq!(body["validated"], 3);
    assert_eq!(body["deleted_suspicious"], 1);
    assert_eq!(body["promoted"], 2);
    assert_eq!(body["missing_count"], 0);
    assert_eq!(body["verification_ok"], true);
    assert_eq!(body["overall_success"], true);
}

#[tokio::test]
async fn test_rotation_reports_failure_without_erroring() {
    let server = TestServer::new().await;
    // Catalog promises a file that exists nowhere
    server.seed_catalog("missing", b"data").await;

    let (status, body) = json_request(
        &server.router,
        "POST",
        "/internal/prepare-rotation",
        None,
        Some(TEST_TOKEN),
    )
    .await;

    // Still a 200: the report is the product, the orchestrator decides
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["missing_count"], 1);
    assert_eq!(body["verification_ok"], false);
    assert_eq!(body["overall_success"], false);
}

#[tokio::test]
async fn test_sync_trigger_rate_limited() {
    let mut config = AppConfig::for_testing();
    config.sync.orphan_grace_secs = 0;
    config.rate_limit.enabled = true;
    config.rate_limit.sync_min_interval_secs = 3600;
    let server = TestServer::with_config(config).await;

    let (status, _) = json_request(
        &server.router,
        "POST",
        "/internal/sync",
        None,
        Some(TEST_TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = json_request(
        &server.router,
        "POST",
        "/internal/sync",
        None,
        Some(TEST_TOKEN),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], "rate_limited");
}

#[tokio::test]
async fn test_sync_is_idempotent_over_http() {
    let server = TestServer::new().await;
    server.seed_catalog("f1", b"hello").await;
    server.put_ephemeral("f1", b"hello").await;

    for _ in 0..2 {
        let (status, body) = json_request(
            &server.router,
            "POST",
            "/internal/sync",
            None,
            Some(TEST_TOKEN),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["files_synced"], 1);
        assert_eq!(body["files_rejected"], 0);
    }
}
