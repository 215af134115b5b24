//! Pricing formula integration tests.

mod common;

use common::TestHarness;
use axum::http::StatusCode;
use serde_json::json;

// ============================================================================
// Published formula
// ============================================================================

#[tokio::test]
async fn formula_is_public_and_etag_cached() {
    let harness = TestHarness::new().await;

    let response = harness.server.get("/formula").await;
    response.assert_status_ok();
    let etag = response
        .headers()
        .get("etag")
        .and_then(|v| v.to_str().ok())
        .expect("etag header")
        .to_string();
    assert!(etag.starts_with("W/\""));

    let body: serde_json::Value = response.json();
    assert_eq!(body["unit"], "per-hour");
    assert_eq!(body["currency"], "THB");
    assert_eq!(body["tiers"]["private"]["cpu"], 5.0);

    // Replay with the tag - not modified.
    let cached = harness
        .server
        .get("/formula")
        .add_header("if-none-match", etag)
        .await;
    assert_eq!(cached.status_code(), 304);
}

#[tokio::test]
async fn formula_single_tier_shape() {
    let harness = TestHarness::new().await;

    let response = harness.server.get("/formula?type=gov").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["type"], "gov");
    assert_eq!(body["rates"]["cpu"], 3.0);
    assert_eq!(body["rates"]["gpu"], 10.0);

    harness
        .server
        .get("/formula?type=platinum")
        .await
        .assert_status_bad_request();
}

// ============================================================================
// Rate updates
// ============================================================================

#[tokio::test]
async fn admin_updates_rates_and_etag_moves() {
    let harness = TestHarness::new().await;
    let admin = harness.admin_auth().await;

    let before = harness.server.get("/formula?type=gov").await;
    let old_etag = before
        .headers()
        .get("etag")
        .and_then(|v| v.to_str().ok())
        .expect("etag header")
        .to_string();

    harness
        .server
        .post("/formula")
        .add_header("authorization", admin)
        .json(&json!({"type": "gov", "cpu": 4.0, "gpu": 12.0, "mem": 1.5}))
        .await
        .assert_status_ok();

    let after = harness.server.get("/formula?type=gov").await;
    after.assert_status_ok();
    let body: serde_json::Value = after.json();
    assert_eq!(body["rates"]["cpu"], 4.0);

    let new_etag = after
        .headers()
        .get("etag")
        .and_then(|v| v.to_str().ok())
        .expect("etag header");
    assert_ne!(old_etag, new_etag);
}

#[tokio::test]
async fn rate_update_validation() {
    let harness = TestHarness::new().await;
    let admin = harness.admin_auth().await;

    // Unknown tier
    harness
        .server
        .post("/formula")
        .add_header("authorization", admin.clone())
        .json(&json!({"type": "platinum", "cpu": 1.0, "gpu": 1.0, "mem": 1.0}))
        .await
        .assert_status_bad_request();

    // Negative rate
    harness
        .server
        .post("/formula")
        .add_header("authorization", admin.clone())
        .json(&json!({"type": "gov", "cpu": -1.0, "gpu": 1.0, "mem": 1.0}))
        .await
        .assert_status_bad_request();

    // Non-numeric rate
    harness
        .server
        .post("/formula")
        .add_header("authorization", admin)
        .json(&json!({"type": "gov", "cpu": "three", "gpu": 1.0, "mem": 1.0}))
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn rate_update_requires_admin() {
    let harness = TestHarness::new().await;
    let user = harness.user_auth().await;

    harness
        .server
        .post("/formula")
        .add_header("authorization", user)
        .json(&json!({"type": "gov", "cpu": 4.0, "gpu": 12.0, "mem": 1.5}))
        .await
        .assert_status(StatusCode::FORBIDDEN);

    harness
        .server
        .post("/formula")
        .json(&json!({"type": "gov", "cpu": 4.0, "gpu": 12.0, "mem": 1.5}))
        .await
        .assert_status_unauthorized();
}
