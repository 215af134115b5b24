//! Receipt lifecycle and auth integration tests.

mod common;

use common::{job_row, TestHarness, USER};
use axum::http::StatusCode;
use serde_json::json;

use tresbill_core::BatchKind;

// ============================================================================
// Receipt issuance
// ============================================================================

#[tokio::test]
async fn admin_issues_receipt_and_ledger_follows() {
    let harness = TestHarness::new().await;
    let admin = harness.admin_auth().await;

    // Two rows for the billed user, one foreign row that must be dropped.
    let response = harness
        .server
        .post("/v1/admin/receipts")
        .add_header("authorization", admin)
        .json(&json!({
            "username": USER.0,
            "start": "2025-03-01",
            "end": "2025-03-31",
            "jobs": [job_row(USER.0, "1001"), job_row(USER.0, "1002"), job_row("someone-else", "2001")],
        }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();

    // 2 cpu-cores x 10h x 5 THB + 4 GB x 10h x 2 THB = 180 THB per job.
    assert_eq!(body["inserted"], 2);
    assert_eq!(body["total_cents"], 36_000);
    let receipt_id = body["receipt_id"].as_i64().expect("receipt id");

    // Accrual and issue batches were posted alongside.
    let accrual = harness
        .store
        .find_batch(&format!("R{receipt_id}"), BatchKind::Accrual)
        .await
        .unwrap();
    assert!(accrual.is_some());
    let issue = harness
        .store
        .find_batch(&format!("R{receipt_id}"), BatchKind::Issue)
        .await
        .unwrap();
    assert!(issue.is_some());
}

#[tokio::test]
async fn duplicate_jobs_do_not_bill_twice() {
    let harness = TestHarness::new().await;
    let admin = harness.admin_auth().await;

    let first = harness
        .server
        .post("/v1/admin/receipts")
        .add_header("authorization", admin.clone())
        .json(&json!({
            "username": USER.0,
            "start": "2025-03-01",
            "end": "2025-03-31",
            "jobs": [job_row(USER.0, "1001")],
        }))
        .await;
    first.assert_status_ok();

    let replay = harness
        .server
        .post("/v1/admin/receipts")
        .add_header("authorization", admin)
        .json(&json!({
            "username": USER.0,
            "start": "2025-03-01",
            "end": "2025-03-31",
            "jobs": [job_row(USER.0, "1001")],
        }))
        .await;
    replay.assert_status_ok();
    let body: serde_json::Value = replay.json();
    assert_eq!(body["inserted"], 0);
    assert_eq!(body["skipped"], 1);
    assert_eq!(body["total_cents"], 0);
}

// ============================================================================
// Access control
// ============================================================================

#[tokio::test]
async fn receipts_are_owner_or_admin_only() {
    let harness = TestHarness::new().await;
    let admin = harness.admin_auth().await;

    harness
        .server
        .post("/v1/admin/receipts")
        .add_header("authorization", admin.clone())
        .json(&json!({
            "username": USER.0,
            "start": "2025-03-01",
            "end": "2025-03-31",
            "jobs": [job_row(USER.0, "1001")],
        }))
        .await
        .assert_status_ok();

    // Owner sees it, with items.
    let user = harness.user_auth().await;
    let own = harness
        .server
        .get("/v1/receipts/1")
        .add_header("authorization", user.clone())
        .await;
    own.assert_status_ok();
    let body: serde_json::Value = own.json();
    assert_eq!(body["username"], USER.0);
    assert_eq!(body["items"].as_array().map(Vec::len), Some(1));

    // Admin sees it too.
    harness
        .server
        .get("/v1/receipts/1")
        .add_header("authorization", admin.clone())
        .await
        .assert_status_ok();

    // A third user does not.
    harness
        .server
        .post("/v1/admin/users")
        .add_header("authorization", admin)
        .json(&json!({"username": "stranger9", "password": "stranger-pass-1"}))
        .await
        .assert_status_ok();
    let stranger = harness.login("stranger9", "stranger-pass-1").await;
    harness
        .server
        .get("/v1/receipts/1")
        .add_header("authorization", stranger)
        .await
        .assert_status(StatusCode::FORBIDDEN);

    // Own list shows exactly the one receipt.
    let list = harness
        .server
        .get("/v1/receipts")
        .add_header("authorization", user)
        .await;
    list.assert_status_ok();
    let body: serde_json::Value = list.json();
    assert_eq!(body.as_array().map(Vec::len), Some(1));
}

#[tokio::test]
async fn admin_routes_refuse_users() {
    let harness = TestHarness::new().await;
    let user = harness.user_auth().await;

    harness
        .server
        .get("/v1/admin/receipts")
        .add_header("authorization", user)
        .await
        .assert_status(StatusCode::FORBIDDEN);

    harness
        .server
        .get("/v1/admin/receipts")
        .await
        .assert_status_unauthorized();
}

// ============================================================================
// Settlement lifecycle
// ============================================================================

#[tokio::test]
async fn manual_paid_flow_is_guarded() {
    let harness = TestHarness::new().await;
    let admin = harness.admin_auth().await;

    harness
        .server
        .post("/v1/admin/receipts")
        .add_header("authorization", admin.clone())
        .json(&json!({
            "username": USER.0,
            "start": "2025-03-01",
            "end": "2025-03-31",
            "jobs": [job_row(USER.0, "1001")],
        }))
        .await
        .assert_status_ok();

    harness
        .server
        .post("/v1/admin/receipts/1/paid")
        .add_header("authorization", admin.clone())
        .await
        .assert_status_ok();

    // Second mark-paid conflicts.
    harness
        .server
        .post("/v1/admin/receipts/1/paid")
        .add_header("authorization", admin.clone())
        .await
        .assert_status(StatusCode::CONFLICT);

    // Paid receipts cannot be voided.
    harness
        .server
        .post("/v1/admin/receipts/1/void")
        .add_header("authorization", admin.clone())
        .await
        .assert_status(StatusCode::CONFLICT);

    // But they can be reverted, and then voided.
    harness
        .server
        .post("/v1/admin/receipts/1/revert")
        .add_header("authorization", admin.clone())
        .await
        .assert_status_ok();
    harness
        .server
        .post("/v1/admin/receipts/1/void")
        .add_header("authorization", admin)
        .await
        .assert_status_ok();
}

// ============================================================================
// Login throttle
// ============================================================================

#[tokio::test]
async fn repeated_failures_lock_the_account() {
    let harness = TestHarness::new().await;

    for _ in 0..5 {
        harness
            .server
            .post("/auth/login")
            .json(&json!({"username": USER.0, "password": "wrong-password"}))
            .await
            .assert_status_unauthorized();
    }

    // Correct password no longer helps until the lock expires.
    let locked = harness
        .server
        .post("/auth/login")
        .json(&json!({"username": USER.0, "password": USER.1}))
        .await;
    assert_eq!(locked.status_code(), 429);
    let body: serde_json::Value = locked.json();
    assert_eq!(body["error"]["code"], "locked");

    // The audit chain recorded the attempts and still verifies.
    let report = harness.store.verify_chain(None).await.unwrap();
    assert!(report.ok);
    assert!(report.checked >= 6);
}
