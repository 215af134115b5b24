//! Payment checkout and webhook integration tests.

mod common;

use common::{job_row, TestHarness, USER, WEBHOOK_SECRET};
use axum::http::StatusCode;
use serde_json::json;

use tresbill_service::crypto::hmac_sha256_hex;

/// Issue a receipt and start a checkout; returns (`receipt_id`,
/// `external_payment_id`, `amount_cents`).
async fn checkout_fixture(harness: &TestHarness) -> (i64, String, i64) {
    let admin = harness.admin_auth().await;
    let created = harness
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
    created.assert_status_ok();
    let body: serde_json::Value = created.json();
    let receipt_id = body["receipt_id"].as_i64().expect("receipt id");

    let user = harness.user_auth().await;
    let checkout = harness
        .server
        .post(&format!("/v1/payments/receipt/{receipt_id}/start"))
        .add_header("authorization", user.clone())
        .await;
    checkout.assert_status_ok();
    let body: serde_json::Value = checkout.json();
    let payment_id = body["payment_id"].as_i64().expect("payment id");
    let amount_cents = body["amount_cents"].as_i64().expect("amount");

    let payment = harness
        .server
        .get(&format!("/v1/payments/{payment_id}"))
        .add_header("authorization", user)
        .await;
    payment.assert_status_ok();
    let body: serde_json::Value = payment.json();
    let external = body["external_payment_id"]
        .as_str()
        .expect("external payment id")
        .to_string();

    (receipt_id, external, amount_cents)
}

fn success_event(event_id: &str, external: &str, amount: i64, currency: &str) -> String {
    json!({
        "id": event_id,
        "type": "payment.succeeded",
        "data": {"object": {"id": external, "amount": amount, "currency": currency}},
    })
    .to_string()
}

async fn deliver(harness: &TestHarness, body: &str, signature: &str) -> axum_test::TestResponse {
    harness
        .server
        .post("/payments/webhook")
        .add_header("x-webhook-signature", signature.to_string())
        .text(body.to_string())
        .await
}

// ============================================================================
// Settlement
// ============================================================================

#[tokio::test]
async fn signed_success_event_settles_the_receipt() {
    let harness = TestHarness::new().await;
    let (receipt_id, external, amount) = checkout_fixture(&harness).await;

    let body = success_event("evt_1", &external, amount, "THB");
    let sig = hmac_sha256_hex(WEBHOOK_SECRET, &body);
    deliver(&harness, &body, &sig).await.assert_status_ok();

    let receipt = harness.store.require_receipt(receipt_id).await.unwrap();
    assert_eq!(receipt.status, "paid");
    assert_eq!(receipt.method.as_deref(), Some("auto:dummy"));
    assert_eq!(receipt.tx_ref.as_deref(), Some(external.as_str()));

    // Replay of the same event is recorded once and changes nothing.
    deliver(&harness, &body, &sig).await.assert_status_ok();
    let receipt = harness.store.require_receipt(receipt_id).await.unwrap();
    assert_eq!(receipt.status, "paid");

    let event_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM payment_events WHERE external_event_id = 'evt_1'")
            .fetch_one(harness.store.pool())
            .await
            .unwrap();
    assert_eq!(event_count, 1);
}

#[tokio::test]
async fn checkout_reuses_the_pending_intent() {
    let harness = TestHarness::new().await;
    let (receipt_id, external, _) = checkout_fixture(&harness).await;

    let user = harness.user_auth().await;
    let again = harness
        .server
        .post(&format!("/v1/payments/receipt/{receipt_id}/start"))
        .add_header("authorization", user.clone())
        .await;
    again.assert_status_ok();
    let body: serde_json::Value = again.json();
    let payment_id = body["payment_id"].as_i64().expect("payment id");

    let payment = harness
        .server
        .get(&format!("/v1/payments/{payment_id}"))
        .add_header("authorization", user)
        .await;
    let body: serde_json::Value = payment.json();
    assert_eq!(body["external_payment_id"].as_str(), Some(external.as_str()));
}

// ============================================================================
// Refusals
// ============================================================================

#[tokio::test]
async fn amount_mismatch_does_not_settle() {
    let harness = TestHarness::new().await;
    let (receipt_id, external, amount) = checkout_fixture(&harness).await;

    let body = success_event("evt_1", &external, amount - 1, "THB");
    let sig = hmac_sha256_hex(WEBHOOK_SECRET, &body);
    deliver(&harness, &body, &sig).await.assert_status_ok();

    let receipt = harness.store.require_receipt(receipt_id).await.unwrap();
    assert_eq!(receipt.status, "pending");

    // Currency mismatch is refused the same way.
    let body = success_event("evt_2", &external, amount, "USD");
    let sig = hmac_sha256_hex(WEBHOOK_SECRET, &body);
    deliver(&harness, &body, &sig).await.assert_status_ok();
    let receipt = harness.store.require_receipt(receipt_id).await.unwrap();
    assert_eq!(receipt.status, "pending");

    // Exact report settles.
    let body = success_event("evt_3", &external, amount, "thb");
    let sig = hmac_sha256_hex(WEBHOOK_SECRET, &body);
    deliver(&harness, &body, &sig).await.assert_status_ok();
    let receipt = harness.store.require_receipt(receipt_id).await.unwrap();
    assert_eq!(receipt.status, "paid");
}

#[tokio::test]
async fn bad_signature_is_rejected_but_recorded() {
    let harness = TestHarness::new().await;
    let (receipt_id, external, amount) = checkout_fixture(&harness).await;

    let body = success_event("evt_1", &external, amount, "THB");
    let response = deliver(&harness, &body, "forged").await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let receipt = harness.store.require_receipt(receipt_id).await.unwrap();
    assert_eq!(receipt.status, "pending");

    // The delivery is still on record, flagged unverified.
    let signature_ok: i64 = sqlx::query_scalar(
        "SELECT signature_ok FROM payment_events WHERE external_event_id = 'evt_1'",
    )
    .fetch_one(harness.store.pool())
    .await
    .unwrap();
    assert_eq!(signature_ok, 0);
}

#[tokio::test]
async fn checkout_requires_ownership() {
    let harness = TestHarness::new().await;
    let (receipt_id, _, _) = checkout_fixture(&harness).await;

    let admin = harness.admin_auth().await;
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
        .post(&format!("/v1/payments/receipt/{receipt_id}/start"))
        .add_header("authorization", stranger)
        .await
        .assert_status(StatusCode::FORBIDDEN);
}
